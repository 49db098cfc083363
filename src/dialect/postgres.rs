//! PostgreSQL dialect
//!
//! Rebuilds DDL from the system catalogs. Reconstructed statements are
//! replay-safe (`IF NOT EXISTS` / `OR REPLACE`) so a restore can run against a
//! database where the object survived.

use async_trait::async_trait;
use deadpool_postgres::{Client, Pool};
use tracing::debug;

use super::{quote_double, DataInfo, Dialect, ObjectDefinition};
use crate::error::{not_found_error, unsupported_error, AppError};
use crate::models::{
    DeleteScope, DependentReference, ObjectDetails, ObjectReference, ObjectType, ProviderType,
};

const DEFAULT_SCHEMA: &str = "public";

const RELKIND_QUERY: &str = r#"
    SELECT c.relkind::text AS relkind
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relname = $2
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        a.attname::text AS column_name,
        pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
        a.attnotnull AS not_null,
        pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS default_value
    FROM pg_catalog.pg_attribute a
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE a.attrelid = $1::text::regclass
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

const CONSTRAINTS_QUERY: &str = r#"
    SELECT
        con.conname::text AS constraint_name,
        con.contype::text AS kind,
        pg_catalog.pg_get_constraintdef(con.oid, true) AS definition
    FROM pg_catalog.pg_constraint con
    WHERE con.conrelid = $1::text::regclass
      AND con.contype IN ('p', 'u', 'c', 'f', 'x')
    ORDER BY
        CASE con.contype WHEN 'p' THEN 0 WHEN 'u' THEN 1 WHEN 'c' THEN 2 WHEN 'x' THEN 3 ELSE 4 END,
        con.conname
"#;

const FUNCTION_QUERY: &str = r#"
    SELECT
        p.oid,
        pg_catalog.pg_get_functiondef(p.oid) AS definition,
        l.lanname::text AS language,
        pg_catalog.pg_get_function_identity_arguments(p.oid) AS arguments
    FROM pg_catalog.pg_proc p
    JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
    JOIN pg_catalog.pg_language l ON l.oid = p.prolang
    WHERE n.nspname = $1 AND p.proname = $2 AND p.prokind = 'f'
    ORDER BY p.oid
    LIMIT 1
"#;

const INDEX_QUERY: &str = r#"
    SELECT
        i.indexrelid AS oid,
        pg_catalog.pg_get_indexdef(i.indexrelid) AS definition,
        t.relname::text AS table_name,
        i.indisunique AS is_unique
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class c ON c.oid = i.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = i.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relname = $2
"#;

const TRIGGER_QUERY: &str = r#"
    SELECT
        t.oid,
        pg_catalog.pg_get_triggerdef(t.oid, true) AS definition,
        c.relname::text AS table_name,
        t.tgtype::integer AS tgtype
    FROM pg_catalog.pg_trigger t
    JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND t.tgname = $2 AND NOT t.tgisinternal
    ORDER BY t.oid
    LIMIT 1
"#;

const TABLE_DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT (rn.nspname || '.' || rc.relname)::text AS dependency
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class rc ON rc.oid = con.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rc.relnamespace
    WHERE con.contype = 'f'
      AND con.conrelid = $1::text::regclass
      AND con.confrelid <> con.conrelid
    ORDER BY 1
"#;

const VIEW_DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT (sn.nspname || '.' || src.relname)::text AS dependency
    FROM pg_catalog.pg_depend d
    JOIN pg_catalog.pg_rewrite r ON r.oid = d.objid
    JOIN pg_catalog.pg_class src ON src.oid = d.refobjid
    JOIN pg_catalog.pg_namespace sn ON sn.oid = src.relnamespace
    WHERE r.ev_class = $1::text::regclass
      AND d.classid = 'pg_catalog.pg_rewrite'::regclass
      AND d.refobjid <> r.ev_class
    ORDER BY 1
"#;

const CATALOG_DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT pg_catalog.pg_describe_object(d.refclassid, d.refobjid, 0) AS dependency
    FROM pg_catalog.pg_depend d
    WHERE d.classid = $1::text::regclass
      AND d.objid = $2
      AND d.deptype IN ('n', 'a')
      AND d.refclassid <> 'pg_catalog.pg_namespace'::regclass
    ORDER BY 1
"#;

/// Column as read from `pg_attribute`
#[derive(Debug, Clone)]
struct ColumnSpec {
    name: String,
    data_type: String,
    not_null: bool,
    default_value: Option<String>,
}

/// Table-level constraint as rendered by `pg_get_constraintdef`
#[derive(Debug, Clone)]
struct ConstraintSpec {
    name: String,
    kind: String,
    definition: String,
}

/// PostgreSQL implementation of [`Dialect`]
pub struct PostgresDialect {
    pool: Pool,
}

impl PostgresDialect {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn schema(object: &ObjectReference) -> &str {
        if object.schema_name.is_empty() {
            DEFAULT_SCHEMA
        } else {
            &object.schema_name
        }
    }

    /// `"schema"."name"`
    fn qualified(object: &ObjectReference) -> String {
        format!("{}.{}", quote_double(Self::schema(object)), quote_double(&object.name))
    }

    async fn relkind(client: &Client, object: &ObjectReference) -> Result<Option<String>, AppError> {
        let row = client
            .query_opt(RELKIND_QUERY, &[&Self::schema(object), &object.name])
            .await?;
        Ok(row.map(|r| r.get("relkind")))
    }

    async fn table_definition(
        client: &Client,
        object: &ObjectReference,
    ) -> Result<ObjectDefinition, AppError> {
        match Self::relkind(client, object).await?.as_deref() {
            Some("r") | Some("p") => {}
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "{} is not a table (relkind '{}')",
                    object.qualified_name(),
                    other
                )))
            }
            None => return Err(not_found_error(format!("Table {} not found", object.qualified_name()))),
        }

        let qualified = Self::qualified(object);
        let columns: Vec<ColumnSpec> = client
            .query(COLUMNS_QUERY, &[&qualified])
            .await?
            .iter()
            .map(|row| ColumnSpec {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                not_null: row.get("not_null"),
                default_value: row.get("default_value"),
            })
            .collect();

        let constraints: Vec<ConstraintSpec> = client
            .query(CONSTRAINTS_QUERY, &[&qualified])
            .await?
            .iter()
            .map(|row| ConstraintSpec {
                name: row.get("constraint_name"),
                kind: row.get("kind"),
                definition: row.get("definition"),
            })
            .collect();

        let has_primary_key = constraints.iter().any(|c| c.kind == "p");
        let ddl = build_create_table(&qualified, &columns, &constraints);

        Ok(ObjectDefinition {
            ddl,
            details: Some(ObjectDetails::Table {
                column_count: columns.len(),
                has_primary_key,
            }),
        })
    }

    async fn view_definition(
        client: &Client,
        object: &ObjectReference,
    ) -> Result<ObjectDefinition, AppError> {
        let is_materialized = match Self::relkind(client, object).await?.as_deref() {
            Some("v") => false,
            Some("m") => true,
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "{} is not a view (relkind '{}')",
                    object.qualified_name(),
                    other
                )))
            }
            None => return Err(not_found_error(format!("View {} not found", object.qualified_name()))),
        };

        let qualified = Self::qualified(object);
        let row = client
            .query_one("SELECT pg_catalog.pg_get_viewdef($1::text::regclass, true) AS definition", &[&qualified])
            .await?;
        let body: String = row.get("definition");
        let body = body.trim().trim_end_matches(';');

        let ddl = if is_materialized {
            format!("CREATE MATERIALIZED VIEW IF NOT EXISTS {} AS\n{};", qualified, body)
        } else {
            format!("CREATE OR REPLACE VIEW {} AS\n{};", qualified, body)
        };

        Ok(ObjectDefinition {
            ddl,
            details: Some(ObjectDetails::View { is_materialized }),
        })
    }

    async fn function_definition(
        client: &Client,
        object: &ObjectReference,
    ) -> Result<ObjectDefinition, AppError> {
        let row = client
            .query_opt(FUNCTION_QUERY, &[&Self::schema(object), &object.name])
            .await?
            .ok_or_else(|| not_found_error(format!("Function {} not found", object.qualified_name())))?;

        let definition: String = row.get("definition");
        Ok(ObjectDefinition {
            ddl: definition.trim_end().to_string(),
            details: Some(ObjectDetails::Function {
                language: row.get("language"),
                arguments: row.get("arguments"),
            }),
        })
    }

    async fn index_definition(
        client: &Client,
        object: &ObjectReference,
    ) -> Result<ObjectDefinition, AppError> {
        let row = client
            .query_opt(INDEX_QUERY, &[&Self::schema(object), &object.name])
            .await?
            .ok_or_else(|| not_found_error(format!("Index {} not found", object.qualified_name())))?;

        let definition: String = row.get("definition");
        Ok(ObjectDefinition {
            ddl: format!("{};", replay_safe_index(&definition)),
            details: Some(ObjectDetails::Index {
                table_name: row.get("table_name"),
                is_unique: row.get("is_unique"),
            }),
        })
    }

    async fn trigger_definition(
        client: &Client,
        object: &ObjectReference,
    ) -> Result<ObjectDefinition, AppError> {
        let row = client
            .query_opt(TRIGGER_QUERY, &[&Self::schema(object), &object.name])
            .await?
            .ok_or_else(|| not_found_error(format!("Trigger {} not found", object.qualified_name())))?;

        let definition: String = row.get("definition");
        let tgtype: i32 = row.get("tgtype");
        Ok(ObjectDefinition {
            ddl: format!("{};", replay_safe_trigger(&definition)),
            details: Some(ObjectDetails::Trigger {
                table_name: row.get("table_name"),
                timing: trigger_timing(tgtype).to_string(),
            }),
        })
    }

    /// Catalog oid for objects whose dependencies live in `pg_depend`
    async fn catalog_oid(
        client: &Client,
        object: &ObjectReference,
    ) -> Result<(&'static str, u32), AppError> {
        let schema = Self::schema(object);
        let (catalog, row) = match object.object_type {
            ObjectType::Function => (
                "pg_catalog.pg_proc",
                client.query_opt(FUNCTION_QUERY, &[&schema, &object.name]).await?,
            ),
            ObjectType::Index => (
                "pg_catalog.pg_class",
                client.query_opt(INDEX_QUERY, &[&schema, &object.name]).await?,
            ),
            ObjectType::Trigger => (
                "pg_catalog.pg_trigger",
                client.query_opt(TRIGGER_QUERY, &[&schema, &object.name]).await?,
            ),
            other => {
                return Err(unsupported_error(format!(
                    "no catalog lookup for object type {}",
                    other
                )))
            }
        };
        let row = row.ok_or_else(|| not_found_error(format!("{} {} not found", object.object_type, object.qualified_name())))?;
        Ok((catalog, row.get("oid")))
    }

    async fn string_column(
        client: &Client,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<String>, AppError> {
        Ok(client
            .query(sql, params)
            .await?
            .iter()
            .map(|row| row.get::<_, String>("dependency"))
            .collect())
    }
}

#[async_trait]
impl Dialect for PostgresDialect {
    fn provider(&self) -> ProviderType {
        ProviderType::Postgres
    }

    async fn get_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        let client = self.pool.get().await?;
        debug!("Reconstructing DDL for {} {}", object.object_type, object.qualified_name());

        match object.object_type {
            ObjectType::Table => Self::table_definition(&client, object).await,
            ObjectType::View => Self::view_definition(&client, object).await,
            ObjectType::Function => Self::function_definition(&client, object).await,
            ObjectType::Index => Self::index_definition(&client, object).await,
            ObjectType::Trigger => Self::trigger_definition(&client, object).await,
        }
    }

    async fn get_data_info(&self, object: &ObjectReference) -> Result<DataInfo, AppError> {
        if object.object_type != ObjectType::Table {
            return Err(unsupported_error(format!(
                "data info is only available for tables, not {}",
                object.object_type
            )));
        }

        let client = self.pool.get().await?;
        let qualified = Self::qualified(object);
        let mut info = DataInfo::default();

        let checksum_sql = format!(
            "SELECT md5(COALESCE(string_agg(t::text, E'\\n' ORDER BY t::text), '')) AS checksum FROM {} t",
            qualified
        );
        let checksum = client
            .query_one(checksum_sql.as_str(), &[])
            .await
            .map(|row| row.get::<_, String>("checksum"))
            .map_err(AppError::from);
        info.checksum = info.record("data checksum", checksum);

        let count_sql = format!("SELECT COUNT(*) AS row_count FROM {}", qualified);
        let row_count = client
            .query_one(count_sql.as_str(), &[])
            .await
            .map(|row| row.get::<_, i64>("row_count"))
            .map_err(AppError::from);
        info.row_count = info.record("row count", row_count);

        let data_size = client
            .query_one(
                "SELECT pg_catalog.pg_total_relation_size($1::text::regclass) AS data_size",
                &[&qualified],
            )
            .await
            .map(|row| row.get::<_, i64>("data_size"))
            .map_err(AppError::from);
        info.data_size = info.record("data size", data_size);

        Ok(info)
    }

    async fn get_dependencies(&self, object: &ObjectReference) -> Result<Vec<String>, AppError> {
        let client = self.pool.get().await?;
        let qualified = Self::qualified(object);

        match object.object_type {
            ObjectType::Table => {
                Self::string_column(&client, TABLE_DEPENDENCIES_QUERY, &[&qualified]).await
            }
            ObjectType::View => {
                Self::string_column(&client, VIEW_DEPENDENCIES_QUERY, &[&qualified]).await
            }
            ObjectType::Function | ObjectType::Index | ObjectType::Trigger => {
                let (catalog, oid) = Self::catalog_oid(&client, object).await?;
                Self::string_column(&client, CATALOG_DEPENDENCIES_QUERY, &[&catalog, &oid]).await
            }
        }
    }

    async fn count_related(
        &self,
        _primary: &ObjectReference,
        dependent: &DependentReference,
        scope: Option<&DeleteScope>,
    ) -> Result<i64, AppError> {
        let exists = self.object_exists(&dependent.object).await?;
        if dependent.object.object_type != ObjectType::Table {
            return Ok(i64::from(exists));
        }
        if !exists {
            return Ok(0);
        }

        let client = self.pool.get().await?;
        let qualified = Self::qualified(&dependent.object);
        let row = match (scope, dependent.reference_column.as_deref()) {
            (Some(scope), Some(column)) => {
                let sql = format!(
                    "SELECT COUNT(*) AS related FROM {} WHERE {}::text = $1",
                    qualified,
                    quote_double(column)
                );
                client.query_one(sql.as_str(), &[&scope.value]).await?
            }
            _ => {
                let sql = format!("SELECT COUNT(*) AS related FROM {}", qualified);
                client.query_one(sql.as_str(), &[]).await?
            }
        };
        Ok(row.get("related"))
    }

    async fn delete(
        &self,
        primary: &ObjectReference,
        scope: Option<&DeleteScope>,
    ) -> Result<u64, AppError> {
        let client = self.pool.get().await?;
        let qualified = Self::qualified(primary);

        if let Some(scope) = scope {
            if primary.object_type != ObjectType::Table {
                return Err(AppError::BadRequest(format!(
                    "row-level delete requires a table, got {}",
                    primary.object_type
                )));
            }
            let sql = format!(
                "DELETE FROM {} WHERE {}::text = $1",
                qualified,
                quote_double(&scope.column)
            );
            let affected = client.execute(sql.as_str(), &[&scope.value]).await?;
            debug!("Deleted {} row(s) from {}", affected, qualified);
            return Ok(affected);
        }

        let sql = match primary.object_type {
            ObjectType::Table => format!("DROP TABLE {} CASCADE", qualified),
            ObjectType::View => match Self::relkind(&client, primary).await?.as_deref() {
                Some("m") => format!("DROP MATERIALIZED VIEW {} CASCADE", qualified),
                _ => format!("DROP VIEW {} CASCADE", qualified),
            },
            ObjectType::Function => format!("DROP FUNCTION {} CASCADE", qualified),
            ObjectType::Index => format!("DROP INDEX {} CASCADE", qualified),
            ObjectType::Trigger => {
                let row = client
                    .query_opt(TRIGGER_QUERY, &[&Self::schema(primary), &primary.name])
                    .await?
                    .ok_or_else(|| not_found_error(format!("Trigger {} not found", primary.qualified_name())))?;
                let table_name: String = row.get("table_name");
                format!(
                    "DROP TRIGGER {} ON {}.{} CASCADE",
                    quote_double(&primary.name),
                    quote_double(Self::schema(primary)),
                    quote_double(&table_name)
                )
            }
        };

        client.batch_execute(&sql).await?;
        debug!("Executed: {}", sql);
        Ok(0)
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn object_exists(&self, object: &ObjectReference) -> Result<bool, AppError> {
        let client = self.pool.get().await?;
        let schema = Self::schema(object);

        let row = match object.object_type {
            ObjectType::Table | ObjectType::View | ObjectType::Index => {
                client
                    .query_one(
                        "SELECT pg_catalog.to_regclass($1) IS NOT NULL AS present",
                        &[&Self::qualified(object)],
                    )
                    .await?
            }
            ObjectType::Function => {
                client
                    .query_one(
                        "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_proc p \
                         JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
                         WHERE n.nspname = $1 AND p.proname = $2) AS present",
                        &[&schema, &object.name],
                    )
                    .await?
            }
            ObjectType::Trigger => {
                client
                    .query_one(
                        "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_trigger t \
                         JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid \
                         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                         WHERE n.nspname = $1 AND t.tgname = $2 AND NOT t.tgisinternal) AS present",
                        &[&schema, &object.name],
                    )
                    .await?
            }
        };
        Ok(row.get("present"))
    }
}

/// Render a `CREATE TABLE IF NOT EXISTS` statement from catalog rows
fn build_create_table(qualified: &str, columns: &[ColumnSpec], constraints: &[ConstraintSpec]) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|col| {
            let mut line = format!("    {} {}", quote_double(&col.name), col.data_type);
            if col.not_null {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &col.default_value {
                line.push_str(&format!(" DEFAULT {}", default));
            }
            line
        })
        .collect();

    lines.extend(
        constraints
            .iter()
            .map(|c| format!("    CONSTRAINT {} {}", quote_double(&c.name), c.definition)),
    );

    format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n);", qualified, lines.join(",\n"))
}

fn replay_safe_index(definition: &str) -> String {
    if let Some(rest) = definition.strip_prefix("CREATE UNIQUE INDEX ") {
        format!("CREATE UNIQUE INDEX IF NOT EXISTS {}", rest)
    } else if let Some(rest) = definition.strip_prefix("CREATE INDEX ") {
        format!("CREATE INDEX IF NOT EXISTS {}", rest)
    } else {
        definition.to_string()
    }
}

fn replay_safe_trigger(definition: &str) -> String {
    match definition.strip_prefix("CREATE TRIGGER ") {
        Some(rest) => format!("CREATE OR REPLACE TRIGGER {}", rest),
        None => definition.to_string(),
    }
}

/// Decode the timing bits of `pg_trigger.tgtype`
fn trigger_timing(tgtype: i32) -> &'static str {
    const TRIGGER_TYPE_BEFORE: i32 = 1 << 1;
    const TRIGGER_TYPE_INSTEAD: i32 = 1 << 6;

    if tgtype & TRIGGER_TYPE_INSTEAD != 0 {
        "INSTEAD OF"
    } else if tgtype & TRIGGER_TYPE_BEFORE != 0 {
        "BEFORE"
    } else {
        "AFTER"
    }
}
