//! MySQL/MariaDB dialect
//!
//! `SHOW CREATE` output is used verbatim where the server provides it;
//! indexes and triggers are rebuilt from `information_schema`.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;
use tracing::debug;

use super::{quote_backtick, DataInfo, Dialect, ObjectDefinition};
use crate::error::{not_found_error, unsupported_error, AppError};
use crate::models::{
    DeleteScope, DependentReference, ObjectDetails, ObjectReference, ObjectType, ProviderType,
};

const COLUMN_COUNT_QUERY: &str = r#"
    SELECT COUNT(*) AS column_count
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
"#;

const INDEX_COLUMNS_QUERY: &str = r#"
    SELECT
        CAST(TABLE_NAME AS CHAR(255)) AS table_name,
        CAST(COLUMN_NAME AS CHAR(255)) AS column_name,
        CAST(NON_UNIQUE AS SIGNED) AS non_unique
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = ? AND INDEX_NAME = ?
    ORDER BY TABLE_NAME, SEQ_IN_INDEX
"#;

const TRIGGER_QUERY: &str = r#"
    SELECT
        CAST(EVENT_OBJECT_TABLE AS CHAR(255)) AS table_name,
        CAST(ACTION_TIMING AS CHAR(16)) AS timing,
        CAST(EVENT_MANIPULATION AS CHAR(16)) AS event,
        CAST(ACTION_ORIENTATION AS CHAR(16)) AS orientation,
        CAST(ACTION_STATEMENT AS CHAR) AS statement
    FROM information_schema.TRIGGERS
    WHERE TRIGGER_SCHEMA = ? AND TRIGGER_NAME = ?
"#;

const DATA_SIZE_QUERY: &str = r#"
    SELECT CAST(COALESCE(DATA_LENGTH, 0) + COALESCE(INDEX_LENGTH, 0) AS SIGNED) AS data_size
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
"#;

const TABLE_DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT CAST(CONCAT(REFERENCED_TABLE_SCHEMA, '.', REFERENCED_TABLE_NAME) AS CHAR(255)) AS dependency
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
      AND REFERENCED_TABLE_NAME IS NOT NULL
      AND NOT (REFERENCED_TABLE_SCHEMA = TABLE_SCHEMA AND REFERENCED_TABLE_NAME = TABLE_NAME)
    ORDER BY 1
"#;

const VIEW_DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT CAST(CONCAT(TABLE_SCHEMA, '.', TABLE_NAME) AS CHAR(255)) AS dependency
    FROM information_schema.VIEW_TABLE_USAGE
    WHERE VIEW_SCHEMA = ? AND VIEW_NAME = ?
    ORDER BY 1
"#;

const TRIGGER_DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT CAST(CONCAT(EVENT_OBJECT_SCHEMA, '.', EVENT_OBJECT_TABLE) AS CHAR(255)) AS dependency
    FROM information_schema.TRIGGERS
    WHERE TRIGGER_SCHEMA = ? AND TRIGGER_NAME = ?
"#;

const INDEX_DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT CAST(CONCAT(TABLE_SCHEMA, '.', TABLE_NAME) AS CHAR(255)) AS dependency
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = ? AND INDEX_NAME = ?
    ORDER BY 1
"#;

/// MySQL implementation of [`Dialect`]
pub struct MysqlDialect {
    pool: MySqlPool,
    /// Database named in the connection string; default schema for references
    database: String,
}

impl MysqlDialect {
    pub fn new(pool: MySqlPool, database: impl Into<String>) -> Self {
        Self {
            pool,
            database: database.into(),
        }
    }

    /// MySQL has no schema level: the schema is the database
    fn schema<'a>(&'a self, object: &'a ObjectReference) -> &'a str {
        if !object.schema_name.is_empty() {
            &object.schema_name
        } else if !object.database_name.is_empty() {
            &object.database_name
        } else {
            &self.database
        }
    }

    fn qualified(&self, object: &ObjectReference) -> String {
        format!("{}.{}", quote_backtick(self.schema(object)), quote_backtick(&object.name))
    }

    async fn table_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        let sql = format!("SHOW CREATE TABLE {}", self.qualified(object));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let ddl = text_column(&row, 1)?;

        let column_count: i64 = sqlx::query(COLUMN_COUNT_QUERY)
            .bind(self.schema(object))
            .bind(&object.name)
            .fetch_one(&self.pool)
            .await?
            .try_get("column_count")?;

        Ok(ObjectDefinition {
            details: Some(ObjectDetails::Table {
                column_count: column_count.max(0) as usize,
                has_primary_key: ddl.contains("PRIMARY KEY"),
            }),
            ddl: format!("{};", replace_prefix(&ddl, "CREATE TABLE ", "CREATE TABLE IF NOT EXISTS ")),
        })
    }

    async fn view_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        let sql = format!("SHOW CREATE VIEW {}", self.qualified(object));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let ddl = text_column(&row, 1)?;

        Ok(ObjectDefinition {
            ddl: format!("{};", replace_prefix(&ddl, "CREATE ", "CREATE OR REPLACE ")),
            details: Some(ObjectDetails::View { is_materialized: false }),
        })
    }

    async fn function_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        let qualified = self.qualified(object);
        let sql = format!("SHOW CREATE FUNCTION {}", qualified);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        // NULL when the user lacks privileges on the routine body
        let create = text_column(&row, 2)?;
        if create.is_empty() {
            return Err(AppError::Internal(format!(
                "definition of function {} is not readable by this user",
                object.qualified_name()
            )));
        }

        let language = if create.contains("LANGUAGE SQL") || !create.contains("LANGUAGE ") {
            "SQL"
        } else {
            "unknown"
        };
        Ok(ObjectDefinition {
            ddl: format!("DROP FUNCTION IF EXISTS {};\n{};", qualified, create),
            details: Some(ObjectDetails::Function {
                language: language.to_string(),
                arguments: function_arguments(&create),
            }),
        })
    }

    async fn index_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        let rows = sqlx::query(INDEX_COLUMNS_QUERY)
            .bind(self.schema(object))
            .bind(&object.name)
            .fetch_all(&self.pool)
            .await?;
        let first = rows
            .first()
            .ok_or_else(|| not_found_error(format!("Index {} not found", object.qualified_name())))?;

        let table_name: String = first.try_get("table_name")?;
        let is_unique = first.try_get::<i64, _>("non_unique")? == 0;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            // Functional key parts have no column name
            if let Some(column) = row.try_get::<Option<String>, _>("column_name")? {
                columns.push(column);
            }
        }

        let table = format!("{}.{}", quote_backtick(self.schema(object)), quote_backtick(&table_name));
        Ok(ObjectDefinition {
            ddl: build_create_index(&object.name, &table, is_unique, &columns),
            details: Some(ObjectDetails::Index { table_name, is_unique }),
        })
    }

    async fn trigger_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        let row = sqlx::query(TRIGGER_QUERY)
            .bind(self.schema(object))
            .bind(&object.name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found_error(format!("Trigger {} not found", object.qualified_name())))?;

        let table_name: String = row.try_get("table_name")?;
        let timing: String = row.try_get("timing")?;
        let event: String = row.try_get("event")?;
        let orientation: String = row.try_get("orientation")?;
        let statement: String = row.try_get("statement")?;

        let qualified = self.qualified(object);
        let ddl = format!(
            "DROP TRIGGER IF EXISTS {};\nCREATE TRIGGER {} {} {} ON {}.{} FOR EACH {} {};",
            qualified,
            qualified,
            timing,
            event,
            quote_backtick(self.schema(object)),
            quote_backtick(&table_name),
            orientation,
            statement.trim_end().trim_end_matches(';')
        );

        Ok(ObjectDefinition {
            ddl,
            details: Some(ObjectDetails::Trigger { table_name, timing }),
        })
    }

    async fn dependency_rows(&self, sql: &str, object: &ObjectReference) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(sql)
            .bind(self.schema(object))
            .bind(&object.name)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("dependency").map_err(AppError::from))
            .collect()
    }

    async fn checksum(&self, object: &ObjectReference) -> Result<String, AppError> {
        let sql = format!("CHECKSUM TABLE {}", self.qualified(object));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;

        // The column is unsigned on MySQL and signed on some MariaDB builds
        let checksum = match row.try_get::<Option<u64>, _>(1) {
            Ok(value) => value,
            Err(_) => row.try_get::<Option<i64>, _>(1)?.map(|v| v as u64),
        };
        checksum
            .map(|value| format!("{:016x}", value))
            .ok_or_else(|| not_found_error(format!("Table {} not found", object.qualified_name())))
    }

    async fn row_count(&self, object: &ObjectReference) -> Result<i64, AppError> {
        let sql = format!("SELECT COUNT(*) AS row_count FROM {}", self.qualified(object));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get("row_count")?)
    }

    async fn data_size(&self, object: &ObjectReference) -> Result<i64, AppError> {
        let row = sqlx::query(DATA_SIZE_QUERY)
            .bind(self.schema(object))
            .bind(&object.name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found_error(format!("Table {} not found", object.qualified_name())))?;
        Ok(row.try_get("data_size")?)
    }

    async fn count_rows(&self, sql: &str, schema: &str, name: &str) -> Result<i64, AppError> {
        let row = sqlx::query(sql)
            .bind(schema)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("present")?)
    }
}

#[async_trait]
impl Dialect for MysqlDialect {
    fn provider(&self) -> ProviderType {
        ProviderType::Mysql
    }

    async fn get_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        debug!("Reconstructing DDL for {} {}", object.object_type, object.qualified_name());

        match object.object_type {
            ObjectType::Table => self.table_definition(object).await,
            ObjectType::View => self.view_definition(object).await,
            ObjectType::Function => self.function_definition(object).await,
            ObjectType::Index => self.index_definition(object).await,
            ObjectType::Trigger => self.trigger_definition(object).await,
        }
    }

    async fn get_data_info(&self, object: &ObjectReference) -> Result<DataInfo, AppError> {
        if object.object_type != ObjectType::Table {
            return Err(unsupported_error(format!(
                "data info is only available for tables, not {}",
                object.object_type
            )));
        }

        let mut info = DataInfo::default();
        let checksum = self.checksum(object).await;
        info.checksum = info.record("data checksum", checksum);
        let row_count = self.row_count(object).await;
        info.row_count = info.record("row count", row_count);
        let data_size = self.data_size(object).await;
        info.data_size = info.record("data size", data_size);
        Ok(info)
    }

    async fn get_dependencies(&self, object: &ObjectReference) -> Result<Vec<String>, AppError> {
        match object.object_type {
            ObjectType::Table => self.dependency_rows(TABLE_DEPENDENCIES_QUERY, object).await,
            ObjectType::View => self.dependency_rows(VIEW_DEPENDENCIES_QUERY, object).await,
            ObjectType::Trigger => self.dependency_rows(TRIGGER_DEPENDENCIES_QUERY, object).await,
            ObjectType::Index => self.dependency_rows(INDEX_DEPENDENCIES_QUERY, object).await,
            // Routine bodies are not tracked by information_schema
            ObjectType::Function => Ok(Vec::new()),
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

        let qualified = self.qualified(&dependent.object);
        let row = match (scope, dependent.reference_column.as_deref()) {
            (Some(scope), Some(column)) => {
                let sql = format!(
                    "SELECT COUNT(*) AS related FROM {} WHERE CAST({} AS CHAR) = ?",
                    qualified,
                    quote_backtick(column)
                );
                sqlx::query(&sql).bind(&scope.value).fetch_one(&self.pool).await?
            }
            _ => {
                let sql = format!("SELECT COUNT(*) AS related FROM {}", qualified);
                sqlx::query(&sql).fetch_one(&self.pool).await?
            }
        };
        Ok(row.try_get("related")?)
    }

    async fn delete(
        &self,
        primary: &ObjectReference,
        scope: Option<&DeleteScope>,
    ) -> Result<u64, AppError> {
        let qualified = self.qualified(primary);

        if let Some(scope) = scope {
            if primary.object_type != ObjectType::Table {
                return Err(AppError::BadRequest(format!(
                    "row-level delete requires a table, got {}",
                    primary.object_type
                )));
            }
            let sql = format!(
                "DELETE FROM {} WHERE CAST({} AS CHAR) = ?",
                qualified,
                quote_backtick(&scope.column)
            );
            let affected = sqlx::query(&sql)
                .bind(&scope.value)
                .execute(&self.pool)
                .await?
                .rows_affected();
            debug!("Deleted {} row(s) from {}", affected, qualified);
            return Ok(affected);
        }

        let sql = match primary.object_type {
            ObjectType::Table => format!("DROP TABLE {}", qualified),
            ObjectType::View => format!("DROP VIEW {}", qualified),
            ObjectType::Function => format!("DROP FUNCTION {}", qualified),
            ObjectType::Trigger => format!("DROP TRIGGER {}", qualified),
            ObjectType::Index => {
                let row = sqlx::query(INDEX_COLUMNS_QUERY)
                    .bind(self.schema(primary))
                    .bind(&primary.name)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| not_found_error(format!("Index {} not found", primary.qualified_name())))?;
                let table_name: String = row.try_get("table_name")?;
                format!(
                    "DROP INDEX {} ON {}.{}",
                    quote_backtick(&primary.name),
                    quote_backtick(self.schema(primary)),
                    quote_backtick(&table_name)
                )
            }
        };

        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        debug!("Executed: {}", sql);
        Ok(0)
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), AppError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn object_exists(&self, object: &ObjectReference) -> Result<bool, AppError> {
        let sql = match object.object_type {
            ObjectType::Table => {
                "SELECT COUNT(*) AS present FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'"
            }
            ObjectType::View => {
                "SELECT COUNT(*) AS present FROM information_schema.VIEWS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?"
            }
            ObjectType::Function => {
                "SELECT COUNT(*) AS present FROM information_schema.ROUTINES \
                 WHERE ROUTINE_SCHEMA = ? AND ROUTINE_NAME = ? AND ROUTINE_TYPE = 'FUNCTION'"
            }
            ObjectType::Index => {
                "SELECT COUNT(*) AS present FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = ? AND INDEX_NAME = ?"
            }
            ObjectType::Trigger => {
                "SELECT COUNT(*) AS present FROM information_schema.TRIGGERS \
                 WHERE TRIGGER_SCHEMA = ? AND TRIGGER_NAME = ?"
            }
        };
        Ok(self.count_rows(sql, self.schema(object), &object.name).await? > 0)
    }
}

/// Read a `SHOW CREATE` column, which some servers report as binary
fn text_column(row: &MySqlRow, index: usize) -> Result<String, AppError> {
    match row.try_get::<Option<String>, _>(index) {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(_) => {
            let bytes: Option<Vec<u8>> = row.try_get(index)?;
            Ok(bytes
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default())
        }
    }
}

fn replace_prefix(ddl: &str, prefix: &str, replacement: &str) -> String {
    match ddl.strip_prefix(prefix) {
        Some(rest) => format!("{}{}", replacement, rest),
        None => ddl.to_string(),
    }
}

fn build_create_index(name: &str, table: &str, is_unique: bool, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_backtick(c))
        .collect::<Vec<_>>()
        .join(", ");

    if name == "PRIMARY" {
        return format!("ALTER TABLE {} ADD PRIMARY KEY ({});", table, column_list);
    }
    let unique = if is_unique { "UNIQUE " } else { "" };
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        unique,
        quote_backtick(name),
        table,
        column_list
    )
}

/// Parameter list between the first pair of parentheses after the routine name
fn function_arguments(create: &str) -> String {
    let Some(start) = create.find(" FUNCTION ") else {
        return String::new();
    };
    let rest = &create[start..];
    let Some(open) = rest.find('(') else {
        return String::new();
    };

    let mut depth = 0usize;
    for (offset, ch) in rest[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return rest[open + 1..open + offset].trim().to_string();
                }
            }
            _ => {}
        }
    }
    String::new()
}
