//! In-memory dialect for tests
//!
//! Models tables with rows, foreign keys that either cascade or are not
//! enforced at all, and schema objects (views, functions, indexes, triggers)
//! that depend on tables. Dropped objects can be brought back by replaying
//! their definition through `execute_ddl`, minus their rows.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use super::{quote_double, DataInfo, Dialect, ObjectDefinition};
use crate::error::{not_found_error, unsupported_error, AppError};
use crate::models::{
    DeleteScope, DependentReference, ObjectDetails, ObjectReference, ObjectType, ProviderType,
};

type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone)]
struct MemForeignKey {
    child: String,
    column: String,
    parent: String,
    parent_column: String,
    cascade: bool,
}

#[derive(Debug, Clone)]
enum Dropped {
    Table(String, MemTable),
    Object(ObjectType, String, Vec<String>),
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemTable>,
    /// Non-table objects and the tables they depend on
    objects: BTreeMap<(String, String), Vec<String>>,
    foreign_keys: Vec<MemForeignKey>,
    /// Definition text -> object it recreates
    graveyard: HashMap<String, Dropped>,
    executed_ddl: Vec<String>,
    deletes: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Failures {
    definition: bool,
    checksum: bool,
    dependencies: bool,
    delete: bool,
    ddl: bool,
}

pub struct MemoryDialect {
    provider: ProviderType,
    state: Mutex<MemoryState>,
    failures: Failures,
    unsupported: Vec<ObjectType>,
    /// Delay applied to every count once a delete has run
    count_delay: Option<Duration>,
}

impl Default for MemoryDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDialect {
    pub fn new() -> Self {
        Self {
            provider: ProviderType::Postgres,
            state: Mutex::new(MemoryState::default()),
            failures: Failures::default(),
            unsupported: Vec::new(),
            count_delay: None,
        }
    }

    pub fn with_table(self, name: &str, columns: &[&str]) -> Self {
        self.state.lock().unwrap().tables.insert(
            name.to_string(),
            MemTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        self
    }

    pub fn with_row(self, table: &str, values: &[(&str, &str)]) -> Self {
        let row: Row = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .tables
            .get_mut(table)
            .expect("table registered before rows")
            .rows
            .push(row);
        self
    }

    /// `cascade = false` models a relationship the database does not enforce
    pub fn with_foreign_key(
        self,
        child: &str,
        column: &str,
        parent: &str,
        parent_column: &str,
        cascade: bool,
    ) -> Self {
        self.state.lock().unwrap().foreign_keys.push(MemForeignKey {
            child: child.to_string(),
            column: column.to_string(),
            parent: parent.to_string(),
            parent_column: parent_column.to_string(),
            cascade,
        });
        self
    }

    pub fn with_object(self, object_type: ObjectType, name: &str, depends_on: &[&str]) -> Self {
        self.state.lock().unwrap().objects.insert(
            (object_type.as_str().to_string(), name.to_string()),
            depends_on.iter().map(|d| d.to_string()).collect(),
        );
        self
    }

    pub fn with_provider(mut self, provider: ProviderType) -> Self {
        self.provider = provider;
        self
    }

    pub fn rejecting(mut self, object_type: ObjectType) -> Self {
        self.unsupported.push(object_type);
        self
    }

    pub fn failing_definition(mut self) -> Self {
        self.failures.definition = true;
        self
    }

    pub fn failing_checksum(mut self) -> Self {
        self.failures.checksum = true;
        self
    }

    pub fn failing_dependencies(mut self) -> Self {
        self.failures.dependencies = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.failures.delete = true;
        self
    }

    pub fn failing_ddl(mut self) -> Self {
        self.failures.ddl = true;
        self
    }

    pub fn slow_counts_after_delete(mut self, delay: Duration) -> Self {
        self.count_delay = Some(delay);
        self
    }

    pub fn executed_ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().executed_ddl.clone()
    }

    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.state.lock().unwrap().tables.get(table).map(|t| t.rows.len())
    }

    fn table_ddl(name: &str, table: &MemTable) -> String {
        let columns = table
            .columns
            .iter()
            .map(|c| quote_double(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({});", quote_double(name), columns)
    }

    fn object_ddl(object_type: ObjectType, name: &str, depends_on: &[String]) -> String {
        format!(
            "CREATE OR REPLACE {} {} /* on {} */;",
            object_type.as_str().to_uppercase(),
            quote_double(name),
            depends_on.join(", ")
        )
    }

    fn object_key(object: &ObjectReference) -> (String, String) {
        (object.object_type.as_str().to_string(), object.name.clone())
    }

    fn check_supported(&self, object: &ObjectReference) -> Result<(), AppError> {
        if self.unsupported.contains(&object.object_type) {
            return Err(unsupported_error(format!(
                "object type {} is not supported by {}",
                object.object_type, self.provider
            )));
        }
        Ok(())
    }
}

fn matches(row: &Row, column: &str, value: &str) -> bool {
    row.get(column).map(|v| v == value).unwrap_or(false)
}

#[async_trait]
impl Dialect for MemoryDialect {
    fn provider(&self) -> ProviderType {
        self.provider
    }

    async fn get_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError> {
        self.check_supported(object)?;
        if self.failures.definition {
            return Err(AppError::Internal("definition lookup failed".to_string()));
        }

        let state = self.state.lock().unwrap();
        if object.object_type == ObjectType::Table {
            let table = state
                .tables
                .get(&object.name)
                .ok_or_else(|| not_found_error(format!("Table {} not found", object.name)))?;
            return Ok(ObjectDefinition {
                ddl: Self::table_ddl(&object.name, table),
                details: Some(ObjectDetails::Table {
                    column_count: table.columns.len(),
                    has_primary_key: table.columns.iter().any(|c| c == "id"),
                }),
            });
        }

        let depends_on = state
            .objects
            .get(&Self::object_key(object))
            .ok_or_else(|| not_found_error(format!("{} {} not found", object.object_type, object.name)))?;
        Ok(ObjectDefinition {
            ddl: Self::object_ddl(object.object_type, &object.name, depends_on),
            details: None,
        })
    }

    async fn get_data_info(&self, object: &ObjectReference) -> Result<DataInfo, AppError> {
        let state = self.state.lock().unwrap();
        let table = state
            .tables
            .get(&object.name)
            .ok_or_else(|| not_found_error(format!("Table {} not found", object.name)))?;

        let mut info = DataInfo::default();
        let checksum = if self.failures.checksum {
            Err(AppError::Internal("checksum query failed".to_string()))
        } else {
            let mut hasher = Sha256::new();
            for row in &table.rows {
                hasher.update(format!("{:?}", row).as_bytes());
            }
            Ok(format!("{:x}", hasher.finalize()))
        };
        info.checksum = info.record("data checksum", checksum);
        info.row_count = info.record("row count", Ok(table.rows.len() as i64));
        let size: usize = table
            .rows
            .iter()
            .flat_map(|r| r.values())
            .map(|v| v.len())
            .sum();
        info.data_size = info.record("data size", Ok(size as i64));
        Ok(info)
    }

    async fn get_dependencies(&self, object: &ObjectReference) -> Result<Vec<String>, AppError> {
        if self.failures.dependencies {
            return Err(AppError::Internal("dependency lookup failed".to_string()));
        }
        let state = self.state.lock().unwrap();
        if object.object_type == ObjectType::Table {
            let mut parents: Vec<String> = state
                .foreign_keys
                .iter()
                .filter(|fk| fk.child == object.name && fk.parent != object.name)
                .map(|fk| fk.parent.clone())
                .collect();
            parents.sort();
            parents.dedup();
            return Ok(parents);
        }
        Ok(state
            .objects
            .get(&Self::object_key(object))
            .cloned()
            .unwrap_or_default())
    }

    async fn count_related(
        &self,
        _primary: &ObjectReference,
        dependent: &DependentReference,
        scope: Option<&DeleteScope>,
    ) -> Result<i64, AppError> {
        if let Some(delay) = self.count_delay {
            let deleted = self.state.lock().unwrap().deletes > 0;
            if deleted {
                tokio::time::sleep(delay).await;
            }
        }
        let state = self.state.lock().unwrap();
        if dependent.object.object_type != ObjectType::Table {
            return Ok(i64::from(
                state.objects.contains_key(&Self::object_key(&dependent.object)),
            ));
        }
        let Some(table) = state.tables.get(&dependent.object.name) else {
            return Ok(0);
        };
        let count = match (scope, dependent.reference_column.as_deref()) {
            (Some(scope), Some(column)) => table
                .rows
                .iter()
                .filter(|row| matches(row, column, &scope.value))
                .count(),
            _ => table.rows.len(),
        };
        Ok(count as i64)
    }

    async fn delete(
        &self,
        primary: &ObjectReference,
        scope: Option<&DeleteScope>,
    ) -> Result<u64, AppError> {
        if self.failures.delete {
            return Err(AppError::Internal("delete rejected".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.deletes += 1;

        if let Some(scope) = scope {
            let table = state
                .tables
                .get_mut(&primary.name)
                .ok_or_else(|| not_found_error(format!("Table {} not found", primary.name)))?;
            let (deleted, kept): (Vec<Row>, Vec<Row>) = table
                .rows
                .drain(..)
                .partition(|row| matches(row, &scope.column, &scope.value));
            table.rows = kept;

            let cascades: Vec<MemForeignKey> = state
                .foreign_keys
                .iter()
                .filter(|fk| fk.parent == primary.name && fk.cascade)
                .cloned()
                .collect();
            for fk in cascades {
                let parent_values: Vec<String> = deleted
                    .iter()
                    .filter_map(|row| row.get(&fk.parent_column).cloned())
                    .collect();
                if let Some(child) = state.tables.get_mut(&fk.child) {
                    child
                        .rows
                        .retain(|row| !parent_values.iter().any(|v| matches(row, &fk.column, v)));
                }
            }
            return Ok(deleted.len() as u64);
        }

        if primary.object_type == ObjectType::Table {
            let table = state
                .tables
                .remove(&primary.name)
                .ok_or_else(|| not_found_error(format!("Table {} not found", primary.name)))?;
            let ddl = Self::table_ddl(&primary.name, &table);
            state
                .graveyard
                .insert(ddl, Dropped::Table(primary.name.clone(), table));

            // DROP ... CASCADE takes dependent objects and foreign keys with it
            let dependents: Vec<(String, String)> = state
                .objects
                .iter()
                .filter(|(_, deps)| deps.contains(&primary.name))
                .map(|(key, _)| key.clone())
                .collect();
            for key in dependents {
                if let Some(deps) = state.objects.remove(&key) {
                    let object_type = match key.0.as_str() {
                        "view" => ObjectType::View,
                        "function" => ObjectType::Function,
                        "index" => ObjectType::Index,
                        _ => ObjectType::Trigger,
                    };
                    let ddl = Self::object_ddl(object_type, &key.1, &deps);
                    state
                        .graveyard
                        .insert(ddl, Dropped::Object(object_type, key.1.clone(), deps));
                }
            }
            state
                .foreign_keys
                .retain(|fk| fk.parent != primary.name && fk.child != primary.name);
            return Ok(0);
        }

        let deps = state
            .objects
            .remove(&Self::object_key(primary))
            .ok_or_else(|| not_found_error(format!("{} {} not found", primary.object_type, primary.name)))?;
        let ddl = Self::object_ddl(primary.object_type, &primary.name, &deps);
        state.graveyard.insert(
            ddl,
            Dropped::Object(primary.object_type, primary.name.clone(), deps),
        );
        Ok(0)
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.executed_ddl.push(sql.to_string());
        if self.failures.ddl {
            return Err(AppError::Internal(format!("could not execute: {}", sql)));
        }

        match state.graveyard.remove(sql) {
            Some(Dropped::Table(name, table)) => {
                state.tables.entry(name).or_insert(MemTable {
                    columns: table.columns,
                    rows: Vec::new(),
                });
            }
            Some(Dropped::Object(object_type, name, deps)) => {
                state
                    .objects
                    .insert((object_type.as_str().to_string(), name), deps);
            }
            None => {}
        }
        Ok(())
    }

    async fn object_exists(&self, object: &ObjectReference) -> Result<bool, AppError> {
        let state = self.state.lock().unwrap();
        Ok(match object.object_type {
            ObjectType::Table => state.tables.contains_key(&object.name),
            _ => state.objects.contains_key(&Self::object_key(object)),
        })
    }
}
