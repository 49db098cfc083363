//! Dialect metadata extraction
//!
//! Every provider-specific query lives behind the [`Dialect`] trait, one
//! implementation per provider:
//!
//! - [`postgres`]: PostgreSQL via `deadpool-postgres`
//! - [`mysql`]: MySQL/MariaDB via `sqlx`
//!
//! A dialect is bound to a live connection pool and chosen once, when the
//! connection is opened. The backup framework only ever talks to
//! `&dyn Dialect`, so adding a provider means adding one module here.

pub mod mysql;
pub mod postgres;

#[cfg(test)]
pub mod memory;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;
use crate::models::{DeleteScope, DependentReference, ObjectDetails, ObjectReference, ProviderType};

/// Reconstructed DDL plus whatever shape-known details came with it
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDefinition {
    pub ddl: String,
    pub details: Option<ObjectDetails>,
}

/// Content information for a table.
///
/// Each field is independent: a failed checksum query leaves `checksum`
/// empty and records the failure in `errors` without touching the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInfo {
    pub checksum: Option<String>,
    pub row_count: Option<i64>,
    pub data_size: Option<i64>,
    pub errors: Vec<String>,
}

impl DataInfo {
    /// Record the outcome of one sub-query
    pub fn record<T>(&mut self, what: &str, result: Result<T, AppError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(format!("failed to read {}: {}", what, e));
                None
            }
        }
    }
}

/// Capability contract a provider implements
#[async_trait]
pub trait Dialect: Send + Sync {
    fn provider(&self) -> ProviderType;

    /// Rebuild the object's DDL. Unsupported object types fail immediately.
    async fn get_definition(&self, object: &ObjectReference) -> Result<ObjectDefinition, AppError>;

    /// Checksum, row count and on-disk size of a table
    async fn get_data_info(&self, object: &ObjectReference) -> Result<DataInfo, AppError>;

    /// Identifiers of the objects this one depends on
    async fn get_dependencies(&self, object: &ObjectReference) -> Result<Vec<String>, AppError>;

    /// Rows (or objects) in `dependent` related to `primary` within `scope`
    async fn count_related(
        &self,
        primary: &ObjectReference,
        dependent: &DependentReference,
        scope: Option<&DeleteScope>,
    ) -> Result<i64, AppError>;

    /// The destructive step of a cascade test. Returns affected rows for
    /// scoped deletes, 0 for drops.
    async fn delete(
        &self,
        primary: &ObjectReference,
        scope: Option<&DeleteScope>,
    ) -> Result<u64, AppError>;

    /// Replay stored DDL against the live connection
    async fn execute_ddl(&self, sql: &str) -> Result<(), AppError>;

    async fn object_exists(&self, object: &ObjectReference) -> Result<bool, AppError>;
}

/// Double-quote an identifier (PostgreSQL, ANSI)
pub fn quote_double(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Backtick-quote an identifier (MySQL)
pub fn quote_backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
