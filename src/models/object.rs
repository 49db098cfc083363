//! Object references and provider identifiers

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::error::{unsupported_error, AppError};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*$").expect("identifier regex is valid"));

/// Database provider a connection speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Postgres,
    Mysql,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Postgres => "postgres",
            ProviderType::Mysql => "mysql",
        }
    }

    /// Detect the provider from a connection string scheme
    pub fn from_connection_string(conn_str: &str) -> Option<Self> {
        if conn_str.starts_with("postgres://") || conn_str.starts_with("postgresql://") {
            Some(ProviderType::Postgres)
        } else if conn_str.starts_with("mysql://") || conn_str.starts_with("mariadb://") {
            Some(ProviderType::Mysql)
        } else {
            None
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(ProviderType::Postgres),
            "mysql" | "mariadb" => Ok(ProviderType::Mysql),
            other => Err(unsupported_error(format!(
                "Unknown provider type: '{}'. Supported types: postgres, mysql",
                other
            ))),
        }
    }
}

/// Kind of database object a backup can capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Table,
    View,
    Function,
    Index,
    Trigger,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::View => "view",
            ObjectType::Function => "function",
            ObjectType::Index => "index",
            ObjectType::Trigger => "trigger",
        }
    }

    /// Object kinds that cannot exist without referencing something else
    pub fn expects_dependencies(&self) -> bool {
        matches!(self, ObjectType::View | ObjectType::Trigger | ObjectType::Function)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied handle to a live database object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub object_type: ObjectType,

    #[validate(length(min = 1, max = 63, message = "Object name must be between 1 and 63 characters"))]
    #[validate(custom(function = "validate_identifier"))]
    pub name: String,

    #[serde(default)]
    pub database_name: String,

    #[serde(default)]
    pub schema_name: String,

    /// Opaque key used to correlate backups across a cascade test run
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,
}

impl ObjectReference {
    pub fn new(
        object_type: ObjectType,
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let schema_name = schema_name.into();
        let identifier = if schema_name.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", schema_name, name)
        };
        Self {
            object_type,
            name,
            database_name: database_name.into(),
            schema_name,
            identifier,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// `schema.name`, or just `name` when no schema is set
    pub fn qualified_name(&self) -> String {
        if self.schema_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema_name, self.name)
        }
    }
}

/// Validate a SQL identifier (letters, digits, underscores, dollar signs)
fn validate_identifier(name: &str) -> Result<(), validator::ValidationError> {
    if !IDENTIFIER_RE.is_match(name) {
        let mut err = validator::ValidationError::new("invalid_identifier");
        err.message = Some(
            "Invalid object name. Must start with a letter or underscore and contain only letters, digits, underscores.".into(),
        );
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("postgres".parse::<ProviderType>().unwrap(), ProviderType::Postgres);
        assert_eq!("PostgreSQL".parse::<ProviderType>().unwrap(), ProviderType::Postgres);
        assert_eq!("mysql".parse::<ProviderType>().unwrap(), ProviderType::Mysql);
        assert!(matches!(
            "oracle".parse::<ProviderType>(),
            Err(AppError::Unsupported(_))
        ));
    }

    #[test]
    fn test_provider_from_connection_string() {
        assert_eq!(
            ProviderType::from_connection_string("postgresql://u:p@h/db"),
            Some(ProviderType::Postgres)
        );
        assert_eq!(
            ProviderType::from_connection_string("mysql://u:p@h/db"),
            Some(ProviderType::Mysql)
        );
        assert_eq!(ProviderType::from_connection_string("oracle://h/db"), None);
    }

    #[test]
    fn test_object_type_serializes_lowercase() {
        let json = serde_json::to_string(&ObjectType::Function).unwrap();
        assert_eq!(json, "\"function\"");
    }

    #[test]
    fn test_expects_dependencies() {
        assert!(ObjectType::View.expects_dependencies());
        assert!(ObjectType::Trigger.expects_dependencies());
        assert!(ObjectType::Function.expects_dependencies());
        assert!(!ObjectType::Table.expects_dependencies());
        assert!(!ObjectType::Index.expects_dependencies());
    }

    #[test]
    fn test_reference_identifier_defaults_to_qualified_name() {
        let reference = ObjectReference::new(ObjectType::Table, "shop", "public", "orders");
        assert_eq!(reference.identifier, "public.orders");
        assert_eq!(reference.qualified_name(), "public.orders");

        let reference = reference.with_identifier("orders-primary");
        assert_eq!(reference.identifier, "orders-primary");
    }

    #[test]
    fn test_reference_validation_rejects_bad_name() {
        let reference = ObjectReference::new(ObjectType::Table, "shop", "public", "orders; DROP");
        assert!(reference.validate().is_err());

        let reference = ObjectReference::new(ObjectType::Table, "shop", "public", "order_items");
        assert!(reference.validate().is_ok());
    }
}
