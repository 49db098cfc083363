//! Backup artifacts, validation policy and validation results

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::object::{ObjectReference, ObjectType, ProviderType};

/// Format version stamped on every artifact
pub const BACKUP_VERSION: &str = "1.0";

/// Content-addressed snapshot of one database object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupObject {
    /// Short digest of `type:database:schema:name`; stable per reference
    pub id: String,
    pub provider_type: ProviderType,
    pub object_type: ObjectType,
    pub object_name: String,
    pub database_name: String,
    pub schema_name: String,
    /// Caller's correlation key from the object reference
    #[serde(default)]
    pub identifier: String,
    /// Reconstructed DDL
    pub definition: String,
    #[serde(default)]
    pub data_checksum: String,
    pub metadata_checksum: String,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub data_size: i64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub backup_timestamp: DateTime<Utc>,
    pub backup_version: String,
    pub validation_status: ValidationStatus,
    /// Soft failures recorded while capturing the object
    #[serde(default)]
    pub validation_errors: Vec<String>,
    #[serde(default)]
    pub metadata: BackupMetadata,
    #[serde(default)]
    pub origin: BackupOrigin,
}

impl BackupObject {
    /// Rebuild the reference this artifact was captured from
    pub fn reference(&self) -> ObjectReference {
        ObjectReference {
            object_type: self.object_type,
            name: self.object_name.clone(),
            database_name: self.database_name.clone(),
            schema_name: self.schema_name.clone(),
            identifier: self.identifier.clone(),
        }
    }

    pub fn qualified_name(&self) -> String {
        if self.schema_name.is_empty() {
            self.object_name.clone()
        } else {
            format!("{}.{}", self.schema_name, self.object_name)
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.backup_timestamp
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.origin, BackupOrigin::CascadeTest { .. })
    }
}

/// Why a backup was taken
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackupOrigin {
    #[default]
    Manual,
    #[serde(rename_all = "camelCase")]
    CascadeTest { test_name: String },
}

/// Structured metadata captured next to the definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ObjectDetails>,
    /// Provider-specific extras with no fixed shape
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

/// Shape-known metadata per object type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ObjectDetails {
    #[serde(rename_all = "camelCase")]
    Table {
        column_count: usize,
        has_primary_key: bool,
    },
    #[serde(rename_all = "camelCase")]
    View { is_materialized: bool },
    #[serde(rename_all = "camelCase")]
    Function {
        language: String,
        arguments: String,
    },
    #[serde(rename_all = "camelCase")]
    Index { table_name: String, is_unique: bool },
    #[serde(rename_all = "camelCase")]
    Trigger { table_name: String, timing: String },
}

/// Validation policy attached to a framework instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    pub require_definition: bool,
    pub require_data_checksum: bool,
    pub require_row_count: bool,
    pub require_dependencies: bool,
    /// Fraction of rows (0.0..=1.0) a restore may lose before it counts as drift
    pub allowable_data_loss: f64,
    pub max_backup_age_secs: i64,
    pub require_encryption: bool,
    pub require_compression: bool,
}

impl ValidationRules {
    pub fn max_backup_age(&self) -> Duration {
        Duration::seconds(self.max_backup_age_secs)
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            require_definition: true,
            require_data_checksum: true,
            require_row_count: true,
            require_dependencies: true,
            allowable_data_loss: 0.0,
            max_backup_age_secs: 24 * 60 * 60,
            require_encryption: false,
            require_compression: false,
        }
    }
}

/// Outcome of scoring a backup against `ValidationRules`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStatus {
    pub is_valid: bool,
    pub definition_valid: bool,
    pub data_valid: bool,
    pub dependencies_valid: bool,
    pub last_validated: Option<DateTime<Utc>>,
    /// 0..=100
    pub validation_score: i32,
    /// Rule failures found by the latest validation
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Aggregate counters for a framework instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total_backups: u64,
    pub valid_backups: u64,
}
