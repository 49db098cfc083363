//! Fleet-wide integrity report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One backup that failed re-validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFailure {
    pub backup_id: String,
    pub object_name: String,
    pub validation_score: i32,
    pub errors: Vec<String>,
}

/// Aggregate snapshot of every stored backup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub generated_at: DateTime<Utc>,
    pub total_backups: usize,
    pub valid_backups: usize,
    pub invalid_backups: usize,
    /// Backups taken by cascade tests
    pub transient_backups: usize,
    pub stale_backups: usize,
    pub total_data_size: i64,
    /// `valid / total * 100`; 0 for an empty store
    pub integrity_score: f64,
    pub validation_failures: Vec<ValidationFailure>,
    pub recommendations: Vec<String>,
}
