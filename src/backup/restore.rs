//! Restore dispatcher
//!
//! Replays a backup's stored DDL. Only valid backups are restored, and a
//! failed restore is not rolled back.

use tracing::{info, warn};

use super::framework::BackupFramework;
use crate::dialect::Dialect;
use crate::error::{unsupported_error, AppError};
use crate::models::{BackupObject, ObjectType, RestoreDrift};

impl BackupFramework {
    pub async fn restore_object(&self, db: &dyn Dialect, backup: &BackupObject) -> Result<(), AppError> {
        if !backup.validation_status.is_valid {
            return Err(AppError::InvalidBackup(format!(
                "backup {} of {} failed validation (score {}); refusing to restore",
                backup.id,
                backup.qualified_name(),
                backup.validation_status.validation_score
            )));
        }
        if backup.provider_type != db.provider() {
            return Err(AppError::BadRequest(format!(
                "backup {} was taken from {} but the connection is {}",
                backup.id,
                backup.provider_type,
                db.provider()
            )));
        }

        match backup.object_type {
            ObjectType::Table | ObjectType::View | ObjectType::Function | ObjectType::Index => {
                db.execute_ddl(&backup.definition).await?;
            }
            ObjectType::Trigger => {
                return Err(unsupported_error(format!(
                    "restoring {} objects is not supported",
                    backup.object_type
                )));
            }
        }

        info!(
            "Restored {} {} from backup {}",
            backup.object_type,
            backup.qualified_name(),
            backup.id
        );
        Ok(())
    }

    /// Compare the live object with its backup after a restore
    pub async fn verify_restore(&self, db: &dyn Dialect, backup: &BackupObject) -> Result<RestoreDrift, AppError> {
        let reference = backup.reference();
        let mut drift = RestoreDrift {
            backup_id: backup.id.clone(),
            identifier: backup.identifier.clone(),
            object_exists: db.object_exists(&reference).await?,
            expected_rows: backup.row_count,
            actual_rows: None,
            data_loss: 0.0,
            has_drift: false,
            notes: Vec::new(),
        };

        if !drift.object_exists {
            drift.has_drift = true;
            drift.notes.push(format!("{} is missing after restore", backup.qualified_name()));
            return Ok(drift);
        }

        if backup.object_type == ObjectType::Table {
            match db.get_data_info(&reference).await {
                Ok(info) => drift.actual_rows = info.row_count,
                Err(e) => drift.notes.push(format!("could not read row count: {}", e)),
            }

            if let (Some(expected), Some(actual)) = (drift.expected_rows, drift.actual_rows) {
                if expected > 0 && actual < expected {
                    drift.data_loss = (expected - actual) as f64 / expected as f64;
                }
                if drift.data_loss > self.rules().allowable_data_loss {
                    drift.has_drift = true;
                    drift.notes.push(format!(
                        "{} of {} rows missing ({:.1}% loss, {:.1}% allowed)",
                        expected - actual,
                        expected,
                        drift.data_loss * 100.0,
                        self.rules().allowable_data_loss * 100.0
                    ));
                }
            }
        }

        if drift.has_drift {
            warn!("Drift after restoring {}: {:?}", backup.qualified_name(), drift.notes);
        }
        Ok(drift)
    }
}
