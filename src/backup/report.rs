//! Fleet-wide integrity reporting

use chrono::Utc;
use tracing::info;

use super::framework::BackupFramework;
use super::validator::BackupValidator;
use crate::error::AppError;
use crate::models::{IntegrityReport, ValidationFailure};

impl BackupFramework {
    /// Re-validate every stored backup under the current rules
    pub async fn generate_integrity_report(&self) -> Result<IntegrityReport, AppError> {
        let backups = self.store().load_all().await?;
        let rules = self.rules();
        let now = Utc::now();

        let mut report = IntegrityReport {
            generated_at: now,
            total_backups: backups.len(),
            valid_backups: 0,
            invalid_backups: 0,
            transient_backups: 0,
            stale_backups: 0,
            total_data_size: 0,
            integrity_score: 0.0,
            validation_failures: Vec::new(),
            recommendations: Vec::new(),
        };

        for backup in &backups {
            let status = BackupValidator::validate_at(backup, rules, now);
            report.total_data_size += backup.data_size;
            if backup.is_transient() {
                report.transient_backups += 1;
            }
            if BackupValidator::is_stale(backup, rules, now) {
                report.stale_backups += 1;
            }

            if status.is_valid {
                report.valid_backups += 1;
            } else {
                report.invalid_backups += 1;
                let mut errors = backup.validation_errors.clone();
                errors.extend(status.issues);
                report.validation_failures.push(ValidationFailure {
                    backup_id: backup.id.clone(),
                    object_name: backup.qualified_name(),
                    validation_score: status.validation_score,
                    errors,
                });
            }
        }

        if report.total_backups > 0 {
            report.integrity_score =
                report.valid_backups as f64 / report.total_backups as f64 * 100.0;
        }

        report.recommendations = recommendations(&report, rules.require_encryption, rules.require_compression);

        info!(
            "Integrity report: {}/{} valid backups in {} ({:.1}%)",
            report.valid_backups,
            report.total_backups,
            self.store().location(),
            report.integrity_score
        );
        Ok(report)
    }

    /// Delete every backup taken by a cascade test. Returns how many went.
    pub async fn prune_transient(&self) -> Result<usize, AppError> {
        let mut pruned = 0;
        for backup in self.store().load_all().await? {
            if backup.is_transient() && self.store().delete(&backup.id).await? {
                pruned += 1;
            }
        }
        info!("Pruned {} transient backup(s)", pruned);
        Ok(pruned)
    }
}

fn recommendations(report: &IntegrityReport, require_encryption: bool, require_compression: bool) -> Vec<String> {
    let mut out = Vec::new();

    if report.total_backups == 0 {
        out.push("No backups found; back up critical objects before running destructive operations".to_string());
    }
    if !require_encryption {
        out.push("Enable backup encryption for sensitive data".to_string());
    }
    if !require_compression {
        out.push("Enable backup compression to reduce storage usage".to_string());
    }
    if !report.validation_failures.is_empty() {
        out.push(format!(
            "Review {} failed backup validation(s) and re-run the affected backups",
            report.validation_failures.len()
        ));
    }
    if report.stale_backups > 0 {
        out.push(format!(
            "Refresh {} backup(s) older than the maximum backup age",
            report.stale_backups
        ));
    }
    if report.transient_backups > 0 {
        out.push(format!(
            "{} backup(s) were taken by cascade tests; prune them once the tests are reviewed",
            report.transient_backups
        ));
    }
    out
}
