//! Backup scoring
//!
//! Four checks worth 25 points each: definition, data, dependencies, age.
//! A stale backup loses the age credit and pays a further penalty, so the
//! score always stays within `0..=100`.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{BackupObject, ObjectType, ValidationRules, ValidationStatus};

/// Points for each passing check
pub const CHECK_POINTS: i32 = 25;

/// Subtracted when a backup is older than `max_backup_age`
pub const STALE_PENALTY: i32 = 10;

/// Minimum score for a backup to count as valid
pub const VALID_SCORE_THRESHOLD: i32 = 75;

/// Scores backups against a set of rules
pub struct BackupValidator;

impl BackupValidator {
    pub fn validate(backup: &BackupObject, rules: &ValidationRules) -> ValidationStatus {
        Self::validate_at(backup, rules, Utc::now())
    }

    /// Score as of `now`. Reads only the artifact and the rules, so re-running
    /// it on an unchanged backup gives the same result.
    pub fn validate_at(
        backup: &BackupObject,
        rules: &ValidationRules,
        now: DateTime<Utc>,
    ) -> ValidationStatus {
        let mut status = ValidationStatus {
            last_validated: Some(now),
            ..Default::default()
        };
        let mut score = 0;

        // Definition
        if rules.require_definition && backup.definition.trim().is_empty() {
            status.issues.push("definition is empty".to_string());
        } else {
            status.definition_valid = true;
            score += CHECK_POINTS;
        }

        // Data (tables only)
        if backup.object_type == ObjectType::Table {
            let mut data_ok = true;
            if rules.require_data_checksum && backup.data_checksum.is_empty() {
                status.issues.push("data checksum is missing".to_string());
                data_ok = false;
            }
            if rules.require_row_count && backup.row_count.is_none() {
                status.issues.push("row count is missing".to_string());
                data_ok = false;
            }
            if data_ok {
                status.data_valid = true;
                score += CHECK_POINTS;
            }
        } else {
            status.data_valid = true;
            score += CHECK_POINTS;
        }

        // Dependencies
        if rules.require_dependencies
            && backup.object_type.expects_dependencies()
            && backup.dependencies.is_empty()
        {
            status
                .issues
                .push(format!("{} has no recorded dependencies", backup.object_type));
        } else {
            status.dependencies_valid = true;
            score += CHECK_POINTS;
        }

        // Age
        let age = backup.age_at(now);
        if age > rules.max_backup_age() {
            status.issues.push(format!(
                "backup is {}h old (max {}h)",
                age.num_hours(),
                rules.max_backup_age().num_hours()
            ));
            score -= STALE_PENALTY;
        } else {
            score += CHECK_POINTS;
        }

        status.validation_score = score.clamp(0, 100);
        status.is_valid = backup.validation_errors.is_empty()
            && status.issues.is_empty()
            && status.validation_score >= VALID_SCORE_THRESHOLD;

        debug!(
            "Validated backup {} ({}): score {} valid={}",
            backup.id,
            backup.qualified_name(),
            status.validation_score,
            status.is_valid
        );
        status
    }

    /// Whether the backup is past `max_backup_age` at `now`
    pub fn is_stale(backup: &BackupObject, rules: &ValidationRules, now: DateTime<Utc>) -> bool {
        backup.age_at(now) > rules.max_backup_age()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        BackupMetadata, BackupOrigin, ObjectType, ProviderType, BACKUP_VERSION,
    };
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_backup(object_type: ObjectType, name: &str) -> BackupObject {
        BackupObject {
            id: format!("id-{}", name),
            provider_type: ProviderType::Postgres,
            object_type,
            object_name: name.to_string(),
            database_name: "shop".to_string(),
            schema_name: "public".to_string(),
            identifier: format!("public.{}", name),
            definition: format!("CREATE {} {}", object_type.as_str().to_uppercase(), name),
            data_checksum: "abc123".to_string(),
            metadata_checksum: "def456".to_string(),
            row_count: Some(10),
            data_size: 4096,
            dependencies: vec!["public.orders".to_string()],
            backup_timestamp: Utc::now(),
            backup_version: BACKUP_VERSION.to_string(),
            validation_status: ValidationStatus::default(),
            validation_errors: Vec::new(),
            metadata: BackupMetadata::default(),
            origin: BackupOrigin::Manual,
        }
    }

    #[test]
    fn test_perfect_table_scores_100() {
        let backup = sample_backup(ObjectType::Table, "orders");
        let status = BackupValidator::validate(&backup, &ValidationRules::default());

        assert_eq!(status.validation_score, 100);
        assert!(status.is_valid);
        assert!(status.definition_valid && status.data_valid && status.dependencies_valid);
        assert!(status.issues.is_empty());
    }

    #[test]
    fn test_non_table_passes_data_check_without_checksum() {
        let mut backup = sample_backup(ObjectType::View, "order_totals");
        backup.data_checksum.clear();
        backup.row_count = None;

        let status = BackupValidator::validate(&backup, &ValidationRules::default());
        assert_eq!(status.validation_score, 100);
        assert!(status.is_valid);
    }

    #[test]
    fn test_stale_backup_scores_65() {
        let rules = ValidationRules::default();
        let mut backup = sample_backup(ObjectType::Table, "orders");
        backup.backup_timestamp = Utc::now() - Duration::hours(48);

        let status = BackupValidator::validate(&backup, &rules);
        assert_eq!(status.validation_score, 65);
        assert!(!status.is_valid);
        assert_eq!(status.issues.len(), 1);
        assert!(status.issues[0].contains("48h old"));
    }

    #[test]
    fn test_missing_checksum_on_table() {
        let mut backup = sample_backup(ObjectType::Table, "orders");
        backup.data_checksum.clear();

        let status = BackupValidator::validate(&backup, &ValidationRules::default());
        assert_eq!(status.validation_score, 75);
        assert!(!status.data_valid);
        assert!(!status.is_valid);
    }

    #[test]
    fn test_view_without_dependencies() {
        let mut backup = sample_backup(ObjectType::View, "order_totals");
        backup.dependencies.clear();

        let status = BackupValidator::validate(&backup, &ValidationRules::default());
        assert_eq!(status.validation_score, 75);
        assert!(!status.dependencies_valid);

        let relaxed = ValidationRules {
            require_dependencies: false,
            ..Default::default()
        };
        let status = BackupValidator::validate(&backup, &relaxed);
        assert_eq!(status.validation_score, 100);
        assert!(status.is_valid);
    }

    #[test]
    fn test_capture_errors_invalidate_high_score() {
        let mut backup = sample_backup(ObjectType::Table, "orders");
        backup
            .validation_errors
            .push("failed to read data size: boom".to_string());

        let status = BackupValidator::validate(&backup, &ValidationRules::default());
        assert_eq!(status.validation_score, 100);
        assert!(!status.is_valid);
    }

    #[test]
    fn test_score_is_idempotent() {
        let backup = sample_backup(ObjectType::Function, "order_total");
        let rules = ValidationRules::default();
        let now = Utc::now();

        let first = BackupValidator::validate_at(&backup, &rules, now);
        let mut revalidated = backup.clone();
        revalidated.validation_status = first.clone();
        let second = BackupValidator::validate_at(&revalidated, &rules, now);

        assert_eq!(first, second);
    }

    #[test]
    fn test_failing_checks_earn_nothing() {
        let mut backup = sample_backup(ObjectType::Table, "orders");
        backup.definition.clear();
        backup.data_checksum.clear();
        backup.backup_timestamp = Utc::now() - Duration::days(30);

        let status = BackupValidator::validate(&backup, &ValidationRules::default());
        // 25 for dependencies, -10 for age
        assert_eq!(status.validation_score, 15);

        let mut view = sample_backup(ObjectType::View, "v");
        view.definition.clear();
        view.dependencies.clear();
        view.backup_timestamp = Utc::now() - Duration::days(30);
        let status = BackupValidator::validate(&view, &ValidationRules::default());
        assert_eq!(status.validation_score, 15);
    }
}
