//! Backup orchestration
//!
//! `backup_object` runs extractor, scorer and store in that order. Only a
//! definition lookup failure or a persistence failure aborts; anything else
//! degrades the artifact and is recorded in `validation_errors`.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::checksum::{backup_id, compute_metadata_checksum};
use super::store::BackupStore;
use super::validator::BackupValidator;
use crate::dialect::Dialect;
use crate::error::AppError;
use crate::models::{
    BackupMetadata, BackupObject, BackupOrigin, BackupStats, ObjectReference, ObjectType,
    ValidationRules, ValidationStatus, BACKUP_VERSION,
};

/// Backs up, validates and restores database objects under one set of rules
pub struct BackupFramework {
    store: Arc<dyn BackupStore>,
    rules: ValidationRules,
    total_backups: AtomicU64,
    valid_backups: AtomicU64,
}

impl BackupFramework {
    pub fn new(store: Arc<dyn BackupStore>, rules: ValidationRules) -> Self {
        Self {
            store,
            rules,
            total_backups: AtomicU64::new(0),
            valid_backups: AtomicU64::new(0),
        }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn store(&self) -> &Arc<dyn BackupStore> {
        &self.store
    }

    pub fn stats(&self) -> BackupStats {
        BackupStats {
            total_backups: self.total_backups.load(Ordering::Relaxed),
            valid_backups: self.valid_backups.load(Ordering::Relaxed),
        }
    }

    /// Back up one object as a manual backup.
    ///
    /// `Ok` means the artifact was persisted, not that it is usable: check
    /// `validation_status.is_valid`.
    pub async fn backup_object(
        &self,
        db: &dyn Dialect,
        reference: &ObjectReference,
    ) -> Result<BackupObject, AppError> {
        self.backup_with_origin(db, reference, BackupOrigin::Manual).await
    }

    pub async fn backup_with_origin(
        &self,
        db: &dyn Dialect,
        reference: &ObjectReference,
        origin: BackupOrigin,
    ) -> Result<BackupObject, AppError> {
        let mut backup = BackupObject {
            id: backup_id(reference),
            provider_type: db.provider(),
            object_type: reference.object_type,
            object_name: reference.name.clone(),
            database_name: reference.database_name.clone(),
            schema_name: reference.schema_name.clone(),
            identifier: reference.identifier.clone(),
            definition: String::new(),
            data_checksum: String::new(),
            metadata_checksum: String::new(),
            row_count: None,
            data_size: 0,
            dependencies: Vec::new(),
            backup_timestamp: Utc::now(),
            backup_version: BACKUP_VERSION.to_string(),
            validation_status: ValidationStatus::default(),
            validation_errors: Vec::new(),
            metadata: BackupMetadata::default(),
            origin,
        };

        // Fatal: without a definition there is nothing to restore
        let definition = db.get_definition(reference).await?;
        backup.definition = definition.ddl;
        backup.metadata.details = definition.details;

        if reference.object_type == ObjectType::Table {
            match db.get_data_info(reference).await {
                Ok(info) => {
                    backup.data_checksum = info.checksum.unwrap_or_default();
                    backup.row_count = info.row_count;
                    backup.data_size = info.data_size.unwrap_or(0);
                    backup.validation_errors.extend(info.errors);
                }
                Err(e) => backup
                    .validation_errors
                    .push(format!("failed to read table data: {}", e)),
            }
        }

        backup.metadata_checksum =
            compute_metadata_checksum(&backup.definition, backup.object_type, &backup.object_name);

        match db.get_dependencies(reference).await {
            Ok(dependencies) => backup.dependencies = dependencies,
            Err(e) => backup
                .validation_errors
                .push(format!("failed to read dependencies: {}", e)),
        }

        backup.validation_status = BackupValidator::validate(&backup, &self.rules);

        // Fatal: an unpersisted backup is not a backup
        self.store.save(&backup).await?;

        self.total_backups.fetch_add(1, Ordering::Relaxed);
        if backup.validation_status.is_valid {
            self.valid_backups.fetch_add(1, Ordering::Relaxed);
        }

        if backup.validation_errors.is_empty() {
            info!(
                "Backed up {} {} as {} (score {})",
                backup.object_type,
                backup.qualified_name(),
                backup.id,
                backup.validation_status.validation_score
            );
        } else {
            warn!(
                "Backed up {} {} as {} with {} capture error(s) (score {})",
                backup.object_type,
                backup.qualified_name(),
                backup.id,
                backup.validation_errors.len(),
                backup.validation_status.validation_score
            );
        }

        Ok(backup)
    }

    /// Score a backup under this framework's rules
    pub fn validate_backup_integrity(&self, backup: &BackupObject) -> ValidationStatus {
        BackupValidator::validate(backup, &self.rules)
    }

    /// Load a stored backup by id
    pub async fn find_backup(&self, id: &str) -> Result<BackupObject, AppError> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", id)))
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupObject>, AppError> {
        self.store.load_all().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::store::FileBackupStore;
    use crate::dialect::memory::MemoryDialect;
    use crate::models::ProviderType;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    pub(crate) fn framework_in(dir: &TempDir) -> BackupFramework {
        BackupFramework::new(
            Arc::new(FileBackupStore::new(dir.path())),
            ValidationRules::default(),
        )
    }

    pub(crate) fn shop() -> MemoryDialect {
        MemoryDialect::new()
            .with_table("orders", &["id", "customer"])
            .with_row("orders", &[("id", "1"), ("customer", "ada")])
            .with_row("orders", &[("id", "2"), ("customer", "grace")])
            .with_table("order_items", &["id", "order_id", "sku"])
            .with_row("order_items", &[("id", "10"), ("order_id", "1"), ("sku", "A")])
            .with_row("order_items", &[("id", "11"), ("order_id", "1"), ("sku", "B")])
            .with_row("order_items", &[("id", "12"), ("order_id", "2"), ("sku", "C")])
            .with_object(ObjectType::View, "order_totals", &["orders", "order_items"])
    }

    pub(crate) fn table(name: &str) -> ObjectReference {
        ObjectReference::new(ObjectType::Table, "shop", "public", name)
    }

    #[tokio::test]
    async fn test_backup_table_is_persisted_and_valid() {
        let dir = TempDir::new().unwrap();
        let framework = framework_in(&dir);
        let db = shop();

        let backup = framework.backup_object(&db, &table("orders")).await.unwrap();

        assert_eq!(backup.backup_version, "1.0");
        assert_eq!(backup.row_count, Some(2));
        assert!(!backup.data_checksum.is_empty());
        assert!(backup.validation_errors.is_empty());
        assert!(backup.validation_status.is_valid);
        assert_eq!(backup.validation_status.validation_score, 100);
        assert!(dir.path().join("postgres_table_orders.json").exists());
        assert_eq!(framework.stats(), BackupStats { total_backups: 1, valid_backups: 1 });
    }

    #[tokio::test]
    async fn test_backup_id_is_stable_across_calls() {
        let dir = TempDir::new().unwrap();
        let framework = framework_in(&dir);
        let db = shop();

        let first = framework.backup_object(&db, &table("orders")).await.unwrap();
        let second = framework.backup_object(&db, &table("orders")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(framework.list_backups().await.unwrap().len(), 1);
        assert_eq!(framework.stats().total_backups, 2);
    }

    #[tokio::test]
    async fn test_checksum_failure_degrades_backup() {
        let dir = TempDir::new().unwrap();
        let framework = framework_in(&dir);
        let db = shop().failing_checksum();

        let backup = framework.backup_object(&db, &table("orders")).await.unwrap();

        assert_eq!(backup.row_count, Some(2));
        assert!(backup.data_checksum.is_empty());
        assert_eq!(backup.validation_errors.len(), 1);
        assert!(!backup.validation_status.is_valid);
        assert_eq!(framework.stats(), BackupStats { total_backups: 1, valid_backups: 0 });
        // still persisted
        assert_eq!(framework.list_backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_failure_is_soft() {
        let dir = TempDir::new().unwrap();
        let framework = framework_in(&dir);
        let db = shop().failing_dependencies();
        let view = ObjectReference::new(ObjectType::View, "shop", "public", "order_totals");

        let backup = framework.backup_object(&db, &view).await.unwrap();
        assert!(backup.dependencies.is_empty());
        assert!(backup.validation_errors[0].contains("dependencies"));
        assert!(!backup.validation_status.is_valid);
    }

    #[tokio::test]
    async fn test_definition_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let framework = framework_in(&dir);
        let db = shop().failing_definition();

        let result = framework.backup_object(&db, &table("orders")).await;
        assert!(result.is_err());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
        assert_eq!(framework.stats().total_backups, 0);
    }

    #[tokio::test]
    async fn test_unsupported_object_type_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let framework = framework_in(&dir);
        let db = shop()
            .with_provider(ProviderType::Mysql)
            .with_object(ObjectType::Trigger, "audit_orders", &["orders"])
            .rejecting(ObjectType::Trigger);
        let trigger = ObjectReference::new(ObjectType::Trigger, "shop", "", "audit_orders");

        let result = framework.backup_object(&db, &trigger).await;
        assert!(matches!(result, Err(AppError::Unsupported(_))));
        assert!(framework.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_view_records_dependencies_and_metadata_checksum() {
        let dir = TempDir::new().unwrap();
        let framework = framework_in(&dir);
        let db = shop();
        let view = ObjectReference::new(ObjectType::View, "shop", "public", "order_totals");

        let backup = framework.backup_object(&db, &view).await.unwrap();
        assert_eq!(backup.dependencies, vec!["orders", "order_items"]);
        assert_eq!(backup.row_count, None);
        assert_eq!(
            backup.metadata_checksum,
            compute_metadata_checksum(&backup.definition, ObjectType::View, "order_totals")
        );
        assert!(backup.validation_status.is_valid);
    }
}
