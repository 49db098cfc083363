//! Cascade-delete test harness
//!
//! Back up, delete, observe, restore. Only three things abort a run: a scope
//! the counts cannot measure, backing up the primary object, and the delete
//! itself. Every other failure is recorded on the result and the run carries
//! on, so the caller always gets a `CascadeTestResult` back.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::framework::BackupFramework;
use crate::dialect::Dialect;
use crate::models::{
    BackupObject, BackupOrigin, CascadeDeleteTest, CascadeTestResult, DeleteScope,
    DependentCount, DependentReference,
};

impl BackupFramework {
    /// Run a cascade test on its own task.
    ///
    /// Dropping the returned future (client gone, request timeout) does not
    /// stop the test, so a delete is always followed by its restores.
    pub async fn spawn_cascade_delete(
        self: Arc<Self>,
        db: Arc<dyn Dialect>,
        test: CascadeDeleteTest,
    ) -> CascadeTestResult {
        let test_name = test.name.clone();
        let handle = tokio::spawn(async move { self.test_cascade_delete(db.as_ref(), &test).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Cascade test '{}' task failed: {}", test_name, e);
                let mut result = CascadeTestResult::new(test_name);
                result.error = Some(format!("cascade test task failed: {}", e));
                result
            }
        }
    }

    pub async fn test_cascade_delete(&self, db: &dyn Dialect, test: &CascadeDeleteTest) -> CascadeTestResult {
        let started = Instant::now();
        let mut result = CascadeTestResult::new(&test.name);
        let origin = BackupOrigin::CascadeTest {
            test_name: test.name.clone(),
        };
        let scope = test.scope.as_ref();

        info!(
            "Cascade test '{}': {} {} with {} dependent(s)",
            test.name,
            test.primary.object_type,
            test.primary.qualified_name(),
            test.dependents.len()
        );

        if let Err(e) = test.check_scope() {
            warn!("Cascade test '{}' rejected: {}", test.name, e);
            result.error = Some(e.to_string());
            result.duration_ms = elapsed_ms(started);
            return result;
        }

        // 1. Primary backup; nothing destructive happens without it
        let primary_backup = match self.backup_with_origin(db, &test.primary, origin.clone()).await {
            Ok(backup) => backup,
            Err(e) => {
                error!("Cascade test '{}' aborted: primary backup failed: {}", test.name, e);
                result.error = Some(format!("backup of primary {} failed: {}", test.primary.identifier, e));
                result.duration_ms = elapsed_ms(started);
                return result;
            }
        };

        // 2. Dependents, best effort. Restore order is the order collected here.
        let mut backups: Vec<BackupObject> = vec![primary_backup];
        for dependent in &test.dependents {
            match self.backup_with_origin(db, &dependent.object, origin.clone()).await {
                Ok(backup) => backups.push(backup),
                Err(e) => result.integrity_violations.push(format!(
                    "backup of dependent {} failed: {}",
                    dependent.object.identifier, e
                )),
            }
        }

        // 3. Before counts
        let mut before = Vec::with_capacity(test.dependents.len());
        for dependent in &test.dependents {
            before.push(Self::count_dependent(db, test, dependent, scope, "before", &mut result).await);
        }

        // 4. The destructive step
        match db.delete(&test.primary, scope).await {
            Ok(affected) => info!(
                "Cascade test '{}': delete on {} affected {} row(s)",
                test.name,
                test.primary.qualified_name(),
                affected
            ),
            Err(e) => {
                error!("Cascade test '{}' aborted: delete failed: {}", test.name, e);
                result.error = Some(format!("delete of {} failed: {}", test.primary.identifier, e));
                result.duration_ms = elapsed_ms(started);
                return result;
            }
        }

        // 5. After counts
        let mut after = Vec::with_capacity(test.dependents.len());
        for dependent in &test.dependents {
            after.push(Self::count_dependent(db, test, dependent, scope, "after", &mut result).await);
        }

        // 6. Classify
        let mut removed = 0i64;
        for ((dependent, before), after) in test.dependents.iter().zip(before).zip(after) {
            let identifier = dependent.object.identifier.clone();
            if let (Some(b), Some(a)) = (before, after) {
                if b != a {
                    result.cascade_executed = true;
                    removed += (b - a).max(0);
                }
                if a > 0 && test.expected.should_cascade {
                    result.orphaned_resource_count += a;
                    result.orphaned_objects.push(identifier.clone());
                    result.integrity_violations.push(format!(
                        "{} still has {} related item(s) after deleting {}",
                        identifier, a, test.primary.identifier
                    ));
                }
            }
            result.dependent_counts.push(DependentCount {
                identifier,
                before,
                after,
            });
        }

        if let Some(expected) = test.expected.expected_affected {
            if expected != removed {
                result.integrity_violations.push(format!(
                    "expected {} dependent item(s) to be removed, observed {}",
                    expected, removed
                ));
            }
        }

        // 7. Restore everything, primary first
        for backup in &backups {
            match self.restore_object(db, backup).await {
                Ok(()) => {
                    result.restored_objects.push(backup.id.clone());
                    match self.verify_restore(db, backup).await {
                        Ok(drift) => result.restore_drift.push(drift),
                        Err(e) => warn!("Could not verify restore of {}: {}", backup.identifier, e),
                    }
                }
                Err(e) => result
                    .integrity_violations
                    .push(format!("restore of {} failed: {}", backup.identifier, e)),
            }
        }

        // 8. Verdict
        result.success = result.integrity_violations.is_empty()
            && (result.orphaned_resource_count == 0 || !test.expected.orphan_prevention);
        result.duration_ms = elapsed_ms(started);

        if result.success {
            info!("Cascade test '{}' passed in {}ms", test.name, result.duration_ms);
        } else {
            warn!(
                "Cascade test '{}' failed: {} violation(s), {} orphaned",
                test.name,
                result.integrity_violations.len(),
                result.orphaned_resource_count
            );
        }
        result
    }

    async fn count_dependent(
        db: &dyn Dialect,
        test: &CascadeDeleteTest,
        dependent: &DependentReference,
        scope: Option<&DeleteScope>,
        phase: &str,
        result: &mut CascadeTestResult,
    ) -> Option<i64> {
        match db.count_related(&test.primary, dependent, scope).await {
            Ok(count) => Some(count),
            Err(e) => {
                result.integrity_violations.push(format!(
                    "could not count {} {} delete: {}",
                    dependent.object.identifier, phase, e
                ));
                None
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
