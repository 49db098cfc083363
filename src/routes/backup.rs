//! Backup, restore and integrity route handlers

use crate::error::{validation_error, ApiResult};
use crate::models::{
    BackupObject, BackupStats, IntegrityReport, ObjectReference, RestoreDrift, SuccessResponse,
    ValidationStatus,
};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Counters plus where the backups live
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub backups: BackupStats,
    pub active_connections: usize,
    pub store_location: String,
}

/// Back up one object from a live connection
pub async fn create_backup(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ObjectReference>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<BackupObject>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let dialect = state.connections.dialect(id).await?;
    let backup = state.framework.backup_object(dialect.as_ref(), &payload).await?;

    let message = if backup.validation_status.is_valid {
        format!("Backed up {} '{}'.", backup.object_type, backup.qualified_name())
    } else {
        format!(
            "Backed up {} '{}' but it failed validation (score {}).",
            backup.object_type,
            backup.qualified_name(),
            backup.validation_status.validation_score
        )
    };

    Ok((StatusCode::CREATED, Json(SuccessResponse::with_data(message, backup))))
}

/// Replay a stored backup against a live connection and report drift
pub async fn restore_backup(
    State(state): State<SharedState>,
    Path((id, backup_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<SuccessResponse<RestoreDrift>>> {
    let dialect = state.connections.dialect(id).await?;
    let backup = state.framework.find_backup(&backup_id).await?;

    state.framework.restore_object(dialect.as_ref(), &backup).await?;
    let drift = state.framework.verify_restore(dialect.as_ref(), &backup).await?;

    let message = if drift.has_drift {
        format!("Restored '{}' with drift.", backup.qualified_name())
    } else {
        format!("Restored '{}'.", backup.qualified_name())
    };

    Ok(Json(SuccessResponse::with_data(message, drift)))
}

/// List every stored backup
pub async fn list_backups(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<Vec<BackupObject>>>> {
    let backups = state.framework.list_backups().await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} backup(s).", backups.len()),
        backups,
    )))
}

pub async fn get_backup(
    State(state): State<SharedState>,
    Path(backup_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<BackupObject>>> {
    let backup = state.framework.find_backup(&backup_id).await?;
    Ok(Json(SuccessResponse::with_data("Backup found.", backup)))
}

/// Re-score a stored backup under the current rules
pub async fn validate_backup(
    State(state): State<SharedState>,
    Path(backup_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<ValidationStatus>>> {
    let backup = state.framework.find_backup(&backup_id).await?;
    let status = state.framework.validate_backup_integrity(&backup);

    Ok(Json(SuccessResponse::with_data(
        format!("Validation score {}.", status.validation_score),
        status,
    )))
}

pub async fn integrity_report(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<IntegrityReport>>> {
    let report = state.framework.generate_integrity_report().await?;

    Ok(Json(SuccessResponse::with_data(
        format!(
            "{} of {} backup(s) valid.",
            report.valid_backups, report.total_backups
        ),
        report,
    )))
}

/// Delete backups left behind by cascade tests
pub async fn prune_transient(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<usize>>> {
    let pruned = state.framework.prune_transient().await?;
    info!("Pruned {} transient backup(s) via API", pruned);

    Ok(Json(SuccessResponse::with_data(
        format!("Removed {} transient backup(s).", pruned),
        pruned,
    )))
}

pub async fn stats(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<StatsResponse>>> {
    let response = StatsResponse {
        backups: state.framework.stats(),
        active_connections: state.connections.connection_count().await,
        store_location: state.framework.store().location(),
    };

    Ok(Json(SuccessResponse::with_data("Backup statistics.", response)))
}
