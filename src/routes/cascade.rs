//! Cascade-delete test route handler

use crate::error::{validation_error, ApiResult};
use crate::models::{CascadeDeleteTest, CascadeTestResult, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

/// Run a cascade-delete test against a live connection.
///
/// A failed test is still a successful request; the verdict and every
/// violation are in the returned result. The test runs on its own task, so a
/// request timeout or a dropped client never leaves a deleted object behind.
pub async fn run_cascade_test(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CascadeDeleteTest>,
) -> ApiResult<Json<SuccessResponse<CascadeTestResult>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    payload.check_scope()?;

    let dialect = state.connections.dialect(id).await?;
    let result = state.framework.clone().spawn_cascade_delete(dialect, payload).await;

    let message = if result.success {
        info!("Cascade test '{}' passed on {}", result.test_name, id);
        format!("Cascade test '{}' passed.", result.test_name)
    } else {
        warn!(
            "Cascade test '{}' failed on {}: {} violation(s)",
            result.test_name,
            id,
            result.integrity_violations.len()
        );
        format!(
            "Cascade test '{}' failed with {} violation(s).",
            result.test_name,
            result.integrity_violations.len()
        )
    };

    Ok(Json(SuccessResponse::with_data(message, result)))
}
