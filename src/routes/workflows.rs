use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::model::WorkflowState;
use crate::pipeline::client::{PipelineClient, StartedWorkflow};

/// Stored-report view of a workflow this process is not (or no longer)
/// hosting. The checkpoint is deleted once a run completes, so the report
/// id also has to be recoverable from the workflow id itself.
async fn durable_state(state: &AppState, id: &str) -> AppResult<WorkflowState> {
    let report_id = match state.storage.load_checkpoint(id).await? {
        Some(checkpoint) => checkpoint.report_id,
        None => PipelineClient::report_id_of(id)
            .ok_or_else(|| AppError::NotFound(format!("workflow {id}")))?
            .to_string(),
    };
    let report = state
        .storage
        .get_report(&report_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow {id}")))?;

    Ok(WorkflowState {
        status: report.status,
        progress: report.progress,
        current_step: report.current_step,
        error: report.error_message,
    })
}

/// Snapshot of a running instance, answered from process-local state. For
/// instances this process does not host, falls back to the stored report.
pub async fn workflow_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<WorkflowState>> {
    if let Some(snapshot) = state.pipeline.status(&id) {
        return Ok(Json(snapshot));
    }
    Ok(Json(durable_state(&state, &id).await?))
}

pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let cancelled = state.pipeline.cancel(&id);
    if !cancelled {
        // Finished instances evict themselves from the registry; a cancel
        // of a known-but-terminal workflow answers false, unknown ids 404.
        durable_state(&state, &id).await?;
    }
    Ok(Json(json!({ "workflow_id": id, "cancelled": cancelled })))
}

/// Re-attaches an interrupted workflow from its checkpoint.
pub async fn resume_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<StartedWorkflow>> {
    let started = state.pipeline.resume(&id).await?;
    Ok(Json(started))
}
