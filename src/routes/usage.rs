use axum::{
    Json,
    extract::{Path, State},
};

use crate::AppState;
use crate::cost::{CostMetrics, UsageSummary};
use crate::error::{AppError, AppResult};

/// Global aggregation across every report's cost ledger.
pub async fn usage_summary(State(state): State<AppState>) -> AppResult<Json<UsageSummary>> {
    let summary = state.cost.usage_summary().await?;
    Ok(Json(summary))
}

/// Per-report usage ledger.
pub async fn report_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<CostMetrics>> {
    let metrics = state
        .storage
        .get_cost_metrics(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("usage for report {id}")))?;
    Ok(Json(metrics))
}
