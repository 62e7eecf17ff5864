use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::model::{Report, ReportRequest};
use crate::pipeline::client::StartedWorkflow;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Starts a report workflow. Returns 202 with the identifiers; generation
/// continues in the background.
pub async fn create_report(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> AppResult<(StatusCode, Json<StartedWorkflow>)> {
    let started = state.pipeline.start(request).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> AppResult<Json<Vec<Report>>> {
    let limit = params.limit.unwrap_or(20);
    let offset = params.offset.unwrap_or(0);

    let reports = state.storage.list_reports().await?;
    Ok(Json(reports.into_iter().skip(offset).take(limit).collect()))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Report>> {
    let report = state
        .storage
        .get_report(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("report {id}")))?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputBlock, OutputFormat, ReportStyle};

    #[test]
    fn test_list_query_defaults() {
        let query: ListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, None);
        assert_eq!(query.offset, None);
    }

    #[test]
    fn test_report_request_deserializes_tagged_inputs() {
        let request: ReportRequest = serde_json::from_str(
            r#"{
                "title": "Q3",
                "style": "business",
                "output_formats": ["html", "pdf"],
                "inputs": [
                    {"kind": "records", "records": [{"a": 1}]},
                    {"kind": "text", "content": "notes"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(request.style, ReportStyle::Business);
        assert_eq!(
            request.output_formats,
            vec![OutputFormat::Html, OutputFormat::Pdf]
        );
        assert!(matches!(request.inputs[0], InputBlock::Records { .. }));
        assert!(matches!(request.inputs[1], InputBlock::Text { .. }));
    }

    #[test]
    fn test_report_request_rejects_unknown_format() {
        let result: Result<ReportRequest, _> = serde_json::from_str(
            r#"{
                "title": "Q3",
                "style": "business",
                "output_formats": ["xlsx"],
                "inputs": [{"kind": "text", "content": "notes"}]
            }"#,
        );
        assert!(result.is_err());
    }
}
