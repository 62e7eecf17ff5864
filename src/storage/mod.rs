pub mod local;
pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};

use crate::cost::CostMetrics;
use crate::error::AppResult;
use crate::model::{Report, ReportPatch, ReportRequest};

/// Durable state of one workflow instance: the request, the steps already
/// committed and their serialized outputs. Persisted after every completed
/// step so a restarted process can replay from the last checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub report_id: String,
    pub request: ReportRequest,
    pub completed_steps: Vec<String>,
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn new(workflow_id: &str, report_id: &str, request: ReportRequest) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            report_id: report_id.to_string(),
            request,
            completed_steps: Vec::new(),
            outputs: serde_json::Map::new(),
        }
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }
}

/// Durable key-value + blob storage behind the orchestrator. Implementations
/// may be in-memory, local disk or a database; the orchestrator does not
/// care which.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Inserts (or fully replaces) a report record.
    async fn create_report(&self, report: &Report) -> AppResult<()>;

    /// Merges a partial update into the stored report and returns the
    /// merged record.
    async fn save_report(&self, id: &str, patch: &ReportPatch) -> AppResult<Report>;

    async fn get_report(&self, id: &str) -> AppResult<Option<Report>>;

    /// All reports, newest first.
    async fn list_reports(&self) -> AppResult<Vec<Report>>;

    /// Writes an output artifact and returns its location. Writes are
    /// idempotent by filename.
    async fn save_output_file(
        &self,
        report_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> AppResult<String>;

    async fn output_file_location(&self, report_id: &str, filename: &str) -> String;

    async fn file_exists(&self, report_id: &str, filename: &str) -> AppResult<bool>;

    async fn file_size(&self, report_id: &str, filename: &str) -> AppResult<Option<u64>>;

    async fn get_cost_metrics(&self, report_id: &str) -> AppResult<Option<CostMetrics>>;

    async fn put_cost_metrics(&self, metrics: &CostMetrics) -> AppResult<()>;

    async fn list_cost_metrics(&self) -> AppResult<Vec<CostMetrics>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> AppResult<()>;

    async fn load_checkpoint(&self, workflow_id: &str) -> AppResult<Option<Checkpoint>>;

    /// Removes the checkpoint once the workflow has reached a terminal state.
    async fn delete_checkpoint(&self, workflow_id: &str) -> AppResult<()>;
}
