pub mod charts;
pub mod client;
pub mod engine;
pub mod export;
pub mod insights;
pub mod layout;
pub mod orchestrator;
pub mod profile;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::cost::CostTracker;
use crate::llm::NarrativeGenerator;
use crate::render::{ChartRenderer, DocumentRenderer};
use crate::storage::Storage;

pub use client::PipelineClient;
pub use engine::{ActivityOptions, RetryPolicy};

/// Final outcome of one workflow instance. Failures carry the error text
/// instead of propagating it; the report record holds the same message.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub report_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collaborators every workflow instance runs against.
pub struct PipelineDeps {
    pub storage: Arc<dyn Storage>,
    pub generator: Arc<dyn NarrativeGenerator>,
    pub chart_renderer: Arc<dyn ChartRenderer>,
    pub exporters: Vec<Arc<dyn DocumentRenderer>>,
    pub cost: Arc<CostTracker>,
    /// Caps in-flight activities across all workflow instances.
    pub activity_slots: Arc<Semaphore>,
    pub options: PipelineOptions,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub activity: ActivityOptions,
    pub generate_cover_image: bool,
}
