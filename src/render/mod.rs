pub mod charts;
pub mod export;
pub mod layout;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::llm::Narrative;
use crate::model::{OutputFormat, Report};
use crate::profiler::{ChartSuggestion, DataProfile, Record};

/// One rendered chart image (SVG bytes in the built-in renderer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedChart {
    pub id: String,
    pub config: ChartSuggestion,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
}

/// Everything a document exporter needs: the report record, the narrative,
/// the rendered charts and the assembled layout.
pub struct RenderContext<'a> {
    pub report: &'a Report,
    pub narrative: &'a Narrative,
    pub charts: &'a [RenderedChart],
    pub profile: &'a DataProfile,
    pub layout_html: &'a str,
}

#[async_trait::async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(
        &self,
        suggestions: &[ChartSuggestion],
        records: &[Record],
        profile: &DataProfile,
    ) -> Result<Vec<RenderedChart>, AppError>;
}

#[async_trait::async_trait]
pub trait DocumentRenderer: Send + Sync {
    fn format(&self) -> OutputFormat;

    async fn render(&self, ctx: &RenderContext<'_>) -> Result<RenderedDocument, AppError>;
}
