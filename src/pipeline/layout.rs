use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cost::{CostTracker, UsageDelta};
use crate::error::AppError;
use crate::llm::{Narrative, NarrativeGenerator};
use crate::model::Report;
use crate::profiler::DataProfile;
use crate::render::{self, RenderedChart};

use super::engine::ActivityContext;
use super::insights::cover_prompt;

/// Checkpointed output of the LAYOUT_RENDERING step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutOutput {
    pub html: String,
    pub cover_image: Option<Vec<u8>>,
}

/// LAYOUT_RENDERING activity: optional AI cover image, then the HTML layout
/// every export format derives from. A failed cover image is logged and
/// skipped rather than failing the report.
#[tracing::instrument(name = "pipeline.layout", skip_all, fields(report.id = %report.id))]
pub async fn run(
    ctx: &ActivityContext,
    generator: &Arc<dyn NarrativeGenerator>,
    cost: &CostTracker,
    generate_cover_image: bool,
    report: &Report,
    narrative: &Narrative,
    charts: &[RenderedChart],
    profile: &DataProfile,
) -> Result<LayoutOutput, AppError> {
    let cover_image = if generate_cover_image {
        let prompt = cover_prompt(&report.title, report.style);
        match ctx.keep_alive(generator.generate_image(&prompt)).await {
            Ok(bytes) => {
                cost.track_usage(
                    &report.id,
                    UsageDelta {
                        images_generated: 1,
                        ..Default::default()
                    },
                )
                .await?;
                Some(bytes)
            }
            Err(err) => {
                tracing::warn!(error = %err, "cover image generation failed, continuing without");
                None
            }
        }
    } else {
        None
    };

    let html = render::layout::build_layout(report, narrative, charts, profile, cover_image.as_deref());
    Ok(LayoutOutput { html, cover_image })
}
