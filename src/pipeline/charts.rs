use std::sync::Arc;

use opentelemetry::KeyValue;

use crate::cost::{CostTracker, UsageDelta};
use crate::error::AppError;
use crate::profiler::ProfiledInput;
use crate::render::{ChartRenderer, RenderedChart};
use crate::telemetry::metrics::REPORT_CHARTS_RENDERED;

use super::engine::ActivityContext;

/// CHART_GENERATION activity: turns the profiler's suggestions into images
/// and counts each produced image in the cost ledger.
#[tracing::instrument(name = "pipeline.charts", skip_all, fields(report.id = %report_id, charts.rendered))]
pub async fn run(
    ctx: &ActivityContext,
    renderer: &Arc<dyn ChartRenderer>,
    cost: &CostTracker,
    report_id: &str,
    profiled: &ProfiledInput,
) -> Result<Vec<RenderedChart>, AppError> {
    let rendered = ctx
        .keep_alive(renderer.render(
            &profiled.profile.suggested_charts,
            &profiled.records,
            &profiled.profile,
        ))
        .await?;

    REPORT_CHARTS_RENDERED.record(
        rendered.len() as f64,
        &[KeyValue::new("renderer", "builtin")],
    );

    if !rendered.is_empty() {
        cost.track_usage(
            report_id,
            UsageDelta {
                images_generated: rendered.len() as u64,
                ..Default::default()
            },
        )
        .await?;
    }

    tracing::Span::current().record("charts.rendered", rendered.len());
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostRates;
    use crate::pipeline::engine::{ActivityOptions, RetryPolicy, run_activity};
    use crate::profiler::profile_inputs;
    use crate::render::charts::SvgChartRenderer;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use crate::model::InputBlock;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_rendered_charts_counted_as_images() {
        let storage = Arc::new(MemoryStorage::new());
        let cost = CostTracker::new(
            storage.clone(),
            CostRates {
                input_per_1k: 0.005,
                output_per_1k: 0.015,
                per_image: 0.04,
            },
        );
        let renderer: Arc<dyn ChartRenderer> = Arc::new(SvgChartRenderer);

        let records: Vec<serde_json::Value> = (0..12)
            .map(|i| json!({"category": format!("c{}", i % 3), "amount": i}))
            .collect();
        let profiled = profile_inputs(&[InputBlock::Records { records }]).unwrap();
        assert!(!profiled.profile.suggested_charts.is_empty());

        let options = ActivityOptions {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_grace: Duration::from_secs(15),
        };
        let rendered = run_activity("wf", "chart_generation", &options, |ctx| {
            let renderer = renderer.clone();
            let profiled = profiled.clone();
            let cost = &cost;
            async move { run(&ctx, &renderer, cost, "r1", &profiled).await }
        })
        .await
        .unwrap();

        let metrics = storage.get_cost_metrics("r1").await.unwrap().unwrap();
        assert_eq!(metrics.images_generated, rendered.len() as u64);
        let expected = (rendered.len() as f64 * 0.04 * 10_000.0).round() / 10_000.0;
        assert_eq!(metrics.estimated_cost, expected);
    }
}
