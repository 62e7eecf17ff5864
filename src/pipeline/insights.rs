use std::sync::Arc;

use crate::cost::{CostTracker, UsageDelta};
use crate::error::AppError;
use crate::llm::{NarrativeGenerator, NarrativeOutcome, NarrativeParams};
use crate::model::{Report, ReportStyle};
use crate::profiler::ProfiledInput;

use super::engine::ActivityContext;

/// INSIGHT_GENERATION activity: one narrative call against the generator,
/// with the token usage folded into the report's cost ledger.
#[tracing::instrument(
    name = "pipeline.insights",
    skip_all,
    fields(report.id = %report.id, llm.provider, llm.model)
)]
pub async fn run(
    ctx: &ActivityContext,
    generator: &Arc<dyn NarrativeGenerator>,
    cost: &CostTracker,
    report: &Report,
    profiled: &ProfiledInput,
    instructions: Option<&str>,
) -> Result<NarrativeOutcome, AppError> {
    let params = NarrativeParams {
        title: report.title.clone(),
        style: report.style,
        profile: profiled.profile.clone(),
        records: profiled.records.clone(),
        text_blocks: profiled.text_blocks.clone(),
        instructions: instructions.map(str::to_string),
    };

    let outcome = ctx.keep_alive(generator.generate_narrative(&params)).await?;

    cost.track_usage(
        &report.id,
        UsageDelta {
            prompt_tokens: outcome.usage.prompt_tokens,
            completion_tokens: outcome.usage.completion_tokens,
            images_generated: 0,
        },
    )
    .await?;

    let span = tracing::Span::current();
    span.record("llm.provider", outcome.provider.as_str());
    span.record("llm.model", outcome.model.as_str());

    Ok(outcome)
}

pub fn cover_prompt(title: &str, style: ReportStyle) -> String {
    format!(
        "Abstract, minimal cover illustration for a {} report titled \"{title}\". \
         Muted palette, no text.",
        style.as_str()
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cost::CostRates;
    use crate::llm::{Narrative, TokenUsage};
    use crate::model::OutputFormat;
    use crate::pipeline::engine::{ActivityOptions, RetryPolicy, run_activity};
    use crate::profiler::DataProfile;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use std::time::Duration;

    pub(crate) struct StubGenerator;

    #[async_trait::async_trait]
    impl NarrativeGenerator for StubGenerator {
        async fn generate_narrative(
            &self,
            params: &NarrativeParams,
        ) -> Result<NarrativeOutcome, AppError> {
            Ok(NarrativeOutcome {
                narrative: Narrative {
                    executive_summary: format!("Summary of {}", params.title),
                    sections: vec![],
                    recommendations: vec![],
                    key_findings: vec![],
                },
                usage: TokenUsage {
                    prompt_tokens: 200,
                    completion_tokens: 80,
                },
                provider: "stub".to_string(),
                model: "stub-1".to_string(),
            })
        }

        async fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>, AppError> {
            Ok(vec![1, 2, 3])
        }
    }

    #[tokio::test]
    async fn test_insights_tracks_token_usage() {
        let storage = Arc::new(MemoryStorage::new());
        let cost = CostTracker::new(
            storage.clone(),
            CostRates {
                input_per_1k: 0.005,
                output_per_1k: 0.015,
                per_image: 0.04,
            },
        );
        let generator: Arc<dyn NarrativeGenerator> = Arc::new(StubGenerator);
        let report = Report::new("T", ReportStyle::Business, vec![OutputFormat::Html]);
        let profiled = ProfiledInput {
            profile: DataProfile {
                row_count: 0,
                column_count: 0,
                columns: vec![],
                data_quality_score: 0,
                suggested_charts: vec![],
            },
            records: vec![],
            text_blocks: vec![],
        };

        let options = ActivityOptions {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_grace: Duration::from_secs(15),
        };
        let outcome = run_activity("wf", "insight_generation", &options, |ctx| {
            let generator = generator.clone();
            let report = report.clone();
            let profiled = profiled.clone();
            let cost = &cost;
            async move { run(&ctx, &generator, cost, &report, &profiled, None).await }
        })
        .await
        .unwrap();

        assert_eq!(outcome.usage.prompt_tokens, 200);
        let metrics = storage.get_cost_metrics(&report.id).await.unwrap().unwrap();
        assert_eq!(metrics.total_tokens, 280);
    }
}
