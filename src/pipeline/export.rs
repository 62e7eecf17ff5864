use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;

use crate::error::AppError;
use crate::llm::Narrative;
use crate::model::{Report, ReportFile};
use crate::profiler::DataProfile;
use crate::render::{DocumentRenderer, RenderContext, RenderedChart};
use crate::storage::Storage;
use crate::telemetry::metrics::REPORT_EXPORT_BYTES;

use super::engine::ActivityContext;

/// EXPORTING activity: renders every requested format from the shared
/// layout and persists the artifacts. Filenames are fixed per format, so a
/// retried attempt overwrites its own partial output instead of duplicating
/// it. Heartbeats carry per-format progress.
#[tracing::instrument(name = "pipeline.export", skip_all, fields(report.id = %report.id, formats = report.output_formats.len()))]
pub async fn run(
    ctx: &ActivityContext,
    storage: &Arc<dyn Storage>,
    exporters: &[Arc<dyn DocumentRenderer>],
    report: &Report,
    narrative: &Narrative,
    charts: &[RenderedChart],
    profile: &DataProfile,
    layout_html: &str,
) -> Result<Vec<ReportFile>, AppError> {
    let total = report.output_formats.len() as u64;
    let mut files = Vec::with_capacity(report.output_formats.len());

    for (index, format) in report.output_formats.iter().enumerate() {
        let exporter = exporters
            .iter()
            .find(|e| e.format() == *format)
            .ok_or_else(|| {
                AppError::Internal(format!("no exporter registered for {}", format.extension()))
            })?;

        let render_ctx = RenderContext {
            report,
            narrative,
            charts,
            profile,
            layout_html,
        };
        let document = ctx.keep_alive(exporter.render(&render_ctx)).await?;

        let filename = format!("report.{}", format.extension());
        let location = storage
            .save_output_file(&report.id, &filename, &document.bytes)
            .await?;

        REPORT_EXPORT_BYTES.record(
            document.bytes.len() as f64,
            &[KeyValue::new("format", format.extension())],
        );
        tracing::info!(
            report_id = %report.id,
            format = format.extension(),
            bytes = document.bytes.len(),
            "artifact exported"
        );

        files.push(ReportFile {
            format: *format,
            location,
            size_bytes: document.bytes.len() as u64,
            generated_at: Utc::now(),
        });
        ctx.heartbeat(index as u64 + 1, total);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NarrativeSection;
    use crate::model::{OutputFormat, ReportStyle};
    use crate::pipeline::engine::{ActivityOptions, RetryPolicy, run_activity};
    use crate::render::export::{DocxExporter, HtmlExporter, PdfExporter};
    use crate::storage::memory::MemoryStorage;
    use std::time::Duration;

    fn narrative() -> Narrative {
        Narrative {
            executive_summary: "S".to_string(),
            sections: vec![NarrativeSection {
                heading: "H".to_string(),
                content: "C".to_string(),
            }],
            recommendations: vec![],
            key_findings: vec![],
        }
    }

    fn profile() -> DataProfile {
        DataProfile {
            row_count: 0,
            column_count: 0,
            columns: vec![],
            data_quality_score: 0,
            suggested_charts: vec![],
        }
    }

    #[tokio::test]
    async fn test_exports_every_requested_format() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let exporters: Vec<Arc<dyn DocumentRenderer>> = vec![
            Arc::new(HtmlExporter),
            Arc::new(PdfExporter),
            Arc::new(DocxExporter),
        ];
        let report = Report::new(
            "T",
            ReportStyle::Business,
            vec![OutputFormat::Html, OutputFormat::Pdf],
        );

        let options = ActivityOptions {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_grace: Duration::from_secs(15),
        };
        let files = run_activity("wf", "exporting", &options, |ctx| {
            let storage = storage.clone();
            let exporters = exporters.clone();
            let report = report.clone();
            let narrative = narrative();
            let profile = profile();
            async move {
                run(
                    &ctx,
                    &storage,
                    &exporters,
                    &report,
                    &narrative,
                    &[],
                    &profile,
                    "<html><body>x</body></html>",
                )
                .await
            }
        })
        .await
        .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].format, OutputFormat::Html);
        assert!(storage.file_exists(&report.id, "report.html").await.unwrap());
        assert!(storage.file_exists(&report.id, "report.pdf").await.unwrap());
        assert_eq!(
            storage.file_size(&report.id, "report.html").await.unwrap(),
            Some(files[0].size_bytes)
        );
    }

    #[tokio::test]
    async fn test_missing_exporter_is_internal_error() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let exporters: Vec<Arc<dyn DocumentRenderer>> = vec![Arc::new(HtmlExporter)];
        let report = Report::new("T", ReportStyle::Business, vec![OutputFormat::Docx]);

        let options = ActivityOptions {
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_grace: Duration::from_secs(15),
        };
        let result = run_activity("wf", "exporting", &options, |ctx| {
            let storage = storage.clone();
            let exporters = exporters.clone();
            let report = report.clone();
            let narrative = narrative();
            let profile = profile();
            async move {
                run(&ctx, &storage, &exporters, &report, &narrative, &[], &profile, "").await
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
