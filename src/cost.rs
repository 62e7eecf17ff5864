use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::storage::Storage;

/// Per-report usage ledger. Mutated additively, never decremented.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostMetrics {
    pub report_id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub images_generated: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub images_generated: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CostRates {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub per_image: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total_reports: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_cost_per_report: f64,
}

pub struct CostTracker {
    storage: Arc<dyn Storage>,
    rates: CostRates,
    // Serializes the read-modify-write cycle so concurrent calls for the
    // same report cannot lose increments.
    update_lock: Mutex<()>,
}

impl CostTracker {
    pub fn new(storage: Arc<dyn Storage>, rates: CostRates) -> Self {
        Self {
            storage,
            rates,
            update_lock: Mutex::new(()),
        }
    }

    /// Adds the deltas onto the stored ledger for the report, recomputing
    /// totals and the estimated cost from the summed values. Safe to call
    /// many times per report as AI calls accumulate.
    #[tracing::instrument(name = "cost.track_usage", skip(self))]
    pub async fn track_usage(
        &self,
        report_id: &str,
        delta: UsageDelta,
    ) -> Result<CostMetrics, AppError> {
        let _guard = self.update_lock.lock().await;

        let mut metrics = self
            .storage
            .get_cost_metrics(report_id)
            .await?
            .unwrap_or_else(|| CostMetrics {
                report_id: report_id.to_string(),
                ..Default::default()
            });

        metrics.prompt_tokens += delta.prompt_tokens;
        metrics.completion_tokens += delta.completion_tokens;
        metrics.images_generated += delta.images_generated;
        metrics.total_tokens = metrics.prompt_tokens + metrics.completion_tokens;
        metrics.estimated_cost = self.estimate_cost(&metrics);

        self.storage.put_cost_metrics(&metrics).await?;

        tracing::debug!(
            report_id,
            total_tokens = metrics.total_tokens,
            estimated_cost = metrics.estimated_cost,
            "usage tracked"
        );

        Ok(metrics)
    }

    /// Global aggregation across all per-report ledgers.
    pub async fn usage_summary(&self) -> Result<UsageSummary, AppError> {
        let ledgers = self.storage.list_cost_metrics().await?;

        let total_reports = ledgers.len() as u64;
        let total_tokens: u64 = ledgers.iter().map(|m| m.total_tokens).sum();
        let total_cost = round4(ledgers.iter().map(|m| m.estimated_cost).sum());
        let average_cost_per_report = if total_reports == 0 {
            0.0
        } else {
            round4(total_cost / total_reports as f64)
        };

        Ok(UsageSummary {
            total_reports,
            total_tokens,
            total_cost,
            average_cost_per_report,
        })
    }

    fn estimate_cost(&self, metrics: &CostMetrics) -> f64 {
        round4(
            (metrics.prompt_tokens as f64 / 1000.0) * self.rates.input_per_1k
                + (metrics.completion_tokens as f64 / 1000.0) * self.rates.output_per_1k
                + metrics.images_generated as f64 * self.rates.per_image,
        )
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn tracker() -> CostTracker {
        CostTracker::new(
            Arc::new(MemoryStorage::new()),
            CostRates {
                input_per_1k: 0.005,
                output_per_1k: 0.015,
                per_image: 0.04,
            },
        )
    }

    #[tokio::test]
    async fn test_track_usage_is_additive() {
        let tracker = tracker();

        tracker
            .track_usage(
                "r1",
                UsageDelta {
                    prompt_tokens: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let metrics = tracker
            .track_usage(
                "r1",
                UsageDelta {
                    completion_tokens: 50,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(metrics.prompt_tokens, 100);
        assert_eq!(metrics.completion_tokens, 50);
        assert_eq!(metrics.total_tokens, 150);
        // The cost is the formula applied to the summed values, rounded
        // once at the end, not the sum of two independently rounded costs.
        let expected = round4((100.0 / 1000.0) * 0.005 + (50.0 / 1000.0) * 0.015);
        assert_eq!(metrics.estimated_cost, expected);
    }

    #[tokio::test]
    async fn test_images_counted_in_cost() {
        let tracker = tracker();
        let metrics = tracker
            .track_usage(
                "r2",
                UsageDelta {
                    images_generated: 3,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(metrics.images_generated, 3);
        assert_eq!(metrics.estimated_cost, 0.12);
    }

    #[tokio::test]
    async fn test_summary_aggregates_all_reports() {
        let tracker = tracker();
        tracker
            .track_usage(
                "a",
                UsageDelta {
                    prompt_tokens: 1000,
                    completion_tokens: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tracker
            .track_usage(
                "b",
                UsageDelta {
                    prompt_tokens: 2000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let summary = tracker.usage_summary().await.unwrap();
        assert_eq!(summary.total_reports, 2);
        assert_eq!(summary.total_tokens, 4000);
        assert_eq!(summary.total_cost, 0.03);
        assert_eq!(summary.average_cost_per_report, 0.015);
    }

    #[tokio::test]
    async fn test_summary_empty_ledger() {
        let tracker = tracker();
        let summary = tracker.usage_summary().await.unwrap();
        assert_eq!(summary.total_reports, 0);
        assert_eq!(summary.average_cost_per_report, 0.0);
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.00014999), 0.0001);
        assert_eq!(round4(0.00015001), 0.0002);
        assert_eq!(round4(1.23456789), 1.2346);
    }
}
