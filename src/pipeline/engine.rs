use std::future::Future;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::AppError;
use crate::telemetry::metrics::ACTIVITY_RETRY_COUNT;

/// Backoff schedule for failed activity attempts. The delay before attempt
/// `n + 1` is `initial * multiplier^(n-1)`, capped at `max_interval`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, completed_attempts: u32) -> Duration {
        let exp = self.initial_interval.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(completed_attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(exp.min(self.max_interval.as_secs_f64()))
    }
}

/// Progress signal emitted by long activities. Staleness beyond the grace
/// window is treated as a crashed worker.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub completed: u64,
    pub total: u64,
    pub at: Instant,
}

/// Handed to each activity attempt; lets the activity emit heartbeats while
/// it works.
#[derive(Clone)]
pub struct ActivityContext {
    beat: watch::Sender<Heartbeat>,
    heartbeat_interval: Duration,
}

impl ActivityContext {
    pub fn heartbeat(&self, completed: u64, total: u64) {
        let _ = self.beat.send(Heartbeat {
            completed,
            total,
            at: Instant::now(),
        });
    }

    /// Drives `fut` to completion while emitting an idle heartbeat on every
    /// interval tick, for activities that await one long external call.
    pub async fn keep_alive<T>(&self, fut: impl Future<Output = T>) -> T {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return out,
                _ = ticker.tick() => self.heartbeat(0, 0),
            }
        }
    }
}

/// Execution options shared by every activity of a workflow instance.
#[derive(Debug, Clone, Copy)]
pub struct ActivityOptions {
    pub retry: RetryPolicy,
    /// Start-to-close timeout per attempt.
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How long heartbeats may go silent before the attempt is abandoned.
    pub heartbeat_grace: Duration,
}

async fn heartbeat_watchdog(mut rx: watch::Receiver<Heartbeat>, grace: Duration) -> AppError {
    loop {
        let last = rx.borrow_and_update().at;
        tokio::time::sleep_until(last + grace).await;
        if rx.borrow().at == last {
            return AppError::Transient("activity heartbeat lost".into());
        }
    }
}

/// Runs one activity under the retry policy, per-attempt timeout and
/// heartbeat watchdog. Validation, NotFound and Cancelled errors surface
/// immediately; everything else retries up to `max_attempts` with backoff.
pub async fn run_activity<T, F, Fut>(
    workflow_id: &str,
    name: &str,
    options: &ActivityOptions,
    f: F,
) -> Result<T, AppError>
where
    F: Fn(ActivityContext) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 1u32;
    loop {
        let (tx, rx) = watch::channel(Heartbeat {
            completed: 0,
            total: 0,
            at: Instant::now(),
        });
        let ctx = ActivityContext {
            beat: tx,
            heartbeat_interval: options.heartbeat_interval,
        };

        let outcome = tokio::select! {
            result = tokio::time::timeout(options.timeout, f(ctx)) => match result {
                Ok(inner) => inner,
                Err(_) => Err(AppError::Transient(format!(
                    "activity {name} timed out after {:?}",
                    options.timeout
                ))),
            },
            err = heartbeat_watchdog(rx, options.heartbeat_grace) => Err(err),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                tracing::warn!(workflow_id, activity = name, error = %err, "activity failed, not retryable");
                return Err(err);
            }
            Err(err) if attempt >= options.retry.max_attempts => {
                tracing::error!(
                    workflow_id,
                    activity = name,
                    attempt,
                    error = %err,
                    "activity exhausted retries"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = options.retry.delay(attempt);
                tracing::warn!(
                    workflow_id,
                    activity = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "activity failed, retrying"
                );
                ACTIVITY_RETRY_COUNT.add(1, &[KeyValue::new("activity", name.to_string())]);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
