use crate::error::AppError;
use crate::model::InputBlock;
use crate::profiler::{self, ProfiledInput};

use super::engine::ActivityContext;

/// DATA_PROFILING activity. Profiling is synchronous CPU work, so it runs
/// on the blocking pool while the context keeps heartbeats flowing.
#[tracing::instrument(name = "pipeline.profile", skip_all, fields(inputs = inputs.len()))]
pub async fn run(ctx: &ActivityContext, inputs: Vec<InputBlock>) -> Result<ProfiledInput, AppError> {
    let task = tokio::task::spawn_blocking(move || profiler::profile_inputs(&inputs));
    match ctx.keep_alive(task).await {
        Ok(result) => result,
        Err(join_err) => Err(AppError::Internal(format!(
            "profiling task panicked: {join_err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::{ActivityOptions, RetryPolicy, run_activity};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_profile_activity_produces_profile() {
        let inputs = vec![InputBlock::Records {
            records: vec![json!({"a": 1}), json!({"a": 2})],
        }];
        let options = ActivityOptions {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_grace: Duration::from_secs(15),
        };
        let profiled = run_activity("wf", "data_profiling", &options, |ctx| {
            let inputs = inputs.clone();
            async move { run(&ctx, inputs).await }
        })
        .await
        .unwrap();
        assert_eq!(profiled.profile.row_count, 2);
        assert_eq!(profiled.profile.column_count, 1);
    }
}
