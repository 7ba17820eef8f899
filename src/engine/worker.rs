use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::engine::{
    aggregator::{ResultAggregator, verdict_for},
    config::LimitConfig,
    error::ExecError,
    languages::PluginRegistry,
    metrics::MetricsRegistry,
    models::{Submission, SubmissionStatus, Verdict},
    pipeline,
    queue::SubmissionQueue,
    sandbox::Sandbox,
    store::SubmissionStore,
};

/// Everything a worker needs, shared across the pool.
pub struct WorkerContext {
    pub plugins: Arc<PluginRegistry>,
    pub sandbox: Arc<Sandbox>,
    pub store: Arc<dyn SubmissionStore>,
    pub aggregator: Arc<ResultAggregator>,
    pub metrics: Arc<MetricsRegistry>,
    pub limits: LimitConfig,
}

pub fn spawn_worker_pool(
    workers: usize,
    queue: SubmissionQueue,
    ctx: Arc<WorkerContext>,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker_id| {
            let queue = queue.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, queue, ctx).await;
            })
        })
        .collect()
}

async fn worker_loop(worker_id: usize, queue: SubmissionQueue, ctx: Arc<WorkerContext>) {
    loop {
        let Some(id) = queue.next().await else {
            tracing::info!(worker_id, "submission queue closed, worker exiting");
            break;
        };

        let submission = match ctx
            .store
            .compare_and_swap_status(id, SubmissionStatus::InQueue, SubmissionStatus::Processing)
            .await
        {
            Ok(submission) => submission,
            Err(err) => {
                tracing::warn!(worker_id, submission_id = %id, error = %err, "skipping unclaimable submission");
                continue;
            }
        };
        ctx.metrics.started();
        tracing::info!(worker_id, submission_id = %id, language_id = submission.language_id, "processing submission");

        // A panic inside the execution must not take the worker down or strand
        // the submission in Processing.
        let task_ctx = ctx.clone();
        let verdict = match tokio::spawn(async move { process(&task_ctx, submission).await }).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::error!(worker_id, submission_id = %id, error = %err, "execution task failed");
                Verdict::error("Execution failed: internal worker failure")
            }
        };

        if let Err(err) = ctx.aggregator.finish(id, verdict).await {
            tracing::error!(worker_id, submission_id = %id, error = %err, "failed to record verdict");
        }
    }
}

async fn process(ctx: &WorkerContext, submission: Submission) -> Verdict {
    let limits = ctx.limits.for_submission(&submission);
    let Some(plugin) = ctx.plugins.resolve(submission.language_id) else {
        return verdict_for(
            Err(ExecError::UnsupportedLanguage(submission.language_id)),
            limits.time_limit,
        );
    };
    let outcome = pipeline::execute(plugin.as_ref(), &ctx.sandbox, &submission, &limits).await;
    if let Err(ExecError::ToolingMissing(tool)) = &outcome {
        tracing::warn!(submission_id = %submission.id, tool = %tool, "toolchain missing on host");
    }
    verdict_for(outcome, limits.time_limit)
}
