use std::{sync::Arc, time::Duration};

use uuid::Uuid;

use crate::engine::{
    error::{ExecError, StoreError},
    metrics::MetricsRegistry,
    models::{Submission, SubmissionStatus, Verdict},
    pipeline::PipelineOutcome,
    store::SubmissionStore,
};

/// Maps a pipeline outcome onto the terminal fields of a submission.
pub fn verdict_for(outcome: Result<PipelineOutcome, ExecError>, time_limit: Duration) -> Verdict {
    match outcome {
        Ok(PipelineOutcome::Ran(result)) => {
            let status = if result.timed_out {
                SubmissionStatus::TimedOut
            } else if result.exit_code == 0 {
                SubmissionStatus::Completed
            } else {
                SubmissionStatus::RuntimeError
            };
            let mut stderr = result.stderr;
            if result.timed_out {
                append_line(
                    &mut stderr,
                    &format!(
                        "Time limit exceeded after {:.1} seconds",
                        time_limit.as_secs_f64()
                    ),
                );
            }
            Verdict {
                status,
                stdout: result.stdout,
                stderr,
                exit_code: Some(result.exit_code),
                execution_time_ms: Some(result.duration_ms),
                truncated: result.truncated,
            }
        }
        Ok(PipelineOutcome::CompilationFailed { stderr, exit_code }) => Verdict {
            status: SubmissionStatus::CompilationError,
            stdout: String::new(),
            stderr,
            exit_code: Some(exit_code),
            execution_time_ms: None,
            truncated: false,
        },
        Ok(PipelineOutcome::CompileTimedOut { mut stderr }) => {
            append_line(&mut stderr, "Compilation timed out");
            Verdict {
                status: SubmissionStatus::TimedOut,
                stdout: String::new(),
                stderr,
                exit_code: None,
                execution_time_ms: None,
                truncated: false,
            }
        }
        Err(err) => Verdict::error(describe(&err)),
    }
}

fn describe(err: &ExecError) -> String {
    match err {
        ExecError::ToolingMissing(tool) => {
            format!("Toolchain unavailable: `{tool}` is not installed on the execution host")
        }
        ExecError::UnsupportedLanguage(id) => format!("Unsupported language: {id}"),
        other => format!("Execution failed: {other}"),
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

/// Writes verdicts into the store and keeps the counters in step.
pub struct ResultAggregator {
    store: Arc<dyn SubmissionStore>,
    metrics: Arc<MetricsRegistry>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn SubmissionStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { store, metrics }
    }

    pub async fn finish(&self, id: Uuid, verdict: Verdict) -> Result<Submission, StoreError> {
        let status = verdict.status;
        let record = self.store.complete(id, verdict).await?;
        self.metrics.finished(status);
        tracing::info!(submission_id = %id, status = %status, "submission finished");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::verdict_for;
    use crate::engine::{
        error::ExecError,
        models::{ExecutionResult, SubmissionStatus},
        pipeline::PipelineOutcome,
    };

    fn ran(exit_code: i32, timed_out: bool) -> PipelineOutcome {
        PipelineOutcome::Ran(ExecutionResult {
            stdout: "out".into(),
            stderr: String::new(),
            exit_code,
            timed_out,
            truncated: false,
            duration_ms: 12,
        })
    }

    #[test]
    fn maps_run_results() {
        let limit = Duration::from_secs(2);
        let ok = verdict_for(Ok(ran(0, false)), limit);
        assert_eq!(ok.status, SubmissionStatus::Completed);
        assert_eq!(ok.exit_code, Some(0));
        assert_eq!(ok.stdout, "out");

        let failed = verdict_for(Ok(ran(1, false)), limit);
        assert_eq!(failed.status, SubmissionStatus::RuntimeError);

        let slow = verdict_for(Ok(ran(-1, true)), limit);
        assert_eq!(slow.status, SubmissionStatus::TimedOut);
        assert_eq!(slow.stderr, "Time limit exceeded after 2.0 seconds");
    }

    #[test]
    fn compilation_error_keeps_compiler_output_verbatim() {
        let verdict = verdict_for(
            Ok(PipelineOutcome::CompilationFailed {
                stderr: "main.c:1:1: error: expected ';'\n".into(),
                exit_code: 1,
            }),
            Duration::from_secs(1),
        );
        assert_eq!(verdict.status, SubmissionStatus::CompilationError);
        assert_eq!(verdict.stdout, "");
        assert_eq!(verdict.stderr, "main.c:1:1: error: expected ';'\n");
        assert_eq!(verdict.exit_code, Some(1));
    }

    #[test]
    fn exec_errors_become_error_status_with_explanation() {
        let verdict = verdict_for(
            Err(ExecError::ToolingMissing("javac".into())),
            Duration::from_secs(1),
        );
        assert_eq!(verdict.status, SubmissionStatus::Error);
        assert!(verdict.stderr.contains("javac"));
        assert!(verdict.exit_code.is_none());
    }
}
