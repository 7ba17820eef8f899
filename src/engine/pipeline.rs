use crate::engine::{
    error::ExecError,
    languages::{CompileOutcome, LanguagePlugin, Prepared},
    models::{ExecutionLimits, ExecutionResult, Submission},
    sandbox::{Sandbox, Workspace},
};

/// Where one submission's execution ended up, before it is folded into the
/// stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The run phase happened; the result says how it went.
    Ran(ExecutionResult),
    CompilationFailed { stderr: String, exit_code: i32 },
    CompileTimedOut { stderr: String },
}

/// Runs the compile and run phases for `submission` inside a fresh workspace.
/// The workspace is removed on every path out of this function.
pub async fn execute(
    plugin: &dyn LanguagePlugin,
    sandbox: &Sandbox,
    submission: &Submission,
    limits: &ExecutionLimits,
) -> Result<PipelineOutcome, ExecError> {
    let workspace = sandbox.workspace(submission.id)?;
    let outcome = run_phases(plugin, sandbox, &workspace, submission, limits).await;
    if let Err(err) = workspace.close() {
        tracing::warn!(submission_id = %submission.id, error = %err, "workspace cleanup failed");
    }
    outcome
}

async fn run_phases(
    plugin: &dyn LanguagePlugin,
    sandbox: &Sandbox,
    workspace: &Workspace,
    submission: &Submission,
    limits: &ExecutionLimits,
) -> Result<PipelineOutcome, ExecError> {
    let language = plugin.descriptor().name;
    let source = plugin.materialize(workspace, &submission.source_code).await?;

    let artifact = if plugin.descriptor().needs_compile() {
        tracing::debug!(submission_id = %submission.id, language, "compiling");
        match plugin.compile(sandbox, workspace, &source).await? {
            CompileOutcome::Built { artifact } => Some(artifact),
            CompileOutcome::Skipped => None,
            CompileOutcome::Failed { stderr, exit_code } => {
                return Ok(PipelineOutcome::CompilationFailed { stderr, exit_code });
            }
            CompileOutcome::TimedOut { stderr } => {
                return Ok(PipelineOutcome::CompileTimedOut { stderr });
            }
        }
    } else {
        None
    };

    tracing::debug!(submission_id = %submission.id, language, "running");
    let prepared = Prepared { source, artifact };
    let result = plugin
        .run(sandbox, workspace, &prepared, &submission.stdin, limits)
        .await?;
    Ok(PipelineOutcome::Ran(result))
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use super::{PipelineOutcome, execute};
    use crate::engine::{
        catalog::{Capability, CommandTemplate, LanguageDescriptor, Token},
        error::ExecError,
        languages::{CompileOutcome, EntryResolution, LanguagePlugin, Prepared, SourceFile},
        models::{ExecutionLimits, ExecutionResult, Submission},
        sandbox::{Sandbox, Workspace, test_sandbox},
    };

    /// Fails compilation and records whether `run` was ever reached.
    struct BrokenCompiler {
        descriptor: LanguageDescriptor,
        ran: Arc<AtomicBool>,
        seen_workspace: std::sync::Mutex<Option<PathBuf>>,
    }

    #[async_trait]
    impl LanguagePlugin for BrokenCompiler {
        fn descriptor(&self) -> &LanguageDescriptor {
            &self.descriptor
        }

        async fn compile(
            &self,
            _sandbox: &Sandbox,
            workspace: &Workspace,
            _source: &SourceFile,
        ) -> Result<CompileOutcome, ExecError> {
            *self.seen_workspace.lock().unwrap() = Some(workspace.path().to_path_buf());
            Ok(CompileOutcome::Failed {
                stderr: "main.x:1: syntax error".to_string(),
                exit_code: 1,
            })
        }

        async fn run(
            &self,
            _sandbox: &Sandbox,
            _workspace: &Workspace,
            _prepared: &Prepared,
            _stdin: &str,
            _limits: &ExecutionLimits,
        ) -> Result<ExecutionResult, ExecError> {
            self.ran.store(true, Ordering::SeqCst);
            Ok(ExecutionResult::default())
        }
    }

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            time_limit: Duration::from_secs(5),
            memory_kb: 256_000,
            max_processes: 4096,
            max_file_size_bytes: 1024 * 1024,
        }
    }

    fn descriptor() -> LanguageDescriptor {
        LanguageDescriptor {
            id: 200,
            name: "Broken",
            source_extension: ".x",
            capability: Capability::CompileAndLink,
            entry: EntryResolution::Fixed("main"),
            compile: Some(CommandTemplate::tool("true", [])),
            run: Some(CommandTemplate::new(Token::Artifact, [])),
            runtime_memory_overhead_kb: 0,
        }
    }

    #[tokio::test]
    async fn compilation_error_short_circuits_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(root.path());
        let ran = Arc::new(AtomicBool::new(false));
        let plugin = BrokenCompiler {
            descriptor: descriptor(),
            ran: ran.clone(),
            seen_workspace: std::sync::Mutex::new(None),
        };
        let submission = Submission::new(200, "garbage(".into(), String::new(), 5.0, 256_000);

        let outcome = execute(&plugin, &sandbox, &submission, &limits()).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::CompilationFailed {
                stderr: "main.x:1: syntax error".to_string(),
                exit_code: 1,
            }
        );
        assert!(!ran.load(Ordering::SeqCst));
        let workspace = plugin.seen_workspace.lock().unwrap().clone().unwrap();
        assert!(!workspace.exists());
    }
}
