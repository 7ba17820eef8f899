use async_trait::async_trait;

use crate::engine::{
    catalog::{Bindings, LanguageDescriptor},
    error::ExecError,
    languages::{CompileOutcome, LanguagePlugin, Prepared, SourceFile},
    models::{ExecutionLimits, ExecutionResult},
    sandbox::{ProcessSpec, ResourceLimits, Sandbox, Workspace},
};

/// Artifact name inside the workspace for compile-and-link languages.
const ARTIFACT_NAME: &str = "program";

/// Any language driven by external toolchain binaries, compiled or
/// interpreted, as described by its catalog templates.
pub struct CommandPlugin {
    descriptor: LanguageDescriptor,
}

impl CommandPlugin {
    pub fn new(descriptor: LanguageDescriptor) -> Self {
        Self { descriptor }
    }

    fn bindings<'a>(
        &self,
        workspace: &'a Workspace,
        source: &'a SourceFile,
        artifact: &'a std::path::Path,
        memory_kb: u64,
    ) -> Bindings<'a> {
        Bindings {
            source: &source.path,
            artifact,
            workspace: workspace.path(),
            entry: &source.entry,
            memory_kb,
        }
    }
}

#[async_trait]
impl LanguagePlugin for CommandPlugin {
    fn descriptor(&self) -> &LanguageDescriptor {
        &self.descriptor
    }

    async fn compile(
        &self,
        sandbox: &Sandbox,
        workspace: &Workspace,
        source: &SourceFile,
    ) -> Result<CompileOutcome, ExecError> {
        let Some(template) = &self.descriptor.compile else {
            return Ok(CompileOutcome::Skipped);
        };
        let artifact = workspace.path().join(ARTIFACT_NAME);
        let command = template.render(&self.bindings(workspace, source, &artifact, 0));
        tracing::debug!(language = self.descriptor.name, program = %command.program.display(), "compiling");

        let result = sandbox.spawn(sandbox.compile_spec(command, workspace)).await?;
        if result.timed_out {
            return Ok(CompileOutcome::TimedOut {
                stderr: result.stderr,
            });
        }
        if result.exit_code != 0 {
            return Ok(CompileOutcome::Failed {
                stderr: result.stderr,
                exit_code: result.exit_code,
            });
        }
        Ok(CompileOutcome::Built { artifact })
    }

    async fn run(
        &self,
        sandbox: &Sandbox,
        workspace: &Workspace,
        prepared: &Prepared,
        stdin: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult, ExecError> {
        let template = self.descriptor.run.as_ref().ok_or_else(|| {
            ExecError::Sandbox(format!("{} has no run command", self.descriptor.name))
        })?;
        let artifact = prepared
            .artifact
            .clone()
            .unwrap_or_else(|| workspace.path().join(ARTIFACT_NAME));
        let command = template.render(&self.bindings(
            workspace,
            &prepared.source,
            &artifact,
            limits.memory_kb,
        ));
        let spec = ProcessSpec::new(command, workspace.path(), limits.time_limit)
            .with_stdin(stdin)
            .with_limits(ResourceLimits::for_run(
                limits,
                self.descriptor.runtime_memory_overhead_kb,
            ));
        sandbox.spawn(spec).await
    }
}
