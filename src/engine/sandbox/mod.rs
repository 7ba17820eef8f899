mod process;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use uuid::Uuid;

use crate::engine::{
    catalog::RenderedCommand,
    config::EngineConfig,
    error::ExecError,
    models::{ExecutionLimits, ExecutionResult},
};

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub root: PathBuf,
    pub compile_timeout: Duration,
    pub compile_max_processes: u64,
    pub max_output_bytes: usize,
}

/// OS-level ceilings applied to a spawned process group. `None` leaves the
/// inherited limit in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<u64>,
    pub max_processes: Option<u64>,
    pub max_file_size_bytes: Option<u64>,
}

impl ResourceLimits {
    pub fn for_run(limits: &ExecutionLimits, overhead_kb: u64) -> Self {
        Self {
            memory_bytes: Some(limits.memory_kb.saturating_add(overhead_kb).saturating_mul(1024)),
            max_processes: Some(limits.max_processes),
            max_file_size_bytes: Some(limits.max_file_size_bytes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.memory_bytes.is_none()
            && self.max_processes.is_none()
            && self.max_file_size_bytes.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
    pub stdin: Vec<u8>,
    pub timeout: Duration,
    pub limits: ResourceLimits,
}

impl ProcessSpec {
    pub fn new(command: RenderedCommand, cwd: &Path, timeout: Duration) -> Self {
        Self {
            program: command.program,
            args: command.args,
            cwd: cwd.to_path_buf(),
            stdin: Vec::new(),
            timeout,
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_stdin(mut self, stdin: &str) -> Self {
        self.stdin = stdin.as_bytes().to_vec();
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Mediates every workspace and process a submission touches.
#[derive(Debug, Clone)]
pub struct Sandbox {
    settings: SandboxSettings,
}

impl Sandbox {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.workspace_root).with_context(|| {
            format!(
                "failed to create workspace root {}",
                config.workspace_root.display()
            )
        })?;
        Ok(Self::new(SandboxSettings {
            root: config.workspace_root.clone(),
            compile_timeout: config.limits.compile_timeout,
            compile_max_processes: config.limits.compile_max_processes,
            max_output_bytes: config.limits.max_output_bytes,
        }))
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Creates a fresh directory for one submission. It is removed when the
    /// returned guard is closed or dropped.
    pub fn workspace(&self, id: Uuid) -> Result<Workspace, ExecError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("coderun-{}-", id.simple()))
            .tempdir_in(&self.settings.root)
            .map_err(|err| ExecError::Sandbox(format!("workspace creation failed: {err}")))?;
        Ok(Workspace { dir })
    }

    pub fn compile_spec(&self, command: RenderedCommand, workspace: &Workspace) -> ProcessSpec {
        ProcessSpec::new(command, workspace.path(), self.settings.compile_timeout).with_limits(
            ResourceLimits {
                memory_bytes: None,
                max_processes: Some(self.settings.compile_max_processes),
                max_file_size_bytes: None,
            },
        )
    }

    pub async fn spawn(&self, spec: ProcessSpec) -> Result<ExecutionResult, ExecError> {
        process::run(spec, self.settings.max_output_bytes).await
    }
}

#[derive(Debug)]
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn write(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf, ExecError> {
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name.starts_with('.')
        {
            return Err(ExecError::Sandbox(format!(
                "refusing to write outside workspace: {file_name:?}"
            )));
        }
        let path = self.dir.path().join(file_name);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    pub fn close(self) -> Result<(), ExecError> {
        self.dir
            .close()
            .map_err(|err| ExecError::Sandbox(format!("workspace cleanup failed: {err}")))
    }
}

#[cfg(test)]
pub(crate) fn test_sandbox(root: &Path) -> Sandbox {
    Sandbox::new(SandboxSettings {
        root: root.to_path_buf(),
        compile_timeout: Duration::from_secs(60),
        compile_max_processes: 4096,
        max_output_bytes: 1024,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::{ResourceLimits, test_sandbox};
    use crate::engine::{error::ExecError, models::ExecutionLimits};

    #[tokio::test]
    async fn workspaces_are_distinct_and_removed() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(root.path());
        let id = Uuid::new_v4();
        let a = sandbox.workspace(id).unwrap();
        let b = sandbox.workspace(id).unwrap();
        assert_ne!(a.path(), b.path());

        let written = a.write("main.py", b"print(1)").await.unwrap();
        assert!(written.starts_with(a.path()));
        assert!(b.path().read_dir().unwrap().next().is_none());

        let (pa, pb) = (a.path().to_path_buf(), b.path().to_path_buf());
        a.close().unwrap();
        drop(b);
        assert!(!pa.exists());
        assert!(!pb.exists());
    }

    #[tokio::test]
    async fn rejects_file_names_that_escape() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(root.path());
        let ws = sandbox.workspace(Uuid::new_v4()).unwrap();
        for name in ["../x.py", "a/b.py", "", ".hidden"] {
            assert!(matches!(ws.write(name, b"").await, Err(ExecError::Sandbox(_))));
        }
    }

    #[test]
    fn run_limits_include_runtime_overhead() {
        let limits = ExecutionLimits {
            time_limit: Duration::from_secs(1),
            memory_kb: 1000,
            max_processes: 8,
            max_file_size_bytes: 4096,
        };
        let rl = ResourceLimits::for_run(&limits, 24);
        assert_eq!(rl.memory_bytes, Some(1024 * 1024));
        assert_eq!(rl.max_processes, Some(8));
        assert!(!rl.is_empty());
        assert!(ResourceLimits::default().is_empty());
    }
}
