use std::{
    io::ErrorKind,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
    task::JoinHandle,
};

use crate::engine::{
    error::ExecError,
    models::ExecutionResult,
    sandbox::{ProcessSpec, ResourceLimits},
};

/// How long output readers may keep draining after the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub(super) async fn run(
    spec: ProcessSpec,
    max_output_bytes: usize,
) -> Result<ExecutionResult, ExecError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    apply_limits(&mut cmd, &spec.limits)?;

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|err| match err.kind() {
        ErrorKind::NotFound => ExecError::ToolingMissing(spec.program.display().to_string()),
        _ => ExecError::Sandbox(format!(
            "failed to spawn {}: {err}",
            spec.program.display()
        )),
    })?;
    let group = child.id();

    if let Some(mut stdin) = child.stdin.take() {
        let stdin_bytes = spec.stdin;
        tokio::spawn(async move {
            // EPIPE here just means the program stopped reading.
            let _ = stdin.write_all(&stdin_bytes).await;
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Sandbox("missing stdout pipe".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::Sandbox("missing stderr pipe".to_string()))?;
    let stdout_task = tokio::spawn(async move { read_limited(stdout, max_output_bytes).await });
    let stderr_task = tokio::spawn(async move { read_limited(stderr, max_output_bytes).await });

    let wait_result = tokio::time::timeout(spec.timeout, child.wait()).await;

    let (exit_code, timed_out) = match wait_result {
        Ok(Ok(status)) => (exit_code(status), false),
        Ok(Err(err)) => {
            kill_group(group);
            return Err(ExecError::Sandbox(format!("wait failed: {err}")));
        }
        Err(_) => {
            kill_group(group);
            let _ = child.kill().await;
            (-1, true)
        }
    };
    let elapsed = started.elapsed();
    // Descendants that outlived the leader still hold the pipes open.
    kill_group(group);

    let (stdout, stdout_truncated) = collect(stdout_task).await;
    let (stderr, stderr_truncated) = collect(stderr_task).await;

    Ok(ExecutionResult {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
        duration_ms: elapsed.as_millis() as u64,
    })
}

async fn collect(task: JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(out)) => out,
        Ok(Err(_)) => (Vec::new(), true),
        Err(_) => {
            abort.abort();
            (Vec::new(), true)
        }
    }
}

/// Reads until EOF, keeping at most `limit` bytes. The rest is drained and
/// dropped so the writer never blocks on a full pipe.
pub(super) async fn read_limited<R>(mut reader: R, limit: usize) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut truncated = false;
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let remaining = limit.saturating_sub(out.len());
                if n > remaining {
                    truncated = true;
                }
                out.extend_from_slice(&chunk[..remaining.min(n)]);
            }
            Err(_) => break,
        }
    }
    (out, truncated)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn apply_limits(cmd: &mut Command, limits: &ResourceLimits) -> Result<(), ExecError> {
    cmd.process_group(0);
    let limits = limits.clone();
    // SAFETY: the hook only calls async-signal-safe getrlimit/setrlimit.
    unsafe {
        cmd.pre_exec(move || {
            use nix::sys::resource::Resource;
            set_limit(Resource::RLIMIT_CORE, 0)?;
            if let Some(bytes) = limits.memory_bytes {
                set_limit(Resource::RLIMIT_DATA, bytes)?;
            }
            if let Some(count) = limits.max_processes {
                set_limit(Resource::RLIMIT_NPROC, count)?;
            }
            if let Some(bytes) = limits.max_file_size_bytes {
                set_limit(Resource::RLIMIT_FSIZE, bytes)?;
            }
            Ok(())
        });
    }
    Ok(())
}

#[cfg(unix)]
fn set_limit(resource: nix::sys::resource::Resource, value: u64) -> std::io::Result<()> {
    use nix::sys::resource::{getrlimit, setrlimit};
    let (_, hard) = getrlimit(resource)?;
    let value = value.min(hard);
    setrlimit(resource, value, value)?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_limits(_cmd: &mut Command, limits: &ResourceLimits) -> Result<(), ExecError> {
    if limits.is_empty() {
        return Ok(());
    }
    Err(ExecError::LimitUnsupported(
        "memory/process ceilings need rlimit support".to_string(),
    ))
}

#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    use nix::{
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };
    if let Some(pgid) = group {
        // ESRCH once every member has exited.
        let _ = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use std::{ffi::OsString, path::PathBuf, time::Duration};

    use super::{read_limited, run};
    use crate::engine::{
        error::ExecError,
        sandbox::{ProcessSpec, ResourceLimits},
    };

    fn spec(program: &str, args: &[&str], timeout: Duration) -> ProcessSpec {
        ProcessSpec {
            program: PathBuf::from(program),
            args: args.iter().map(|arg| OsString::from(arg)).collect(),
            cwd: std::env::temp_dir(),
            stdin: Vec::new(),
            timeout,
            limits: ResourceLimits::default(),
        }
    }

    #[tokio::test]
    async fn read_limited_flags_truncation() {
        let data = vec![b'x'; 10_000];
        let (out, truncated) = read_limited(&data[..], 100).await;
        assert_eq!(out.len(), 100);
        assert!(truncated);

        let (out, truncated) = read_limited(&b"short"[..], 100).await;
        assert_eq!(out, b"short");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn feeds_stdin_and_captures_stdout() {
        let result = run(
            spec("cat", &[], Duration::from_secs(5)).with_stdin("hello\n"),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let result = run(spec("sh", &["-c", "echo oops >&2; exit 3"], Duration::from_secs(5)), 1024)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "oops\n");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_whole_process_group() {
        let marker = tempfile::tempdir().unwrap();
        let pid_file = marker.path().join("child.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let started = std::time::Instant::now();
        let result = run(
            spec("sh", &["-c", &script], Duration::from_millis(500)),
            1024,
        )
        .await
        .unwrap();
        assert!(result.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_running(pid), "grandchild {pid} survived the timeout");
    }

    /// Zombies count as gone; only their reaper is missing.
    fn is_running(pid: i32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        stat.rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z' && state != 'X')
    }

    #[tokio::test]
    async fn output_beyond_cap_is_truncated() {
        let result = run(
            spec("sh", &["-c", "yes | head -c 100000"], Duration::from_secs(5)),
            64,
        )
        .await
        .unwrap();
        assert_eq!(result.stdout.len(), 64);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn missing_binary_is_tooling_missing() {
        let err = run(
            spec("/nonexistent/coderun-toolchain", &[], Duration::from_secs(1)),
            64,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::ToolingMissing(_)));
    }
}
