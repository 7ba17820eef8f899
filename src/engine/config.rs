use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::engine::models::{ExecutionLimits, Submission};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: SocketAddr,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub workspace_root: PathBuf,
    pub limits: LimitConfig,
    pub toolchains: ToolchainConfig,
    pub persistence_path: Option<PathBuf>,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct LimitConfig {
    pub default_cpu_time_limit: f64,
    pub max_cpu_time_limit: f64,
    pub default_memory_limit_kb: u64,
    pub max_memory_limit_kb: u64,
    pub max_processes: u64,
    pub max_file_size_bytes: u64,
    pub max_output_bytes: usize,
    pub compile_timeout: Duration,
    pub compile_max_processes: u64,
    pub max_source_bytes: usize,
    pub max_stdin_bytes: usize,
}

/// Binary names for each external toolchain. Resolved through `PATH` at
/// spawn time.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub cc: String,
    pub cxx: String,
    pub python: String,
    pub javac: String,
    pub java: String,
    pub node: String,
    pub go: String,
    pub rustc: String,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            default_cpu_time_limit: 5.0,
            max_cpu_time_limit: 30.0,
            default_memory_limit_kb: 256_000,
            max_memory_limit_kb: 512_000,
            max_processes: 512,
            max_file_size_bytes: 16 * 1024 * 1024,
            max_output_bytes: 64 * 1024,
            compile_timeout: Duration::from_millis(30_000),
            compile_max_processes: 1024,
            max_source_bytes: 256 * 1024,
            max_stdin_bytes: 256 * 1024,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cc: "gcc".to_string(),
            cxx: "g++".to_string(),
            python: "python3".to_string(),
            javac: "javac".to_string(),
            java: "java".to_string(),
            node: "node".to_string(),
            go: "go".to_string(),
            rustc: "rustc".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = LimitConfig::default();
        let tools = ToolchainConfig::default();
        Self {
            bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080))),
            worker_count: env_parse("WORKER_COUNT", 4usize),
            queue_capacity: env_parse("QUEUE_CAPACITY", 1024usize),
            workspace_root: env::var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            limits: LimitConfig {
                default_cpu_time_limit: env_parse(
                    "DEFAULT_CPU_TIME_LIMIT",
                    defaults.default_cpu_time_limit,
                ),
                max_cpu_time_limit: env_parse("MAX_CPU_TIME_LIMIT", defaults.max_cpu_time_limit),
                default_memory_limit_kb: env_parse(
                    "DEFAULT_MEMORY_LIMIT_KB",
                    defaults.default_memory_limit_kb,
                ),
                max_memory_limit_kb: env_parse(
                    "MAX_MEMORY_LIMIT_KB",
                    defaults.max_memory_limit_kb,
                ),
                max_processes: env_parse("MAX_PROCESSES", defaults.max_processes),
                max_file_size_bytes: env_parse(
                    "MAX_FILE_SIZE_BYTES",
                    defaults.max_file_size_bytes,
                ),
                max_output_bytes: env_parse("MAX_OUTPUT_BYTES", defaults.max_output_bytes),
                compile_timeout: Duration::from_millis(env_parse(
                    "COMPILE_TIMEOUT_MS",
                    defaults.compile_timeout.as_millis() as u64,
                )),
                compile_max_processes: env_parse(
                    "COMPILE_MAX_PROCESSES",
                    defaults.compile_max_processes,
                ),
                max_source_bytes: env_parse("MAX_SOURCE_BYTES", defaults.max_source_bytes),
                max_stdin_bytes: env_parse("MAX_STDIN_BYTES", defaults.max_stdin_bytes),
            },
            toolchains: ToolchainConfig {
                cc: env_string("CC_BIN", tools.cc),
                cxx: env_string("CXX_BIN", tools.cxx),
                python: env_string("PYTHON_BIN", tools.python),
                javac: env_string("JAVAC_BIN", tools.javac),
                java: env_string("JAVA_BIN", tools.java),
                node: env_string("NODE_BIN", tools.node),
                go: env_string("GO_BIN", tools.go),
                rustc: env_string("RUSTC_BIN", tools.rustc),
            },
            persistence_path: env::var("PERSIST_RESULTS_PATH").ok().map(PathBuf::from),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl LimitConfig {
    pub fn for_submission(&self, submission: &Submission) -> ExecutionLimits {
        ExecutionLimits {
            time_limit: Duration::from_secs_f64(submission.cpu_time_limit),
            memory_kb: submission.memory_limit,
            max_processes: self.max_processes,
            max_file_size_bytes: self.max_file_size_bytes,
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
