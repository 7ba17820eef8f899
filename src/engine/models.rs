use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a submission. Terminal variants never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    #[serde(rename = "In Queue")]
    InQueue,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Compilation Error")]
    CompilationError,
    #[serde(rename = "Time Limit Exceeded")]
    TimedOut,
    #[serde(rename = "Error")]
    Error,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InQueue | Self::Processing)
    }

    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        match self {
            Self::InQueue => next == Self::Processing,
            Self::Processing => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InQueue => "In Queue",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::RuntimeError => "Runtime Error",
            Self::CompilationError => "Compilation Error",
            Self::TimedOut => "Time Limit Exceeded",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionRequest {
    pub language_id: Option<u32>,
    #[serde(default)]
    pub source_code: Option<String>,
    #[serde(default)]
    pub stdin: String,
    pub cpu_time_limit: Option<f64>,
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub expected_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "submission_id")]
    pub id: Uuid,
    pub language_id: u32,
    pub source_code: String,
    pub stdin: String,
    /// Stored and echoed back; never compared against stdout.
    #[serde(default)]
    pub expected_output: Option<String>,
    /// Seconds of wall clock per phase.
    pub cpu_time_limit: f64,
    /// Kilobytes.
    pub memory_limit: u64,
    pub status: SubmissionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub truncated: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(
        language_id: u32,
        source_code: String,
        stdin: String,
        cpu_time_limit: f64,
        memory_limit: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            language_id,
            source_code,
            stdin,
            expected_output: None,
            cpu_time_limit,
            memory_limit,
            status: SubmissionStatus::InQueue,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            execution_time_ms: None,
            truncated: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_expected_output(mut self, expected_output: Option<String>) -> Self {
        self.expected_output = expected_output;
        self
    }
}

/// Terminal fields written onto a submission in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<u64>,
    pub truncated: bool,
}

impl Verdict {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SubmissionStatus::Error,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            execution_time_ms: None,
            truncated: false,
        }
    }
}

/// Raw output of one sandboxed phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionLimits {
    pub time_limit: Duration,
    pub memory_kb: u64,
    pub max_processes: u64,
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubmissionResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionView {
    pub submission_id: Uuid,
    pub language_id: u32,
    pub status: SubmissionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<u64>,
    pub truncated: bool,
    pub expected_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Submission> for SubmissionView {
    fn from(value: Submission) -> Self {
        Self {
            submission_id: value.id,
            language_id: value.language_id,
            status: value.status,
            stdout: value.stdout,
            stderr: value.stderr,
            exit_code: value.exit_code,
            execution_time_ms: value.execution_time_ms,
            truncated: value.truncated,
            expected_output: value.expected_output,
            created_at: value.created_at,
            completed_at: value.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSummary {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDetail {
    pub id: u32,
    pub name: String,
    pub extension: String,
    pub compiled: bool,
}
