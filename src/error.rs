use crate::JobStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal problems with the target list or settings. Raised before any job is
/// dispatched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    Missing(PathBuf),

    #[error("Cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Malformed target list: {0}")]
    Malformed(String),

    #[error("Target list contains no entries")]
    Empty,

    #[error("Duplicate target name: {0}")]
    DuplicateName(String),

    #[error("Targets {first:?} and {second:?} both map to file name {stem:?}")]
    FileStemCollision {
        first: String,
        second: String,
        stem: String,
    },

    #[error("Invalid target name: {0:?}")]
    InvalidName(String),

    #[error("Invalid URL for {name}: {url} ({reason})")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// A single capture attempt went wrong. Always recovered into the job's
/// terminal status, never propagated out of the scheduler.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("Failed to launch snapshot tool: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("exceeded timeout ({0:?})")]
    Timeout(Duration),

    #[error("invoker panicked: {0}")]
    Panicked(String),
}

impl InvocationError {
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            InvocationError::Timeout(_) => JobStatus::TimedOut,
            _ => JobStatus::Failed,
        }
    }
}

impl From<std::io::Error> for InvocationError {
    fn from(err: std::io::Error) -> Self {
        InvocationError::Io(err.to_string())
    }
}

/// Report rendering and document injection failures. Non-fatal for a run.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{path} is missing marker(s): {missing}")]
    MarkersMissing { path: String, missing: String },

    #[error("{path}: end marker appears before start marker")]
    MarkersOutOfOrder { path: String },

    #[error("Rendered summary contains a sentinel marker")]
    MarkerInSummary,

    #[error("IO error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Serialization(err.to_string())
    }
}

/// Bookkeeping errors raised by the result aggregator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AggregateError {
    #[error("Job index {index} out of range for a run of {total} jobs")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("Result for job {name:?} (index {index}) recorded twice")]
    DuplicateResult { index: usize, name: String },

    #[error("Job {name:?} is not terminal (status {status})")]
    NotTerminal { name: String, status: JobStatus },

    #[error("{missing} of {total} jobs never reported a result")]
    Incomplete { missing: usize, total: usize },
}

/// Umbrella error for the library surface.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for a run that could not complete.
    pub fn exit_code(&self) -> i32 {
        match self {
            ArchiveError::Config(_) => 2,
            _ => 3,
        }
    }
}
