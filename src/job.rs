//! Capture jobs and their lifecycle
//!
//! A job moves `pending → running → {succeeded | failed | timed_out}` exactly
//! once. The outcome fields are only reachable through [`CaptureJob::finish`],
//! which keeps `output_path`/`size_bytes` and `error` consistent with the
//! terminal status.

use crate::Target;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { output_path: PathBuf, size_bytes: u64 },
    Failed { error: String },
    TimedOut { error: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Succeeded { .. } => JobStatus::Succeeded,
            JobOutcome::Failed { .. } => JobStatus::Failed,
            JobOutcome::TimedOut { .. } => JobStatus::TimedOut,
        }
    }
}

/// Illegal lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub name: String,
    pub from: JobStatus,
    pub to: JobStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {:?} cannot move from {} to {}",
            self.name, self.from, self.to
        )
    }
}

impl std::error::Error for TransitionError {}

/// The unit of work: one named URL and the result of capturing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureJob {
    /// Position in the submission order
    pub index: usize,
    pub name: String,
    pub url: String,
    pub file_stem: String,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    error: Option<String>,
}

impl CaptureJob {
    pub fn new(index: usize, target: Target) -> Self {
        Self {
            index,
            name: target.name,
            url: target.url,
            file_stem: target.file_stem,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            output_path: None,
            size_bytes: None,
            error: None,
        }
    }

    /// Jobs for `targets`, indexed in the given order.
    pub fn from_targets(targets: Vec<Target>) -> Vec<Self> {
        targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| Self::new(index, target))
            .collect()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output_path.as_ref()
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(self.transition_error(JobStatus::Running));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    /// Record the terminal outcome. Only a running job can finish, and only once.
    pub fn finish(&mut self, outcome: JobOutcome, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Running {
            return Err(self.transition_error(outcome.status()));
        }

        self.status = outcome.status();
        self.finished_at = Some(at);
        self.duration_ms = self
            .started_at
            .map(|started| (at - started).num_milliseconds().max(0) as u64);

        match outcome {
            JobOutcome::Succeeded {
                output_path,
                size_bytes,
            } => {
                self.output_path = Some(output_path);
                self.size_bytes = Some(size_bytes);
            }
            JobOutcome::Failed { error } | JobOutcome::TimedOut { error } => {
                self.error = Some(error);
            }
        }

        Ok(())
    }

    fn transition_error(&self, to: JobStatus) -> TransitionError {
        TransitionError {
            name: self.name.clone(),
            from: self.status,
            to,
        }
    }
}
