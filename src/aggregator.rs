//! Result aggregation
//!
//! Terminal jobs arrive in completion order; the report lists them in
//! submission order. Each job carries its submission index, and the aggregator
//! files it into that slot. No I/O happens here.

use crate::{AggregateError, CaptureJob, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Outcome of one full run. Built by [`RunAggregator::finish`] and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    run_id: String,
    /// Name of the directory the run's artifacts were written to
    run_dir: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_seconds: f64,
    total: usize,
    succeeded: usize,
    /// Failed or timed out
    failed: usize,
    /// Subset of `failed`
    timed_out: usize,
    total_bytes: u64,
    average_bytes: u64,
    jobs: Vec<CaptureJob>,
}

impl RunReport {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &str {
        &self.run_dir
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    /// `duration_seconds` as a `Duration`. A report read back from disk may
    /// carry a negative or out-of-range value; that reads as zero.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_seconds).unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn timed_out(&self) -> usize {
        self.timed_out
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn average_bytes(&self) -> u64 {
        self.average_bytes
    }

    /// Jobs in submission order
    pub fn jobs(&self) -> &[CaptureJob] {
        &self.jobs
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaptureJob> {
        self.jobs
            .iter()
            .filter(|job| job.status() != JobStatus::Succeeded)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Percentage of jobs that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }

    /// 0 when every job succeeded, 1 for a degraded run
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }
}

/// Collects terminal jobs for one run
#[derive(Debug)]
pub struct RunAggregator {
    run_id: String,
    run_dir: String,
    started_at: DateTime<Utc>,
    names: Vec<String>,
    slots: Vec<Option<CaptureJob>>,
    received: usize,
}

impl RunAggregator {
    /// Empty aggregator expecting one result per job in `jobs`.
    pub fn new(
        run_id: impl Into<String>,
        run_dir: impl Into<String>,
        started_at: DateTime<Utc>,
        jobs: &[CaptureJob],
    ) -> Self {
        Self {
            run_id: run_id.into(),
            run_dir: run_dir.into(),
            started_at,
            names: jobs.iter().map(|job| job.name.clone()).collect(),
            slots: vec![None; jobs.len()],
            received: 0,
        }
    }

    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    /// File a terminal job into its submission slot.
    pub fn record(&mut self, job: CaptureJob) -> Result<(), AggregateError> {
        let total = self.slots.len();
        if job.index >= total {
            return Err(AggregateError::IndexOutOfRange {
                index: job.index,
                total,
            });
        }

        if !job.status().is_terminal() {
            return Err(AggregateError::NotTerminal {
                name: job.name.clone(),
                status: job.status(),
            });
        }

        let slot = &mut self.slots[job.index];
        if slot.is_some() {
            return Err(AggregateError::DuplicateResult {
                index: job.index,
                name: job.name.clone(),
            });
        }

        self.received += 1;
        info!(
            "[{}/{}] {} {}",
            self.received,
            total,
            job.status(),
            job.name
        );
        *slot = Some(job);
        Ok(())
    }

    /// Freeze the collected results into a report. Every job must have
    /// reported.
    pub fn finish(self, finished_at: DateTime<Utc>) -> Result<RunReport, AggregateError> {
        let total = self.slots.len();
        let missing: Vec<&str> = self
            .slots
            .iter()
            .zip(&self.names)
            .filter(|(slot, _)| slot.is_none())
            .map(|(_, name)| name.as_str())
            .collect();
        if !missing.is_empty() {
            tracing::error!("No result for: {}", missing.join(", "));
            return Err(AggregateError::Incomplete {
                missing: missing.len(),
                total,
            });
        }

        let jobs: Vec<CaptureJob> = self.slots.into_iter().flatten().collect();

        let succeeded = jobs
            .iter()
            .filter(|job| job.status() == JobStatus::Succeeded)
            .count();
        let timed_out = jobs
            .iter()
            .filter(|job| job.status() == JobStatus::TimedOut)
            .count();
        let total_bytes: u64 = jobs.iter().filter_map(|job| job.size_bytes()).sum();
        let average_bytes = if succeeded > 0 {
            total_bytes / succeeded as u64
        } else {
            0
        };

        let first_dispatch = jobs
            .iter()
            .filter_map(|job| job.started_at())
            .min()
            .unwrap_or(self.started_at);
        let last_completion = jobs
            .iter()
            .filter_map(|job| job.finished_at())
            .max()
            .unwrap_or(finished_at);
        let duration_seconds =
            (last_completion - first_dispatch).num_milliseconds().max(0) as f64 / 1000.0;

        Ok(RunReport {
            run_id: self.run_id,
            run_dir: self.run_dir,
            started_at: self.started_at,
            finished_at,
            duration_seconds,
            total,
            succeeded,
            failed: total - succeeded,
            timed_out,
            total_bytes,
            average_bytes,
            jobs,
        })
    }
}
