//! Capture service orchestrating one full run
//!
//! Loader → jobs → worker pool → aggregator → renderer → artifacts. Target
//! list problems abort before anything is dispatched or written. Capture
//! failures only show up in the report. Document injection runs last and is
//! best-effort.
//!
//! ```rust,no_run
//! use snapshot_archiver::{CaptureService, Settings, SingleFileTool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::default();
//!     let tool = Arc::new(SingleFileTool::new(settings.tool.clone()));
//!     let service = CaptureService::new(settings, tool)?;
//!
//!     let outcome = service.run().await?;
//!     println!("{}/{} captured", outcome.report.succeeded(), outcome.report.total());
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

use crate::{
    inject_into_file, load_targets, render_json, render_summary, ArchiveError, CaptureJob,
    ConfigError, InvokerOptions, Metrics, RenderError, RunAggregator, RunLayout, RunReport,
    Settings, SnapshotInvoker, SnapshotTool, Target, WorkerPool,
};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub layout: RunLayout,
    /// Report and summary files, run directory first, then `latest/`
    pub artifacts: Vec<PathBuf>,
    /// Set when document injection was attempted and failed
    pub injection_error: Option<RenderError>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

pub struct CaptureService {
    settings: Settings,
    tool: Arc<dyn SnapshotTool>,
    metrics: Metrics,
}

impl CaptureService {
    pub fn new(settings: Settings, tool: Arc<dyn SnapshotTool>) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            tool,
            metrics: Metrics::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Load the configured target list and capture it.
    pub async fn run(&self) -> Result<RunOutcome, ArchiveError> {
        let targets = load_targets(&self.settings.targets_path)?;
        self.run_targets(targets).await
    }

    pub async fn run_targets(&self, targets: Vec<Target>) -> Result<RunOutcome, ArchiveError> {
        self.run_targets_at(targets, Utc::now()).await
    }

    /// Capture `targets` as a run that started at `started_at`.
    pub async fn run_targets_at(
        &self,
        targets: Vec<Target>,
        started_at: DateTime<Utc>,
    ) -> Result<RunOutcome, ArchiveError> {
        if targets.is_empty() {
            return Err(ConfigError::Empty.into());
        }

        let layout = RunLayout::new(&self.settings, started_at);
        layout.prepare()?;

        info!(
            "Starting run {} with {} URLs ({} workers, {}s timeout)",
            layout.run_id,
            targets.len(),
            self.settings.workers,
            self.settings.timeout_secs
        );

        let jobs = CaptureJob::from_targets(targets);
        let mut aggregator =
            RunAggregator::new(&layout.run_id, &layout.run_dir_name, started_at, &jobs);

        let invoker = Arc::new(SnapshotInvoker::new(
            self.tool.clone(),
            InvokerOptions::from(&self.settings),
            layout.run_dir.clone(),
        ));
        let pool = WorkerPool::new(self.settings.workers, invoker, self.metrics);
        pool.dispatch(jobs, &mut aggregator).await?;

        for stats in pool.get_worker_stats() {
            debug!(
                "Worker {}: {} processed, {} failed",
                stats.id, stats.processed_count, stats.error_count
            );
        }

        let report = aggregator.finish(Utc::now())?;
        self.metrics.run_finished(report.duration_seconds());
        info!(
            "Run {} finished in {:.1}s: {} succeeded, {} failed",
            report.run_id(),
            report.duration_seconds(),
            report.succeeded(),
            report.failed()
        );

        let report_json = render_json(&report)?;
        let summary = render_summary(&report);
        let artifacts = layout.publish(&report_json, &summary)?;

        let injection_error = match &self.settings.readme_path {
            Some(path) => match inject_into_file(path, &summary, &self.settings.markers) {
                Ok(()) => None,
                Err(e) => {
                    warn!("Report artifacts written, document injection skipped: {}", e);
                    Some(e)
                }
            },
            None => None,
        };

        Ok(RunOutcome {
            report,
            layout,
            artifacts,
            injection_error,
        })
    }
}
