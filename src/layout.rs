//! Output directory layout
//!
//! ```text
//! <output_root>/
//!   week_2026-10-12/      one directory per partition
//!     news_home.html      one artifact per succeeded job
//!     report.json
//!     summary.md
//!   latest/               overwritten every run
//!     report.json
//!     summary.md
//! ```

use crate::{ArchiveError, Partition, Settings};
use chrono::{DateTime, Datelike, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

pub const REPORT_FILE: &str = "report.json";
pub const SUMMARY_FILE: &str = "summary.md";
pub const LATEST_DIR: &str = "latest";

/// Run id for a run started at `started_at`
pub fn run_id_for(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Directory name holding a run's artifacts
pub fn partition_name(partition: Partition, started_at: DateTime<Utc>) -> String {
    match partition {
        Partition::Week => {
            let days_from_monday = i64::from(started_at.weekday().num_days_from_monday());
            let monday = started_at.date_naive() - Duration::days(days_from_monday);
            format!("week_{}", monday.format("%Y-%m-%d"))
        }
        Partition::Run => run_id_for(started_at),
    }
}

/// Paths for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub run_id: String,
    pub run_dir_name: String,
    pub run_dir: PathBuf,
    pub latest_dir: PathBuf,
}

impl RunLayout {
    pub fn new(settings: &Settings, started_at: DateTime<Utc>) -> Self {
        let run_dir_name = partition_name(settings.partition, started_at);
        Self {
            run_id: run_id_for(started_at),
            run_dir: settings.output_root.join(&run_dir_name),
            latest_dir: settings.output_root.join(LATEST_DIR),
            run_dir_name,
        }
    }

    /// Create the run and `latest` directories.
    pub fn prepare(&self) -> Result<(), ArchiveError> {
        for dir in [&self.run_dir, &self.latest_dir] {
            std::fs::create_dir_all(dir).map_err(|e| ArchiveError::io(dir, e))?;
        }
        info!("Run directory: {}", self.run_dir.display());
        Ok(())
    }

    /// Write the JSON report and Markdown summary into the run directory and
    /// `latest/`.
    pub fn publish(&self, report_json: &str, summary: &str) -> Result<Vec<PathBuf>, ArchiveError> {
        let mut written = Vec::with_capacity(4);
        for dir in [&self.run_dir, &self.latest_dir] {
            written.push(write_file(dir, REPORT_FILE, report_json)?);
            written.push(write_file(dir, SUMMARY_FILE, summary)?);
        }
        Ok(written)
    }
}

fn write_file(dir: &Path, name: &str, content: &str) -> Result<PathBuf, ArchiveError> {
    let path = dir.join(name);
    std::fs::write(&path, content).map_err(|e| ArchiveError::io(&path, e))?;
    info!("Wrote {}", path.display());
    Ok(path)
}
