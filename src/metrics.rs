use crate::{CaptureJob, JobStatus};
use metrics::{decrement_gauge, gauge, histogram, increment_counter, increment_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use tracing::{info, warn};

pub const JOBS_TOTAL: &str = "snapshot_jobs_total";
pub const JOB_DURATION_SECONDS: &str = "snapshot_job_duration_seconds";
pub const ARTIFACT_BYTES: &str = "snapshot_artifact_bytes";
pub const JOBS_IN_FLIGHT: &str = "snapshot_jobs_in_flight";
pub const RUN_DURATION_SECONDS: &str = "snapshot_run_duration_seconds";

/// Capture metrics, emitted through the `metrics` facade.
///
/// Without an installed recorder every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn job_started(&self) {
        increment_gauge!(JOBS_IN_FLIGHT, 1.0);
    }

    pub fn job_finished(&self, job: &CaptureJob) {
        decrement_gauge!(JOBS_IN_FLIGHT, 1.0);
        increment_counter!(JOBS_TOTAL, "status" => job.status().as_str());

        if let Some(ms) = job.duration_ms() {
            histogram!(JOB_DURATION_SECONDS, ms as f64 / 1000.0, "status" => job.status().as_str());
        }

        if job.status() == JobStatus::Succeeded {
            if let Some(bytes) = job.size_bytes() {
                histogram!(ARTIFACT_BYTES, bytes as f64);
            }
        }
    }

    pub fn run_finished(&self, duration_seconds: f64) {
        gauge!(RUN_DURATION_SECONDS, duration_seconds);
    }
}

/// Prometheus text dump written once the run is over, for node_exporter's
/// textfile collector or a CI artifact.
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    /// Install the Prometheus recorder as the global `metrics` recorder.
    pub fn install() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Write the current exposition to `path`. Failures are logged only.
    pub fn write_to(&self, path: &Path) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Cannot create {}: {}", parent.display(), e);
                return;
            }
        }

        match std::fs::write(path, self.render()) {
            Ok(()) => info!("Metrics written to {}", path.display()),
            Err(e) => warn!("Cannot write metrics to {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::tests::{finished, pending_jobs};
    use crate::JobOutcome;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let metrics = Metrics::new();
        let job = finished(
            pending_jobs(&["a"]).remove(0),
            JobOutcome::Failed { error: "boom".into() },
            Utc::now(),
            5,
        );
        metrics.job_started();
        metrics.job_finished(&job);
        metrics.run_finished(1.5);
    }

    #[test]
    fn test_prometheus_exporter_renders_and_writes() {
        let exporter = PrometheusExporter::install().unwrap();
        let metrics = Metrics::new();
        let job = finished(
            pending_jobs(&["a"]).remove(0),
            JobOutcome::Succeeded {
                output_path: PathBuf::from("a.html"),
                size_bytes: 4096,
            },
            Utc::now(),
            1500,
        );
        metrics.job_started();
        metrics.job_finished(&job);
        metrics.run_finished(2.0);

        let text = exporter.render();
        assert!(text.contains(JOBS_TOTAL));
        assert!(text.contains("status=\"succeeded\""));
        assert!(text.contains(RUN_DURATION_SECONDS));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/metrics.prom");
        exporter.write_to(&path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), exporter.render());
    }
}
