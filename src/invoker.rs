//! Snapshot invoker
//!
//! Runs the snapshot tool for one job under a hard timeout and turns whatever
//! happened into a [`JobOutcome`]. Nothing in here returns an error to the
//! caller: every failure becomes the job's terminal status.

use crate::{
    tail_text, CaptureJob, CaptureOptions, InvocationError, InvocationRequest, JobOutcome,
    JobStatus, Settings, SnapshotTool, ToolOutput,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Longest failure reason kept in a report
pub const MAX_ERROR_CHARS: usize = 200;

pub const EMPTY_OUTPUT_ERROR: &str = "empty or truncated output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokerOptions {
    pub capture: CaptureOptions,
    pub timeout: Duration,
    /// Artifacts of this size or smaller are treated as failed captures
    pub min_output_bytes: u64,
}

impl From<&Settings> for InvokerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            capture: CaptureOptions::from(settings),
            timeout: settings.timeout(),
            min_output_bytes: settings.min_output_bytes,
        }
    }
}

pub struct SnapshotInvoker {
    tool: Arc<dyn SnapshotTool>,
    options: InvokerOptions,
    run_dir: PathBuf,
}

impl SnapshotInvoker {
    pub fn new(tool: Arc<dyn SnapshotTool>, options: InvokerOptions, run_dir: PathBuf) -> Self {
        Self {
            tool,
            options,
            run_dir,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Where `job`'s artifact goes. Disjoint per job because file stems are
    /// unique within a run.
    pub fn output_path_for(&self, job: &CaptureJob) -> PathBuf {
        self.run_dir.join(format!("{}.html", job.file_stem))
    }

    /// Where the tool writes during an attempt. Sanitized stems never start
    /// with a dot, so this cannot clash with another job's artifact.
    pub fn staging_path_for(&self, job: &CaptureJob) -> PathBuf {
        self.run_dir.join(format!(".{}.partial.html", job.file_stem))
    }

    /// Capture one job. Blocks until the tool exits or the timeout expires.
    ///
    /// The tool writes into a staging file that replaces the artifact only
    /// when the capture succeeds. An artifact left by an earlier run in the
    /// same directory is neither counted nor removed by a failed attempt.
    pub async fn invoke(&self, job: &CaptureJob) -> JobOutcome {
        let staging = self.staging_path_for(job);
        discard(&staging).await;

        let request = InvocationRequest {
            url: job.url.clone(),
            output_path: staging.clone(),
            options: self.options.capture,
        };

        info!("Capturing {}: {}", job.name, job.url);

        let outcome = match timeout(self.options.timeout, self.tool.invoke(&request)).await {
            Ok(Ok(output)) => {
                let size = artifact_size(&staging).await;
                match classify(&output, size, self.options.min_output_bytes) {
                    JobOutcome::Succeeded { size_bytes, .. } => {
                        self.promote(&staging, &self.output_path_for(job), size_bytes)
                            .await
                    }
                    other => other,
                }
            }
            Ok(Err(e)) => outcome_for_error(e),
            Err(_) => outcome_for_error(InvocationError::Timeout(self.options.timeout)),
        };

        match &outcome {
            JobOutcome::Succeeded { size_bytes, .. } => {
                info!("Captured {} ({} bytes)", job.name, size_bytes);
            }
            JobOutcome::Failed { error } => {
                discard(&staging).await;
                warn!("Capture of {} failed: {}", job.name, error);
            }
            JobOutcome::TimedOut { error } => {
                discard(&staging).await;
                warn!("Capture of {} timed out: {}", job.name, error);
            }
        }

        outcome
    }

    async fn promote(&self, staging: &Path, target: &Path, size_bytes: u64) -> JobOutcome {
        match tokio::fs::rename(staging, target).await {
            Ok(()) => JobOutcome::Succeeded {
                output_path: target.to_path_buf(),
                size_bytes,
            },
            Err(e) => outcome_for_error(InvocationError::Io(format!(
                "cannot move capture to {}: {e}",
                target.display()
            ))),
        }
    }
}

/// Terminal outcome for an invocation that never produced tool output.
pub fn outcome_for_error(err: InvocationError) -> JobOutcome {
    let error = tail_text(&err.to_string(), MAX_ERROR_CHARS);
    match err.terminal_status() {
        JobStatus::TimedOut => JobOutcome::TimedOut { error },
        _ => JobOutcome::Failed { error },
    }
}

async fn artifact_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed staged capture {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove staged capture {}: {}", path.display(), e),
    }
}

/// Decide the outcome of a tool run that exited on its own.
///
/// `artifact_size` is the size of the file at `output.output_path`, if any.
pub fn classify(output: &ToolOutput, artifact_size: Option<u64>, min_output_bytes: u64) -> JobOutcome {
    if !output.success() {
        let reason = [&output.stderr_tail, &output.stdout_tail]
            .into_iter()
            .map(|text| text.trim())
            .find(|text| !text.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match output.exit_code {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            });
        return JobOutcome::Failed {
            error: tail_text(&reason, MAX_ERROR_CHARS),
        };
    }

    match artifact_size {
        Some(size) if size > min_output_bytes => JobOutcome::Succeeded {
            output_path: output.output_path.clone(),
            size_bytes: size,
        },
        _ => JobOutcome::Failed {
            error: EMPTY_OUTPUT_ERROR.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockSnapshotTool, Target};

    fn output(exit_code: Option<i32>, stderr: &str, stdout: &str) -> ToolOutput {
        ToolOutput {
            exit_code,
            stdout_tail: stdout.to_string(),
            stderr_tail: stderr.to_string(),
            output_path: PathBuf::from("run/a.html"),
        }
    }

    fn job(name: &str) -> CaptureJob {
        CaptureJob::new(
            0,
            Target {
                name: name.to_string(),
                url: format!("https://{name}.example"),
                file_stem: name.to_string(),
            },
        )
    }

    fn options(timeout: Duration) -> InvokerOptions {
        InvokerOptions {
            capture: CaptureOptions {
                wait_for_ms: 0,
                max_resource_size_mb: 1,
            },
            timeout,
            min_output_bytes: 2000,
        }
    }

    #[test]
    fn test_classify_success() {
        let outcome = classify(&output(Some(0), "", ""), Some(4096), 2000);
        assert_eq!(
            outcome,
            JobOutcome::Succeeded {
                output_path: PathBuf::from("run/a.html"),
                size_bytes: 4096
            }
        );
    }

    #[test]
    fn test_classify_small_or_missing_output() {
        for size in [None, Some(0), Some(2000)] {
            let outcome = classify(&output(Some(0), "", ""), size, 2000);
            assert_eq!(
                outcome,
                JobOutcome::Failed {
                    error: EMPTY_OUTPUT_ERROR.to_string()
                }
            );
        }
    }

    #[test]
    fn test_classify_nonzero_exit_prefers_stderr() {
        let outcome = classify(&output(Some(1), "net::ERR_NAME_NOT_RESOLVED", "stdout"), Some(9999), 2000);
        assert_eq!(outcome.status(), JobStatus::Failed);
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: "net::ERR_NAME_NOT_RESOLVED".to_string()
            }
        );

        let outcome = classify(&output(Some(1), "  ", "only stdout"), None, 2000);
        assert_eq!(outcome, JobOutcome::Failed { error: "only stdout".to_string() });

        let outcome = classify(&output(Some(7), "", ""), None, 2000);
        assert_eq!(outcome, JobOutcome::Failed { error: "exit status 7".to_string() });

        let outcome = classify(&output(None, "", ""), None, 2000);
        assert_eq!(outcome, JobOutcome::Failed { error: "terminated by signal".to_string() });
    }

    #[test]
    fn test_classify_truncates_long_errors() {
        let long = "e".repeat(1000);
        match classify(&output(Some(1), &long, ""), None, 2000) {
            JobOutcome::Failed { error } => assert_eq!(error.len(), MAX_ERROR_CHARS),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_writes_artifact_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = MockSnapshotTool::new();
        tool.expect_invoke().times(1).returning(|request| {
            std::fs::write(&request.output_path, vec![b'x'; 4096]).unwrap();
            Ok(ToolOutput {
                exit_code: Some(0),
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                output_path: request.output_path.clone(),
            })
        });

        let invoker = SnapshotInvoker::new(
            Arc::new(tool),
            options(Duration::from_secs(5)),
            dir.path().to_path_buf(),
        );
        let outcome = invoker.invoke(&job("home")).await;

        assert_eq!(
            outcome,
            JobOutcome::Succeeded {
                output_path: dir.path().join("home.html"),
                size_bytes: 4096
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_removes_truncated_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = MockSnapshotTool::new();
        tool.expect_invoke().returning(|request| {
            std::fs::write(&request.output_path, b"<html></html>").unwrap();
            Ok(ToolOutput {
                exit_code: Some(0),
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                output_path: request.output_path.clone(),
            })
        });

        let invoker = SnapshotInvoker::new(
            Arc::new(tool),
            options(Duration::from_secs(5)),
            dir.path().to_path_buf(),
        );
        let outcome = invoker.invoke(&job("blocked")).await;

        assert_eq!(outcome.status(), JobStatus::Failed);
        assert!(!dir.path().join("blocked.html").exists());
        assert!(!dir.path().join(".blocked.partial.html").exists());
    }

    fn silent_tool() -> MockSnapshotTool {
        let mut tool = MockSnapshotTool::new();
        tool.expect_invoke().returning(|request| {
            Ok(ToolOutput {
                exit_code: Some(0),
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                output_path: request.output_path.clone(),
            })
        });
        tool
    }

    #[tokio::test]
    async fn test_existing_artifact_is_not_counted_as_fresh_capture() {
        let dir = tempfile::tempdir().unwrap();
        let previous = dir.path().join("home.html");
        std::fs::write(&previous, vec![b'o'; 4096]).unwrap();

        let invoker = SnapshotInvoker::new(
            Arc::new(silent_tool()),
            options(Duration::from_secs(5)),
            dir.path().to_path_buf(),
        );
        let outcome = invoker.invoke(&job("home")).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: EMPTY_OUTPUT_ERROR.to_string()
            }
        );
        assert_eq!(std::fs::read(&previous).unwrap(), vec![b'o'; 4096]);
    }

    #[tokio::test]
    async fn test_failed_attempt_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let previous = dir.path().join("home.html");
        std::fs::write(&previous, vec![b'o'; 4096]).unwrap();

        let mut tool = MockSnapshotTool::new();
        tool.expect_invoke().returning(|request| {
            std::fs::write(&request.output_path, b"<html>").unwrap();
            Ok(ToolOutput {
                exit_code: Some(1),
                stdout_tail: String::new(),
                stderr_tail: "net::ERR_CONNECTION_RESET".to_string(),
                output_path: request.output_path.clone(),
            })
        });

        let invoker = SnapshotInvoker::new(
            Arc::new(tool),
            options(Duration::from_secs(5)),
            dir.path().to_path_buf(),
        );
        let outcome = invoker.invoke(&job("home")).await;

        assert_eq!(outcome.status(), JobStatus::Failed);
        assert_eq!(std::fs::read(&previous).unwrap(), vec![b'o'; 4096]);
        assert!(!invoker.staging_path_for(&job("home")).exists());
    }

    #[tokio::test]
    async fn test_successful_attempt_replaces_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("home.html"), vec![b'o'; 4096]).unwrap();

        let mut tool = MockSnapshotTool::new();
        tool.expect_invoke().returning(|request| {
            std::fs::write(&request.output_path, vec![b'n'; 5000]).unwrap();
            Ok(ToolOutput {
                exit_code: Some(0),
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                output_path: request.output_path.clone(),
            })
        });

        let invoker = SnapshotInvoker::new(
            Arc::new(tool),
            options(Duration::from_secs(5)),
            dir.path().to_path_buf(),
        );
        let outcome = invoker.invoke(&job("home")).await;

        assert_eq!(
            outcome,
            JobOutcome::Succeeded {
                output_path: dir.path().join("home.html"),
                size_bytes: 5000
            }
        );
        assert_eq!(std::fs::read(dir.path().join("home.html")).unwrap(), vec![b'n'; 5000]);
        assert!(!invoker.staging_path_for(&job("home")).exists());
    }

    #[test]
    fn test_outcome_for_error_follows_terminal_status() {
        assert_eq!(
            outcome_for_error(InvocationError::Timeout(Duration::from_secs(2))).status(),
            JobStatus::TimedOut
        );
        assert_eq!(
            outcome_for_error(InvocationError::Panicked("boom".to_string())).status(),
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_invoke_spawn_error_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = MockSnapshotTool::new();
        tool.expect_invoke()
            .returning(|_| Err(InvocationError::Spawn("single-file: not found".to_string())));

        let invoker = SnapshotInvoker::new(
            Arc::new(tool),
            options(Duration::from_secs(5)),
            dir.path().to_path_buf(),
        );
        match invoker.invoke(&job("a")).await {
            JobOutcome::Failed { error } => assert!(error.contains("not found")),
            other => panic!("unexpected {other:?}"),
        }
    }

    struct HangingTool;

    #[async_trait::async_trait]
    impl SnapshotTool for HangingTool {
        async fn invoke(&self, request: &InvocationRequest) -> Result<ToolOutput, InvocationError> {
            tokio::fs::write(&request.output_path, vec![b'x'; 8192]).await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput {
                exit_code: Some(0),
                stdout_tail: String::new(),
                stderr_tail: String::new(),
                output_path: request.output_path.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_invoke_timeout_never_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = SnapshotInvoker::new(
            Arc::new(HangingTool),
            options(Duration::from_millis(200)),
            dir.path().to_path_buf(),
        );

        let outcome = invoker.invoke(&job("slow")).await;
        match outcome {
            JobOutcome::TimedOut { error } => assert!(error.starts_with("exceeded timeout")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dir.path().join("slow.html").exists());
    }

    /// Alive and not a zombie waiting to be reaped.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .map_or(false, |state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_invoke_kills_whole_process_tree_on_timeout() {
        use crate::{SingleFileTool, ToolSettings};
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("browser.pid");
        let script = dir.path().join("slow-single-file.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nsleep 30 &\necho $! > \"{}\"\nprintf partial > \"$2\"\nexec sleep 5\n",
                pid_file.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tool = SingleFileTool::new(ToolSettings {
            executable: script.display().to_string(),
            browser_executable: None,
            browser_args: Vec::new(),
            ..Default::default()
        });
        let invoker = SnapshotInvoker::new(
            Arc::new(tool),
            options(Duration::from_millis(500)),
            dir.path().to_path_buf(),
        );

        let started = std::time::Instant::now();
        let outcome = invoker.invoke(&job("hangs")).await;
        assert_eq!(outcome.status(), JobStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!dir.path().join("hangs.html").exists());
        assert!(!invoker.staging_path_for(&job("hangs")).exists());

        let grandchild: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..40 {
            alive = process_alive(grandchild);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "process {grandchild} outlived the timed-out capture");
    }
}
