//! Snapshot tool boundary
//!
//! The invoker and scheduler only see [`SnapshotTool`], so they can be driven
//! by fakes in tests. [`SingleFileTool`] is the production implementation that
//! runs the SingleFile CLI as a subprocess.

use crate::{get_snapshot_args, tail_text, CaptureOptions, InvocationError, ToolSettings};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::debug;

/// Characters of stdout/stderr kept from each invocation
pub const OUTPUT_TAIL_CHARS: usize = 2000;

/// One capture request for the snapshot tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub url: String,
    pub output_path: PathBuf,
    pub options: CaptureOptions,
}

/// What the snapshot tool reported after exiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub output_path: PathBuf,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Capability boundary around the external snapshot program.
///
/// Implementations must stop all work when the returned future is dropped;
/// the invoker enforces timeouts by dropping it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotTool: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ToolOutput, InvocationError>;
}

/// Runs `single-file <url> <output> ...` for each request
#[derive(Debug, Clone)]
pub struct SingleFileTool {
    settings: ToolSettings,
}

impl SingleFileTool {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }

    pub fn executable(&self) -> &str {
        &self.settings.executable
    }

    /// The tool runs as the leader of its own process group so that the
    /// browser it launches can be killed together with it.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.settings.executable);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Ask the tool for its version string. Used by the preflight check.
    pub async fn version(&self, limit: Duration) -> Result<String, InvocationError> {
        let child = self
            .command()
            .arg("--version")
            .spawn()
            .map_err(|e| InvocationError::Spawn(format!("{}: {e}", self.settings.executable)))?;
        let _group = ProcessGroupGuard::new(&child);

        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(InvocationError::Timeout(limit)),
        };

        if !output.status.success() {
            return Err(InvocationError::Spawn(format!(
                "{} --version exited with {}",
                self.settings.executable, output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// SIGKILLs the child's whole process group when dropped. Runs both after a
/// normal exit, to reap stragglers, and when a timeout drops the invocation.
struct ProcessGroupGuard {
    #[cfg(unix)]
    pgid: Option<libc::pid_t>,
}

impl ProcessGroupGuard {
    fn new(child: &Child) -> Self {
        #[cfg(unix)]
        {
            Self {
                pgid: child.id().and_then(|id| libc::pid_t::try_from(id).ok()),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child;
            Self {}
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: kill(2) takes plain integers and touches no memory.
            if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
                debug!("Killed process group {}", pgid);
            }
        }
    }
}

#[async_trait]
impl SnapshotTool for SingleFileTool {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ToolOutput, InvocationError> {
        let args = get_snapshot_args(
            &self.settings,
            &request.url,
            &request.output_path,
            &request.options,
        );
        debug!("{} {}", self.settings.executable, args.join(" "));

        // A timed-out invocation is cancelled by dropping this future. The
        // guard then takes the browser processes down with the tool.
        let child = self
            .command()
            .args(&args)
            .spawn()
            .map_err(|e| InvocationError::Spawn(format!("{}: {e}", self.settings.executable)))?;
        let _group = ProcessGroupGuard::new(&child);

        let output = child.wait_with_output().await?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout_tail: tail_text(&String::from_utf8_lossy(&output.stdout), OUTPUT_TAIL_CHARS),
            stderr_tail: tail_text(&String::from_utf8_lossy(&output.stderr), OUTPUT_TAIL_CHARS),
            output_path: request.output_path.clone(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script_tool(dir: &std::path::Path, body: &str) -> SingleFileTool {
        let script = dir.join("fake-single-file.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        SingleFileTool::new(ToolSettings {
            executable: script.display().to_string(),
            browser_executable: None,
            browser_args: Vec::new(),
            ..Default::default()
        })
    }

    fn request(dir: &std::path::Path) -> InvocationRequest {
        InvocationRequest {
            url: "https://example.com".to_string(),
            output_path: dir.join("example.html"),
            options: CaptureOptions {
                wait_for_ms: 0,
                max_resource_size_mb: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_invoke_passes_url_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script_tool(dir.path(), r#"echo "$1" > "$2"; echo done"#);

        let output = tool.invoke(&request(dir.path())).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_tail, "done");
        let written = std::fs::read_to_string(dir.path().join("example.html")).unwrap();
        assert_eq!(written.trim(), "https://example.com");
    }

    #[tokio::test]
    async fn test_invoke_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script_tool(dir.path(), "echo 'navigation failed' >&2; exit 3");

        let output = tool.invoke(&request(dir.path())).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr_tail, "navigation failed");
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let tool = SingleFileTool::new(ToolSettings {
            executable: "/nonexistent/single-file".to_string(),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let err = tool.invoke(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, InvocationError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_version_probe() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script_tool(dir.path(), "echo 'single-file 2.0.0'");
        let version = tool.version(Duration::from_secs(5)).await.unwrap();
        assert_eq!(version, "single-file 2.0.0");
    }
}
