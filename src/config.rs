//! Configuration management with serde serialization/deserialization
//!
//! This module provides the run settings for the archiver: worker pool size,
//! per-job limits, output layout, the SingleFile command line and the markers
//! used for document injection.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 3;

/// Main settings structure for a capture run
///
/// Every field has a default, so a settings file only needs the keys it
/// changes.
///
/// # Examples
///
/// ```rust
/// use snapshot_archiver::Settings;
///
/// let settings = Settings {
///     workers: 3,
///     timeout_secs: 120,
///     ..Default::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Number of snapshot tool invocations allowed in flight (default: 2, range 1-3)
    pub workers: usize,

    /// Delay the snapshot tool waits after page load, in milliseconds (default: 3000)
    pub wait_for_ms: u64,

    /// Largest single resource the snapshot tool will inline, in MB (default: 25)
    pub max_resource_size_mb: u64,

    /// Hard wall-clock limit per job, in seconds (default: 90)
    ///
    /// The subprocess is killed when this elapses.
    pub timeout_secs: u64,

    /// Artifacts of this many bytes or fewer count as empty or truncated (default: 2000)
    pub min_output_bytes: u64,

    /// Root directory for run directories and `latest/` (default: `captures`)
    pub output_root: PathBuf,

    /// How run directories are named (default: weekly)
    pub partition: Partition,

    /// Target list location (default: `config/urls.json`)
    pub targets_path: PathBuf,

    /// Document that receives the rendered summary between the markers.
    /// `None` disables injection.
    pub readme_path: Option<PathBuf>,

    pub markers: Markers,

    /// SingleFile command line settings
    pub tool: ToolSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 2,
            wait_for_ms: 3000,
            max_resource_size_mb: 25,
            timeout_secs: 90,
            min_output_bytes: 2000,
            output_root: PathBuf::from("captures"),
            partition: Partition::Week,
            targets_path: PathBuf::from("config/urls.json"),
            readme_path: Some(PathBuf::from("README.md")),
            markers: Markers::default(),
            tool: ToolSettings::default(),
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn latest_dir(&self) -> PathBuf {
        self.output_root.join("latest")
    }

    /// Read a JSON settings file. Keys not present keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::Malformed(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::InvalidSetting(format!(
                "workers must be between {MIN_WORKERS} and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_resource_size_mb == 0 {
            return Err(ConfigError::InvalidSetting(
                "max resource size must be greater than 0".to_string(),
            ));
        }

        if self.tool.executable.trim().is_empty() {
            return Err(ConfigError::InvalidSetting(
                "snapshot tool executable must not be empty".to_string(),
            ));
        }

        if self.markers.start.is_empty() || self.markers.end.is_empty() {
            return Err(ConfigError::InvalidSetting(
                "document markers must not be empty".to_string(),
            ));
        }

        if self.markers.start == self.markers.end {
            return Err(ConfigError::InvalidSetting(
                "start and end markers must differ".to_string(),
            ));
        }

        Ok(())
    }
}

/// Naming scheme for the per-run output directory
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// `week_YYYY-MM-DD`, the Monday of the run's week. Reruns within a week
    /// overwrite the same directory.
    Week,
    /// One directory per run, named by the run id.
    Run,
}

/// Literal sentinel strings bounding the injectable region of a document
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Markers {
    pub start: String,
    pub end: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            start: "<!-- CAPTURE_REPORT_START -->".to_string(),
            end: "<!-- CAPTURE_REPORT_END -->".to_string(),
        }
    }
}

/// SingleFile CLI settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    /// Snapshot tool executable (default: `single-file` on PATH)
    pub executable: String,

    /// Browser the snapshot tool drives (default: `/usr/bin/google-chrome`)
    pub browser_executable: Option<String>,

    /// Flags handed to the browser
    pub browser_args: Vec<String>,

    pub load_deferred_images: bool,
    pub compress_css: bool,
    pub compress_html: bool,
    pub remove_unused_styles: bool,
    pub remove_unused_fonts: bool,
    pub remove_alternative_medias: bool,

    /// Appended verbatim after the generated flags
    pub extra_args: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            executable: "single-file".to_string(),
            browser_executable: Some("/usr/bin/google-chrome".to_string()),
            browser_args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--headless".to_string(),
                "--disable-gpu".to_string(),
                "--disable-extensions".to_string(),
            ],
            load_deferred_images: true,
            compress_css: true,
            compress_html: true,
            remove_unused_styles: true,
            remove_unused_fonts: true,
            remove_alternative_medias: true,
            extra_args: Vec::new(),
        }
    }
}

/// Per-invocation knobs passed through the snapshot tool boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub wait_for_ms: u64,
    pub max_resource_size_mb: u64,
}

impl From<&Settings> for CaptureOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            wait_for_ms: settings.wait_for_ms,
            max_resource_size_mb: settings.max_resource_size_mb,
        }
    }
}

/// Build the SingleFile argument list for one URL
///
/// # Examples
///
/// ```rust
/// use snapshot_archiver::{get_snapshot_args, CaptureOptions, ToolSettings};
/// use std::path::Path;
///
/// let options = CaptureOptions { wait_for_ms: 3000, max_resource_size_mb: 25 };
/// let args = get_snapshot_args(
///     &ToolSettings::default(),
///     "https://example.com",
///     Path::new("out/example.html"),
///     &options,
/// );
/// assert_eq!(args[0], "https://example.com");
/// assert!(args.contains(&"--wait-for".to_string()));
/// ```
pub fn get_snapshot_args(
    tool: &ToolSettings,
    url: &str,
    output: &Path,
    options: &CaptureOptions,
) -> Vec<String> {
    let mut args = vec![url.to_string(), output.display().to_string()];

    if let Some(browser) = &tool.browser_executable {
        args.push("--browser-executable-path".to_string());
        args.push(browser.clone());
    }

    if !tool.browser_args.is_empty() {
        args.push("--browser-args".to_string());
        args.push(tool.browser_args.join(" "));
    }

    args.push("--wait-for".to_string());
    args.push(options.wait_for_ms.to_string());
    args.push("--max-resource-size".to_string());
    args.push(options.max_resource_size_mb.to_string());
    // The default would uniquify the name and leave the staged file empty.
    args.push("--filename-conflict-action".to_string());
    args.push("overwrite".to_string());

    let flags = [
        ("--load-deferred-images", tool.load_deferred_images),
        ("--compress-CSS", tool.compress_css),
        ("--compress-HTML", tool.compress_html),
        ("--remove-unused-styles", tool.remove_unused_styles),
        ("--remove-unused-fonts", tool.remove_unused_fonts),
        ("--remove-alternative-medias", tool.remove_alternative_medias),
    ];
    for (flag, enabled) in flags {
        args.push(flag.to_string());
        args.push(enabled.to_string());
    }

    args.extend(tool.extra_args.iter().cloned());
    args
}
