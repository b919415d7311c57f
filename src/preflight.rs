use crate::{has_markers, load_targets, Settings, SingleFileTool};
use std::time::Duration;
use tracing::{error, info, warn};

pub const TOOL_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckLevel {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub level: CheckLevel,
    pub detail: String,
}

impl CheckResult {
    fn new(name: &'static str, level: CheckLevel, detail: impl Into<String>) -> Self {
        Self {
            name,
            level,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub overall: CheckLevel,
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn is_ready(&self) -> bool {
        self.overall != CheckLevel::Critical
    }
}

/// Checks that a capture run can start: target list, snapshot tool, output
/// root and the injection document.
pub struct PreflightChecker<'a> {
    settings: &'a Settings,
    tool: SingleFileTool,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            tool: SingleFileTool::new(settings.tool.clone()),
        }
    }

    pub async fn run(&self) -> PreflightReport {
        let checks = vec![
            self.check_settings(),
            self.check_targets(),
            self.check_tool().await,
            self.check_output_root(),
            self.check_document(),
        ];

        let overall = checks
            .iter()
            .map(|c| c.level)
            .max()
            .unwrap_or(CheckLevel::Ok);

        for check in &checks {
            match check.level {
                CheckLevel::Ok => info!("{}: {}", check.name, check.detail),
                CheckLevel::Warning => warn!("{}: {}", check.name, check.detail),
                CheckLevel::Critical => error!("{}: {}", check.name, check.detail),
            }
        }

        PreflightReport { overall, checks }
    }

    fn check_settings(&self) -> CheckResult {
        match self.settings.validate() {
            Ok(()) => CheckResult::new("settings", CheckLevel::Ok, "valid"),
            Err(e) => CheckResult::new("settings", CheckLevel::Critical, e.to_string()),
        }
    }

    fn check_targets(&self) -> CheckResult {
        match load_targets(&self.settings.targets_path) {
            Ok(targets) => CheckResult::new(
                "targets",
                CheckLevel::Ok,
                format!(
                    "{} URLs in {}",
                    targets.len(),
                    self.settings.targets_path.display()
                ),
            ),
            Err(e) => CheckResult::new("targets", CheckLevel::Critical, e.to_string()),
        }
    }

    async fn check_tool(&self) -> CheckResult {
        match self.tool.version(TOOL_PROBE_TIMEOUT).await {
            Ok(version) => CheckResult::new(
                "snapshot tool",
                CheckLevel::Ok,
                format!("{} {}", self.tool.executable(), version),
            ),
            Err(e) => CheckResult::new(
                "snapshot tool",
                CheckLevel::Critical,
                format!("{e} (install with: npm install -g single-file-cli)"),
            ),
        }
    }

    fn check_output_root(&self) -> CheckResult {
        let root = &self.settings.output_root;
        match std::fs::create_dir_all(root) {
            Ok(()) => CheckResult::new("output", CheckLevel::Ok, root.display().to_string()),
            Err(e) => CheckResult::new(
                "output",
                CheckLevel::Critical,
                format!("cannot create {}: {e}", root.display()),
            ),
        }
    }

    /// Missing markers only cost the injection step, so this is never
    /// critical.
    fn check_document(&self) -> CheckResult {
        let Some(path) = &self.settings.readme_path else {
            return CheckResult::new("document", CheckLevel::Ok, "injection disabled");
        };

        match std::fs::read_to_string(path) {
            Ok(content) if has_markers(&content, &self.settings.markers) => {
                CheckResult::new("document", CheckLevel::Ok, format!("{} has markers", path.display()))
            }
            Ok(_) => CheckResult::new(
                "document",
                CheckLevel::Warning,
                format!(
                    "{} lacks {} ... {}",
                    path.display(),
                    self.settings.markers.start,
                    self.settings.markers.end
                ),
            ),
            Err(e) => CheckResult::new(
                "document",
                CheckLevel::Warning,
                format!("cannot read {}: {e}", path.display()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSettings;

    fn settings(dir: &std::path::Path) -> Settings {
        Settings {
            output_root: dir.join("captures"),
            targets_path: dir.join("urls.json"),
            readme_path: Some(dir.join("README.md")),
            tool: ToolSettings {
                executable: "/nonexistent/single-file".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_tool_and_targets_are_critical() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let report = PreflightChecker::new(&settings).run().await;

        assert_eq!(report.overall, CheckLevel::Critical);
        assert!(!report.is_ready());
        let level = |name: &str| report.checks.iter().find(|c| c.name == name).unwrap().level;
        assert_eq!(level("settings"), CheckLevel::Ok);
        assert_eq!(level("targets"), CheckLevel::Critical);
        assert_eq!(level("snapshot tool"), CheckLevel::Critical);
        assert_eq!(level("output"), CheckLevel::Ok);
        assert_eq!(level("document"), CheckLevel::Warning);
    }

    #[tokio::test]
    async fn test_document_markers_detected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        std::fs::write(
            dir.path().join("README.md"),
            "<!-- CAPTURE_REPORT_START -->\n<!-- CAPTURE_REPORT_END -->\n",
        )
        .unwrap();

        let checker = PreflightChecker::new(&settings);
        assert_eq!(checker.check_document().level, CheckLevel::Ok);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_environment() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("single-file");
        std::fs::write(&script, "#!/bin/sh\necho 2.0.73\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(
            dir.path().join("urls.json"),
            r#"{"urls": {"home": "https://home.example"}}"#,
        )
        .unwrap();

        let mut settings = settings(dir.path());
        settings.tool.executable = script.display().to_string();
        settings.readme_path = None;

        let report = PreflightChecker::new(&settings).run().await;
        assert_eq!(report.overall, CheckLevel::Ok, "{:?}", report.checks);
        assert!(report.is_ready());
    }
}
