use crate::{
    format_bytes, format_duration, inject_into_file, parse_json, render_summary, CaptureService,
    CheckLevel, ConfigError, PreflightChecker, PrometheusExporter, Settings, SingleFileTool,
    LATEST_DIR, REPORT_FILE,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "snapshot-archiver")]
#[command(about = "Capture a list of web pages into self-contained HTML archives")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Settings file path (JSON)")]
    pub settings: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture every URL in the target list and write the run report
    Capture {
        #[arg(long, help = "Target list (JSON with a \"urls\" object)")]
        targets: Option<PathBuf>,

        #[arg(short, long, help = "Concurrent captures (1-3)")]
        workers: Option<usize>,

        #[arg(long, help = "Wait after page load, in milliseconds")]
        wait_for: Option<u64>,

        #[arg(long, help = "Maximum size of a single resource, in MB")]
        max_resource_size: Option<u64>,

        #[arg(long, help = "Per-URL timeout in seconds")]
        timeout: Option<u64>,

        #[arg(short, long, help = "Output root directory")]
        output: Option<PathBuf>,

        #[arg(long, help = "Document to inject the summary into")]
        readme: Option<PathBuf>,

        #[arg(long, conflicts_with = "readme", help = "Skip document injection")]
        no_readme: bool,

        #[arg(long, help = "Write Prometheus metrics to this file after the run")]
        metrics_file: Option<PathBuf>,
    },

    /// Check that the environment is ready for a capture run
    Check {
        #[arg(long, help = "Target list to validate")]
        targets: Option<PathBuf>,
    },

    /// Inject the summary of an existing report into a document
    Inject {
        #[arg(long, help = "Report file (default: <output>/latest/report.json)")]
        report: Option<PathBuf>,

        #[arg(long, help = "Document to update")]
        readme: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOverrides {
    pub targets: Option<PathBuf>,
    pub workers: Option<usize>,
    pub wait_for: Option<u64>,
    pub max_resource_size: Option<u64>,
    pub timeout: Option<u64>,
    pub output: Option<PathBuf>,
    pub readme: Option<PathBuf>,
    pub no_readme: bool,
}

impl CaptureOverrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(targets) = &self.targets {
            settings.targets_path = targets.clone();
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(wait_for) = self.wait_for {
            settings.wait_for_ms = wait_for;
        }
        if let Some(size) = self.max_resource_size {
            settings.max_resource_size_mb = size;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if let Some(output) = &self.output {
            settings.output_root = output.clone();
        }
        if let Some(readme) = &self.readme {
            settings.readme_path = Some(readme.clone());
        }
        if self.no_readme {
            settings.readme_path = None;
        }
    }
}

/// Defaults, then the settings file if one was given.
pub fn load_settings(args: &Cli) -> Result<Settings, ConfigError> {
    let settings = match &args.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    Ok(settings)
}

pub struct CliRunner {
    pub settings: Settings,
}

impl CliRunner {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run `command` and return the process exit code.
    pub async fn run(&self, command: Commands) -> anyhow::Result<i32> {
        match command {
            Commands::Capture {
                targets,
                workers,
                wait_for,
                max_resource_size,
                timeout,
                output,
                readme,
                no_readme,
                metrics_file,
            } => {
                let overrides = CaptureOverrides {
                    targets,
                    workers,
                    wait_for,
                    max_resource_size,
                    timeout,
                    output,
                    readme,
                    no_readme,
                };
                self.run_capture(overrides, metrics_file).await
            }
            Commands::Check { targets } => self.run_check(targets).await,
            Commands::Inject { report, readme } => self.run_inject(report, readme),
        }
    }

    pub async fn run_capture(
        &self,
        overrides: CaptureOverrides,
        metrics_file: Option<PathBuf>,
    ) -> anyhow::Result<i32> {
        let mut settings = self.settings.clone();
        overrides.apply(&mut settings);

        let exporter = match &metrics_file {
            Some(_) => match PrometheusExporter::install() {
                Ok(exporter) => Some(exporter),
                Err(e) => {
                    warn!("Metrics disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        let tool = Arc::new(SingleFileTool::new(settings.tool.clone()));
        let service = match CaptureService::new(settings, tool) {
            Ok(service) => service,
            Err(e) => {
                error!("{}", e);
                return Ok(2);
            }
        };

        let outcome = match service.run().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Run aborted: {}", e);
                return Ok(e.exit_code());
            }
        };

        let report = &outcome.report;
        println!();
        println!("Capture complete");
        println!("  Succeeded: {}/{}", report.succeeded(), report.total());
        println!("  Time:      {}", format_duration(report.duration()));
        println!("  Size:      {}", format_bytes(report.total_bytes()));
        println!("  Folder:    {}", outcome.layout.run_dir.display());
        for job in report.failures() {
            println!(
                "  FAILED {} ({}): {}",
                job.name,
                job.status(),
                job.error().unwrap_or("unknown error")
            );
        }
        if let Some(e) = &outcome.injection_error {
            println!("  Document not updated: {e}");
        }

        if let (Some(exporter), Some(path)) = (&exporter, &metrics_file) {
            exporter.write_to(path);
        }

        Ok(outcome.exit_code())
    }

    pub async fn run_check(&self, targets: Option<PathBuf>) -> anyhow::Result<i32> {
        let mut settings = self.settings.clone();
        if let Some(targets) = targets {
            settings.targets_path = targets;
        }

        let report = PreflightChecker::new(&settings).run().await;

        println!("Preflight check");
        println!("===============");
        for check in &report.checks {
            let mark = match check.level {
                CheckLevel::Ok => "ok  ",
                CheckLevel::Warning => "warn",
                CheckLevel::Critical => "FAIL",
            };
            println!("  [{mark}] {:<14} {}", check.name, check.detail);
        }

        Ok(if report.is_ready() { 0 } else { 1 })
    }

    pub fn run_inject(
        &self,
        report: Option<PathBuf>,
        readme: Option<PathBuf>,
    ) -> anyhow::Result<i32> {
        let report_path = report.unwrap_or_else(|| {
            self.settings
                .output_root
                .join(LATEST_DIR)
                .join(REPORT_FILE)
        });
        let readme_path = readme
            .or_else(|| self.settings.readme_path.clone())
            .context("no document configured for injection")?;

        let content = std::fs::read_to_string(&report_path)
            .with_context(|| format!("reading {}", report_path.display()))?;
        let report = parse_json(&content)
            .with_context(|| format!("parsing {}", report_path.display()))?;

        inject_into_file(&readme_path, &render_summary(&report), &self.settings.markers)
            .with_context(|| format!("updating {}", readme_path.display()))?;

        info!(
            "Injected run {} ({}/{} succeeded) into {}",
            report.run_id(),
            report.succeeded(),
            report.total(),
            readme_path.display()
        );
        Ok(0)
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
}
