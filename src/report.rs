//! Report rendering
//!
//! A frozen [`RunReport`] is rendered two ways: pretty JSON carrying every
//! field, and a Markdown summary for humans. The summary can also be spliced
//! into an external document between two literal markers.
//!
//! Rendering only reads the report, never the clock, so rendering the same
//! report twice gives identical bytes.

use crate::{format_bytes, format_duration, JobStatus, Markers, RenderError, RunReport};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Structured serialization of the whole report
pub fn render_json(report: &RunReport) -> Result<String, RenderError> {
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    Ok(json)
}

pub fn parse_json(content: &str) -> Result<RunReport, RenderError> {
    Ok(serde_json::from_str(content)?)
}

/// Human-readable Markdown summary
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "# Capture run {} ({})",
        report.run_id(),
        report.started_at().format("%Y-%m-%d %H:%M UTC")
    );
    out.push('\n');
    out.push_str("## Statistics\n\n");
    out.push_str("| Metric | Value |\n");
    out.push_str("|--------|-------|\n");
    let _ = writeln!(out, "| Total URLs | {} |", report.total());
    let _ = writeln!(out, "| Succeeded | {} |", report.succeeded());
    let _ = writeln!(out, "| Failed | {} |", report.failed());
    if report.timed_out() > 0 {
        let _ = writeln!(out, "| Timed out | {} |", report.timed_out());
    }
    let _ = writeln!(out, "| Success rate | {:.1}% |", report.success_rate());
    let _ = writeln!(
        out,
        "| Total time | {} |",
        format_duration(report.duration())
    );
    let _ = writeln!(out, "| Total size | {} |", format_bytes(report.total_bytes()));
    let _ = writeln!(
        out,
        "| Average per page | {} |",
        format_bytes(report.average_bytes())
    );

    out.push_str("\n## Captures\n\n");
    out.push_str("| # | Name | Status | Duration | Size / Error |\n");
    out.push_str("|---|------|--------|----------|--------------|\n");
    for job in report.jobs() {
        let duration = job
            .duration_ms()
            .map(|ms| format_duration(Duration::from_millis(ms)))
            .unwrap_or_else(|| "-".to_string());
        let detail = match job.status() {
            JobStatus::Succeeded => job.size_bytes().map(format_bytes).unwrap_or_default(),
            _ => job.error().map(table_cell).unwrap_or_default(),
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            job.index + 1,
            table_cell(&job.name),
            status_label(job.status()),
            duration,
            detail
        );
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        out.push_str("\n## Failed captures\n\n");
        for job in failures {
            let _ = writeln!(
                out,
                "- **{}** ({}): {}  ",
                job.name,
                job.status(),
                job.error().unwrap_or("unknown error")
            );
            let _ = writeln!(out, "  `{}`", job.url);
        }
    }

    out.push_str("\n---\n");
    let _ = writeln!(
        out,
        "Finished {} · folder `{}`",
        report.finished_at().format("%Y-%m-%d %H:%M:%S UTC"),
        report.run_dir()
    );

    out
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Succeeded => "✅ succeeded",
        JobStatus::Failed => "❌ failed",
        JobStatus::TimedOut => "⏱️ timed out",
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
    }
}

/// Keep free text from breaking the Markdown table.
fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Replace the text strictly between the first start marker and the next end
/// marker with `summary`. Everything outside the markers is left untouched.
pub fn inject_summary(
    document: &str,
    summary: &str,
    markers: &Markers,
    source: &str,
) -> Result<String, RenderError> {
    if summary.contains(&markers.start) || summary.contains(&markers.end) {
        return Err(RenderError::MarkerInSummary);
    }

    let start = document.find(&markers.start);
    let end = document.find(&markers.end);

    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (start, end) => {
            let mut missing = Vec::new();
            if start.is_none() {
                missing.push(markers.start.as_str());
            }
            if end.is_none() {
                missing.push(markers.end.as_str());
            }
            return Err(RenderError::MarkersMissing {
                path: source.to_string(),
                missing: missing.join(", "),
            });
        }
    };

    let region_start = start + markers.start.len();
    let region_end = match document[region_start..].find(&markers.end) {
        Some(offset) => region_start + offset,
        None => {
            debug_assert!(end < region_start);
            return Err(RenderError::MarkersOutOfOrder {
                path: source.to_string(),
            });
        }
    };

    let mut injected = String::with_capacity(document.len() + summary.len());
    injected.push_str(&document[..region_start]);
    injected.push('\n');
    injected.push_str(summary.trim_end_matches('\n'));
    injected.push('\n');
    injected.push_str(&document[region_end..]);
    Ok(injected)
}

/// Whether `document` has both markers, start before end
pub fn has_markers(document: &str, markers: &Markers) -> bool {
    match document.find(&markers.start) {
        Some(start) => document[start + markers.start.len()..].contains(&markers.end),
        None => false,
    }
}

/// Inject `summary` into the document at `path`, rewriting it only when the
/// content changes.
pub fn inject_into_file(path: &Path, summary: &str, markers: &Markers) -> Result<(), RenderError> {
    let io_err = |e: std::io::Error| RenderError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let document = std::fs::read_to_string(path).map_err(io_err)?;
    let updated = inject_summary(&document, summary, markers, &path.display().to_string())?;

    if updated != document {
        std::fs::write(path, &updated).map_err(io_err)?;
        info!("Updated report section in {}", path.display());
    } else {
        info!("Report section in {} already up to date", path.display());
    }
    Ok(())
}
