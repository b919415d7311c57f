//! # Snapshot Archiver
//!
//! Captures a configured list of web pages into self-contained HTML files by
//! driving an external snapshot tool (`single-file`) as a subprocess, with a
//! small bounded pool of concurrent captures and a hard timeout per URL.
//!
//! Every run produces a machine-readable `report.json` and a Markdown
//! `summary.md`, written into the run directory and mirrored into `latest/`.
//! The summary can also be injected between two marker comments of a
//! README-style document.
//!
//! ## Pipeline
//!
//! | Stage | Module | Notes |
//! |-------|--------|-------|
//! | Load targets | [`targets`] | Ordered, unique names, http(s) URLs only |
//! | Build jobs | [`job`] | One job per target, `pending` |
//! | Dispatch | [`worker`] | 1-3 workers pulling from a shared queue |
//! | Capture | [`invoker`], [`tool`] | Subprocess with timeout and kill |
//! | Aggregate | [`aggregator`] | Results back in submission order |
//! | Render | [`report`] | JSON report, Markdown summary, injection |
//! | Publish | [`layout`] | Run directory plus `latest/` |
//!
//! A failing capture never aborts the run. Only an invalid target list or an
//! unwritable output root does.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Capture everything in config/urls.json
//! snapshot-archiver capture --workers 2 --timeout 90
//!
//! # Check the tool, target list and document before a run
//! snapshot-archiver check
//!
//! # Re-inject the latest summary into README.md
//! snapshot-archiver inject --readme README.md
//! ```

/// Run settings, defaults and snapshot tool arguments
pub mod config;

/// Error types for every stage of a run
pub mod error;

/// Target list loading and validation
pub mod targets;

/// Capture jobs and their lifecycle
pub mod job;

/// The external snapshot tool behind a trait
pub mod tool;

/// One capture with timeout and output classification
pub mod invoker;

/// Bounded worker pool executing capture jobs
pub mod worker;

/// Collects finished jobs into a run report
pub mod aggregator;

/// JSON report, Markdown summary and document injection
pub mod report;

/// Run directories and published artifacts
pub mod layout;

/// Capture service orchestrating a full run
pub mod orchestrator;

/// Environment checks before a run
pub mod preflight;

/// Run and job metrics
pub mod metrics;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;


pub use aggregator::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use invoker::*;
pub use job::*;
pub use layout::*;
pub use metrics::*;
pub use orchestrator::*;
pub use preflight::*;
pub use report::*;
pub use targets::*;
pub use tool::*;
pub use utils::*;
pub use worker::*;
