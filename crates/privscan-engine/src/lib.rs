//! PrivScan Engine - runs a check catalog and reduces the results to a report
//!
//! - `Runner`: bounded-concurrency execution with per-check deadlines
//! - `CancelToken`: stops a run and keeps what already completed
//! - `Aggregator`: normalizes errors, builds histograms, ranks, and sorts
//! - `scan`: one run from selection to timestamped report

pub mod aggregator;
pub mod cancel;
pub mod runner;

pub use aggregator::{AggregateConfig, Aggregator, Rank, Report, ReportEntry, SeverityHistogram};
pub use cancel::CancelToken;
pub use runner::{result_id, RunConfig, RunOutput, Runner};

use chrono::{DateTime, Utc};
use privscan_checks::CheckCatalog;
use privscan_core::{Check, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A report plus the identity and timing of the run that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub report: Report,
}

/// Run every check enabled by default and aggregate the results
pub async fn scan(
    catalog: &CheckCatalog,
    runner: &Runner,
    aggregator: &Aggregator,
    cancel: &CancelToken,
) -> Result<ScanReport> {
    scan_selected(catalog, catalog.enabled_by_default(), runner, aggregator, cancel).await
}

/// Run the given checks and aggregate the results.
///
/// `catalog` supplies categories and weights for the report.
pub async fn scan_selected(
    catalog: &CheckCatalog,
    checks: Vec<Arc<dyn Check>>,
    runner: &Runner,
    aggregator: &Aggregator,
    cancel: &CancelToken,
) -> Result<ScanReport> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!("Scan {} started", run_id);

    let output = runner.run_with_cancel(checks, cancel).await?;
    let report = aggregator.aggregate(catalog, output.results, output.cancelled);

    let finished_at = Utc::now();
    info!(
        "Scan {} finished: {} findings, rank {:?}",
        run_id,
        report.findings.len(),
        report.rank.map(|r| r.severity)
    );

    Ok(ScanReport {
        run_id,
        started_at,
        finished_at,
        report,
    })
}
