//! Report rendering for the terminal

use privscan_checks::CheckCatalog;
use privscan_core::Severity;
use privscan_engine::{Report, ReportEntry, ScanReport};
use std::fmt::Write;

/// Output format for scan reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

/// Copy of the report keeping only entries at or above `min`.
///
/// Histograms, rank and score still describe the whole run.
pub fn filter_report(scan: &ScanReport, min: Severity) -> ScanReport {
    let mut filtered = scan.clone();
    filtered.report.findings.retain(|e| e.severity >= min);
    filtered
}

pub fn render(
    format: OutputFormat,
    catalog: &CheckCatalog,
    scan: &ScanReport,
) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(scan)?,
        OutputFormat::Text => render_text(catalog, scan),
        OutputFormat::Table => render_table(catalog, scan),
    })
}

fn check_name<'a>(catalog: &'a CheckCatalog, entry: &ReportEntry) -> &'a str {
    catalog
        .metadata(entry.id)
        .map(|m| m.name.as_str())
        .unwrap_or("unknown check")
}

fn render_text(catalog: &CheckCatalog, scan: &ScanReport) -> String {
    let mut out = String::new();
    if scan.report.findings.is_empty() {
        out.push_str("No findings to report.\n");
    }

    for entry in &scan.report.findings {
        let _ = writeln!(
            out,
            "[{}] {} {}",
            entry.severity.as_str().to_uppercase(),
            entry.id,
            check_name(catalog, entry)
        );
        if entry.evidence.len() > 1 {
            for line in &entry.evidence {
                let _ = writeln!(out, "  {}", line);
            }
        } else {
            let _ = writeln!(out, "  {}", entry.summary);
        }
    }

    out.push('\n');
    out.push_str(&summary(scan));
    out
}

fn render_table(catalog: &CheckCatalog, scan: &ScanReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} {:<10} {:<14} {:<40} {}",
        "ID", "SEVERITY", "CATEGORY", "CHECK", "SUMMARY"
    );
    let _ = writeln!(out, "{}", "-".repeat(100));
    for entry in &scan.report.findings {
        let mut name = check_name(catalog, entry).to_string();
        if name.len() > 38 {
            name.truncate(35);
            name.push_str("...");
        }
        let _ = writeln!(
            out,
            "{:<6} {:<10} {:<14} {:<40} {}",
            entry.id.0,
            entry.severity.as_str(),
            entry.category.as_str(),
            name,
            entry.summary
        );
    }
    out.push('\n');
    out.push_str(&summary(scan));
    out
}

fn summary(scan: &ScanReport) -> String {
    let report: &Report = &scan.report;
    let mut out = String::new();

    let _ = writeln!(out, "Scan {} ({} checks)", scan.run_id, report.overall.total());
    for severity in Severity::ALL.iter().rev() {
        let count = report.overall.count(*severity);
        if count > 0 {
            let _ = writeln!(out, "  {:<9} {}", severity.as_str(), count);
        }
    }
    let errors = report.errors().count();
    if errors > 0 {
        let _ = writeln!(out, "  not evaluated: {}", errors);
    }
    match report.rank {
        Some(rank) => {
            let _ = writeln!(out, "Overall: {} (check {})", rank.severity, rank.id);
        }
        None => out.push_str("Overall: nothing ran\n"),
    }
    let _ = writeln!(out, "Weighted score: {}", report.weighted_score);
    if report.partial {
        out.push_str("Scan was interrupted; results are partial\n");
    }
    out
}
