//! Result aggregation - reduces a run's results into a ranked report

use privscan_checks::CheckCatalog;
use privscan_core::{CheckCategory, CheckOutcome, CheckResult, ErrorKind, ResultId, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Aggregation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateConfig {
    /// Severity given to checks that could not be evaluated
    pub unevaluated_severity: Severity,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            unevaluated_severity: Severity::Low,
        }
    }
}

/// Count of outcomes per severity level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityHistogram {
    pub info: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl SeverityHistogram {
    pub fn add(&mut self, severity: Severity) {
        *self.slot(severity) += 1;
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Info => self.info,
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }

    pub fn total(&self) -> usize {
        Severity::ALL.iter().map(|s| self.count(*s)).sum()
    }

    /// Highest level with at least one outcome
    pub fn highest(&self) -> Option<Severity> {
        Severity::ALL
            .iter()
            .rev()
            .copied()
            .find(|s| self.count(*s) > 0)
    }

    fn slot(&mut self, severity: Severity) -> &mut usize {
        match severity {
            Severity::Info => &mut self.info,
            Severity::Low => &mut self.low,
            Severity::Medium => &mut self.medium,
            Severity::High => &mut self.high,
            Severity::Critical => &mut self.critical,
        }
    }
}

/// One line of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: ResultId,
    pub category: CheckCategory,
    pub severity: Severity,
    pub summary: String,
    /// Finding fields; empty for checks that could not be evaluated
    pub evidence: Vec<String>,
    /// Set when the check could not be evaluated
    pub error: Option<ErrorKind>,
}

impl ReportEntry {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The single overall rank of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    pub severity: Severity,
    /// Lowest id among the entries at that severity
    pub id: ResultId,
}

/// The aggregated result of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Ascending by id
    pub findings: Vec<ReportEntry>,
    pub by_category: BTreeMap<CheckCategory, SeverityHistogram>,
    pub overall: SeverityHistogram,
    /// `None` only for an empty report
    pub rank: Option<Rank>,
    /// Sum of weight x severity over evaluated findings
    pub weighted_score: u64,
    /// Built from a cancelled run
    pub partial: bool,
}

impl Report {
    /// Entries at or above a severity
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &ReportEntry> {
        self.findings.iter().filter(move |e| e.severity >= severity)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ReportEntry> {
        self.findings.iter().filter(|e| e.is_error())
    }
}

/// Reduces check results into a [`Report`]
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: AggregateConfig,
}

impl Aggregator {
    pub fn new(config: AggregateConfig) -> Self {
        Self { config }
    }

    /// Fold an error into the uniform outcome shape
    pub fn normalize(&self, result: CheckResult) -> CheckOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(err) => CheckOutcome::from_error(err, self.config.unevaluated_severity),
        }
    }

    /// Build the report. Input order does not matter.
    pub fn aggregate<I>(&self, catalog: &CheckCatalog, results: I, partial: bool) -> Report
    where
        I: IntoIterator<Item = CheckResult>,
    {
        let mut outcomes: Vec<CheckOutcome> =
            results.into_iter().map(|r| self.normalize(r)).collect();
        outcomes.sort_by_key(|o| o.id());

        let mut by_category: BTreeMap<CheckCategory, SeverityHistogram> = BTreeMap::new();
        let mut overall = SeverityHistogram::default();
        let mut weighted_score = 0u64;
        let mut findings = Vec::with_capacity(outcomes.len());

        for outcome in outcomes {
            let metadata = catalog.metadata(outcome.id());
            let category = metadata
                .map(|m| m.category)
                .unwrap_or(CheckCategory::Uncategorized);
            let severity = outcome.severity();

            by_category.entry(category).or_default().add(severity);
            overall.add(severity);

            let error = outcome.error().map(|e| e.kind());
            if error.is_none() {
                let weight = metadata.map(|m| m.weight).unwrap_or(0);
                weighted_score += u64::from(weight) * u64::from(severity.as_number());
            }

            findings.push(ReportEntry {
                id: outcome.id(),
                category,
                severity,
                summary: outcome.summary(),
                evidence: outcome.evidence().map(<[String]>::to_vec).unwrap_or_default(),
                error,
            });
        }

        let rank = overall_rank(&findings);
        debug!(
            "Aggregated {} outcomes, rank {:?}, score {}",
            findings.len(),
            rank,
            weighted_score
        );

        Report {
            findings,
            by_category,
            overall,
            rank,
            weighted_score,
            partial,
        }
    }
}

/// Highest severity present; among entries at that level the lowest id wins
fn overall_rank(findings: &[ReportEntry]) -> Option<Rank> {
    let severity = findings.iter().map(|e| e.severity).max()?;
    findings
        .iter()
        .filter(|e| e.severity == severity)
        .map(|e| e.id)
        .min()
        .map(|id| Rank { severity, id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use privscan_checks::{builtin_catalog, CatalogOptions};
    use privscan_core::CheckError;
    use std::time::Duration;

    fn catalog() -> CheckCatalog {
        builtin_catalog(&CatalogOptions::default()).unwrap()
    }

    #[test]
    fn test_errors_are_normalized() {
        let aggregator = Aggregator::new(AggregateConfig {
            unevaluated_severity: Severity::Medium,
        });
        let report = aggregator.aggregate(
            &catalog(),
            vec![Err(CheckError::timeout(ResultId(20), Duration::from_millis(5)))],
            false,
        );
        let entry = &report.findings[0];
        assert_eq!(entry.severity, Severity::Medium);
        assert_eq!(entry.error, Some(ErrorKind::Timeout));
        assert_eq!(entry.category, CheckCategory::Applications);
        assert!(entry.evidence.is_empty());
        assert!(entry.summary.starts_with("could not evaluate (timeout)"));
        // unevaluated checks do not add to the score
        assert_eq!(report.weighted_score, 0);
    }

    #[test]
    fn test_sorted_and_histograms() {
        let results = vec![
            Ok(CheckOutcome::finding(ResultId(30), Severity::Medium, ["adblocker not found"])),
            Ok(CheckOutcome::clear(ResultId(1), ["Windows 11 Pro"])),
            Ok(CheckOutcome::finding(ResultId(10), Severity::Medium, ["AllowTelemetry", "3"])),
            Err(CheckError::resource_unavailable(ResultId(12), "denied")),
        ];
        let report = Aggregator::default().aggregate(&catalog(), results, false);

        let ids: Vec<u32> = report.findings.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![1, 10, 12, 30]);

        assert_eq!(report.overall.total(), 4);
        assert_eq!(report.overall.medium, 2);
        assert_eq!(report.overall.low, 1);
        assert_eq!(report.overall.info, 1);
        assert_eq!(report.by_category[&CheckCategory::Privacy].total(), 2);
        assert_eq!(report.by_category[&CheckCategory::Browser].medium, 1);
        assert_eq!(report.by_category[&CheckCategory::System].info, 1);

        // tie at Medium between 10 and 30
        assert_eq!(
            report.rank,
            Some(Rank {
                severity: Severity::Medium,
                id: ResultId(10)
            })
        );
        // 10: weight 3 x medium, 30: weight 2 x medium
        assert_eq!(report.weighted_score, 3 * 2 + 2 * 2);
        assert_eq!(report.errors().count(), 1);
        assert_eq!(report.at_least(Severity::Medium).count(), 2);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = vec![
            Ok(CheckOutcome::finding(ResultId(2), Severity::High, ["old build"])),
            Ok(CheckOutcome::clear(ResultId(1), ["Windows 10 Pro"])),
        ];
        let mut b = a.clone();
        b.reverse();
        let aggregator = Aggregator::default();
        assert_eq!(
            aggregator.aggregate(&catalog(), a, false),
            aggregator.aggregate(&catalog(), b, false)
        );
    }

    #[test]
    fn test_unknown_id_is_uncategorized() {
        let report = Aggregator::default().aggregate(
            &catalog(),
            vec![Ok(CheckOutcome::finding(ResultId(900), Severity::Critical, ["x"]))],
            true,
        );
        assert_eq!(report.findings[0].category, CheckCategory::Uncategorized);
        assert_eq!(report.rank.unwrap().severity, Severity::Critical);
        assert_eq!(report.weighted_score, 0);
        assert!(report.partial);
    }

    #[test]
    fn test_empty_and_all_clear() {
        let aggregator = Aggregator::default();
        let empty = aggregator.aggregate(&catalog(), Vec::new(), false);
        assert!(empty.rank.is_none());
        assert_eq!(empty.overall.highest(), None);

        let clear = aggregator.aggregate(
            &catalog(),
            vec![
                Ok(CheckOutcome::clear(ResultId(13), ["0"])),
                Ok(CheckOutcome::clear(ResultId(11), ["0"])),
            ],
            false,
        );
        assert_eq!(
            clear.rank,
            Some(Rank {
                severity: Severity::Info,
                id: ResultId(11)
            })
        );
    }

    #[test]
    fn test_report_serializes_lowercase() {
        let report = Aggregator::default().aggregate(
            &catalog(),
            vec![Ok(CheckOutcome::finding(ResultId(31), Severity::Low, ["Do Not Track off"]))],
            false,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["findings"][0]["category"], "browser");
        assert_eq!(json["findings"][0]["severity"], "low");
        assert_eq!(json["by_category"]["browser"]["low"], 1);
        assert_eq!(json["rank"]["id"], 31);
    }
}
