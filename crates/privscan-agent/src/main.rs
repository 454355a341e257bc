//! PrivScan Agent - audits the local machine's privacy and security posture
//!
//! Runs the built-in check catalog once, or on an interval in daemon mode,
//! and prints a ranked report.

mod output;
mod profiles;

use anyhow::{Context, Result};
use clap::Parser;
use output::{filter_report, render, OutputFormat};
use privscan_access::live_accessors;
use privscan_checks::{builtin_catalog, CatalogOptions, CheckCatalog};
use privscan_common::{init_logging_with_config, Config, LogConfig};
use privscan_core::{Check, ResultId, Severity};
use privscan_engine::{scan_selected, AggregateConfig, Aggregator, CancelToken, RunConfig, Runner, ScanReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// PrivScan Agent - endpoint privacy audit
#[derive(Parser, Debug)]
#[command(name = "privscan-agent")]
#[command(about = "Audit this machine's privacy and security settings", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "privscan.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact); overrides the config file
    #[arg(long)]
    log_format: Option<String>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Only run these check ids
    #[arg(long, value_delimiter = ',')]
    only: Vec<u32>,

    /// Never run these check ids
    #[arg(long, value_delimiter = ',')]
    skip: Vec<u32>,

    /// Only print findings at or above this severity
    #[arg(long, default_value = "info")]
    min_severity: Severity,

    /// Maximum number of checks running at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-check deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Browser profile directory (repeatable)
    #[arg(long = "profile-root")]
    profile_roots: Vec<String>,

    /// Re-run every N minutes until interrupted
    #[arg(long)]
    interval_minutes: Option<u64>,

    /// List the check catalog and exit
    #[arg(long)]
    list_checks: bool,
}

impl Args {
    /// Fold command-line overrides into the loaded configuration
    fn apply(&self, mut config: Config) -> Config {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        if !self.only.is_empty() {
            config.scan.only = self.only.iter().copied().map(ResultId).collect();
        }
        if !self.skip.is_empty() {
            config.scan.skip = self.skip.iter().copied().map(ResultId).collect();
        }
        if let Some(limit) = self.concurrency {
            config.scan.concurrency_limit = limit;
        }
        if let Some(ms) = self.timeout_ms {
            config.scan.per_check_timeout_ms = ms;
        }
        if !self.profile_roots.is_empty() {
            config.browser.profile_roots = self.profile_roots.clone();
        }
        if let Some(minutes) = self.interval_minutes {
            config.scan.interval_minutes = minutes;
        }
        config
    }
}

/// Everything a scan pass needs, built once
struct Agent {
    catalog: CheckCatalog,
    checks: Vec<Arc<dyn Check>>,
    runner: Runner,
    aggregator: Aggregator,
    format: OutputFormat,
    min_severity: Severity,
}

impl Agent {
    /// Run one scan; Ctrl-C cancels it and keeps the partial report.
    ///
    /// Returns the report and whether it was interrupted.
    async fn scan_once(&self) -> Result<(ScanReport, bool)> {
        let cancel = CancelToken::new();
        let scan = scan_selected(
            &self.catalog,
            self.checks.clone(),
            &self.runner,
            &self.aggregator,
            &cancel,
        );
        tokio::pin!(scan);

        let mut interrupted = false;
        let report = tokio::select! {
            result = &mut scan => result?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping scan");
                interrupted = true;
                cancel.cancel();
                (&mut scan).await?
            }
        };
        Ok((report, interrupted))
    }

    fn print(&self, scan: &ScanReport) -> Result<()> {
        let shown = filter_report(scan, self.min_severity);
        println!("{}", render(self.format, &self.catalog, &shown)?);
        Ok(())
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let config = if args.config.exists() {
        Config::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        Config::default()
    };
    let mut config = args.apply(config.merge_env()?);

    if config.browser.profile_roots.is_empty() {
        config.browser.profile_roots =
            profiles::default_profile_roots(std::env::consts::OS, |name| std::env::var(name).ok());
    }
    config.validate()?;
    Ok(config)
}

fn print_catalog(catalog: &CheckCatalog) {
    for check in catalog.all() {
        let meta = check.metadata();
        println!(
            "{:>4}  {:<8} {:<13} {}{}",
            meta.id.0,
            meta.severity.as_str(),
            meta.category.as_str(),
            meta.name,
            if meta.enabled_by_default { "" } else { " (off by default)" }
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging_with_config(LogConfig::from_settings(&config.logging)?)?;

    info!("PrivScan Agent v{}", env!("CARGO_PKG_VERSION"));

    let catalog = builtin_catalog(&CatalogOptions {
        profile_roots: config.browser.profile_roots.clone(),
        ..Default::default()
    })?;

    if args.list_checks {
        print_catalog(&catalog);
        return Ok(());
    }

    let checks = catalog.select(&config.scan.only, &config.scan.skip)?;
    let runner = Runner::new(
        live_accessors(),
        RunConfig::default()
            .with_concurrency_limit(config.scan.concurrency_limit)
            .with_per_check_timeout(config.scan.per_check_timeout()),
    )?;
    let aggregator = Aggregator::new(AggregateConfig {
        unevaluated_severity: config.scan.unevaluated_severity,
    });

    let agent = Agent {
        catalog,
        checks,
        runner,
        aggregator,
        format: args.format,
        min_severity: args.min_severity,
    };

    match config.scan.interval() {
        None => run_once(&agent).await,
        Some(every) => run_daemon(&agent, every).await,
    }
}

async fn run_once(agent: &Agent) -> Result<()> {
    let (scan, _) = agent.scan_once().await?;
    agent.print(&scan)?;

    if scan.report.rank.is_some_and(|r| r.severity >= Severity::High) {
        warn!("High or critical findings present");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_daemon(agent: &Agent, every: Duration) -> Result<()> {
    info!("Running every {:?}, Ctrl-C to stop", every);
    let mut timer = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match agent.scan_once().await {
                    Ok((scan, interrupted)) => {
                        agent.print(&scan)?;
                        if interrupted {
                            break;
                        }
                    }
                    // a bad pass is logged and retried on the next tick
                    Err(e) => error!("Scan failed: {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_id_lists() {
        let args = Args::parse_from([
            "privscan-agent",
            "--only",
            "10,11,30",
            "--skip",
            "11",
            "--min-severity",
            "medium",
            "--format",
            "json",
        ]);
        assert_eq!(args.only, vec![10, 11, 30]);
        assert_eq!(args.skip, vec![11]);
        assert_eq!(args.min_severity, Severity::Medium);
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.interval_minutes.is_none());
    }

    #[test]
    fn test_bad_severity_is_rejected() {
        assert!(Args::try_parse_from(["privscan-agent", "--min-severity", "severe"]).is_err());
    }

    #[test]
    fn test_overrides_replace_config() {
        let args = Args::parse_from([
            "privscan-agent",
            "--only",
            "1,2",
            "--concurrency",
            "2",
            "--timeout-ms",
            "250",
            "--profile-root",
            "/tmp/profile",
            "--log-level",
            "debug",
            "--interval-minutes",
            "30",
        ]);
        let config = args.apply(Config::default());
        assert_eq!(config.scan.only, vec![ResultId(1), ResultId(2)]);
        assert_eq!(config.scan.concurrency_limit, 2);
        assert_eq!(config.scan.per_check_timeout(), Duration::from_millis(250));
        assert_eq!(config.browser.profile_roots, vec!["/tmp/profile"]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.scan.interval(), Some(Duration::from_secs(30 * 60)));
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let args = Args::parse_from(["privscan-agent"]);
        let base = Config::builder().concurrency_limit(7).build();
        let config = args.apply(base);
        assert_eq!(config.scan.concurrency_limit, 7);
        assert!(config.scan.only.is_empty());
    }
}
