//! Check runner - executes checks with bounded concurrency and per-check deadlines
//!
//! Every check runs on its own detached OS thread because accessor calls may
//! block on real OS I/O. A check that misses its deadline is reported as a
//! timeout and its permit is released at once. Its thread is abandoned with the
//! deadline flag set so a cooperative check can stop early. The runtime does
//! not own that thread, so shutting the runtime down never waits on it.

use crate::cancel::CancelToken;
use privscan_checks::CheckCatalog;
use privscan_core::{
    Accessors, CancelFlag, Check, CheckContext, CheckError, CheckResult, Error, Result, ResultId,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Run-scoped settings, passed in explicitly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Maximum checks in flight at once
    pub concurrency_limit: usize,
    /// Deadline for each check
    pub per_check_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            concurrency_limit: cores * 4,
            per_check_timeout: Duration::from_secs(5),
        }
    }
}

impl RunConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_per_check_timeout(mut self, timeout: Duration) -> Self {
        self.per_check_timeout = timeout;
        self
    }
}

/// Everything one run produced
#[derive(Debug)]
pub struct RunOutput {
    /// One entry per completed check, ascending by id
    pub results: Vec<CheckResult>,
    /// Checks handed to the pool
    pub dispatched: usize,
    /// Checks whose result is in `results`
    pub completed: usize,
    /// The run was cancelled before every dispatched check finished
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Id an individual result belongs to
pub fn result_id(result: &CheckResult) -> ResultId {
    match result {
        Ok(outcome) => outcome.id(),
        Err(err) => err.id(),
    }
}

/// Executes checks against one accessor bundle
pub struct Runner {
    accessors: Accessors,
    config: RunConfig,
}

impl Runner {
    /// The accessor bundle is fixed for the runner's lifetime
    pub fn new(accessors: Accessors, config: RunConfig) -> Result<Self> {
        if config.concurrency_limit == 0 {
            return Err(Error::InvalidConfig {
                key: "concurrency_limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.per_check_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                key: "per_check_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(Self { accessors, config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run every check in the catalog
    pub async fn run_all(&self, catalog: &CheckCatalog) -> Result<RunOutput> {
        self.run_with_cancel(catalog.all(), &CancelToken::new()).await
    }

    /// Run only the named checks. An unknown id fails the run before dispatch.
    pub async fn run_subset(&self, catalog: &CheckCatalog, ids: &[ResultId]) -> Result<RunOutput> {
        let checks = catalog.by_ids(ids)?;
        self.run_with_cancel(checks, &CancelToken::new()).await
    }

    /// Run the given checks until all finish or `cancel` fires.
    ///
    /// On cancellation, nothing further is dispatched, in-flight checks are
    /// abandoned, and only results that already arrived are returned.
    pub async fn run_with_cancel(
        &self,
        mut checks: Vec<Arc<dyn Check>>,
        cancel: &CancelToken,
    ) -> Result<RunOutput> {
        if checks.is_empty() {
            return Err(Error::EmptyCatalog);
        }
        checks.sort_by_key(|c| c.id());

        let started = Instant::now();
        let total = checks.len();
        info!(
            "Starting run: {} checks, concurrency {}, timeout {}ms",
            total,
            self.config.concurrency_limit,
            self.config.per_check_timeout.as_millis()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let run_flag = CancelFlag::new();
        let available = self.accessors.capabilities();
        let (tx, mut rx) = mpsc::unbounded_channel::<CheckResult>();
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(total);
        let mut dispatched = 0;
        let mut cancelled = false;

        for check in checks {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Err(Error::Internal("runner semaphore closed".to_string())),
                },
            };
            dispatched += 1;

            let id = check.id();
            let missing = check.capabilities().missing_from(available);
            if !missing.is_empty() {
                warn!("Check {} needs {} which this run does not provide", id, missing.join(", "));
                let _ = tx.send(Err(CheckError::resource_unavailable(
                    id,
                    format!("accessor bundle lacks: {}", missing.join(", ")),
                )));
                continue;
            }

            let ctx = CheckContext::new(self.accessors.clone()).with_run_flag(run_flag.clone());
            let deadline = self.config.per_check_timeout;
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let result = execute_unit(check, ctx, deadline).await;
                drop(permit);
                let _ = tx.send(result);
            }));
        }
        drop(tx);

        let mut results = Vec::with_capacity(dispatched);
        if !cancelled {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    next = rx.recv() => match next {
                        Some(result) => results.push(result),
                        None => break,
                    },
                }
            }
        }

        if cancelled {
            run_flag.cancel();
            for handle in &handles {
                handle.abort();
            }
            while let Ok(result) = rx.try_recv() {
                results.push(result);
            }
            warn!(
                "Run cancelled: {} of {} checks completed",
                results.len(),
                total
            );
        }

        results.sort_by_key(result_id);
        let output = RunOutput {
            completed: results.len(),
            results,
            dispatched,
            cancelled,
            elapsed: started.elapsed(),
        };
        info!(
            "Run finished: {}/{} checks in {:?}",
            output.completed, total, output.elapsed
        );
        Ok(output)
    }
}

/// Run one check on a detached thread under its deadline
async fn execute_unit(check: Arc<dyn Check>, ctx: CheckContext, deadline: Duration) -> CheckResult {
    let id = check.id();
    let deadline_flag = ctx.deadline.clone();
    debug!("Running check {} ({})", id, check.metadata().name);

    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name(format!("privscan-check-{}", id))
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| check.execute(&ctx)));
            // the receiver is gone once the unit has been timed out or cancelled
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        return Err(CheckError::unknown(id, format!("could not start check thread: {}", e)));
    }

    match timeout(deadline, rx).await {
        Ok(Ok(Ok(result))) => {
            if result_id(&result) != id {
                warn!("Check {} reported id {}", id, result_id(&result));
                return Err(CheckError::unknown(
                    id,
                    format!("check reported a result for id {}", result_id(&result)),
                ));
            }
            result
        }
        Ok(Ok(Err(payload))) => {
            let message = panic_message(payload);
            warn!("Check {} panicked: {}", id, message);
            Err(CheckError::unknown(id, format!("check panicked: {}", message)))
        }
        Ok(Err(_)) => Err(CheckError::unknown(id, "check thread exited without a result")),
        Err(_) => {
            deadline_flag.cancel();
            warn!("Check {} timed out after {}ms", id, deadline.as_millis());
            Err(CheckError::timeout(id, deadline))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
