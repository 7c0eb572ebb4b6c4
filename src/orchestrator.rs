//! Suite scheduling and execution.
//!
//! This module contains the coordinator that turns a descriptor blob into
//! running containers while keeping the sum of running suites' `cpu_cores`
//! within a fixed budget.
//!
//! # Architecture
//!
//! ```text
//!   raw descriptors
//!         │
//!         │ parse_descriptors()
//!         ▼
//!   Vec<Result<SuiteConfig, ParseError>>
//!         │
//!         │ invalid / too large ──────────────────────► failures
//!         ▼
//!   pending (input order) ──► CoreBudget::try_reserve()
//!                                     │
//!                                     │ Reservation
//!                                     ▼
//!                         one task per admitted suite
//!                         ┌─────────────────────────────┐
//!                         │ Launcher::launch() ──► id   │──► LifecycleTracker
//!                         │ Launcher::wait(id)          │
//!                         │ Reservation::release()      │
//!                         └──────────────┬──────────────┘
//!                                        │ JoinSet completion
//!                                        ▼
//!                         next admission pass ... ExecutionReport
//! ```
//!
//! # Execution Flow
//!
//! 1. **Parse**: Split the input into records; an empty input is an
//!    immediate, trivially successful run
//! 2. **Filter**: Invalid records and suites larger than the whole budget
//!    fail without touching the budget
//! 3. **Ping**: Check the runtime once; if it is unreachable the run fails
//! 4. **Admit**: Walk pending suites in input order and start every one that
//!    fits the remaining budget
//! 5. **Wait**: Sleep until any running suite finishes, then admit again.
//!    A wait that keeps failing forfeits its cores; suites that can no longer
//!    fit fail instead of waiting forever
//! 6. **Report**: Aggregate launches and failures into an
//!    [`ExecutionReport`]
//!
//! # Key Components
//!
//! - [`Orchestrator`]: Main entry point coordinating a run
//! - [`CoreBudget`]: Admission control over CPU cores
//! - [`Launcher`]: Starts one suite's container
//! - [`LifecycleTracker`]: Records launched containers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use suitey::orchestrator::{Orchestrator, detect_host_cores};
//! use suitey::runtime::docker::DockerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = DockerRuntime::new(Default::default());
//!     let orchestrator = Orchestrator::new(Arc::new(runtime), detect_host_cores());
//!
//!     let input = std::fs::read_to_string("suites.txt")?;
//!     let report = orchestrator.launch_test_suites_parallel(&input).await;
//!     print!("{}", report.render());
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod launcher;
pub mod tracker;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::report::{ExecutionReport, ExecutionStatus, FailureKind, SuiteFailure};
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::suite::{ParseError, SuiteConfig, SuiteRecord, parse_descriptors};

pub use admission::{CoreBudget, Reservation, detect_host_cores};
pub use launcher::Launcher;
pub use tracker::{LaunchRecord, LifecycleTracker};

/// Why a single suite did not launch.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    /// The descriptor record was invalid.
    #[error(transparent)]
    Invalid(#[from] ParseError),

    /// The suite needs more cores than the budget holds in total.
    ///
    /// Never retried: waiting cannot make the budget larger.
    #[error("suite needs {required} CPU core(s) but the budget is {capacity}")]
    AdmissionImpossible { required: usize, capacity: usize },

    /// The runtime did not start the container.
    #[error(transparent)]
    Launch(#[from] RuntimeError),

    /// Cores the suite needs stay held by containers whose exit could not
    /// be confirmed.
    #[error("suite needs {required} CPU core(s) but only {usable} can still be freed")]
    CoresLost { required: usize, usable: usize },

    /// The suite's task ended without reporting back.
    #[error("suite task failed: {0}")]
    Crashed(String),

    /// The run was cancelled while the suite was still waiting.
    #[error("run cancelled before the suite was admitted")]
    Cancelled,
}

impl SuiteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Invalid(_) => FailureKind::Invalid,
            Self::AdmissionImpossible { .. } | Self::CoresLost { .. } => {
                FailureKind::AdmissionImpossible
            }
            Self::Launch(e) if e.is_systemic() => FailureKind::RuntimeUnavailable,
            Self::Launch(_) | Self::Crashed(_) => FailureKind::LaunchFailed,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    fn into_failure(self, record: usize, suite_id: Option<String>) -> SuiteFailure {
        SuiteFailure {
            record,
            suite_id,
            kind: self.kind(),
            reason: self.to_string(),
        }
    }
}

/// A suite waiting for admission, with its position in the input.
type PendingSuite = (usize, SuiteConfig);

/// What a launch task reports back to the coordinator.
enum LaunchOutcome {
    /// The container started; its id is already in the tracker.
    Launched,
    Failed {
        record: usize,
        suite_id: String,
        error: RuntimeError,
    },
}

/// How often to retry waiting on a container after the runtime fails to
/// report its exit.
///
/// A suite's cores stay reserved while retrying. Once the attempts run out
/// they are forfeited for the rest of the run, since the container may still
/// be using them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRetry {
    /// Wait calls per container, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WaitRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl WaitRetry {
    fn backoff(&self, failed_attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempts.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Coordinates one or more scheduler runs against a container runtime.
///
/// The orchestrator owns nothing across runs: each call builds its own
/// budget, tracker and task set.
///
/// # Type Parameters
///
/// - `R`: The container runtime type (may be `dyn ContainerRuntime`)
pub struct Orchestrator<R: ?Sized> {
    runtime: Arc<R>,
    capacity: usize,
    cancellation_token: CancellationToken,
    wait_retry: WaitRetry,
}

impl<R> Orchestrator<R>
where
    R: ContainerRuntime + ?Sized + 'static,
{
    /// Creates an orchestrator with a fixed CPU-core budget.
    ///
    /// `capacity` is injected rather than detected here so runs are
    /// reproducible; use [`detect_host_cores`] for the host's value.
    pub fn new(runtime: Arc<R>, capacity: usize) -> Self {
        Self {
            runtime,
            capacity: capacity.max(1),
            cancellation_token: CancellationToken::new(),
            wait_retry: WaitRetry::default(),
        }
    }

    /// Sets a token that cuts runs short when cancelled.
    ///
    /// After cancellation no further suites are admitted and running
    /// containers are no longer waited on. Launches already in progress are
    /// allowed to finish so their container ids still reach the report.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_wait_retry(mut self, wait_retry: WaitRetry) -> Self {
        self.wait_retry = wait_retry;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Parses `raw` and runs every suite it describes.
    ///
    /// Always returns a report; per-suite problems are recorded in it and
    /// an unusable runtime shows up as `execution_status=failure`.
    pub async fn launch_test_suites_parallel(&self, raw: &str) -> ExecutionReport {
        let records = parse_descriptors(raw);
        debug!("Parsed {} suite record(s)", records.len());
        self.run(records).await
    }

    /// Runs already-parsed suite records.
    pub async fn run(&self, records: Vec<SuiteRecord>) -> ExecutionReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let total_suites = records.len();

        if total_suites == 0 {
            info!("No suites to run");
            return ExecutionReport::empty(self.capacity);
        }

        let budget = CoreBudget::new(self.capacity);
        let tracker = LifecycleTracker::new();
        let launcher = Launcher::new(Arc::clone(&self.runtime));

        let mut failures = Vec::new();
        let mut pending: VecDeque<PendingSuite> = VecDeque::new();

        for (index, record) in records.into_iter().enumerate() {
            match record {
                Err(e) => {
                    warn!("Skipping invalid suite record: {}", e);
                    let suite_id = e.suite_id().map(str::to_string);
                    failures.push(SuiteError::from(e).into_failure(index, suite_id));
                }
                Ok(suite) if !budget.admissible(suite.cpu_cores) => {
                    let error = SuiteError::AdmissionImpossible {
                        required: suite.cpu_cores,
                        capacity: budget.capacity(),
                    };
                    warn!("Suite {} can never be admitted: {}", suite.suite_id, error);
                    failures.push(error.into_failure(index, Some(suite.suite_id)));
                }
                Ok(suite) => pending.push_back((index, suite)),
            }
        }

        info!(
            "Scheduling {} of {} suite(s) on {} CPU core(s) using the {} runtime",
            pending.len(),
            total_suites,
            budget.capacity(),
            self.runtime.name()
        );

        let mut execution_status = ExecutionStatus::Success;
        let mut cancelled = false;

        if !pending.is_empty() {
            if let Err(e) = self.runtime.ping().await {
                error!("Container runtime {} unavailable: {}", self.runtime.name(), e);
                execution_status = ExecutionStatus::Failure;
                let reason = e.to_string();
                for (index, suite) in pending.drain(..) {
                    failures.push(SuiteFailure {
                        record: index,
                        suite_id: Some(suite.suite_id),
                        kind: FailureKind::RuntimeUnavailable,
                        reason: reason.clone(),
                    });
                }
            }
        }

        let mut in_flight: JoinSet<LaunchOutcome> = JoinSet::new();
        let mut task_suites: HashMap<Id, PendingSuite> = HashMap::new();
        let mut attempted = 0usize;
        let mut systemic_failures = 0usize;

        while !pending.is_empty() || !in_flight.is_empty() {
            if !cancelled && self.cancellation_token.is_cancelled() {
                warn!(
                    "Run cancelled with {} suite(s) pending and {} in flight",
                    pending.len(),
                    in_flight.len()
                );
                cancelled = true;
            }

            if !cancelled {
                let mut waiting = VecDeque::with_capacity(pending.len());
                while let Some((index, suite)) = pending.pop_front() {
                    match budget.try_reserve(suite.cpu_cores) {
                        Some(reservation) => {
                            attempted += 1;
                            debug!(
                                "Admitted suite {} ({} core(s), {} left)",
                                suite.suite_id,
                                suite.cpu_cores,
                                budget.available()
                            );
                            let handle = in_flight.spawn(run_suite(
                                launcher.clone(),
                                tracker.clone(),
                                self.cancellation_token.clone(),
                                self.wait_retry,
                                index,
                                suite.clone(),
                                reservation,
                            ));
                            task_suites.insert(handle.id(), (index, suite));
                        }
                        None => waiting.push_back((index, suite)),
                    }
                }
                pending = waiting;
            }

            if in_flight.is_empty() {
                if !cancelled {
                    // Nothing is running yet the rest does not fit: the
                    // missing cores were forfeited and never come back.
                    let usable = budget.available();
                    for (index, suite) in pending.drain(..) {
                        let error = SuiteError::CoresLost {
                            required: suite.cpu_cores,
                            usable,
                        };
                        warn!("Suite {} can no longer be admitted: {}", suite.suite_id, error);
                        failures.push(error.into_failure(index, Some(suite.suite_id)));
                    }
                }
                break;
            }

            let joined = if cancelled {
                in_flight.join_next_with_id().await
            } else {
                tokio::select! {
                    joined = in_flight.join_next_with_id() => joined,
                    _ = self.cancellation_token.cancelled() => continue,
                }
            };

            match joined {
                Some(Ok((id, outcome))) => {
                    task_suites.remove(&id);
                    if let LaunchOutcome::Failed {
                        record,
                        suite_id,
                        error,
                    } = outcome
                    {
                        if error.is_systemic() {
                            systemic_failures += 1;
                        }
                        failures.push(SuiteError::from(error).into_failure(record, Some(suite_id)));
                    }
                }
                Some(Err(e)) => {
                    error!("Suite task failed: {}", e);
                    if let Some((index, suite)) = task_suites.remove(&e.id()) {
                        // Count it unless it got as far as the tracker.
                        let launched = tracker
                            .records()
                            .iter()
                            .any(|l| l.suite_id == suite.suite_id);
                        if !launched {
                            let error = SuiteError::Crashed(e.to_string());
                            failures.push(error.into_failure(index, Some(suite.suite_id)));
                        }
                    }
                }
                None => break,
            }
        }

        for (index, suite) in pending.drain(..) {
            failures.push(SuiteError::Cancelled.into_failure(index, Some(suite.suite_id)));
        }

        if tracker.is_empty() && attempted > 0 && systemic_failures == attempted {
            error!("Every launch failed because the container runtime is unavailable");
            execution_status = ExecutionStatus::Failure;
        }

        failures.sort_by_key(|f| f.record);

        let report = ExecutionReport {
            execution_status,
            total_suites,
            launched_suites: tracker.len(),
            container_ids: tracker
                .container_ids()
                .iter()
                .map(ToString::to_string)
                .collect(),
            launches: tracker.records(),
            failures,
            capacity: budget.capacity(),
            peak_cores_in_use: budget.peak_in_use(),
            cancelled,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Launched {}/{} suite(s) in {}ms (peak {} of {} cores)",
            report.launched_suites,
            report.total_suites,
            report.duration_ms,
            report.peak_cores_in_use,
            report.capacity
        );

        report
    }
}

/// Launches one admitted suite and holds its cores until the container exits.
async fn run_suite<R>(
    launcher: Launcher<R>,
    tracker: LifecycleTracker,
    cancellation_token: CancellationToken,
    wait_retry: WaitRetry,
    record: usize,
    suite: SuiteConfig,
    reservation: Reservation,
) -> LaunchOutcome
where
    R: ContainerRuntime + ?Sized,
{
    let container_id = match launcher.launch(&suite).await {
        Ok(id) => id,
        Err(error) => {
            // The cores were never used.
            reservation.release();
            return LaunchOutcome::Failed {
                record,
                suite_id: suite.suite_id,
                error,
            };
        }
    };

    tracker.record(&suite.suite_id, container_id.clone());

    let mut failed_attempts = 0;
    loop {
        let result = tokio::select! {
            result = launcher.wait(&container_id) => result,
            _ = cancellation_token.cancelled() => {
                debug!("Stopped waiting on suite {} ({})", suite.suite_id, container_id.short());
                break;
            }
        };

        let error = match result {
            Ok(code) => {
                debug!("Suite {} exited with code {}", suite.suite_id, code);
                break;
            }
            Err(e) => e,
        };

        failed_attempts += 1;
        if failed_attempts >= wait_retry.max_attempts {
            error!(
                "Lost track of suite {} ({}) after {} attempt(s): {}; keeping its {} core(s) reserved",
                suite.suite_id,
                container_id.short(),
                failed_attempts,
                error,
                reservation.cores()
            );
            reservation.forfeit();
            return LaunchOutcome::Launched;
        }

        let backoff = wait_retry.backoff(failed_attempts);
        warn!(
            "Waiting on suite {} ({}) failed: {}; retrying in {:?}",
            suite.suite_id,
            container_id.short(),
            error,
            backoff
        );
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancellation_token.cancelled() => break,
        }
    }

    reservation.release();
    LaunchOutcome::Launched
}
