//! CPU-core admission control.
//!
//! The [`CoreBudget`] holds a fixed number of cores for one run. A suite may
//! only launch once it holds a [`Reservation`] for its `cpu_cores`; the cores
//! go back to the budget when the reservation is released or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Core count used when the host's parallelism cannot be detected.
pub const FALLBACK_CORES: usize = 1;

/// Returns the number of CPU cores available to this process.
///
/// Falls back to [`FALLBACK_CORES`] if detection fails.
pub fn detect_host_cores() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            warn!(
                "Could not detect CPU core count ({}), assuming {}",
                e, FALLBACK_CORES
            );
            FALLBACK_CORES
        }
    }
}

/// A fixed pool of CPU cores shared by concurrently running suites.
///
/// Backed by a [`Semaphore`] with one permit per core, so reserving and
/// releasing are atomic with respect to each other.
///
/// # Example
///
/// ```
/// use suitey::orchestrator::CoreBudget;
///
/// let budget = CoreBudget::new(4);
/// let a = budget.try_reserve(3).unwrap();
/// assert!(budget.try_reserve(2).is_none());
///
/// a.release();
/// assert_eq!(budget.available(), 4);
/// assert!(!budget.admissible(5));
/// ```
#[derive(Debug, Clone)]
pub struct CoreBudget {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    in_use: Arc<AtomicUsize>,
    peak_in_use: Arc<AtomicUsize>,
}

impl CoreBudget {
    /// Creates a budget of `capacity` cores (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            in_use: Arc::new(AtomicUsize::new(0)),
            peak_in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a suite needing `cores` could ever be admitted.
    ///
    /// A suite that needs more than the whole budget would wait forever, so
    /// callers must fail it up front instead of queueing it.
    pub fn admissible(&self, cores: usize) -> bool {
        cores <= self.capacity
    }

    /// Reserves `cores` if they are available right now.
    ///
    /// Returns `None` when the budget is currently short; the caller should
    /// retry after some running suite releases its reservation.
    pub fn try_reserve(&self, cores: usize) -> Option<Reservation> {
        let permits = u32::try_from(cores).ok()?;
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_many_owned(permits)
            .ok()?;

        let now = self.in_use.fetch_add(cores, Ordering::SeqCst) + cores;
        self.peak_in_use.fetch_max(now, Ordering::SeqCst);

        Some(Reservation {
            cores,
            permit: Some(permit),
            in_use: Arc::clone(&self.in_use),
        })
    }

    /// Cores not currently reserved.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Cores currently reserved, including forfeited ones.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Highest number of cores reserved at the same time so far.
    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use.load(Ordering::SeqCst)
    }
}

/// Cores held by one admitted suite.
///
/// Returned exactly once to the budget: either by [`release`](Self::release),
/// which consumes the reservation, or on drop. [`forfeit`](Self::forfeit)
/// keeps the cores out of the budget for good.
#[derive(Debug)]
#[must_use = "dropping a reservation returns its cores immediately"]
pub struct Reservation {
    cores: usize,
    permit: Option<OwnedSemaphorePermit>,
    in_use: Arc<AtomicUsize>,
}

impl Reservation {
    pub fn cores(&self) -> usize {
        self.cores
    }

    /// Returns the cores to the budget.
    pub fn release(self) {
        drop(self);
    }

    /// Never returns the cores.
    ///
    /// For a container whose exit cannot be confirmed: it may still be
    /// using them.
    pub fn forfeit(mut self) {
        if let Some(permit) = self.permit.take() {
            permit.forget();
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            self.in_use.fetch_sub(self.cores, Ordering::SeqCst);
        }
    }
}
