//! Launched-container bookkeeping.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::runtime::ContainerId;

/// One successful launch: which suite got which container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRecord {
    pub suite_id: String,
    pub container_id: ContainerId,
}

/// Records `(suite_id, container_id)` pairs in the order launches complete.
///
/// Cloning yields another handle to the same list, so every concurrent
/// launch task can record into it. The tracker does not watch exit status
/// and never removes containers; that is up to whoever receives the report.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    launches: Arc<Mutex<Vec<LaunchRecord>>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, suite_id: impl Into<String>, container_id: ContainerId) {
        self.lock().push(LaunchRecord {
            suite_id: suite_id.into(),
            container_id,
        });
    }

    /// Snapshot of all launches so far, in launch order.
    pub fn records(&self) -> Vec<LaunchRecord> {
        self.lock().clone()
    }

    /// Container ids in launch order.
    pub fn container_ids(&self) -> Vec<ContainerId> {
        self.lock().iter().map(|r| r.container_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LaunchRecord>> {
        self.launches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
