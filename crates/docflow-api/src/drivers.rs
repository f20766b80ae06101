//! Run drivers owned by a long-lived process.
//!
//! Any process may drive any run: `advance` is idempotent and terminal
//! transitions are compare-and-set. `RunDrivers` keeps at most one driver
//! per run inside this process and periodically sweeps the store for
//! `Running` runs nobody here is driving yet (runs submitted from another
//! process, or left behind by a crash).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docflow_core::repository::{RunRepository, WorkflowStore};
use docflow_core::workflow::engine::{EngineError, WorkflowEngine};

/// How often the store is swept for runs without a local driver.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct RunDrivers<S: WorkflowStore> {
    engine: WorkflowEngine<S>,
    active: Arc<DashMap<Uuid, JoinHandle<()>>>,
}

impl<S: WorkflowStore> Clone for RunDrivers<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<S: WorkflowStore> RunDrivers<S> {
    pub fn new(engine: WorkflowEngine<S>) -> Self {
        Self {
            engine,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Start driving `run_id` unless a live driver already exists.
    ///
    /// Returns whether a new driver was spawned.
    pub fn ensure(&self, run_id: Uuid) -> bool {
        match self.active.entry(run_id) {
            Entry::Occupied(entry) if !entry.get().is_finished() => false,
            Entry::Occupied(mut entry) => {
                entry.insert(self.engine.spawn_driver(run_id));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(self.engine.spawn_driver(run_id));
                true
            }
        }
    }

    /// Number of drivers still running.
    pub fn live(&self) -> usize {
        self.active.retain(|_, handle| !handle.is_finished());
        self.active.len()
    }

    /// One sweep: spawn a driver for every `Running` run without one.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        self.active.retain(|_, handle| !handle.is_finished());
        let runs = self.engine.store().list_active_runs().await?;

        let mut started = 0;
        for run in runs {
            if self.ensure(run.id) {
                tracing::info!(run_id = %run.id, "driving run");
                started += 1;
            }
        }
        Ok(started)
    }

    /// Sweep every `interval` until `shutdown` is cancelled, then abort the
    /// local drivers. Their runs stay durable and are picked up again by the
    /// next process that sweeps.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.sweep().await {
                tracing::warn!(error = %e, "run sweep failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        self.abort_all();
    }

    pub fn abort_all(&self) {
        for entry in self.active.iter() {
            entry.value().abort();
        }
        self.active.clear();
    }
}
