//! In-memory `WorkflowStore`.
//!
//! Runs and checkpoints live in `DashMap`s; the entry API gives per-key
//! atomic compare-and-set. Tasks live behind one `Mutex` because leasing has
//! to count live leases across a whole queue in the same critical section.
//! No guard is ever held across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use docflow_types::error::RepositoryError;
use docflow_types::workflow::{
    ActivityTask, AttemptRecord, CheckpointEntry, RunTransition, StepId, TaskCompletion, TaskId,
    TaskStatus, WorkflowRun, WorkflowRunStatus,
};
use uuid::Uuid;

use super::checkpoint::{CheckpointStore, RecordOutcome};
use super::run::RunRepository;
use super::task_queue::TaskQueueStore;

#[derive(Default)]
struct TaskTable {
    /// Tasks in creation order.
    tasks: Vec<ActivityTask>,
    index: HashMap<TaskId, usize>,
    attempts: HashMap<TaskId, Vec<AttemptRecord>>,
}

impl TaskTable {
    fn get_mut(&mut self, task_id: &TaskId) -> Option<&mut ActivityTask> {
        let idx = *self.index.get(task_id)?;
        self.tasks.get_mut(idx)
    }

    /// The task, but only while `epoch` is its current lease.
    fn fenced_mut(&mut self, task_id: &TaskId, epoch: u64) -> Option<&mut ActivityTask> {
        self.get_mut(task_id)
            .filter(|task| task.status == TaskStatus::Leased && task.lease_epoch == epoch)
    }
}

/// `WorkflowStore` kept entirely in process memory.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    runs: DashMap<Uuid, WorkflowRun>,
    checkpoints: DashMap<(Uuid, StepId), CheckpointEntry>,
    checkpoint_seq: AtomicU64,
    tasks: Mutex<TaskTable>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> Result<MutexGuard<'_, TaskTable>, RepositoryError> {
        self.tasks
            .lock()
            .map_err(|_| RepositoryError::Query("task table lock poisoned".to_string()))
    }
}

impl std::fmt::Debug for MemoryWorkflowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWorkflowStore")
            .field("runs", &self.runs.len())
            .field("checkpoints", &self.checkpoints.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

impl RunRepository for MemoryWorkflowStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        match self.runs.entry(run.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "run {} already exists",
                run.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(())
            }
        }
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn transition_run(
        &self,
        run_id: &Uuid,
        transition: &RunTransition,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let Some(mut run) = self.runs.get_mut(run_id) else {
            return Ok(false);
        };
        if run.status != WorkflowRunStatus::Running {
            return Ok(false);
        }

        run.status = transition.target_status();
        run.completed_at = Some(at);
        match transition {
            RunTransition::Complete { result } => run.result = Some(result.clone()),
            RunTransition::Fail { failure } => run.failure = Some(failure.clone()),
            RunTransition::TimeOut => {}
        }
        Ok(true)
    }

    async fn list_active_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .iter()
            .filter(|r| r.status == WorkflowRunStatus::Running)
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by_key(|r| (r.created_at, r.id));
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

impl CheckpointStore for MemoryWorkflowStore {
    async fn record_if_absent(
        &self,
        entry: &CheckpointEntry,
    ) -> Result<RecordOutcome, RepositoryError> {
        match self.checkpoints.entry((entry.run_id, entry.step_id)) {
            Entry::Occupied(existing) => Ok(RecordOutcome::AlreadyRecorded(existing.get().clone())),
            Entry::Vacant(slot) => {
                let seq = self.checkpoint_seq.fetch_add(1, Ordering::SeqCst) + 1;
                let mut stored = entry.clone();
                stored.seq = seq;
                slot.insert(stored);
                Ok(RecordOutcome::Recorded(seq))
            }
        }
    }

    async fn get_checkpoint(
        &self,
        run_id: &Uuid,
        step_id: &StepId,
    ) -> Result<Option<CheckpointEntry>, RepositoryError> {
        Ok(self
            .checkpoints
            .get(&(*run_id, *step_id))
            .map(|e| e.value().clone()))
    }

    async fn list_checkpoints(&self, run_id: &Uuid) -> Result<Vec<CheckpointEntry>, RepositoryError> {
        let mut entries: Vec<CheckpointEntry> = self
            .checkpoints
            .iter()
            .filter(|e| e.key().0 == *run_id)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

impl TaskQueueStore for MemoryWorkflowStore {
    async fn enqueue_if_absent(&self, task: &ActivityTask) -> Result<bool, RepositoryError> {
        let mut table = self.tasks()?;
        if table.index.contains_key(&task.id) {
            return Ok(false);
        }
        let idx = table.tasks.len();
        table.index.insert(task.id.clone(), idx);
        table.tasks.push(task.clone());
        Ok(true)
    }

    async fn lease_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        visibility: Duration,
        max_concurrency: u32,
    ) -> Result<Option<ActivityTask>, RepositoryError> {
        let visibility = chrono::Duration::from_std(visibility)
            .map_err(|e| RepositoryError::Query(format!("invalid visibility timeout: {e}")))?;
        let mut table = self.tasks()?;

        let live = table
            .tasks
            .iter()
            .filter(|t| t.queue == queue && t.holds_live_lease(now))
            .count();
        if live >= max_concurrency as usize {
            return Ok(None);
        }

        let Some(task) = table
            .tasks
            .iter_mut()
            .find(|t| t.queue == queue && t.is_leasable(now))
        else {
            return Ok(None);
        };

        task.status = TaskStatus::Leased;
        task.lease_owner = Some(worker_id.to_string());
        task.lease_epoch += 1;
        task.lease_expires_at = Some(now + visibility);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn renew_lease(
        &self,
        task_id: &TaskId,
        epoch: u64,
        until: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut table = self.tasks()?;
        let Some(task) = table.fenced_mut(task_id, epoch) else {
            return Ok(false);
        };
        task.lease_expires_at = Some(until);
        Ok(true)
    }

    async fn record_attempt(
        &self,
        task_id: &TaskId,
        epoch: u64,
        attempt: &AttemptRecord,
    ) -> Result<bool, RepositoryError> {
        let mut table = self.tasks()?;
        let Some(task) = table.fenced_mut(task_id, epoch) else {
            return Ok(false);
        };
        task.attempt_count = task.attempt_count.max(attempt.attempt);
        task.updated_at = attempt.finished_at;
        table
            .attempts
            .entry(task_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(true)
    }

    async fn finish_task(
        &self,
        task_id: &TaskId,
        epoch: u64,
        completion: &TaskCompletion,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut table = self.tasks()?;
        let Some(task) = table.fenced_mut(task_id, epoch) else {
            return Ok(false);
        };
        task.status = completion.status();
        task.lease_owner = None;
        task.lease_expires_at = None;
        task.updated_at = at;
        match completion {
            TaskCompletion::Succeeded { output } => task.output = Some(output.clone()),
            TaskCompletion::Failed { failure } => task.failure = Some(failure.clone()),
        }
        Ok(true)
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<ActivityTask>, RepositoryError> {
        let table = self.tasks()?;
        Ok(table
            .index
            .get(task_id)
            .and_then(|idx| table.tasks.get(*idx))
            .cloned())
    }

    async fn list_tasks(&self, run_id: &Uuid) -> Result<Vec<ActivityTask>, RepositoryError> {
        let table = self.tasks()?;
        Ok(table
            .tasks
            .iter()
            .filter(|t| t.run_id == *run_id)
            .cloned()
            .collect())
    }

    async fn list_attempts(&self, task_id: &TaskId) -> Result<Vec<AttemptRecord>, RepositoryError> {
        let table = self.tasks()?;
        Ok(table.attempts.get(task_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
