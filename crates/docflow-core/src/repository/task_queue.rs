//! Task queue store trait definition.
//!
//! Holds activity tasks, their leases and attempt history. Leases carry an
//! epoch that acts as a fencing token: every mutation a worker makes while
//! holding a lease must present the epoch it was granted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use docflow_types::error::RepositoryError;
use docflow_types::workflow::{ActivityTask, AttemptRecord, TaskCompletion, TaskId};
use uuid::Uuid;

/// Repository trait for activity tasks.
pub trait TaskQueueStore: Send + Sync {
    /// Insert `task` unless a task with the same id exists.
    ///
    /// Returns `true` when the task was inserted. Repeated scheduling of the
    /// same logical step collapses onto the first insert.
    fn enqueue_if_absent(
        &self,
        task: &ActivityTask,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Atomically lease the oldest available task on `queue`.
    ///
    /// A task is available when it is `Scheduled`, or `Leased` with an
    /// expired lease. Nothing is leased while the queue already holds
    /// `max_concurrency` unexpired leases. The granted lease expires at
    /// `now + visibility` and carries a freshly incremented epoch.
    fn lease_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
        visibility: Duration,
        max_concurrency: u32,
    ) -> impl std::future::Future<Output = Result<Option<ActivityTask>, RepositoryError>> + Send;

    /// Extend a lease. Returns `false` if `epoch` is no longer current or the
    /// task is already terminal.
    fn renew_lease(
        &self,
        task_id: &TaskId,
        epoch: u64,
        until: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Append an attempt to the task's history and bump its attempt count.
    /// Returns `false` (recording nothing) if `epoch` is no longer current.
    fn record_attempt(
        &self,
        task_id: &TaskId,
        epoch: u64,
        attempt: &AttemptRecord,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Move a leased task to its terminal status and release the lease.
    /// Returns `false` if `epoch` is no longer current.
    fn finish_task(
        &self,
        task_id: &TaskId,
        epoch: u64,
        completion: &TaskCompletion,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get a task by id.
    fn get_task(
        &self,
        task_id: &TaskId,
    ) -> impl std::future::Future<Output = Result<Option<ActivityTask>, RepositoryError>> + Send;

    /// List every task of a run in creation order.
    fn list_tasks(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ActivityTask>, RepositoryError>> + Send;

    /// List the attempt history of a task, oldest first.
    fn list_attempts(
        &self,
        task_id: &TaskId,
    ) -> impl std::future::Future<Output = Result<Vec<AttemptRecord>, RepositoryError>> + Send;
}
