//! Worker pools that lease activity tasks and execute them.
//!
//! One poller runs per queue. It holds a semaphore sized to the queue's
//! `max_concurrency`, leases a task whenever a permit is free, and executes
//! the task on its own tokio task. Execution validates the payload at the
//! queue boundary, runs the activity under the `Supervisor`, writes the
//! step checkpoint write-once and finishes the task under its lease epoch.
//!
//! A worker that loses its lease (the visibility timeout passed and another
//! worker reclaimed the task) stops without writing anything.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docflow_types::config::RetryConfig;
use docflow_types::error::{ErrorKind, RepositoryError};
use docflow_types::event::WorkflowEvent;
use docflow_types::workflow::{
    ActivityTask, AttemptOutcome, AttemptRecord, StepFailure, StepOutcome, TaskCompletion, TaskId,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::WorkflowStore;

use super::activity::{ActivityContext, ActivityExecutor};
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::router::QueueRouter;
use super::supervisor::{AttemptJournal, Supervised, Supervisor, SupervisorError};

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// Executes tasks from one or more queues.
///
/// Generic over the store and the activity executor so the same pool runs
/// against SQLite with HTTP collaborators in production and in-memory fakes
/// in tests.
pub struct WorkerPool<S: WorkflowStore, A: ActivityExecutor> {
    store: Arc<S>,
    activities: Arc<A>,
    router: Arc<QueueRouter>,
    retry: RetryConfig,
    checkpoints: CheckpointManager<S>,
    events: EventBus,
    poll_interval: Duration,
    pool_id: Uuid,
}

impl<S: WorkflowStore, A: ActivityExecutor> Clone for WorkerPool<S, A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            activities: Arc::clone(&self.activities),
            router: Arc::clone(&self.router),
            retry: self.retry.clone(),
            checkpoints: self.checkpoints.clone(),
            events: self.events.clone(),
            poll_interval: self.poll_interval,
            pool_id: self.pool_id,
        }
    }
}

impl<S: WorkflowStore, A: ActivityExecutor> WorkerPool<S, A> {
    pub fn new(
        store: Arc<S>,
        activities: Arc<A>,
        router: Arc<QueueRouter>,
        retry: RetryConfig,
        events: EventBus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            checkpoints: CheckpointManager::new(Arc::clone(&store)),
            store,
            activities,
            router,
            retry,
            events,
            poll_interval,
            pool_id: Uuid::now_v7(),
        }
    }

    /// Lease and fully process at most one task from `queue`.
    ///
    /// Returns the id of the processed task, or `None` when nothing was
    /// leasable (empty queue or concurrency limit reached).
    pub async fn process_one(
        &self,
        queue: &str,
        worker_id: &str,
    ) -> Result<Option<TaskId>, WorkerError> {
        let Some((task, visibility)) = self.lease(queue, worker_id).await? else {
            return Ok(None);
        };
        let task_id = task.id.clone();
        self.execute(task, worker_id, visibility).await?;
        Ok(Some(task_id))
    }

    /// Spawn one poller per queue in `queues`.
    ///
    /// Pollers stop leasing when `shutdown` is cancelled and return once
    /// their in-flight tasks have finished.
    pub fn spawn(&self, queues: &[String], shutdown: CancellationToken) -> JoinSet<()> {
        let mut pollers = JoinSet::new();
        for name in queues {
            let Some(queue) = self.router.queue(name) else {
                tracing::warn!(queue = %name, "no such queue, skipping");
                continue;
            };
            let pool = self.clone();
            let queue_name = queue.name.clone();
            let max_concurrency = queue.max_concurrency;
            let shutdown = shutdown.clone();
            pollers.spawn(async move {
                pool.poll_queue(queue_name, max_concurrency, shutdown).await;
            });
        }
        pollers
    }

    async fn poll_queue(self, queue: String, max_concurrency: u32, shutdown: CancellationToken) {
        let worker_id = format!("{}/{}", self.pool_id, queue);
        let slots = Arc::new(Semaphore::new(max_concurrency as usize));
        let mut in_flight = JoinSet::new();

        tracing::info!(queue = %queue, worker_id = %worker_id, max_concurrency, "worker started");

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.lease(&queue, &worker_id).await {
                Ok(Some((task, visibility))) => {
                    let pool = self.clone();
                    let worker_id = worker_id.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let task_id = task.id.clone();
                        if let Err(e) = pool.execute(task, &worker_id, visibility).await {
                            tracing::error!(task_id = %task_id, error = %e, "task execution failed");
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(queue = %queue, error = %e, "lease failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(queue = %queue, error = %e, "task panicked");
                }
            }
        }

        tracing::info!(queue = %queue, in_flight = in_flight.len(), "worker draining");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(queue = %queue, error = %e, "task panicked");
            }
        }
        tracing::info!(queue = %queue, worker_id = %worker_id, "worker stopped");
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn lease(
        &self,
        queue: &str,
        worker_id: &str,
    ) -> Result<Option<(ActivityTask, Duration)>, WorkerError> {
        let limits = self
            .router
            .queue(queue)
            .ok_or_else(|| WorkerError::UnknownQueue(queue.to_string()))?;
        let visibility = limits.visibility_timeout;

        let Some(task) = self
            .store
            .lease_next(queue, worker_id, Utc::now(), visibility, limits.max_concurrency)
            .await?
        else {
            return Ok(None);
        };

        tracing::debug!(
            run_id = %task.run_id,
            task_id = %task.id,
            worker_id,
            epoch = task.lease_epoch,
            "task leased"
        );
        self.events.publish(WorkflowEvent::TaskLeased {
            run_id: task.run_id,
            task_id: task.id.clone(),
            worker_id: worker_id.to_string(),
            epoch: task.lease_epoch,
        });
        Ok(Some((task, visibility)))
    }

    async fn execute(
        &self,
        task: ActivityTask,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<(), WorkerError> {
        let outcome = match self.settled_outcome(&task).await? {
            Some(outcome) => outcome,
            None => match self.supervise(&task, worker_id, visibility).await? {
                Some(outcome) => outcome,
                None => return Ok(()),
            },
        };
        self.finish(&task, outcome).await
    }

    /// Outcome of a task that must not run again: an already checkpointed
    /// step, a payload that fails queue-boundary validation, or a reclaimed
    /// task whose recorded attempts already ended it.
    async fn settled_outcome(
        &self,
        task: &ActivityTask,
    ) -> Result<Option<StepOutcome>, WorkerError> {
        if let Some(entry) = self
            .store
            .get_checkpoint(&task.run_id, &task.step_id)
            .await?
        {
            return Ok(Some(entry.outcome));
        }

        if task.input.activity_type() != task.activity_type {
            return Ok(Some(StepOutcome::Failed {
                kind: ErrorKind::Validation,
                message: format!(
                    "payload for '{}' does not match activity type '{}'",
                    task.input.activity_type(),
                    task.activity_type
                ),
            }));
        }

        let attempts = self.store.list_attempts(&task.id).await?;
        let policy = self.retry.policy_for(task.activity_type);
        if let Some(AttemptRecord {
            attempt,
            outcome: AttemptOutcome::Failed { kind, message },
            ..
        }) = attempts.last()
        {
            if !kind.is_retryable() || *attempt >= policy.max_attempts {
                return Ok(Some(StepOutcome::Failed {
                    kind: *kind,
                    message: message.clone(),
                }));
            }
        }
        Ok(None)
    }

    /// Run the activity under the supervisor. `None` means the lease was lost
    /// and this worker must not report anything.
    async fn supervise(
        &self,
        task: &ActivityTask,
        worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<StepOutcome>, WorkerError> {
        let supervisor = Supervisor::new(self.retry.policy_for(task.activity_type).clone(), worker_id);
        let journal = LeaseJournal {
            store: self.store.as_ref(),
            events: &self.events,
            task,
            visibility,
        };
        let activities = self.activities.as_ref();

        let supervised = supervisor
            .run(task.attempt_count + 1, &journal, |attempt| {
                let ctx = ActivityContext {
                    run_id: task.run_id,
                    step_id: task.step_id,
                    attempt,
                };
                async move { activities.execute(&ctx, &task.input).await }
            })
            .await?;

        let outcome = match supervised {
            Supervised::Succeeded { output, attempts } => {
                if output.activity_type() != task.activity_type {
                    StepOutcome::Failed {
                        kind: ErrorKind::Validation,
                        message: format!(
                            "activity '{}' produced a '{}' result",
                            task.activity_type,
                            output.activity_type()
                        ),
                    }
                } else {
                    tracing::debug!(task_id = %task.id, attempts, "task succeeded");
                    StepOutcome::Succeeded { output }
                }
            }
            Supervised::Failed { error, attempts } => {
                tracing::warn!(
                    run_id = %task.run_id,
                    task_id = %task.id,
                    attempts,
                    kind = %error.kind,
                    error = %error.message,
                    "task failed permanently"
                );
                StepOutcome::Failed {
                    kind: error.kind,
                    message: error.message,
                }
            }
            Supervised::LeaseLost { attempts } => {
                tracing::warn!(
                    run_id = %task.run_id,
                    task_id = %task.id,
                    worker_id,
                    attempts,
                    "lease lost, discarding result"
                );
                return Ok(None);
            }
        };
        Ok(Some(outcome))
    }

    /// Checkpoint the outcome write-once, then finish the task under its
    /// lease epoch with whatever outcome is authoritative.
    async fn finish(&self, task: &ActivityTask, outcome: StepOutcome) -> Result<(), WorkerError> {
        let entry = self
            .checkpoints
            .record_step(task.run_id, task.step_id, outcome, Utc::now())
            .await?;

        let completion = match entry.outcome {
            StepOutcome::Succeeded { output } => TaskCompletion::Succeeded { output },
            StepOutcome::Failed { kind, message } => TaskCompletion::Failed {
                failure: StepFailure {
                    step_id: task.step_id,
                    kind,
                    message,
                },
            },
            StepOutcome::Joined { .. } => TaskCompletion::Failed {
                failure: StepFailure {
                    step_id: task.step_id,
                    kind: ErrorKind::Validation,
                    message: format!("step '{}' is a join, not an activity", task.step_id),
                },
            },
        };
        let status = completion.status();

        if !self
            .store
            .finish_task(&task.id, task.lease_epoch, &completion, Utc::now())
            .await?
        {
            tracing::warn!(
                task_id = %task.id,
                epoch = task.lease_epoch,
                "lease lost before finishing task"
            );
        }

        self.events.publish(WorkflowEvent::TaskFinished {
            run_id: task.run_id,
            task_id: task.id.clone(),
            status,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LeaseJournal
// ---------------------------------------------------------------------------

/// Attempt journal backed by the task's lease: each attempt renews the lease
/// and each outcome is appended under the lease epoch.
struct LeaseJournal<'a, S: WorkflowStore> {
    store: &'a S,
    events: &'a EventBus,
    task: &'a ActivityTask,
    visibility: Duration,
}

impl<S: WorkflowStore> LeaseJournal<'_, S> {
    async fn renew(&self) -> Result<bool, SupervisorError> {
        let until = Utc::now()
            + chrono::Duration::from_std(self.visibility)
                .map_err(|e| SupervisorError::Journal(e.to_string()))?;
        self.store
            .renew_lease(&self.task.id, self.task.lease_epoch, until)
            .await
            .map_err(journal_error)
    }
}

impl<S: WorkflowStore> AttemptJournal for LeaseJournal<'_, S> {
    async fn begin_attempt(&self, attempt: u32) -> Result<bool, SupervisorError> {
        let renewed = self.renew().await?;
        if renewed {
            tracing::debug!(task_id = %self.task.id, attempt, "attempt started");
        }
        Ok(renewed)
    }

    async fn finish_attempt(&self, record: AttemptRecord) -> Result<bool, SupervisorError> {
        let error_kind = match &record.outcome {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Failed { kind, .. } => Some(*kind),
        };
        let attempt = record.attempt;
        if !self
            .store
            .record_attempt(&self.task.id, self.task.lease_epoch, &record)
            .await
            .map_err(journal_error)?
        {
            return Ok(false);
        }

        self.events.publish(WorkflowEvent::AttemptFinished {
            run_id: self.task.run_id,
            task_id: self.task.id.clone(),
            attempt,
            error_kind,
        });
        // Keep the lease alive across the backoff that may follow.
        self.renew().await
    }
}

fn journal_error(e: RepositoryError) -> SupervisorError {
    SupervisorError::Journal(e.to_string())
}

// ---------------------------------------------------------------------------
// WorkerError
// ---------------------------------------------------------------------------

/// Errors that stop a worker from processing a task.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("worker repository error: {0}")]
    Repository(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

impl From<RepositoryError> for WorkerError {
    fn from(e: RepositoryError) -> Self {
        WorkerError::Repository(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{CheckpointStore, MemoryWorkflowStore, TaskQueueStore};
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use crate::workflow::activity::{PipelineActivities, extracted_image_key};
    use crate::workflow::testing::{ScriptedNer, ScriptedOcr, ScriptedPdf};
    use docflow_types::config::{DocflowConfig, ML_PROCESSING_QUEUE, PDF_EXTRACTION_QUEUE};
    use docflow_types::workflow::{
        ActivityInput, ActivityType, BlobRef, StepId, TaskSpec, TaskStatus,
    };
    use std::sync::atomic::Ordering;

    type Activities = PipelineActivities<MemoryObjectStore, ScriptedPdf, ScriptedOcr, ScriptedNer>;

    fn pool_with(config: &DocflowConfig) -> WorkerPool<MemoryWorkflowStore, Activities> {
        WorkerPool::new(
            Arc::new(MemoryWorkflowStore::new()),
            Arc::new(PipelineActivities::new(
                Arc::new(MemoryObjectStore::new()),
                ScriptedPdf::new("text", 0),
                ScriptedOcr::new(),
                ScriptedNer::new(),
            )),
            Arc::new(QueueRouter::from_config(config).unwrap()),
            config.retry.clone(),
            EventBus::new(64),
            Duration::from_millis(10),
        )
    }

    fn pool() -> WorkerPool<MemoryWorkflowStore, Activities> {
        pool_with(&DocflowConfig::default())
    }

    async fn enqueue_ocr(pool: &WorkerPool<MemoryWorkflowStore, Activities>, run_id: Uuid) -> TaskId {
        let image_ref = extracted_image_key(run_id, 0, 1);
        pool.activities.store().put(&image_ref, vec![1, 2, 3]).await.unwrap();
        let task = ActivityTask::scheduled(
            TaskSpec {
                run_id,
                step_id: StepId::ocr(0),
                input: ActivityInput::Ocr { image_ref },
            },
            ML_PROCESSING_QUEUE,
            Utc::now(),
        );
        pool.store.enqueue_if_absent(&task).await.unwrap();
        task.id
    }

    #[tokio::test]
    async fn processes_task_and_checkpoints_result() {
        let pool = pool();
        let run_id = Uuid::now_v7();
        let task_id = enqueue_ocr(&pool, run_id).await;
        let mut events = pool.events.subscribe();

        assert_eq!(
            pool.process_one(ML_PROCESSING_QUEUE, "w1").await.unwrap(),
            Some(task_id.clone())
        );

        let task = pool.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempt_count, 1);
        assert!(task.lease_owner.is_none());
        let entry = pool
            .store
            .get_checkpoint(&run_id, &StepId::ocr(0))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(entry.outcome, StepOutcome::Succeeded { .. }));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen.first(), Some(WorkflowEvent::TaskLeased { epoch: 1, .. })));
        assert!(matches!(
            seen.last(),
            Some(WorkflowEvent::TaskFinished { status: TaskStatus::Succeeded, .. })
        ));
    }

    #[tokio::test]
    async fn empty_queue_yields_nothing() {
        let pool = pool();
        assert_eq!(pool.process_one(PDF_EXTRACTION_QUEUE, "w1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.process_one("gpu", "w1").await,
            Err(WorkerError::UnknownQueue(name)) if name == "gpu"
        ));
    }

    #[tokio::test]
    async fn queue_at_capacity_leases_nothing() {
        let mut config = DocflowConfig::default();
        config.queues.get_mut(ML_PROCESSING_QUEUE).unwrap().max_concurrency = 1;
        let pool = pool_with(&config);
        enqueue_ocr(&pool, Uuid::now_v7()).await;
        enqueue_ocr(&pool, Uuid::now_v7()).await;

        let held = pool.lease(ML_PROCESSING_QUEUE, "w1").await.unwrap();
        assert!(held.is_some());
        assert_eq!(pool.process_one(ML_PROCESSING_QUEUE, "w2").await.unwrap(), None);

        let (task, visibility) = held.unwrap();
        pool.execute(task, "w1", visibility).await.unwrap();
        assert!(pool.process_one(ML_PROCESSING_QUEUE, "w2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mismatched_payload_fails_validation_without_executing() {
        let pool = pool();
        let run_id = Uuid::now_v7();
        let mut task = ActivityTask::scheduled(
            TaskSpec {
                run_id,
                step_id: StepId::ner_text(),
                input: ActivityInput::Ner { text_ref: BlobRef::new("runs/x/extract/text") },
            },
            ML_PROCESSING_QUEUE,
            Utc::now(),
        );
        task.activity_type = ActivityType::Ocr;
        pool.store.enqueue_if_absent(&task).await.unwrap();

        pool.process_one(ML_PROCESSING_QUEUE, "w1").await.unwrap();

        let stored = pool.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.failure.unwrap().kind, ErrorKind::Validation);
        assert!(pool.store.list_attempts(&task.id).await.unwrap().is_empty());
        assert_eq!(pool.activities.ner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn racing_workers_on_reclaimed_lease_record_one_result() {
        let pool = pool();
        let run_id = Uuid::now_v7();
        let task_id = enqueue_ocr(&pool, run_id).await;

        // Worker A leases long ago; its lease has expired.
        let stale = pool
            .store
            .lease_next(
                ML_PROCESSING_QUEUE,
                "worker-a",
                Utc::now() - chrono::Duration::hours(1),
                Duration::from_secs(60),
                10,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stale.lease_epoch, 1);

        // Worker B reclaims the same task id.
        let (fresh, visibility) = pool.lease(ML_PROCESSING_QUEUE, "worker-b").await.unwrap().unwrap();
        assert_eq!(fresh.id, task_id);
        assert_eq!(fresh.lease_epoch, 2);

        // A wakes up first and is fenced off before running the activity.
        pool.execute(stale.clone(), "worker-a", visibility).await.unwrap();
        assert!(pool.store.get_checkpoint(&run_id, &StepId::ocr(0)).await.unwrap().is_none());

        pool.execute(fresh, "worker-b", visibility).await.unwrap();
        // A retries with its stale lease after B finished.
        pool.execute(stale, "worker-a", visibility).await.unwrap();

        assert_eq!(pool.store.list_checkpoints(&run_id).await.unwrap().len(), 1);
        let attempts = pool.store.list_attempts(&task_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].worker_id, "worker-b");
        assert_eq!(pool.activities.ocr.calls_for("image_0_1"), 1);

        let task = pool.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.lease_epoch, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stale_and_fresh_owners_record_one_result() {
        for _ in 0..20 {
            let pool = pool();
            let run_id = Uuid::now_v7();
            let task_id = enqueue_ocr(&pool, run_id).await;

            let stale = pool
                .store
                .lease_next(
                    ML_PROCESSING_QUEUE,
                    "worker-a",
                    Utc::now() - chrono::Duration::hours(1),
                    Duration::from_secs(60),
                    10,
                )
                .await
                .unwrap()
                .unwrap();
            let (fresh, visibility) =
                pool.lease(ML_PROCESSING_QUEUE, "worker-b").await.unwrap().unwrap();

            let start = Arc::new(tokio::sync::Barrier::new(2));
            let spawn_owner = |task: ActivityTask, worker_id: &'static str| {
                let pool = pool.clone();
                let start = Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    pool.execute(task, worker_id, visibility).await
                })
            };
            let a = spawn_owner(stale, "worker-a");
            let b = spawn_owner(fresh, "worker-b");
            let (a, b) = tokio::join!(a, b);
            a.unwrap().unwrap();
            b.unwrap().unwrap();

            assert_eq!(pool.store.list_checkpoints(&run_id).await.unwrap().len(), 1);
            assert_eq!(pool.activities.ocr.calls_for("image_0_1"), 1);
            let attempts = pool.store.list_attempts(&task_id).await.unwrap();
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].worker_id, "worker-b");
            let task = pool.store.get_task(&task_id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn reclaimed_task_with_final_failed_attempt_is_not_rerun() {
        let pool = pool();
        let run_id = Uuid::now_v7();
        let input = BlobRef::new("inputs/doc.pdf");
        let task = ActivityTask::scheduled(
            TaskSpec {
                run_id,
                step_id: StepId::extract(),
                input: ActivityInput::Extract { blob_ref: input },
            },
            PDF_EXTRACTION_QUEUE,
            Utc::now(),
        );
        pool.store.enqueue_if_absent(&task).await.unwrap();

        // A previous owner recorded a parse failure, then crashed.
        let past = Utc::now() - chrono::Duration::hours(1);
        let leased = pool
            .store
            .lease_next(PDF_EXTRACTION_QUEUE, "crashed", past, Duration::from_secs(60), 5)
            .await
            .unwrap()
            .unwrap();
        let record = AttemptRecord {
            attempt: 1,
            worker_id: "crashed".to_string(),
            outcome: AttemptOutcome::Failed {
                kind: ErrorKind::Parse,
                message: "input is not a PDF document".to_string(),
            },
            started_at: past,
            finished_at: past,
        };
        assert!(pool.store.record_attempt(&task.id, leased.lease_epoch, &record).await.unwrap());

        pool.process_one(PDF_EXTRACTION_QUEUE, "w2").await.unwrap();

        assert_eq!(pool.activities.pdf.calls.load(Ordering::SeqCst), 0);
        let stored = pool.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.failure.unwrap().kind, ErrorKind::Parse);
        assert_eq!(pool.store.list_attempts(&task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn spawned_pollers_drain_on_shutdown() {
        let pool = pool();
        let run_id = Uuid::now_v7();
        let task_id = enqueue_ocr(&pool, run_id).await;
        let mut events = pool.events.subscribe();
        let shutdown = CancellationToken::new();

        let pollers = pool.spawn(&[ML_PROCESSING_QUEUE.to_string(), "gpu".to_string()], shutdown.clone());
        assert_eq!(pollers.len(), 1);

        loop {
            if let WorkflowEvent::TaskFinished { task_id: id, .. } = events.recv().await.unwrap() {
                assert_eq!(id, task_id);
                break;
            }
        }
        shutdown.cancel();
        pollers.join_all().await;

        let task = pool.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
    }

    #[test]
    fn worker_error_display() {
        let err = WorkerError::UnknownQueue("gpu".to_string());
        assert_eq!(err.to_string(), "unknown queue: gpu");
    }
}
