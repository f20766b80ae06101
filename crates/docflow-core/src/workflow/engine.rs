//! Workflow engine: drives runs of the document pipeline to a terminal state.
//!
//! The engine owns no in-memory run state. Each `advance` reloads the run
//! and its checkpoints, asks `decide` what to do next, persists join
//! releases, enqueues ready steps through the router and applies terminal
//! transitions. `drive` repeats that until the run is terminal, waking on
//! `TaskFinished` events or on the poll interval, and enforces the run's
//! durable deadline.
//!
//! # Execution flow
//!
//! 1. `submit` creates a `Running` run with `deadline_at` fixed at submission.
//! 2. `advance` schedules `extract`; workers execute it and checkpoint the result.
//! 3. Re-evaluation fans out NER(text) and OCR per image, then NER per OCR result.
//! 4. When both joins release, the aggregate is stored and the run completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docflow_types::config::EngineConfig;
use docflow_types::error::RepositoryError;
use docflow_types::event::WorkflowEvent;
use docflow_types::workflow::{
    ActivityTask, BlobRef, RunStatusReport, RunTransition, TaskReport, TaskSpec, WorkflowRun,
    WorkflowRunStatus,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::WorkflowStore;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::decision::{Verdict, decide};
use super::router::QueueRouter;

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Replay-safe driver for pipeline runs.
///
/// Generic over `S: WorkflowStore` for storage flexibility. Cloning is cheap
/// and clones share the store, router and event bus.
pub struct WorkflowEngine<S: WorkflowStore> {
    store: Arc<S>,
    checkpoints: CheckpointManager<S>,
    router: Arc<QueueRouter>,
    events: EventBus,
    config: EngineConfig,
}

impl<S: WorkflowStore> Clone for WorkflowEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            checkpoints: self.checkpoints.clone(),
            router: Arc::clone(&self.router),
            events: self.events.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    pub fn new(
        store: Arc<S>,
        router: Arc<QueueRouter>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            checkpoints: CheckpointManager::new(Arc::clone(&store)),
            store,
            router,
            events,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Submission and status
    // -----------------------------------------------------------------------

    /// Create a run for the document at `input_ref` and schedule extraction.
    pub async fn submit(&self, input_ref: BlobRef) -> Result<Uuid, EngineError> {
        let now = Utc::now();
        let run = WorkflowRun::new(Uuid::now_v7(), input_ref, now, self.config.run_timeout());
        self.store.create_run(&run).await?;

        tracing::info!(
            run_id = %run.id,
            input_ref = %run.input_ref,
            deadline_at = %run.deadline_at,
            "run submitted"
        );
        self.events.publish(WorkflowEvent::RunSubmitted {
            run_id: run.id,
            at: now,
        });

        self.advance(run.id).await?;
        Ok(run.id)
    }

    /// Status report for one run.
    pub async fn get_status(&self, run_id: Uuid) -> Result<RunStatusReport, EngineError> {
        let run = self.load_run(run_id).await?;
        Ok(RunStatusReport::from(&run))
    }

    /// Every task of a run with its attempt history.
    pub async fn list_tasks(&self, run_id: Uuid) -> Result<Vec<TaskReport>, EngineError> {
        self.load_run(run_id).await?;
        let tasks = self.store.list_tasks(&run_id).await?;
        let mut reports = Vec::with_capacity(tasks.len());
        for task in tasks {
            let attempts = self.store.list_attempts(&task.id).await?;
            reports.push(TaskReport { task, attempts });
        }
        Ok(reports)
    }

    // -----------------------------------------------------------------------
    // Decision loop
    // -----------------------------------------------------------------------

    /// Re-evaluate a run once against its checkpoints.
    ///
    /// Safe to call any number of times, from any process: joins and tasks
    /// are written idempotently and terminal transitions are compare-and-set.
    pub async fn advance(&self, run_id: Uuid) -> Result<WorkflowRunStatus, EngineError> {
        let run = self.load_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(run.status);
        }

        let history = self.checkpoints.history(run_id).await?;
        let decision = decide(&run, &history);

        // A verdict reached from checkpoints wins over a deadline that passed
        // before anyone evaluated it.
        let now = Utc::now();
        if matches!(decision.verdict, Verdict::Pending(_)) && now >= run.deadline_at {
            tracing::info!(run_id = %run_id, deadline_at = %run.deadline_at, "run timed out");
            return self.finish_run(run_id, RunTransition::TimeOut).await;
        }

        for release in &decision.joins {
            self.checkpoints.record_join(run_id, *release, now).await?;
        }
        for spec in decision.schedule {
            self.schedule(spec).await?;
        }

        match decision.verdict {
            Verdict::Pending(stage) => {
                tracing::debug!(run_id = %run_id, stage = ?stage, "run waiting");
                Ok(WorkflowRunStatus::Running)
            }
            Verdict::Completed(result) => {
                tracing::info!(
                    run_id = %run_id,
                    total_images = result.total_images,
                    "run completed"
                );
                self.finish_run(run_id, RunTransition::Complete { result }).await
            }
            Verdict::Failed(failure) => {
                tracing::error!(
                    run_id = %run_id,
                    step_id = %failure.step_id,
                    kind = %failure.kind,
                    error = %failure.message,
                    "run failed"
                );
                self.finish_run(run_id, RunTransition::Fail { failure }).await
            }
        }
    }

    /// Advance a run until it is terminal.
    pub async fn drive(&self, run_id: Uuid) -> Result<WorkflowRunStatus, EngineError> {
        // Subscribe before the first evaluation so no wake-up is missed.
        let mut watch = self.events.watch_run(run_id);
        let deadline_at = self.load_run(run_id).await?.deadline_at;

        loop {
            let status = self.advance(run_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }

            let until_deadline = (deadline_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let wait = self.config.poll_interval().min(until_deadline);

            tokio::select! {
                _ = watch.task_finished() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Drive a run on a background task, logging any engine error.
    pub fn spawn_driver(&self, run_id: Uuid) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.drive(run_id).await {
                tracing::error!(run_id = %run_id, error = %e, "run driver stopped");
            }
        })
    }

    /// Re-evaluate every `Running` run once. Re-enqueues any step whose task
    /// was lost and times out runs whose deadline passed while no process
    /// was driving them.
    pub async fn resume_active(&self) -> Result<Vec<Uuid>, EngineError> {
        let runs = self.store.list_active_runs().await?;
        let mut still_running = Vec::with_capacity(runs.len());
        for run in runs {
            tracing::info!(run_id = %run.id, "resuming run");
            if self.advance(run.id).await? == WorkflowRunStatus::Running {
                still_running.push(run.id);
            }
        }
        Ok(still_running)
    }

    /// Resume every active run and spawn a driver for each one still running.
    pub async fn recover(&self) -> Result<Vec<Uuid>, EngineError> {
        let running = self.resume_active().await?;
        for run_id in &running {
            self.spawn_driver(*run_id);
        }
        Ok(running)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn load_run(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        self.store
            .get_run(&run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    async fn schedule(&self, spec: TaskSpec) -> Result<(), EngineError> {
        let queue = self.router.queue_for(spec.activity_type()).to_string();
        let task = ActivityTask::scheduled(spec, queue, Utc::now());

        if self.store.enqueue_if_absent(&task).await? {
            tracing::debug!(
                run_id = %task.run_id,
                task_id = %task.id,
                queue = %task.queue,
                "task scheduled"
            );
            self.events.publish(WorkflowEvent::TaskScheduled {
                run_id: task.run_id,
                task_id: task.id,
                step_id: task.step_id,
                queue: task.queue,
            });
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        transition: RunTransition,
    ) -> Result<WorkflowRunStatus, EngineError> {
        let target = transition.target_status();
        if self
            .store
            .transition_run(&run_id, &transition, Utc::now())
            .await?
        {
            self.events.publish(WorkflowEvent::RunFinished {
                run_id,
                status: target,
            });
            return Ok(target);
        }
        // Another driver finished the run first; report what it decided.
        Ok(self.load_run(run_id).await?.status)
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors that can occur while driving a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Run, task or queue persistence failed.
    #[error("engine repository error: {0}")]
    Repository(String),

    /// Checkpoint persistence failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        EngineError::Repository(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{
        CheckpointStore, MemoryWorkflowStore, RunRepository, TaskQueueStore,
    };
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use crate::workflow::activity::PipelineActivities;
    use crate::workflow::testing::{ScriptedNer, ScriptedOcr, ScriptedPdf, pdf_bytes};
    use crate::workflow::worker::WorkerPool;
    use docflow_types::config::{DocflowConfig, ML_PROCESSING_QUEUE, PDF_EXTRACTION_QUEUE};
    use docflow_types::error::ErrorKind;
    use docflow_types::workflow::{ActivityType, CheckpointEntry, StepId, StepOutcome, TaskStatus};

    type Activities = PipelineActivities<MemoryObjectStore, ScriptedPdf, ScriptedOcr, ScriptedNer>;

    struct Harness {
        engine: WorkflowEngine<MemoryWorkflowStore>,
        pool: WorkerPool<MemoryWorkflowStore, Activities>,
        activities: Arc<Activities>,
    }

    impl Harness {
        fn new(images: usize, ocr: ScriptedOcr, ner: ScriptedNer) -> Self {
            Self::with_config(DocflowConfig::default(), images, ocr, ner)
        }

        fn with_config(
            config: DocflowConfig,
            images: usize,
            ocr: ScriptedOcr,
            ner: ScriptedNer,
        ) -> Self {
            let store = Arc::new(MemoryWorkflowStore::new());
            let router = Arc::new(QueueRouter::from_config(&config).unwrap());
            let events = EventBus::new(256);
            let activities = Arc::new(PipelineActivities::new(
                Arc::new(MemoryObjectStore::new()),
                ScriptedPdf::new("Invoice from ACME\nTotal due", images),
                ocr,
                ner,
            ));
            let engine = WorkflowEngine::new(
                Arc::clone(&store),
                Arc::clone(&router),
                events.clone(),
                config.engine.clone(),
            );
            let pool = WorkerPool::new(
                store,
                Arc::clone(&activities),
                router,
                config.retry.clone(),
                events,
                config.engine.poll_interval(),
            );
            Self {
                engine,
                pool,
                activities,
            }
        }

        async fn submit_pdf(&self, bytes: Vec<u8>) -> Uuid {
            let input = BlobRef::new("inputs/doc.pdf");
            self.activities.store().put(&input, bytes).await.unwrap();
            self.engine.submit(input).await.unwrap()
        }

        /// Alternate engine evaluation and worker draining until terminal.
        async fn run_to_end(&self, run_id: Uuid) -> WorkflowRunStatus {
            for _ in 0..50 {
                let status = self.engine.advance(run_id).await.unwrap();
                if status.is_terminal() {
                    return status;
                }
                self.drain().await;
            }
            panic!("run {run_id} did not finish");
        }

        async fn drain(&self) {
            for queue in [PDF_EXTRACTION_QUEUE, ML_PROCESSING_QUEUE] {
                while self.pool.process_one(queue, "test-worker").await.unwrap().is_some() {}
            }
        }

        async fn tasks(&self, run_id: Uuid) -> Vec<ActivityTask> {
            self.engine.store().list_tasks(&run_id).await.unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_image_document_completes_with_full_aggregate() {
        let harness = Harness::new(2, ScriptedOcr::new(), ScriptedNer::new());
        let run_id = harness.submit_pdf(pdf_bytes()).await;

        assert_eq!(harness.run_to_end(run_id).await, WorkflowRunStatus::Completed);

        let report = harness.engine.get_status(run_id).await.unwrap();
        assert_eq!(report.status, WorkflowRunStatus::Completed);
        let aggregate = report.result.unwrap();
        assert_eq!(aggregate.total_images, 2);
        assert_eq!(aggregate.ner_text[0].span_text, "Invoice");
        assert_eq!(aggregate.ocr_results.len(), 2);
        assert_eq!(aggregate.ner_ocr_results.len(), 2);
        assert_eq!(aggregate.ner_ocr_results[1][0].span_text, "Texte");
        assert_eq!(
            harness.activities.store().get(&aggregate.ocr_results[1]).await.unwrap(),
            b"Texte de image_1_2"
        );
        assert!(report.failed_step.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn task_counts_are_exact_across_replays() {
        let harness = Harness::new(3, ScriptedOcr::new(), ScriptedNer::new());
        let run_id = harness.submit_pdf(pdf_bytes()).await;

        // Extra evaluations between every worker pass simulate replays.
        for _ in 0..6 {
            harness.engine.advance(run_id).await.unwrap();
            harness.engine.advance(run_id).await.unwrap();
            harness.drain().await;
        }
        assert_eq!(harness.run_to_end(run_id).await, WorkflowRunStatus::Completed);

        let tasks = harness.tasks(run_id).await;
        let ocr = tasks.iter().filter(|t| t.activity_type == ActivityType::Ocr).count();
        let ner = tasks.iter().filter(|t| t.activity_type == ActivityType::Ner).count();
        let extract = tasks.iter().filter(|t| t.activity_type == ActivityType::Extract).count();
        assert_eq!((extract, ocr, ner), (1, 3, 4));

        let aggregate = harness.engine.get_status(run_id).await.unwrap().result.unwrap();
        assert_eq!(aggregate.ocr_results.len(), 3);
        assert_eq!(aggregate.ner_ocr_results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn parse_error_fails_run_without_ocr_or_ner_tasks() {
        let harness = Harness::new(2, ScriptedOcr::new(), ScriptedNer::new());
        let run_id = harness.submit_pdf(b"GIF89a not a pdf".to_vec()).await;

        assert_eq!(harness.run_to_end(run_id).await, WorkflowRunStatus::Failed);

        let report = harness.engine.get_status(run_id).await.unwrap();
        assert_eq!(report.failed_step, Some(StepId::extract()));
        assert_eq!(report.error_kind, Some(ErrorKind::Parse));
        assert!(report.result.is_none());

        let tasks = harness.tasks(run_id).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_ocr_yields_same_aggregate_as_first_try_success() {
        let clean = Harness::new(2, ScriptedOcr::new(), ScriptedNer::new());
        let clean_run = clean.submit_pdf(pdf_bytes()).await;
        clean.run_to_end(clean_run).await;

        let flaky_ocr = ScriptedOcr::new().fail_next("image_1_2", 2, ErrorKind::UpstreamService);
        let flaky = Harness::new(2, flaky_ocr, ScriptedNer::new());
        let flaky_run = flaky.submit_pdf(pdf_bytes()).await;
        assert_eq!(flaky.run_to_end(flaky_run).await, WorkflowRunStatus::Completed);

        let strip = |run_id: Uuid, report: RunStatusReport| {
            let mut aggregate = report.result.unwrap();
            for r in &mut aggregate.ocr_results {
                r.0 = r.0.replace(&run_id.to_string(), "RUN");
            }
            aggregate
        };
        let clean_agg = strip(clean_run, clean.engine.get_status(clean_run).await.unwrap());
        let flaky_agg = strip(flaky_run, flaky.engine.get_status(flaky_run).await.unwrap());
        assert_eq!(clean_agg, flaky_agg);

        let task_id = docflow_types::workflow::TaskId::derive(flaky_run, &StepId::ocr(1));
        let attempts = flaky.engine.store().list_attempts(&task_id).await.unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(flaky.engine.store().get_task(&task_id).await.unwrap().unwrap().attempt_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_ocr_failure_fails_run_and_skips_second_wave() {
        let ocr = ScriptedOcr::new().fail_next("image_0_3", 10, ErrorKind::Validation);
        let harness = Harness::new(3, ocr, ScriptedNer::new());
        let run_id = harness.submit_pdf(pdf_bytes()).await;

        assert_eq!(harness.run_to_end(run_id).await, WorkflowRunStatus::Failed);

        let report = harness.engine.get_status(run_id).await.unwrap();
        assert_eq!(report.failed_step, Some(StepId::ocr(0)));
        assert_eq!(report.error_kind, Some(ErrorKind::Validation));

        let tasks = harness.tasks(run_id).await;
        assert!(tasks.iter().all(|t| t.step_id.name != docflow_types::workflow::StepName::NerOcr));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_after_partial_ocr_skips_completed_step() {
        let harness = Harness::new(3, ScriptedOcr::new(), ScriptedNer::new());
        let run_id = harness.submit_pdf(pdf_bytes()).await;

        // Run extract, then let exactly one OCR task finish.
        harness.pool.process_one(PDF_EXTRACTION_QUEUE, "w").await.unwrap();
        harness.engine.advance(run_id).await.unwrap();
        harness.pool.process_one(ML_PROCESSING_QUEUE, "w").await.unwrap(); // ner_text
        harness.pool.process_one(ML_PROCESSING_QUEUE, "w").await.unwrap(); // ocr/0
        assert!(harness
            .engine
            .store()
            .get_checkpoint(&run_id, &StepId::ocr(0))
            .await
            .unwrap()
            .is_some());

        // A restarted engine over the same store.
        let restarted = harness.engine.clone();
        assert_eq!(restarted.resume_active().await.unwrap(), vec![run_id]);
        assert_eq!(harness.run_to_end(run_id).await, WorkflowRunStatus::Completed);

        let tasks = harness.tasks(run_id).await;
        assert_eq!(
            tasks.iter().filter(|t| t.activity_type == ActivityType::Ocr).count(),
            3
        );
        let ocr0 = docflow_types::workflow::TaskId::derive(run_id, &StepId::ocr(0));
        assert_eq!(harness.engine.store().list_attempts(&ocr0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_deadline_times_out_run() {
        let harness = Harness::new(1, ScriptedOcr::new(), ScriptedNer::new());
        let past = Utc::now() - chrono::Duration::hours(2);
        let run = WorkflowRun::new(
            Uuid::now_v7(),
            BlobRef::new("inputs/doc.pdf"),
            past,
            Duration::from_secs(3600),
        );
        harness.engine.store().create_run(&run).await.unwrap();

        let status = harness.engine.drive(run.id).await.unwrap();
        assert_eq!(status, WorkflowRunStatus::TimedOut);
        assert!(harness.tasks(run.id).await.is_empty());

        // Terminal status never regresses.
        assert_eq!(
            harness.engine.advance(run.id).await.unwrap(),
            WorkflowRunStatus::TimedOut
        );
    }

    #[tokio::test(start_paused = true)]
    async fn finished_steps_complete_run_evaluated_after_deadline() {
        let harness = Harness::new(2, ScriptedOcr::new(), ScriptedNer::new());
        let done = harness.submit_pdf(pdf_bytes()).await;
        assert_eq!(harness.run_to_end(done).await, WorkflowRunStatus::Completed);

        // Same checkpoints on a run nobody evaluated before its deadline.
        let past = Utc::now() - chrono::Duration::hours(2);
        let late = WorkflowRun::new(
            Uuid::now_v7(),
            BlobRef::new("inputs/doc.pdf"),
            past,
            Duration::from_secs(3600),
        );
        let store = harness.engine.store();
        store.create_run(&late).await.unwrap();
        for entry in store.list_checkpoints(&done).await.unwrap() {
            let copy = CheckpointEntry {
                run_id: late.id,
                ..entry
            };
            store.record_if_absent(&copy).await.unwrap();
        }

        assert_eq!(
            harness.engine.advance(late.id).await.unwrap(),
            WorkflowRunStatus::Completed
        );
        let report = harness.engine.get_status(late.id).await.unwrap();
        assert_eq!(report.result.unwrap().total_images, 2);
        assert!(harness.tasks(late.id).await.is_empty());
    }

    #[tokio::test]
    async fn pending_run_past_deadline_schedules_nothing_more() {
        let harness = Harness::new(2, ScriptedOcr::new(), ScriptedNer::new());
        let done = harness.submit_pdf(pdf_bytes()).await;
        harness.pool.process_one(PDF_EXTRACTION_QUEUE, "w").await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(2);
        let late = WorkflowRun::new(
            Uuid::now_v7(),
            BlobRef::new("inputs/doc.pdf"),
            past,
            Duration::from_secs(3600),
        );
        let store = harness.engine.store();
        store.create_run(&late).await.unwrap();
        let extract = store.get_checkpoint(&done, &StepId::extract()).await.unwrap().unwrap();
        store
            .record_if_absent(&CheckpointEntry {
                run_id: late.id,
                ..extract
            })
            .await
            .unwrap();

        assert_eq!(
            harness.engine.advance(late.id).await.unwrap(),
            WorkflowRunStatus::TimedOut
        );
        assert!(harness.tasks(late.id).await.is_empty());
    }

    #[tokio::test]
    async fn drive_completes_with_background_workers() {
        let mut config = DocflowConfig::default();
        config.engine.poll_interval_ms = 20;
        let harness = Harness::with_config(config, 2, ScriptedOcr::new(), ScriptedNer::new());
        let shutdown = tokio_util::sync::CancellationToken::new();
        let workers = harness.pool.spawn(
            &[PDF_EXTRACTION_QUEUE.to_string(), ML_PROCESSING_QUEUE.to_string()],
            shutdown.clone(),
        );

        let run_id = harness.submit_pdf(pdf_bytes()).await;
        let status = tokio::time::timeout(Duration::from_secs(10), harness.engine.drive(run_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, WorkflowRunStatus::Completed);

        shutdown.cancel();
        workers.join_all().await;
    }

    #[tokio::test]
    async fn unknown_run_is_reported() {
        let harness = Harness::new(0, ScriptedOcr::new(), ScriptedNer::new());
        let missing = Uuid::now_v7();
        assert!(matches!(
            harness.engine.get_status(missing).await,
            Err(EngineError::RunNotFound(id)) if id == missing
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn joins_are_persisted_as_checkpoints() {
        let harness = Harness::new(1, ScriptedOcr::new(), ScriptedNer::new());
        let run_id = harness.submit_pdf(pdf_bytes()).await;
        harness.run_to_end(run_id).await;

        let history = harness.engine.store().list_checkpoints(&run_id).await.unwrap();
        let joins: Vec<_> = history
            .iter()
            .filter_map(|e| match e.outcome {
                StepOutcome::Joined { width } => Some((e.step_id, width)),
                _ => None,
            })
            .collect();
        assert_eq!(
            joins,
            vec![(StepId::fan_in_first(), 2), (StepId::fan_in_second(), 1)]
        );
    }
}
