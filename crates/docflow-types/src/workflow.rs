//! Workflow domain types for docflow.
//!
//! Covers the durable records of the document pipeline: workflow runs, the
//! deterministic step/task identifiers, per-activity payload variants,
//! activity tasks with their attempt history, checkpoint entries, and the
//! final aggregate returned by a completed run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Blob references
// ---------------------------------------------------------------------------

/// Key of an object in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Workflow Run
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
///
/// `Running` is the only non-terminal state. Once a run leaves it, the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl WorkflowRunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowRunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowRunStatus::Running => "running",
            WorkflowRunStatus::Completed => "completed",
            WorkflowRunStatus::Failed => "failed",
            WorkflowRunStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(WorkflowRunStatus::Running),
            "completed" => Ok(WorkflowRunStatus::Completed),
            "failed" => Ok(WorkflowRunStatus::Failed),
            "timed_out" => Ok(WorkflowRunStatus::TimedOut),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

/// A single execution of the document pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// The submitted PDF.
    pub input_ref: BlobRef,
    /// Current run status.
    pub status: WorkflowRunStatus,
    /// Final aggregate; present only when `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PipelineAggregate>,
    /// First permanent step failure; present only when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    pub created_at: DateTime<Utc>,
    /// Overall run deadline, fixed at submission so it survives restarts.
    pub deadline_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Build a fresh `Running` run.
    pub fn new(id: Uuid, input_ref: BlobRef, created_at: DateTime<Utc>, timeout: Duration) -> Self {
        let deadline_at = created_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            id,
            input_ref,
            status: WorkflowRunStatus::Running,
            result: None,
            failure: None,
            created_at,
            deadline_at,
            completed_at: None,
        }
    }
}

/// A terminal transition applied to a `Running` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunTransition {
    Complete { result: PipelineAggregate },
    Fail { failure: StepFailure },
    TimeOut,
}

impl RunTransition {
    pub fn target_status(&self) -> WorkflowRunStatus {
        match self {
            RunTransition::Complete { .. } => WorkflowRunStatus::Completed,
            RunTransition::Fail { .. } => WorkflowRunStatus::Failed,
            RunTransition::TimeOut => WorkflowRunStatus::TimedOut,
        }
    }
}

/// A permanent failure of one step, recorded as the cause of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_id: StepId,
    pub kind: ErrorKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Logical nodes of the pipeline DAG.
///
/// ```text
/// extract -> { ner_text, ocr[0..n] } -> fan_in_1 -> ner_ocr[0..n] -> fan_in_2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Extract,
    NerText,
    Ocr,
    NerOcr,
    #[serde(rename = "fan_in_1")]
    FanInFirst,
    #[serde(rename = "fan_in_2")]
    FanInSecond,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Extract => "extract",
            StepName::NerText => "ner_text",
            StepName::Ocr => "ocr",
            StepName::NerOcr => "ner_ocr",
            StepName::FanInFirst => "fan_in_1",
            StepName::FanInSecond => "fan_in_2",
        }
    }

    /// Activity executed for this step; `None` for join nodes.
    pub fn activity_type(&self) -> Option<ActivityType> {
        match self {
            StepName::Extract => Some(ActivityType::Extract),
            StepName::Ocr => Some(ActivityType::Ocr),
            StepName::NerText | StepName::NerOcr => Some(ActivityType::Ner),
            StepName::FanInFirst | StepName::FanInSecond => None,
        }
    }

    /// Whether the step is one member of a fan-out and carries an index.
    pub fn is_indexed(&self) -> bool {
        matches!(self, StepName::Ocr | StepName::NerOcr)
    }
}

impl FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(StepName::Extract),
            "ner_text" => Ok(StepName::NerText),
            "ocr" => Ok(StepName::Ocr),
            "ner_ocr" => Ok(StepName::NerOcr),
            "fan_in_1" => Ok(StepName::FanInFirst),
            "fan_in_2" => Ok(StepName::FanInSecond),
            other => Err(format!("unknown step name: '{other}'")),
        }
    }
}

/// Identity of one logical step within a run: the step name plus the
/// fan-out index for indexed steps. Rendered as `extract` or `ocr/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId {
    pub name: StepName,
    pub index: Option<u32>,
}

impl StepId {
    pub fn extract() -> Self {
        Self { name: StepName::Extract, index: None }
    }

    pub fn ner_text() -> Self {
        Self { name: StepName::NerText, index: None }
    }

    pub fn ocr(index: u32) -> Self {
        Self { name: StepName::Ocr, index: Some(index) }
    }

    pub fn ner_ocr(index: u32) -> Self {
        Self { name: StepName::NerOcr, index: Some(index) }
    }

    pub fn fan_in_first() -> Self {
        Self { name: StepName::FanInFirst, index: None }
    }

    pub fn fan_in_second() -> Self {
        Self { name: StepName::FanInSecond, index: None }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}/{index}", self.name.as_str()),
            None => f.write_str(self.name.as_str()),
        }
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, index) = match s.split_once('/') {
            Some((name, index)) => {
                let index = index
                    .parse::<u32>()
                    .map_err(|_| format!("invalid step index in '{s}'"))?;
                (name.parse::<StepName>()?, Some(index))
            }
            None => (s.parse::<StepName>()?, None),
        };

        if name.is_indexed() != index.is_some() {
            return Err(format!("step '{s}' has a mismatched fan-out index"));
        }

        Ok(Self { name, index })
    }
}

impl TryFrom<String> for StepId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StepId> for String {
    fn from(step: StepId) -> Self {
        step.to_string()
    }
}

/// Deterministic task identifier: `{run_id}/{step_id}`.
///
/// Derived only from the run and the logical step, so every replay of the
/// same scheduling decision lands on the same task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn derive(run_id: Uuid, step_id: &StepId) -> Self {
        Self(format!("{run_id}/{step_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

/// The kind of activity a worker executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Extract,
    Ocr,
    Ner,
}

impl ActivityType {
    pub const ALL: [ActivityType; 3] = [ActivityType::Extract, ActivityType::Ocr, ActivityType::Ner];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Extract => "extract",
            ActivityType::Ocr => "ocr",
            ActivityType::Ner => "ner",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(ActivityType::Extract),
            "ocr" => Ok(ActivityType::Ocr),
            "ner" => Ok(ActivityType::Ner),
            other => Err(format!("unknown activity type: '{other}'")),
        }
    }
}

/// Activity input payload, one variant per activity.
///
/// Internally tagged by `type`, so the variant is validated when the
/// payload crosses the queue boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityInput {
    /// Split a PDF into its text and embedded images.
    Extract { blob_ref: BlobRef },
    /// Recognize the text of one image.
    Ocr { image_ref: BlobRef },
    /// Tag named entities in one text blob.
    Ner { text_ref: BlobRef },
}

impl ActivityInput {
    pub fn activity_type(&self) -> ActivityType {
        match self {
            ActivityInput::Extract { .. } => ActivityType::Extract,
            ActivityInput::Ocr { .. } => ActivityType::Ocr,
            ActivityInput::Ner { .. } => ActivityType::Ner,
        }
    }
}

/// Activity result payload, one variant per activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityOutput {
    Extracted {
        text_ref: BlobRef,
        image_refs: Vec<BlobRef>,
    },
    Recognized {
        text_ref: BlobRef,
    },
    Entities {
        entities: Vec<Entity>,
    },
}

impl ActivityOutput {
    pub fn activity_type(&self) -> ActivityType {
        match self {
            ActivityOutput::Extracted { .. } => ActivityType::Extract,
            ActivityOutput::Recognized { .. } => ActivityType::Ocr,
            ActivityOutput::Entities { .. } => ActivityType::Ner,
        }
    }
}

/// One named entity found by the NER collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub span_text: String,
    pub entity_label: String,
}

// ---------------------------------------------------------------------------
// Activity Tasks
// ---------------------------------------------------------------------------

/// Status of an activity task in its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Leased,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Leased => "leased",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TaskStatus::Scheduled),
            "leased" => Ok(TaskStatus::Leased),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("invalid task status: '{other}'")),
        }
    }
}

/// A step the engine has decided is ready to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub run_id: Uuid,
    pub step_id: StepId,
    pub input: ActivityInput,
}

impl TaskSpec {
    pub fn task_id(&self) -> TaskId {
        TaskId::derive(self.run_id, &self.step_id)
    }

    pub fn activity_type(&self) -> ActivityType {
        self.input.activity_type()
    }
}

/// A queued unit of activity work.
///
/// Retries reuse the same task (same id) and bump `attempt_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub id: TaskId,
    pub run_id: Uuid,
    pub step_id: StepId,
    pub activity_type: ActivityType,
    pub queue: String,
    pub input: ActivityInput,
    /// Number of attempts whose outcome has been recorded.
    pub attempt_count: u32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    /// Incremented on every lease; completions must present the current epoch.
    pub lease_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ActivityOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityTask {
    /// Build a freshly scheduled task for `spec` on `queue`.
    pub fn scheduled(spec: TaskSpec, queue: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.task_id(),
            run_id: spec.run_id,
            step_id: spec.step_id,
            activity_type: spec.input.activity_type(),
            queue: queue.into(),
            input: spec.input,
            attempt_count: 0,
            status: TaskStatus::Scheduled,
            lease_owner: None,
            lease_epoch: 0,
            lease_expires_at: None,
            output: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a worker may lease this task at `now`.
    pub fn is_leasable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Scheduled => true,
            TaskStatus::Leased => self.lease_expires_at.is_none_or(|until| until <= now),
            TaskStatus::Succeeded | TaskStatus::Failed => false,
        }
    }

    /// Whether this task currently holds an unexpired lease.
    pub fn holds_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Leased && self.lease_expires_at.is_some_and(|until| until > now)
    }
}

/// Terminal result reported when a worker finishes a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskCompletion {
    Succeeded { output: ActivityOutput },
    Failed { failure: StepFailure },
}

impl TaskCompletion {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskCompletion::Succeeded { .. } => TaskStatus::Succeeded,
            TaskCompletion::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

/// One entry of a task's attempt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub worker_id: String,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A task together with its attempt history, as shown by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    #[serde(flatten)]
    pub task: ActivityTask,
    pub attempts: Vec<AttemptRecord>,
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Durable result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded { output: ActivityOutput },
    Failed { kind: ErrorKind, message: String },
    /// A fan-in node released after all `width` children succeeded.
    Joined { width: u32 },
}

/// Write-once record `(run_id, step_id) -> outcome`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub run_id: Uuid,
    pub step_id: StepId,
    pub outcome: StepOutcome,
    /// Store-assigned write order; 0 until recorded.
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
}

impl CheckpointEntry {
    pub fn new(run_id: Uuid, step_id: StepId, outcome: StepOutcome, recorded_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            step_id,
            outcome,
            seq: 0,
            recorded_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Per-activity retry and timeout policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait before the second attempt, in milliseconds (default 1000).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Growth factor between consecutive waits (default 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on a single wait, in milliseconds (default 30000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Per-attempt deadline in seconds (default 120).
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom per-attempt deadline and default backoff.
    pub fn with_attempt_timeout(secs: u64) -> Self {
        Self {
            attempt_timeout_secs: secs,
            ..Self::default()
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Wait after failed attempt `attempt` (1-based):
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }
}

// ---------------------------------------------------------------------------
// Aggregate and status report
// ---------------------------------------------------------------------------

/// Final result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineAggregate {
    /// Entities over the full document text.
    pub ner_text: Vec<Entity>,
    /// One text reference per embedded image, in image order.
    pub ocr_results: Vec<BlobRef>,
    /// One entity list per OCR result, in image order.
    pub ner_ocr_results: Vec<Vec<Entity>>,
    pub total_images: u32,
}

/// Answer to a status query for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: Uuid,
    pub status: WorkflowRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PipelineAggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&WorkflowRun> for RunStatusReport {
    fn from(run: &WorkflowRun) -> Self {
        let failure = run.failure.as_ref();
        Self {
            run_id: run.id,
            status: run.status,
            result: run.result.clone(),
            failed_step: failure.map(|f| f.step_id),
            error_kind: failure.map(|f| f.kind),
            error: failure.map(|f| f.message.clone()),
            created_at: run.created_at,
            completed_at: run.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
