//! SQLite workflow store implementation.
//!
//! Implements `RunRepository`, `CheckpointStore` and `TaskQueueStore` from
//! `docflow-core` using sqlx with split read/write pools. Payloads, outputs
//! and failures are stored as JSON. Every compare-and-set is a single
//! statement on the single-connection writer pool, so it is atomic with
//! respect to every other writer of the same database.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use docflow_core::repository::{CheckpointStore, RecordOutcome, RunRepository, TaskQueueStore};
use docflow_types::error::RepositoryError;
use docflow_types::workflow::{
    ActivityTask, ActivityType, AttemptRecord, BlobRef, CheckpointEntry, RunTransition, StepId,
    TaskCompletion, TaskId, TaskStatus, WorkflowRun, WorkflowRunStatus,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of the workflow store ports.
#[derive(Clone)]
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
}

impl SqliteWorkflowStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    input_ref: String,
    status: String,
    result: Option<String>,
    failure: Option<String>,
    created_at: String,
    deadline_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            input_ref: row.try_get("input_ref")?,
            status: row.try_get("status")?,
            result: row.try_get("result")?,
            failure: row.try_get("failure")?,
            created_at: row.try_get("created_at")?,
            deadline_at: row.try_get("deadline_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun, RepositoryError> {
        Ok(WorkflowRun {
            id: parse_uuid(&self.id)?,
            input_ref: BlobRef(self.input_ref),
            status: WorkflowRunStatus::from_str(&self.status).map_err(RepositoryError::Query)?,
            result: from_json_opt(self.result.as_deref(), "run result")?,
            failure: from_json_opt(self.failure.as_deref(), "run failure")?,
            created_at: parse_datetime(&self.created_at)?,
            deadline_at: parse_datetime(&self.deadline_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct TaskRow {
    id: String,
    run_id: String,
    step_id: String,
    activity_type: String,
    queue: String,
    input: String,
    attempt_count: i64,
    status: String,
    lease_owner: Option<String>,
    lease_epoch: i64,
    lease_expires_at: Option<String>,
    output: Option<String>,
    failure: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            activity_type: row.try_get("activity_type")?,
            queue: row.try_get("queue")?,
            input: row.try_get("input")?,
            attempt_count: row.try_get("attempt_count")?,
            status: row.try_get("status")?,
            lease_owner: row.try_get("lease_owner")?,
            lease_epoch: row.try_get("lease_epoch")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            output: row.try_get("output")?,
            failure: row.try_get("failure")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_task(self) -> Result<ActivityTask, RepositoryError> {
        Ok(ActivityTask {
            id: TaskId(self.id),
            run_id: parse_uuid(&self.run_id)?,
            step_id: StepId::from_str(&self.step_id).map_err(RepositoryError::Query)?,
            activity_type: ActivityType::from_str(&self.activity_type)
                .map_err(RepositoryError::Query)?,
            queue: self.queue,
            input: from_json(&self.input, "task input")?,
            attempt_count: self.attempt_count as u32,
            status: TaskStatus::from_str(&self.status).map_err(RepositoryError::Query)?,
            lease_owner: self.lease_owner,
            lease_epoch: self.lease_epoch as u64,
            lease_expires_at: self.lease_expires_at.as_deref().map(parse_datetime).transpose()?,
            output: from_json_opt(self.output.as_deref(), "task output")?,
            failure: from_json_opt(self.failure.as_deref(), "task failure")?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn checkpoint_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CheckpointEntry, RepositoryError> {
    let read = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let run_id: String = row.try_get("run_id").map_err(read)?;
    let step_id: String = row.try_get("step_id").map_err(read)?;
    let outcome: String = row.try_get("outcome").map_err(read)?;
    let seq: i64 = row.try_get("seq").map_err(read)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(read)?;

    Ok(CheckpointEntry {
        run_id: parse_uuid(&run_id)?,
        step_id: StepId::from_str(&step_id).map_err(RepositoryError::Query)?,
        outcome: from_json(&outcome, "checkpoint outcome")?,
        seq: seq as u64,
        recorded_at: parse_datetime(&recorded_at)?,
    })
}

fn attempt_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AttemptRecord, RepositoryError> {
    let read = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let attempt: i64 = row.try_get("attempt").map_err(read)?;
    let worker_id: String = row.try_get("worker_id").map_err(read)?;
    let outcome: String = row.try_get("outcome").map_err(read)?;
    let started_at: String = row.try_get("started_at").map_err(read)?;
    let finished_at: String = row.try_get("finished_at").map_err(read)?;

    Ok(AttemptRecord {
        attempt: attempt as u32,
        worker_id,
        outcome: from_json(&outcome, "attempt outcome")?,
        started_at: parse_datetime(&started_at)?,
        finished_at: parse_datetime(&finished_at)?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TASK_COLUMNS: &str = "id, run_id, step_id, activity_type, queue, input, attempt_count, \
     status, lease_owner, lease_epoch, lease_expires_at, output, failure, created_at, updated_at";

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC timestamps compare lexicographically in SQL.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

fn from_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn from_json_opt<T: DeserializeOwned>(
    s: Option<&str>,
    what: &str,
) -> Result<Option<T>, RepositoryError> {
    s.map(|s| from_json(s, what)).transpose()
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// RunRepository impl
// ---------------------------------------------------------------------------

impl RunRepository for SqliteWorkflowStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let result = run.result.as_ref().map(|r| to_json(r, "run result")).transpose()?;
        let failure = run.failure.as_ref().map(|f| to_json(f, "run failure")).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_runs
               (id, input_ref, status, result, failure, created_at, deadline_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.input_ref.as_str())
        .bind(run.status.as_str())
        .bind(&result)
        .bind(&failure)
        .bind(format_datetime(&run.created_at))
        .bind(format_datetime(&run.deadline_at))
        .bind(run.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("run {} already exists", run.id))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(RunRow::from_row(&row).map_err(query_error)?.into_run()?)),
            None => Ok(None),
        }
    }

    async fn transition_run(
        &self,
        run_id: &Uuid,
        transition: &RunTransition,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let (result, failure) = match transition {
            RunTransition::Complete { result } => (Some(to_json(result, "run result")?), None),
            RunTransition::Fail { failure } => (None, Some(to_json(failure, "run failure")?)),
            RunTransition::TimeOut => (None, None),
        };

        let updated = sqlx::query(
            r#"UPDATE workflow_runs
               SET status = ?, result = ?, failure = ?, completed_at = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(transition.target_status().as_str())
        .bind(&result)
        .bind(&failure)
        .bind(format_datetime(&at))
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn list_active_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_runs WHERE status = 'running' ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| RunRow::from_row(row).map_err(query_error)?.into_run())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteWorkflowStore {
    async fn record_if_absent(
        &self,
        entry: &CheckpointEntry,
    ) -> Result<RecordOutcome, RepositoryError> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"INSERT INTO checkpoints (run_id, step_id, outcome, recorded_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(run_id, step_id) DO NOTHING
               RETURNING seq"#,
        )
        .bind(entry.run_id.to_string())
        .bind(entry.step_id.to_string())
        .bind(to_json(&entry.outcome, "checkpoint outcome")?)
        .bind(format_datetime(&entry.recorded_at))
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if let Some((seq,)) = inserted {
            return Ok(RecordOutcome::Recorded(seq as u64));
        }

        // Read back through the writer so the winner's row is always visible.
        let row = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? AND step_id = ?")
            .bind(entry.run_id.to_string())
            .bind(entry.step_id.to_string())
            .fetch_one(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(RecordOutcome::AlreadyRecorded(checkpoint_from_row(&row)?))
    }

    async fn get_checkpoint(
        &self,
        run_id: &Uuid,
        step_id: &StepId,
    ) -> Result<Option<CheckpointEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? AND step_id = ?")
            .bind(run_id.to_string())
            .bind(step_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn list_checkpoints(&self, run_id: &Uuid) -> Result<Vec<CheckpointEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? ORDER BY seq ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(checkpoint_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// TaskQueueStore impl
// ---------------------------------------------------------------------------

impl TaskQueueStore for SqliteWorkflowStore {
    async fn enqueue_if_absent(&self, task: &ActivityTask) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            r#"INSERT INTO activity_tasks
               (id, run_id, step_id, activity_type, queue, input, attempt_count, status,
                lease_owner, lease_epoch, lease_expires_at, output, failure, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO NOTHING"#,
        )
        .bind(task.id.as_str())
        .bind(task.run_id.to_string())
        .bind(task.step_id.to_string())
        .bind(task.activity_type.as_str())
        .bind(&task.queue)
        .bind(to_json(&task.input, "task input")?)
        .bind(task.attempt_count as i64)
        .bind(task.status.as_str())
        .bind(&task.lease_owner)
        .bind(task.lease_epoch as i64)
        .bind(task.lease_expires_at.as_ref().map(format_datetime))
        .bind(task.output.as_ref().map(|o| to_json(o, "task output")).transpose()?)
        .bind(task.failure.as_ref().map(|f| to_json(f, "task failure")).transpose()?)
        .bind(format_datetime(&task.created_at))
        .bind(format_datetime(&task.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(inserted.rows_affected() > 0)
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
        let now_str = format_datetime(&now);

        let row = sqlx::query(&format!(
            r#"UPDATE activity_tasks
               SET status = 'leased',
                   lease_owner = ?1,
                   lease_epoch = lease_epoch + 1,
                   lease_expires_at = ?2,
                   updated_at = ?3
               WHERE id = (
                   SELECT id FROM activity_tasks
                   WHERE queue = ?4
                     AND (status = 'scheduled'
                          OR (status = 'leased' AND lease_expires_at <= ?3))
                   ORDER BY created_at ASC, rowid ASC
                   LIMIT 1
               )
               AND (
                   SELECT COUNT(*) FROM activity_tasks
                   WHERE queue = ?4 AND status = 'leased' AND lease_expires_at > ?3
               ) < ?5
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(worker_id)
        .bind(format_datetime(&(now + visibility)))
        .bind(&now_str)
        .bind(queue)
        .bind(max_concurrency as i64)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(TaskRow::from_row(&row).map_err(query_error)?.into_task()?)),
            None => Ok(None),
        }
    }

    async fn renew_lease(
        &self,
        task_id: &TaskId,
        epoch: u64,
        until: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            r#"UPDATE activity_tasks SET lease_expires_at = ?
               WHERE id = ? AND lease_epoch = ? AND status = 'leased'"#,
        )
        .bind(format_datetime(&until))
        .bind(task_id.as_str())
        .bind(epoch as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn record_attempt(
        &self,
        task_id: &TaskId,
        epoch: u64,
        attempt: &AttemptRecord,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let updated = sqlx::query(
            r#"UPDATE activity_tasks
               SET attempt_count = MAX(attempt_count, ?), updated_at = ?
               WHERE id = ? AND lease_epoch = ? AND status = 'leased'"#,
        )
        .bind(attempt.attempt as i64)
        .bind(format_datetime(&attempt.finished_at))
        .bind(task_id.as_str())
        .bind(epoch as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(query_error)?;
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO task_attempts (task_id, attempt, worker_id, outcome, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task_id.as_str())
        .bind(attempt.attempt as i64)
        .bind(&attempt.worker_id)
        .bind(to_json(&attempt.outcome, "attempt outcome")?)
        .bind(format_datetime(&attempt.started_at))
        .bind(format_datetime(&attempt.finished_at))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(true)
    }

    async fn finish_task(
        &self,
        task_id: &TaskId,
        epoch: u64,
        completion: &TaskCompletion,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let (output, failure) = match completion {
            TaskCompletion::Succeeded { output } => (Some(to_json(output, "task output")?), None),
            TaskCompletion::Failed { failure } => (None, Some(to_json(failure, "task failure")?)),
        };

        let updated = sqlx::query(
            r#"UPDATE activity_tasks
               SET status = ?, output = ?, failure = ?, lease_owner = NULL,
                   lease_expires_at = NULL, updated_at = ?
               WHERE id = ? AND lease_epoch = ? AND status = 'leased'"#,
        )
        .bind(completion.status().as_str())
        .bind(&output)
        .bind(&failure)
        .bind(format_datetime(&at))
        .bind(task_id.as_str())
        .bind(epoch as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<ActivityTask>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM activity_tasks WHERE id = ?"))
            .bind(task_id.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(TaskRow::from_row(&row).map_err(query_error)?.into_task()?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, run_id: &Uuid) -> Result<Vec<ActivityTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM activity_tasks WHERE run_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| TaskRow::from_row(row).map_err(query_error)?.into_task())
            .collect()
    }

    async fn list_attempts(&self, task_id: &TaskId) -> Result<Vec<AttemptRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM task_attempts WHERE task_id = ? ORDER BY id ASC")
            .bind(task_id.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(attempt_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
