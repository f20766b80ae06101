//! Event types for the docflow event bus.
//!
//! `WorkflowEvent` is broadcast as runs and tasks move through their
//! lifecycle. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::workflow::{StepId, TaskId, TaskStatus, WorkflowRunStatus};

/// Events emitted by the engine and the worker pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A new run was accepted.
    RunSubmitted { run_id: Uuid, at: DateTime<Utc> },

    /// A task was enqueued for the first time.
    TaskScheduled {
        run_id: Uuid,
        task_id: TaskId,
        step_id: StepId,
        queue: String,
    },

    /// A worker leased a task.
    TaskLeased {
        run_id: Uuid,
        task_id: TaskId,
        worker_id: String,
        epoch: u64,
    },

    /// One supervised attempt finished.
    AttemptFinished {
        run_id: Uuid,
        task_id: TaskId,
        attempt: u32,
        /// `None` when the attempt succeeded.
        error_kind: Option<ErrorKind>,
    },

    /// A task reached a terminal status. Drivers use this as a wake-up.
    TaskFinished {
        run_id: Uuid,
        task_id: TaskId,
        status: TaskStatus,
    },

    /// A run reached a terminal status.
    RunFinished {
        run_id: Uuid,
        status: WorkflowRunStatus,
    },
}

impl WorkflowEvent {
    /// Run the event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunSubmitted { run_id, .. }
            | WorkflowEvent::TaskScheduled { run_id, .. }
            | WorkflowEvent::TaskLeased { run_id, .. }
            | WorkflowEvent::AttemptFinished { run_id, .. }
            | WorkflowEvent::TaskFinished { run_id, .. }
            | WorkflowEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let run_id = Uuid::now_v7();
        let event = WorkflowEvent::TaskFinished {
            run_id,
            task_id: TaskId::derive(run_id, &StepId::ocr(0)),
            status: TaskStatus::Succeeded,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "task_finished");
        assert_eq!(value["status"], "succeeded");
        assert_eq!(event.run_id(), run_id);
    }
}
