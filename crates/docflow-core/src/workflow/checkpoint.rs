//! Durable checkpoint manager for step results.
//!
//! Wraps a `CheckpointStore` with the write-once policy the engine and the
//! workers share: the first write for a step is authoritative, and a losing
//! writer adopts the stored entry instead of reporting an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use docflow_types::workflow::{CheckpointEntry, StepId, StepOutcome};
use uuid::Uuid;

use crate::repository::checkpoint::{CheckpointStore, RecordOutcome};

use super::decision::JoinRelease;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Records step results and join releases for workflow runs.
///
/// Generic over `S: CheckpointStore` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct CheckpointManager<S: CheckpointStore> {
    store: Arc<S>,
}

impl<S: CheckpointStore> Clone for CheckpointManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record the outcome of an activity step.
    ///
    /// Returns the authoritative entry: ours if we were first, otherwise the
    /// one already stored (our result is discarded).
    pub async fn record_step(
        &self,
        run_id: Uuid,
        step_id: StepId,
        outcome: StepOutcome,
        at: DateTime<Utc>,
    ) -> Result<CheckpointEntry, CheckpointError> {
        let mut entry = CheckpointEntry::new(run_id, step_id, outcome, at);
        match self.record(&entry).await? {
            RecordOutcome::Recorded(seq) => {
                entry.seq = seq;
                tracing::debug!(run_id = %run_id, step_id = %step_id, seq, "checkpointed step");
                Ok(entry)
            }
            RecordOutcome::AlreadyRecorded(existing) => {
                tracing::debug!(
                    run_id = %run_id,
                    step_id = %step_id,
                    seq = existing.seq,
                    "step already checkpointed, discarding duplicate result"
                );
                Ok(existing)
            }
        }
    }

    /// Persist a released join. Returns `false` if it was already recorded.
    pub async fn record_join(
        &self,
        run_id: Uuid,
        release: JoinRelease,
        at: DateTime<Utc>,
    ) -> Result<bool, CheckpointError> {
        let entry = CheckpointEntry::new(
            run_id,
            release.step_id,
            StepOutcome::Joined {
                width: release.width,
            },
            at,
        );
        let recorded = self.record(&entry).await?.is_recorded();
        tracing::debug!(
            run_id = %run_id,
            step_id = %release.step_id,
            width = release.width,
            recorded,
            "join released"
        );
        Ok(recorded)
    }

    /// All checkpoints of a run in write order.
    pub async fn history(&self, run_id: Uuid) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        self.store
            .list_checkpoints(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    async fn record(&self, entry: &CheckpointEntry) -> Result<RecordOutcome, CheckpointError> {
        self.store
            .record_if_absent(entry)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryWorkflowStore;
    use docflow_types::error::ErrorKind;
    use docflow_types::workflow::{ActivityOutput, BlobRef};

    #[tokio::test]
    async fn losing_writer_adopts_existing_entry() {
        let manager = CheckpointManager::new(Arc::new(MemoryWorkflowStore::new()));
        let run_id = Uuid::now_v7();
        let winner = StepOutcome::Succeeded {
            output: ActivityOutput::Recognized { text_ref: BlobRef::new("runs/r/ocr/0/text") },
        };
        let loser = StepOutcome::Failed {
            kind: ErrorKind::Timeout,
            message: "lost race".to_string(),
        };

        let first = manager
            .record_step(run_id, StepId::ocr(0), winner.clone(), Utc::now())
            .await
            .unwrap();
        let second = manager
            .record_step(run_id, StepId::ocr(0), loser, Utc::now())
            .await
            .unwrap();

        assert_eq!(first.outcome, winner);
        assert_eq!(second.outcome, winner);
        assert_eq!(second.seq, first.seq);
        assert_eq!(manager.history(run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn join_is_recorded_once() {
        let manager = CheckpointManager::new(Arc::new(MemoryWorkflowStore::new()));
        let run_id = Uuid::now_v7();
        let release = JoinRelease {
            step_id: StepId::fan_in_first(),
            width: 3,
        };

        assert!(manager.record_join(run_id, release, Utc::now()).await.unwrap());
        assert!(!manager.record_join(run_id, release, Utc::now()).await.unwrap());
    }

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("connection lost".to_string());
        assert!(err.to_string().contains("connection lost"));
    }
}
