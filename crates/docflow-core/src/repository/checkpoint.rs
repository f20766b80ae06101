//! Checkpoint store trait definition.
//!
//! The checkpoint store is the write-once history of step results that every
//! scheduling decision is derived from.

use docflow_types::error::RepositoryError;
use docflow_types::workflow::{CheckpointEntry, StepId};
use uuid::Uuid;

/// Result of a write-once checkpoint write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// This write was the first for its key; carries the assigned sequence.
    Recorded(u64),
    /// Another writer got there first. The existing entry is authoritative
    /// and the caller's entry was discarded.
    AlreadyRecorded(CheckpointEntry),
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded(_))
    }
}

/// Repository trait for step checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Insert `entry` unless `(run_id, step_id)` already has one.
    ///
    /// Implementations must make the existence check and the insert a single
    /// atomic operation.
    fn record_if_absent(
        &self,
        entry: &CheckpointEntry,
    ) -> impl std::future::Future<Output = Result<RecordOutcome, RepositoryError>> + Send;

    /// Get the checkpoint for one step, if recorded.
    fn get_checkpoint(
        &self,
        run_id: &Uuid,
        step_id: &StepId,
    ) -> impl std::future::Future<Output = Result<Option<CheckpointEntry>, RepositoryError>> + Send;

    /// List every checkpoint of a run in write order (ascending `seq`).
    fn list_checkpoints(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<CheckpointEntry>, RepositoryError>> + Send;
}
