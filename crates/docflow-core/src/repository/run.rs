//! Workflow run repository trait definition.

use chrono::{DateTime, Utc};
use docflow_types::error::RepositoryError;
use docflow_types::workflow::{RunTransition, WorkflowRun};
use uuid::Uuid;

/// Repository trait for workflow run records.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync {
    /// Create a new run record.
    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by its UUID.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Apply a terminal transition, compare-and-set from `Running`.
    ///
    /// Returns `false` (and changes nothing) when the run is already terminal
    /// or does not exist, which keeps run status monotonic.
    fn transition_run(
        &self,
        run_id: &Uuid,
        transition: &RunTransition,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List every run still in `Running`, oldest first.
    fn list_active_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;
}
