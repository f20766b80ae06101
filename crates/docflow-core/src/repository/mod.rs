//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (docflow-infra) implements. The core crate never depends on any
//! specific storage technology. `MemoryWorkflowStore` is the in-process
//! implementation used by tests and single-shot tooling.

pub mod checkpoint;
pub mod memory;
pub mod run;
pub mod task_queue;

pub use checkpoint::{CheckpointStore, RecordOutcome};
pub use memory::MemoryWorkflowStore;
pub use run::RunRepository;
pub use task_queue::TaskQueueStore;

/// Everything the engine and the worker pools persist.
///
/// Blanket-implemented for any type providing all three stores.
pub trait WorkflowStore: RunRepository + CheckpointStore + TaskQueueStore + 'static {}

impl<T> WorkflowStore for T where T: RunRepository + CheckpointStore + TaskQueueStore + 'static {}
