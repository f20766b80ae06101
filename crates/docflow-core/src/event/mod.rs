//! Run and task lifecycle notifications.
//!
//! `EventBus` distributes `WorkflowEvent` messages inside one process;
//! `RunWatch` is the per-run wake-up that drivers wait on.

pub mod bus;

pub use bus::{EventBus, RunWatch};
