//! Workflow engine core: decision logic, durable checkpointing and execution.
//!
//! This module contains the "brain" of the pipeline orchestrator:
//! - `dag` -- fan-out shapes and join-counter evaluation over checkpoints
//! - `decision` -- the pure `decide` function replayed on every evaluation
//! - `checkpoint` -- write-once checkpoint manager for crash recovery
//! - `engine` -- run driver: submit, advance, drive, recover
//! - `router` -- activity type to queue routing with per-queue limits
//! - `supervisor` -- per-attempt deadlines and retry with backoff
//! - `worker` -- lease-based worker pools
//! - `activity` -- Extract, OCR and NER activities and their collaborators

pub mod activity;
pub mod checkpoint;
pub mod dag;
pub mod decision;
pub mod engine;
pub mod router;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub mod testing;
