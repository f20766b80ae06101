//! Shared domain types for docflow.
//!
//! This crate contains the types shared by every layer of the document
//! pipeline: workflow runs, activity tasks, checkpoints, retry policy,
//! configuration, events and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
