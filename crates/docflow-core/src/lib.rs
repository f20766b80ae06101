//! Business logic and repository trait definitions for docflow.
//!
//! This crate defines the "ports" (repository, object store and collaborator
//! traits) that the infrastructure layer implements. It depends only on
//! `docflow-types` -- never on `docflow-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod storage;
pub mod workflow;
