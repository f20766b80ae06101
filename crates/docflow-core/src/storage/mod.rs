//! Storage abstractions for docflow.
//!
//! Defines the blob store trait used by activities and by document upload.
//! The filesystem implementation lives in docflow-infra.

pub mod object_store;

pub use object_store::{MemoryObjectStore, ObjectStore};
