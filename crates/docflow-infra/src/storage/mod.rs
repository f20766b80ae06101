//! Blob storage infrastructure.
//!
//! Implements the `ObjectStore` trait from `docflow-core` on the local
//! filesystem.

pub mod filesystem;

pub use filesystem::FilesystemObjectStore;
