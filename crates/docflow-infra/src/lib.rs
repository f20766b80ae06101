//! Infrastructure layer for docflow.
//!
//! Contains implementations of the ports defined in `docflow-core`:
//! SQLite run/task/checkpoint storage, a filesystem blob store, pdfium-based
//! PDF extraction, and HTTP clients for the OCR and NER services.

pub mod config;
pub mod ml;
pub mod pdf;
pub mod sqlite;
pub mod storage;
