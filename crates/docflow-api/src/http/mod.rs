//! HTTP/REST API layer for docflow.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format and
//! CORS support, plus the local mock OCR/NER services.

pub mod error;
pub mod handlers;
pub mod mock;
pub mod response;
pub mod router;
