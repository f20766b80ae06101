//! HTTP clients for the OCR and NER services.
//!
//! Both services are plain HTTP endpoints. Per-request deadlines are not set
//! here: the supervisor bounds every attempt, and dropping the attempt's
//! future cancels the in-flight request.

pub mod ner;
pub mod ocr;

pub use ner::HttpNerClient;
pub use ocr::HttpOcrClient;

use docflow_types::error::ActivityError;

/// Classify a transport-level failure.
pub(crate) fn transport_error(service: &str, e: reqwest::Error) -> ActivityError {
    if e.is_timeout() {
        ActivityError::timeout(format!("{service} request timed out: {e}"))
    } else if e.is_connect() {
        ActivityError::transient_io(format!("{service} unreachable: {e}"))
    } else {
        ActivityError::upstream(format!("{service} request failed: {e}"))
    }
}

/// Turn a non-success response into an `ActivityError`, passing successes through.
pub(crate) async fn check_status(
    service: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ActivityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ActivityError::from_upstream_status(service, status.as_u16(), &body))
}
