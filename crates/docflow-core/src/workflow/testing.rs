//! Scripted collaborators for engine and worker tests.
//!
//! The OCR and NER fakes answer like the local mock services: OCR returns
//! `Texte de {filename}` and NER labels the first word as `first_word`.
//! Failures can be scripted per image or per call.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use docflow_types::error::{ActivityError, ErrorKind};
use docflow_types::workflow::Entity;

use super::activity::{ExtractedDocument, NerClient, OcrClient, PdfExtractor};

/// Minimal bytes that pass the PDF magic check.
pub fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n%fake document\n".to_vec()
}

pub struct ScriptedPdf {
    text: String,
    images: usize,
    pub calls: AtomicU32,
}

impl ScriptedPdf {
    pub fn new(text: &str, images: usize) -> Self {
        Self {
            text: text.to_string(),
            images,
            calls: AtomicU32::new(0),
        }
    }
}

impl PdfExtractor for ScriptedPdf {
    async fn extract(&self, pdf: Vec<u8>) -> Result<ExtractedDocument, ActivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !pdf.starts_with(b"%PDF") {
            return Err(ActivityError::parse("input is not a PDF document"));
        }
        Ok(ExtractedDocument {
            text: self.text.clone(),
            images: (0..self.images).map(|i| vec![i as u8; 4]).collect(),
        })
    }
}

#[derive(Default)]
pub struct ScriptedOcr {
    /// filename -> (failures left, kind)
    failures: DashMap<String, (u32, ErrorKind)>,
    calls: DashMap<String, u32>,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls for `filename` with `kind`.
    pub fn fail_next(self, filename: &str, times: u32, kind: ErrorKind) -> Self {
        self.failures.insert(filename.to_string(), (times, kind));
        self
    }

    pub fn calls_for(&self, filename: &str) -> u32 {
        self.calls.get(filename).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.iter().map(|c| *c.value()).sum()
    }
}

impl OcrClient for ScriptedOcr {
    async fn recognize(&self, _image: Vec<u8>, filename: String) -> Result<String, ActivityError> {
        *self.calls.entry(filename.clone()).or_insert(0) += 1;
        if let Some(mut script) = self.failures.get_mut(&filename) {
            if script.0 > 0 {
                script.0 -= 1;
                return Err(ActivityError::new(script.1, format!("ocr failed for {filename}")));
            }
        }
        Ok(format!("Texte de {filename}"))
    }
}

#[derive(Default)]
pub struct ScriptedNer {
    failures_left: AtomicU32,
    failure_kind: Option<ErrorKind>,
    pub calls: AtomicU32,
}

impl ScriptedNer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls with `kind`.
    pub fn fail_next(times: u32, kind: ErrorKind) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            failure_kind: Some(kind),
            calls: AtomicU32::new(0),
        }
    }
}

impl NerClient for ScriptedNer {
    async fn recognize(&self, text: String) -> Result<Vec<Entity>, ActivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failure_kind {
            let consumed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if consumed {
                return Err(ActivityError::new(kind, "ner failed"));
            }
        }
        Ok(text
            .split(' ')
            .next()
            .map(|word| Entity {
                span_text: word.to_string(),
                entity_label: "first_word".to_string(),
            })
            .into_iter()
            .collect())
    }
}
