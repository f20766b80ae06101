//! Activity contracts and the pipeline's activity implementations.
//!
//! An activity is one externally-effecting call made on behalf of a step:
//! split a PDF, recognize the text in an image, or tag entities in a text.
//! Each one reads its inputs from the object store and writes its outputs
//! under keys derived from `(run_id, step)`, so invoking it twice for the
//! same step overwrites rather than duplicates.

use std::sync::Arc;

use docflow_types::error::ActivityError;
use docflow_types::workflow::{ActivityInput, ActivityOutput, BlobRef, Entity, StepId};
use uuid::Uuid;

use crate::storage::ObjectStore;

// ---------------------------------------------------------------------------
// Blob keys
// ---------------------------------------------------------------------------

/// Key of the full document text written by extraction.
pub fn extracted_text_key(run_id: Uuid) -> BlobRef {
    BlobRef(format!("runs/{run_id}/extract/text"))
}

/// Key of embedded image `index` out of `total`.
pub fn extracted_image_key(run_id: Uuid, index: usize, total: usize) -> BlobRef {
    BlobRef(format!("runs/{run_id}/extract/image_{index}_{total}"))
}

/// Key of the text recognized in image `index`.
pub fn ocr_text_key(run_id: Uuid, index: u32) -> BlobRef {
    BlobRef(format!("runs/{run_id}/ocr/{index}/text"))
}

/// Content-addressed key of an uploaded input document.
pub fn input_document_key(sha256_hex: &str) -> BlobRef {
    BlobRef(format!("inputs/{sha256_hex}.pdf"))
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Text and embedded images of one PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Page texts joined with `\n`.
    pub text: String,
    /// Encoded image bytes, in page order.
    pub images: Vec<Vec<u8>>,
}

/// Splits PDF bytes into text and images.
pub trait PdfExtractor: Send + Sync + 'static {
    /// Fails with `ErrorKind::Parse` on corrupt or non-PDF input.
    fn extract(
        &self,
        pdf: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<ExtractedDocument, ActivityError>> + Send;
}

/// Client for the OCR service.
pub trait OcrClient: Send + Sync + 'static {
    fn recognize(
        &self,
        image: Vec<u8>,
        filename: String,
    ) -> impl std::future::Future<Output = Result<String, ActivityError>> + Send;
}

/// Client for the NER service.
pub trait NerClient: Send + Sync + 'static {
    /// Entities in `text`, in the order the service returned them.
    fn recognize(
        &self,
        text: String,
    ) -> impl std::future::Future<Output = Result<Vec<Entity>, ActivityError>> + Send;
}

// ---------------------------------------------------------------------------
// Executor contract
// ---------------------------------------------------------------------------

/// Identity of the attempt an activity runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityContext {
    pub run_id: Uuid,
    pub step_id: StepId,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Executes activity payloads. Implementations must be idempotent per step.
pub trait ActivityExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        ctx: &ActivityContext,
        input: &ActivityInput,
    ) -> impl std::future::Future<Output = Result<ActivityOutput, ActivityError>> + Send;
}

// ---------------------------------------------------------------------------
// PipelineActivities
// ---------------------------------------------------------------------------

/// The Extract, OCR and NER activities wired to their collaborators.
///
/// Every collaborator is injected once at process bootstrap.
pub struct PipelineActivities<O, P, C, N> {
    store: Arc<O>,
    pub(crate) pdf: P,
    pub(crate) ocr: C,
    pub(crate) ner: N,
}

impl<O, P, C, N> PipelineActivities<O, P, C, N>
where
    O: ObjectStore,
    P: PdfExtractor,
    C: OcrClient,
    N: NerClient,
{
    pub fn new(store: Arc<O>, pdf: P, ocr: C, ner: N) -> Self {
        Self {
            store,
            pdf,
            ocr,
            ner,
        }
    }

    pub fn store(&self) -> &Arc<O> {
        &self.store
    }

    async fn extract(
        &self,
        ctx: &ActivityContext,
        blob_ref: &BlobRef,
    ) -> Result<ActivityOutput, ActivityError> {
        let pdf = self.store.get(blob_ref).await?;
        let document = self.pdf.extract(pdf).await?;

        let text_ref = extracted_text_key(ctx.run_id);
        self.store.put(&text_ref, document.text.into_bytes()).await?;

        let total = document.images.len();
        let mut image_refs = Vec::with_capacity(total);
        for (index, image) in document.images.into_iter().enumerate() {
            let key = extracted_image_key(ctx.run_id, index, total);
            self.store.put(&key, image).await?;
            image_refs.push(key);
        }

        tracing::debug!(
            run_id = %ctx.run_id,
            images = total,
            "extracted document"
        );

        Ok(ActivityOutput::Extracted {
            text_ref,
            image_refs,
        })
    }

    async fn ocr(
        &self,
        ctx: &ActivityContext,
        image_ref: &BlobRef,
    ) -> Result<ActivityOutput, ActivityError> {
        let index = ctx.step_id.index.ok_or_else(|| {
            ActivityError::validation(format!("OCR step '{}' has no image index", ctx.step_id))
        })?;
        let image = self.store.get(image_ref).await?;
        let filename = image_ref
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or(image_ref.as_str())
            .to_string();

        let text = self.ocr.recognize(image, filename).await?;

        let text_ref = ocr_text_key(ctx.run_id, index);
        self.store.put(&text_ref, text.into_bytes()).await?;
        Ok(ActivityOutput::Recognized { text_ref })
    }

    async fn ner(&self, text_ref: &BlobRef) -> Result<ActivityOutput, ActivityError> {
        let bytes = self.store.get(text_ref).await?;
        let text = String::from_utf8(bytes).map_err(|e| {
            ActivityError::validation(format!("text blob '{text_ref}' is not UTF-8: {e}"))
        })?;
        let entities = self.ner.recognize(text).await?;
        Ok(ActivityOutput::Entities { entities })
    }
}

impl<O, P, C, N> ActivityExecutor for PipelineActivities<O, P, C, N>
where
    O: ObjectStore,
    P: PdfExtractor,
    C: OcrClient,
    N: NerClient,
{
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: &ActivityInput,
    ) -> Result<ActivityOutput, ActivityError> {
        match input {
            ActivityInput::Extract { blob_ref } => self.extract(ctx, blob_ref).await,
            ActivityInput::Ocr { image_ref } => self.ocr(ctx, image_ref).await,
            ActivityInput::Ner { text_ref } => self.ner(text_ref).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
