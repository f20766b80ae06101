//! PDF text and embedded image extraction via pdfium.
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is
//! CPU-bound and not async-aware, so all pdfium work runs inside
//! `spawn_blocking`. Bytes are checked for the `%PDF` header first so that
//! non-PDF input fails fast with a parse error rather than a pdfium crash.

use std::io::Cursor;
use std::path::PathBuf;

use docflow_core::workflow::activity::{ExtractedDocument, PdfExtractor};
use docflow_types::error::ActivityError;
use pdfium_render::prelude::*;

const PDF_MAGIC: &[u8] = b"%PDF";

/// [`PdfExtractor`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    /// Directory holding the platform pdfium library. `None` binds to the
    /// system library search path.
    library_dir: Option<PathBuf>,
}

impl PdfiumExtractor {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    /// Bind the library once, for processes that poll the extraction queue.
    pub fn check_binding(&self) -> Result<(), ActivityError> {
        self.bind().map(|_| ())
    }

    /// A missing library does not fix itself between attempts.
    fn bind(&self) -> Result<Pdfium, ActivityError> {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ActivityError::validation(format!("failed to bind to pdfium: {e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    fn extract_blocking(&self, pdf: Vec<u8>) -> Result<ExtractedDocument, ActivityError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_vec(pdf, None)
            .map_err(|e| ActivityError::parse(format!("corrupt PDF: {e:?}")))?;

        let mut text_parts = Vec::new();
        let mut images = Vec::new();

        for (page_index, page) in document.pages().iter().enumerate() {
            // A page without a text layer contributes an empty line.
            text_parts.push(page.text().map(|text| text.all()).unwrap_or_default());

            let raw_images = page.objects().iter().filter_map(|object| {
                object
                    .as_image_object()
                    .map(|image| image.get_raw_image().map_err(|e| format!("{e:?}")))
            });
            images.extend(encode_page_images(page_index + 1, raw_images)?);
        }

        tracing::debug!(
            pages = text_parts.len(),
            images = images.len(),
            "PDF extracted"
        );

        Ok(ExtractedDocument {
            text: text_parts.join("\n"),
            images,
        })
    }
}

/// Re-encode every image of one page as PNG. An image that cannot be read
/// fails the whole document: dropping it would shrink the fan-out.
fn encode_page_images<E: std::fmt::Display>(
    page_number: usize,
    raw_images: impl IntoIterator<Item = Result<image::DynamicImage, E>>,
) -> Result<Vec<Vec<u8>>, ActivityError> {
    raw_images
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let image = raw.map_err(|e| {
                ActivityError::parse(format!(
                    "unreadable image {} on page {page_number}: {e}",
                    index + 1
                ))
            })?;
            let mut encoded = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)
                .map_err(|e| {
                    ActivityError::parse(format!(
                        "re-encode image {} on page {page_number}: {e}",
                        index + 1
                    ))
                })?;
            Ok(encoded)
        })
        .collect()
}

impl PdfExtractor for PdfiumExtractor {
    async fn extract(&self, pdf: Vec<u8>) -> Result<ExtractedDocument, ActivityError> {
        if !pdf.starts_with(PDF_MAGIC) {
            return Err(ActivityError::parse("input is not a PDF document"));
        }

        let extractor = self.clone();
        tokio::task::spawn_blocking(move || extractor.extract_blocking(pdf))
            .await
            .map_err(|e| ActivityError::transient_io(format!("extraction task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_types::error::ErrorKind;

    #[tokio::test]
    async fn non_pdf_input_is_parse_error() {
        let extractor = PdfiumExtractor::new(None);
        let err = extractor
            .extract(b"\x89PNG\r\n\x1a\n".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(!err.is_retryable());
    }

    #[test]
    fn page_images_are_encoded_as_png() {
        let pixel = image::DynamicImage::new_rgb8(2, 2);
        let raw: Vec<Result<_, String>> = vec![Ok(pixel.clone()), Ok(pixel)];
        let encoded = encode_page_images(1, raw).unwrap();
        assert_eq!(encoded.len(), 2);
        assert!(encoded[0].starts_with(b"\x89PNG"));
    }

    #[test]
    fn unreadable_image_fails_the_document() {
        let pixel = image::DynamicImage::new_rgb8(2, 2);
        let err = encode_page_images(3, vec![Ok(pixel), Err("bad stream")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.message.contains("image 2 on page 3"), "{}", err.message);
    }

    #[test]
    fn missing_library_is_not_retryable() {
        let extractor = PdfiumExtractor::new(Some(PathBuf::from("/nonexistent/pdfium")));
        let err = extractor.check_binding().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn empty_input_is_parse_error() {
        let err = PdfiumExtractor::default().extract(Vec::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }
}
