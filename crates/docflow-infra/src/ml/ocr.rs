//! OCR service client.
//!
//! `POST {base_url}/ocr` with the image as multipart field `image_file`. The
//! service answers with the recognized text as a JSON string.

use docflow_core::workflow::activity::OcrClient;
use docflow_types::error::ActivityError;
use reqwest::multipart::{Form, Part};

use super::{check_status, transport_error};

const SERVICE: &str = "ocr";

/// HTTP implementation of [`OcrClient`].
#[derive(Debug, Clone)]
pub struct HttpOcrClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcrClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl OcrClient for HttpOcrClient {
    async fn recognize(&self, image: Vec<u8>, filename: String) -> Result<String, ActivityError> {
        let form = Form::new().part("image_file", Part::bytes(image).file_name(filename));

        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        check_status(SERVICE, response)
            .await?
            .json::<String>()
            .await
            .map_err(|e| ActivityError::upstream(format!("invalid ocr response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_server;
    use axum::Router;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum::routing::post;
    use docflow_types::error::ErrorKind;

    #[tokio::test]
    async fn sends_multipart_image_and_reads_json_text() {
        let router = Router::new().route(
            "/ocr",
            post(|body: Bytes| async move {
                let body = String::from_utf8_lossy(&body).to_string();
                assert!(body.contains("name=\"image_file\""));
                assert!(body.contains("filename=\"image_0_2\""));
                axum::Json("Texte de image_0_2".to_string())
            }),
        );
        let base_url = test_server::spawn(router).await;
        let client = HttpOcrClient::new(reqwest::Client::new(), format!("{base_url}/"));

        let text = client
            .recognize(vec![0x89, 0x50, 0x4e, 0x47], "image_0_2".to_string())
            .await
            .unwrap();
        assert_eq!(text, "Texte de image_0_2");
    }

    #[tokio::test]
    async fn server_errors_are_retryable_and_client_errors_are_not() {
        let router = Router::new()
            .route("/ocr", post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }));
        let base_url = test_server::spawn(router).await;
        let err = HttpOcrClient::new(reqwest::Client::new(), base_url)
            .recognize(vec![1], "image_0_1".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamService);

        let router = Router::new()
            .route("/ocr", post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "bad image") }));
        let base_url = test_server::spawn(router).await;
        let err = HttpOcrClient::new(reqwest::Client::new(), base_url)
            .recognize(vec![1], "image_0_1".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        // Nothing listens on the discard port.
        let client = HttpOcrClient::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let err = client.recognize(vec![1], "image_0_1".to_string()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientIo);
    }
}
