//! Fake OCR and NER services for local development.
//!
//! Both speak the same wire contract as the real collaborators:
//! `POST /ocr` takes a multipart `image_file` and answers a JSON string,
//! `POST /ner?text=...` answers a JSON list of `{text, entity_name}`.

use axum::extract::{Multipart, Query};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

/// Router exposing both fake endpoints.
pub fn mock_router() -> Router {
    Router::new()
        .route("/ocr", post(fake_ocr))
        .route("/ner", post(fake_ner))
}

/// POST /ocr - Answers `Texte de {filename}` for the uploaded image.
async fn fake_ocr(mut multipart: Multipart) -> Result<Json<String>, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("image_file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let image = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        tracing::debug!(filename = %filename, bytes = image.len(), "fake ocr request");
        return Ok(Json(format!("Texte de {filename}")));
    }

    Err((
        StatusCode::UNPROCESSABLE_ENTITY,
        "missing multipart field 'image_file'".to_string(),
    ))
}

#[derive(Debug, Deserialize)]
struct NerQuery {
    text: String,
}

#[derive(Debug, Serialize)]
struct FakeEntity {
    text: String,
    entity_name: String,
}

/// POST /ner - Labels the first space-separated word as `first_word`.
async fn fake_ner(Query(query): Query<NerQuery>) -> Json<Vec<FakeEntity>> {
    let first = query.text.split(' ').next().unwrap_or_default().to_string();
    Json(vec![FakeEntity {
        text: first,
        entity_name: "first_word".to_string(),
    }])
}
