//! NER service client.
//!
//! `POST {base_url}/ner?text=...`; the service answers with a JSON list of
//! `{ "text": ..., "entity_name": ... }` objects.

use docflow_core::workflow::activity::NerClient;
use docflow_types::error::ActivityError;
use docflow_types::workflow::Entity;
use serde::Deserialize;

use super::{check_status, transport_error};

const SERVICE: &str = "ner";

/// Wire shape of one entity returned by the service.
#[derive(Debug, Deserialize)]
struct NerEntity {
    text: String,
    entity_name: String,
}

impl From<NerEntity> for Entity {
    fn from(e: NerEntity) -> Self {
        Entity {
            span_text: e.text,
            entity_label: e.entity_name,
        }
    }
}

/// HTTP implementation of [`NerClient`].
#[derive(Debug, Clone)]
pub struct HttpNerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNerClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl NerClient for HttpNerClient {
    async fn recognize(&self, text: String) -> Result<Vec<Entity>, ActivityError> {
        let response = self
            .client
            .post(format!("{}/ner", self.base_url))
            .query(&[("text", text.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let entities: Vec<NerEntity> = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ActivityError::upstream(format!("invalid ner response: {e}")))?;

        Ok(entities.into_iter().map(Entity::from).collect())
    }
}
