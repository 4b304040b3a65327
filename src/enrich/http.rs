//! Client for an HTTP named-entity recognition endpoint.
//!
//! The endpoint takes `POST {"text": "..."}` and answers with
//! `{"embedding": [{"entity", "score", "index", "word", "start", "end"}, ...]}`,
//! which is the shape a Hugging Face token-classification pipeline produces.

use std::time::Duration;

use crate::{model::EntityMatch, prelude::*};

use super::EntityClassifier;

/// Request body.
#[derive(Debug, Serialize)]
struct NerRequest<'a> {
    text: &'a str,
}

/// Response body.
#[derive(Debug, Deserialize)]
struct NerResponse {
    embedding: Vec<NerEntity>,
}

/// One entity as reported by the endpoint.
#[derive(Debug, Deserialize)]
struct NerEntity {
    entity: String,
    score: f64,
    #[serde(default)]
    index: Option<usize>,
    word: String,
    start: usize,
    end: usize,
}

/// Token-classification models without aggregation tag each token with its
/// position in the entity, like `B-EMAIL` or `I-TELEPHONENUM`. We only want
/// the category.
fn strip_position_tag(label: &str) -> &str {
    match label.split_once('-') {
        Some((tag, category))
            if matches!(tag, "B" | "I" | "E" | "S" | "L" | "U") && !category.is_empty() =>
        {
            category
        }
        _ => label,
    }
}

impl From<NerEntity> for EntityMatch {
    fn from(entity: NerEntity) -> Self {
        Self {
            category: strip_position_tag(&entity.entity).to_owned(),
            matched_word: entity.word,
            // Model scores occasionally drift a hair outside [0, 1].
            score: if entity.score.is_nan() {
                0.0
            } else {
                entity.score.clamp(0.0, 1.0)
            },
            start_offset: entity.start,
            end_offset: entity.end,
            token_index: entity.index,
        }
    }
}

/// Classifies text by calling a remote NER endpoint.
#[derive(Clone, Debug)]
pub struct HttpEntityClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpEntityClassifier {
    /// Create a client for the endpoint at `url`.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("cannot build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EntityClassifier for HttpEntityClassifier {
    #[instrument(level = "trace", skip_all, fields(url = %self.url))]
    async fn classify(&self, text: &str) -> Result<Vec<EntityMatch>> {
        let response = self
            .client
            .post(&self.url)
            .json(&NerRequest { text })
            .send()
            .await
            .context("NER request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "NER endpoint returned status {}: {}",
                status,
                body.trim()
            ));
        }
        let response = response
            .json::<NerResponse>()
            .await
            .context("failed to parse NER response")?;
        Ok(response
            .embedding
            .into_iter()
            .map(EntityMatch::from)
            .collect())
    }
}
