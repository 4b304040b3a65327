//! Attaching named-entity classifications to recognized words.
//!
//! We ask the classifier about one word at a time, strictly in recognition
//! order, and wait for each answer before asking about the next word. A
//! failure for one word is logged and recorded on that word, but never fails
//! the run.

use std::{sync::Arc, time::Duration};

use schemars::JsonSchema;
use tokio::time;

use crate::{
    errors::RedactError,
    model::{EntityCheck, EntityMatch, OcrResult},
    prelude::*,
    session::RunTicket,
};

pub mod http;

/// Interface to a named-entity classifier.
#[async_trait]
pub trait EntityClassifier: Send + Sync + 'static {
    /// Classify a single piece of text. Entities are returned in the
    /// classifier's own order.
    async fn classify(&self, text: &str) -> Result<Vec<EntityMatch>>;
}

/// How enrichment went, for logs and reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema, Serialize)]
pub struct EnrichmentSummary {
    /// Words the classifier answered for.
    pub checked: usize,

    /// Words whose classifier call failed.
    pub failed: usize,

    /// Words with no text, which we never sent.
    pub skipped: usize,
}

/// Drives per-word classification for one [`OcrResult`].
#[derive(Clone)]
pub struct EnrichmentCoordinator {
    classifier: Arc<dyn EntityClassifier>,

    /// Per-call timeout. A call that takes longer counts as failed.
    timeout: Option<Duration>,
}

impl EnrichmentCoordinator {
    /// Create a new coordinator.
    pub fn new(classifier: Arc<dyn EntityClassifier>, timeout: Option<Duration>) -> Self {
        Self {
            classifier,
            timeout,
        }
    }

    /// Classify every word in `result`.
    ///
    /// Returns `None` if `ticket` goes stale partway through. In that case
    /// the partial result belongs to a run nobody cares about anymore, and no
    /// further classifier calls are made.
    #[instrument(level = "debug", skip_all, fields(run = ticket.id(), words = result.words.len()))]
    pub async fn enrich(
        &self,
        mut result: OcrResult,
        ticket: &RunTicket,
    ) -> Option<(OcrResult, EnrichmentSummary)> {
        let mut summary = EnrichmentSummary::default();
        for (idx, word) in result.words.iter_mut().enumerate() {
            if !ticket.is_current() {
                debug!(word = idx, "Run superseded, abandoning enrichment");
                return None;
            }

            if word.word.text.trim().is_empty() {
                word.entities.clear();
                word.entity_check = EntityCheck::Skipped;
                summary.skipped += 1;
                continue;
            }

            match self.classify_one(&word.word.text).await {
                Ok(entities) => {
                    trace!(word = idx, entities = entities.len(), "Classified word");
                    word.entities = entities;
                    word.entity_check = EntityCheck::Checked;
                    summary.checked += 1;
                }
                Err(err) => {
                    warn!(word = idx, "{}", err);
                    word.entities.clear();
                    word.entity_check = EntityCheck::Failed;
                    summary.failed += 1;
                }
            }
        }

        // The last call may have finished after the run was replaced.
        if !ticket.is_current() {
            debug!("Run superseded during final classification");
            return None;
        }
        debug!(?summary, "Enrichment finished");
        Some((result, summary))
    }

    /// Classify one word, applying our timeout and sanity checks.
    async fn classify_one(&self, text: &str) -> Result<Vec<EntityMatch>, RedactError> {
        let call = self.classifier.classify(text);
        let entities = match self.timeout {
            Some(timeout) => time::timeout(timeout, call).await.map_err(|_| {
                RedactError::ClassificationFailed(format!("timed out after {timeout:?}"))
            })?,
            None => call.await,
        }
        .map_err(|err| RedactError::ClassificationFailed(format!("{err:#}")))?;

        if let Some(bad) = entities.iter().find(|e| !(0.0..=1.0).contains(&e.score)) {
            return Err(RedactError::ClassificationFailed(format!(
                "score {} for {:?} is outside [0, 1]",
                bad.score, bad.category
            )));
        }
        Ok(entities)
    }
}
