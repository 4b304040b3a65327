//! One recognition run, from image to enriched result.
//!
//! The session lives behind a [`Mutex`] that we only ever hold for an instant
//! to read or update state. We never hold it across an `.await`, so the
//! user can select a new image while OCR or classification is stalled.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    bridge::OcrBridge,
    enrich::{EnrichmentCoordinator, EnrichmentSummary},
    errors::RedactError,
    model::OcrResult,
    prelude::*,
    session::RedactionSession,
};

/// A session shared between the UI and the pipeline.
pub type SharedSession = Arc<Mutex<RedactionSession>>;

/// Lock a shared session.
pub fn lock(session: &SharedSession) -> MutexGuard<'_, RedactionSession> {
    session.lock().expect("lock poisoned")
}

/// How a run ended, if it didn't fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The session is now `Ready` with our result.
    Ready(EnrichmentSummary),

    /// A newer run or image replaced ours. Nothing was written.
    Superseded,
}

/// OCR plus enrichment, wired to a session.
#[derive(Clone)]
pub struct RedactionPipeline {
    bridge: OcrBridge,
    coordinator: EnrichmentCoordinator,
}

impl RedactionPipeline {
    pub fn new(bridge: OcrBridge, coordinator: EnrichmentCoordinator) -> Self {
        Self {
            bridge,
            coordinator,
        }
    }

    /// Run recognition and enrichment for the session's current image.
    ///
    /// Failures put the session into `Error` and are returned. Failures of a
    /// run that has already been superseded are only logged.
    #[instrument(level = "debug", skip_all)]
    pub async fn run(&self, session: &SharedSession) -> Result<RunOutcome, RedactError> {
        let (ticket, image) = lock(session).begin_recognition()?;
        info!(run = ticket.id(), image = %image.name, "Recognizing text");

        let response = match self.bridge.recognize(&image.bytes).await {
            Ok(response) => response,
            Err(err) => {
                return if lock(session).run_failed(&ticket, &err) {
                    Err(err)
                } else {
                    Ok(RunOutcome::Superseded)
                };
            }
        };

        // Some engines can't tell us the size. We already know it.
        let image_size = if response.image_size.is_degenerate() {
            image.dimensions
        } else {
            response.image_size
        };
        let result = OcrResult::from_ocr(&response.text, image_size, response.boxes);
        info!(words = result.words.len(), "Classifying words");

        match lock(session).recognition_succeeded(&ticket) {
            Ok(true) => {}
            Ok(false) => return Ok(RunOutcome::Superseded),
            Err(err) => return Err(err),
        }

        let Some((result, summary)) = self.coordinator.enrich(result, &ticket).await else {
            return Ok(RunOutcome::Superseded);
        };
        if summary.failed > 0 {
            warn!(
                "{} of {} words could not be classified",
                summary.failed,
                result.words.len()
            );
        }

        if lock(session).enrichment_finished(&ticket, result)? {
            Ok(RunOutcome::Ready(summary))
        } else {
            Ok(RunOutcome::Superseded)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::{
        bridge::{
            BridgeTimeouts,
            protocol::WorkerMessage,
            transport::{ChannelTransport, LineTransport as _},
            worker::tests::{FakeEngine, spawn_in_process},
        },
        enrich::{EntityClassifier, tests::FakeClassifier},
        imaging::SourceImage,
        model::{ContainerSize, EntityCheck, EntityMatch, ImageDimensions},
        sensitivity::SensitivityPolicy,
        session::SessionState,
    };

    /// Fake images are just text; the fake engine reads them as words.
    fn image(text: &str) -> SourceImage {
        SourceImage {
            name: text.to_owned(),
            bytes: Arc::from(text.as_bytes()),
            dimensions: ImageDimensions::new(100, 10),
        }
    }

    fn new_session() -> SharedSession {
        Arc::new(Mutex::new(RedactionSession::new(
            SensitivityPolicy::default(),
            2.0,
        )))
    }

    async fn pipeline(classifier: Arc<dyn EntityClassifier>) -> RedactionPipeline {
        let (host, _worker) = spawn_in_process(Arc::new(FakeEngine));
        let bridge = OcrBridge::connect(Box::new(host), BridgeTimeouts::default())
            .await
            .unwrap();
        RedactionPipeline::new(bridge, EnrichmentCoordinator::new(classifier, None))
    }

    #[tokio::test]
    async fn run_reaches_ready_with_overlays() {
        let pipeline = pipeline(Arc::new(FakeClassifier::default())).await;
        let session = new_session();
        lock(&session).select_image(image("mail bob@example.com today"));

        let outcome = pipeline.run(&session).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Ready(s) if s.checked == 3));

        let session = lock(&session);
        assert_eq!(session.state(), SessionState::Ready);
        let result = session.result().unwrap();
        assert_eq!(result.text, "mail bob@example.com today");
        assert_eq!(result.image_size, ImageDimensions::new(30, 10));

        let rects = session.overlay_rects(ContainerSize::new(30.0, 10.0));
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].left, 8.0);
    }

    #[tokio::test]
    async fn one_classifier_failure_still_reaches_ready() {
        let classifier = Arc::new(FakeClassifier::failing_on(&["b@x.org"]));
        let pipeline = pipeline(classifier).await;
        let session = new_session();
        lock(&session).select_image(image("a@x.org b@x.org c@x.org"));

        let outcome = pipeline.run(&session).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Ready(s) if s.failed == 1));

        let session = lock(&session);
        assert_eq!(session.state(), SessionState::Ready);
        let words = &session.result().unwrap().words;
        assert_eq!(words[0].entities.len(), 1);
        assert!(words[1].entities.is_empty());
        assert_eq!(words[1].entity_check, EntityCheck::Failed);
        assert_eq!(words[2].entities.len(), 1);
        let sensitive = session.sensitive_words().map(|(i, _)| i).collect::<Vec<_>>();
        assert_eq!(sensitive, vec![0, 2]);
    }

    #[tokio::test]
    async fn bridge_failure_puts_session_in_error() {
        let pipeline = pipeline(Arc::new(FakeClassifier::default())).await;
        let session = new_session();
        lock(&session).select_image(image("corrupt"));

        let err = pipeline.run(&session).await.unwrap_err();
        assert!(matches!(err, RedactError::BridgeRequestFailed(_)));
        let guard = lock(&session);
        assert_eq!(guard.state(), SessionState::Error);
        assert!(guard.last_error().unwrap().contains("unsupported image format"));
        drop(guard);

        // The session can recover with a new image.
        lock(&session).select_image(image("fine"));
        assert!(pipeline.run(&session).await.is_ok());
    }

    #[tokio::test]
    async fn new_image_during_enrichment_wins() {
        /// Blocks on its first call until released.
        struct Gated {
            entered: Notify,
            release: Notify,
        }

        #[async_trait]
        impl EntityClassifier for Gated {
            async fn classify(&self, text: &str) -> Result<Vec<EntityMatch>> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(vec![EntityMatch {
                    category: "EMAIL".to_owned(),
                    matched_word: text.to_owned(),
                    score: 0.99,
                    start_offset: 0,
                    end_offset: text.len(),
                    token_index: None,
                }])
            }
        }

        let gated = Arc::new(Gated {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let pipeline = pipeline(gated.clone()).await;
        let session = new_session();
        lock(&session).select_image(image("old@example.com"));

        let user = async {
            gated.entered.notified().await;
            assert_eq!(lock(&session).state(), SessionState::Enriching);
            lock(&session).select_image(image("new"));
            gated.release.notify_one();
        };
        let (outcome, ()) = tokio::join!(pipeline.run(&session), user);

        assert_eq!(outcome.unwrap(), RunOutcome::Superseded);
        let guard = lock(&session);
        assert_eq!(guard.state(), SessionState::ImageSelected);
        assert_eq!(guard.image().unwrap().name, "new");
        assert!(guard.result().is_none());
    }

    #[tokio::test]
    async fn cannot_start_overlapping_runs() {
        let pipeline = pipeline(Arc::new(FakeClassifier::default())).await;
        let session = new_session();
        lock(&session).select_image(image("x"));
        let _ticket = lock(&session).begin_recognition().unwrap();
        let err = pipeline.run(&session).await.unwrap_err();
        assert!(matches!(err, RedactError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn stalled_bridge_does_not_block_image_selection() {
        let (host, mut worker) = ChannelTransport::pair();
        worker
            .send_line(&WorkerMessage::Ready.to_line().unwrap())
            .await
            .unwrap();
        let timeouts = BridgeTimeouts {
            ready: Duration::from_secs(1),
            request: Duration::from_millis(100),
        };
        let bridge = OcrBridge::connect(Box::new(host), timeouts).await.unwrap();
        let pipeline = RedactionPipeline::new(
            bridge,
            EnrichmentCoordinator::new(Arc::new(FakeClassifier::default()), None),
        );
        let session = new_session();
        lock(&session).select_image(image("first"));

        let user = async {
            // The worker reads the request but never answers.
            worker.recv_line().await.unwrap().unwrap();
            lock(&session).select_image(image("second"));
        };
        let (outcome, ()) = tokio::join!(pipeline.run(&session), user);

        // The timeout fires for a run nobody cares about anymore.
        assert_eq!(outcome.unwrap(), RunOutcome::Superseded);
        assert_eq!(lock(&session).state(), SessionState::ImageSelected);
    }
}
