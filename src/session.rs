//! Redaction session state.
//!
//! A session holds the current image, the current enriched OCR result, and
//! whether the user is looking at the original or the redacted version. It is
//! a small state machine:
//!
//! ```text
//! Empty ─select─▶ ImageSelected ─trigger─▶ Recognizing ─ocr ok─▶ Enriching ─done─▶ Ready
//!                       ▲                       │                    │              │
//!                       └──── Error ◀───────────┴──── failure ───────┘              │
//!                       ▲                                                           │
//!                       └──────────────────────── select ───────────────────────────┘
//! ```
//!
//! Every recognition run gets a [`RunTicket`]. Selecting a new image or
//! starting a new run bumps the session's [`Generation`], which makes older
//! tickets stale. Results presented with a stale ticket are dropped.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use schemars::JsonSchema;

use crate::{
    errors::RedactError,
    geometry::project_box,
    imaging::{ExportSnapshot, SourceImage},
    model::{ContainerSize, EnrichedWord, OcrResult, ProjectedRect},
    prelude::*,
    sensitivity::SensitivityPolicy,
};

/// A shared run counter. Cloning shares the counter.
#[derive(Clone, Debug, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    /// Start a new run, making all existing tickets stale.
    pub fn next_ticket(&self) -> RunTicket {
        let id = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        RunTicket {
            id,
            generation: self.clone(),
        }
    }

    /// Make all existing tickets stale without starting a run.
    pub fn invalidate(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identifies one recognition run.
#[derive(Clone, Debug)]
pub struct RunTicket {
    id: u64,
    generation: Generation,
}

impl RunTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Is this still the latest run?
    pub fn is_current(&self) -> bool {
        self.generation.current() == self.id
    }
}

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    ImageSelected,
    Recognizing,
    Enriching,
    Ready,
    /// The last run failed. Behaves like `ImageSelected`, but remembers why.
    Error,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Empty => "empty",
            SessionState::ImageSelected => "image selected",
            SessionState::Recognizing => "recognizing",
            SessionState::Enriching => "enriching",
            SessionState::Ready => "ready",
            SessionState::Error => "in error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State for redacting one image at a time.
#[derive(Debug)]
pub struct RedactionSession {
    generation: Generation,
    state: SessionState,
    image: Option<Arc<SourceImage>>,
    result: Option<Arc<OcrResult>>,
    show_original: bool,
    last_error: Option<String>,
    policy: SensitivityPolicy,
    padding: f64,
}

impl RedactionSession {
    /// Create an empty session.
    pub fn new(policy: SensitivityPolicy, padding: f64) -> Self {
        Self {
            generation: Generation::default(),
            state: SessionState::Empty,
            image: None,
            result: None,
            show_original: false,
            last_error: None,
            policy,
            padding,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn image(&self) -> Option<&Arc<SourceImage>> {
        self.image.as_ref()
    }

    /// The enriched result of the last completed run, if we're `Ready`.
    pub fn result(&self) -> Option<&Arc<OcrResult>> {
        self.result.as_ref()
    }

    /// Why the last run failed, if we're in `Error`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn show_original(&self) -> bool {
        self.show_original
    }

    fn invalid(&self, action: &'static str) -> RedactError {
        RedactError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    /// Switch to a new image. Always allowed, even mid-run: any run in
    /// progress becomes stale and its results will be discarded.
    #[instrument(level = "debug", skip_all, fields(image = %image.name))]
    pub fn select_image(&mut self, image: SourceImage) {
        self.generation.invalidate();
        self.state = SessionState::ImageSelected;
        self.image = Some(Arc::new(image));
        self.result = None;
        self.show_original = false;
        self.last_error = None;
    }

    /// Start a recognition run for the current image.
    ///
    /// Runs can't overlap, so this fails while one is in progress.
    pub fn begin_recognition(
        &mut self,
    ) -> Result<(RunTicket, Arc<SourceImage>), RedactError> {
        match self.state {
            SessionState::ImageSelected | SessionState::Error | SessionState::Ready => {}
            _ => return Err(self.invalid("start recognition")),
        }
        let image = self
            .image
            .clone()
            .ok_or_else(|| self.invalid("start recognition"))?;
        let ticket = self.generation.next_ticket();
        debug!(run = ticket.id(), "Starting recognition run");
        self.state = SessionState::Recognizing;
        self.result = None;
        self.show_original = false;
        self.last_error = None;
        Ok((ticket, image))
    }

    /// Is this ticket for the latest run? Logs if not.
    fn accepts(&self, ticket: &RunTicket) -> bool {
        if ticket.is_current() {
            true
        } else {
            debug!(
                run = ticket.id(),
                current = self.generation.current(),
                "Discarding result from stale run"
            );
            false
        }
    }

    /// OCR finished. Returns `false` if the run is stale.
    pub fn recognition_succeeded(&mut self, ticket: &RunTicket) -> Result<bool, RedactError> {
        if !self.accepts(ticket) {
            return Ok(false);
        }
        if self.state != SessionState::Recognizing {
            return Err(self.invalid("finish recognition"));
        }
        self.state = SessionState::Enriching;
        Ok(true)
    }

    /// Enrichment finished. Returns `false` if the run is stale.
    pub fn enrichment_finished(
        &mut self,
        ticket: &RunTicket,
        result: OcrResult,
    ) -> Result<bool, RedactError> {
        if !self.accepts(ticket) {
            return Ok(false);
        }
        if self.state != SessionState::Enriching {
            return Err(self.invalid("finish enrichment"));
        }
        self.result = Some(Arc::new(result));
        self.state = SessionState::Ready;
        Ok(true)
    }

    /// The run failed. Returns `false` if the run is stale, in which case the
    /// failure is none of our business.
    pub fn run_failed(&mut self, ticket: &RunTicket, err: &RedactError) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        warn!(run = ticket.id(), "Recognition run failed: {}", err);
        self.state = SessionState::Error;
        self.result = None;
        self.last_error = Some(err.to_string());
        true
    }

    /// Flip between showing the original and the redacted image. Returns the
    /// new value of [`RedactionSession::show_original`].
    pub fn toggle_visibility(&mut self) -> Result<bool, RedactError> {
        if self.state != SessionState::Ready {
            return Err(self.invalid("toggle visibility"));
        }
        self.show_original = !self.show_original;
        Ok(self.show_original)
    }

    /// Sensitive words in the current result, in word order.
    pub fn sensitive_words(&self) -> impl Iterator<Item = (usize, &EnrichedWord)> {
        let words = self
            .result
            .as_deref()
            .map(|r| r.words.as_slice())
            .unwrap_or_default();
        self.policy
            .sensitive_indices(words)
            .map(move |idx| (idx, &words[idx]))
    }

    /// Overlay rectangles for a container of the given size. Empty unless
    /// we're `Ready` and showing the redacted version.
    pub fn overlay_rects(&self, container: ContainerSize) -> Vec<ProjectedRect> {
        if self.state != SessionState::Ready || self.show_original {
            return vec![];
        }
        let Some(result) = self.result.as_deref() else {
            return vec![];
        };
        self.sensitive_words()
            .map(|(_, word)| {
                project_box(&word.word.bbox, result.image_size, container, self.padding)
            })
            .collect()
    }

    /// Capture what's needed to export the redacted image.
    ///
    /// Boxes are projected onto the image's own pixel grid, so the padding is
    /// in image pixels here.
    pub fn export_snapshot(&self) -> Result<ExportSnapshot, RedactError> {
        if self.state != SessionState::Ready {
            return Err(self.invalid("export"));
        }
        let (Some(image), Some(result)) = (self.image.clone(), self.result.as_deref())
        else {
            return Err(self.invalid("export"));
        };
        let container = ContainerSize::from(image.dimensions);
        let rects = self
            .sensitive_words()
            .map(|(_, word)| {
                project_box(&word.word.bbox, result.image_size, container, self.padding)
            })
            .collect();
        Ok(ExportSnapshot { image, rects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enrich::tests::ocr_result,
        model::{EntityCheck, EntityMatch, ImageDimensions},
    };

    fn image(name: &str) -> SourceImage {
        SourceImage {
            name: name.to_owned(),
            bytes: Arc::from(name.as_bytes()),
            dimensions: ImageDimensions::new(100, 10),
        }
    }

    fn enriched_with_email() -> OcrResult {
        let mut result = ocr_result(&["hi", "bob@example.com"]);
        result.words[1].entities.push(EntityMatch {
            category: "EMAIL".to_owned(),
            matched_word: "bob@example.com".to_owned(),
            score: 0.9,
            start_offset: 0,
            end_offset: 15,
            token_index: None,
        });
        result.words[1].entity_check = EntityCheck::Checked;
        result
    }

    fn session() -> RedactionSession {
        RedactionSession::new(SensitivityPolicy::default(), 2.0)
    }

    fn ready_session() -> RedactionSession {
        let mut session = session();
        session.select_image(image("a"));
        let (ticket, _) = session.begin_recognition().unwrap();
        assert!(session.recognition_succeeded(&ticket).unwrap());
        assert!(session.enrichment_finished(&ticket, enriched_with_email()).unwrap());
        session
    }

    #[test]
    fn happy_path_reaches_ready() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.begin_recognition().is_err());

        session.select_image(image("a"));
        assert_eq!(session.state(), SessionState::ImageSelected);

        let (ticket, img) = session.begin_recognition().unwrap();
        assert_eq!(img.name, "a");
        assert_eq!(session.state(), SessionState::Recognizing);
        assert!(session.begin_recognition().is_err());

        assert!(session.recognition_succeeded(&ticket).unwrap());
        assert_eq!(session.state(), SessionState::Enriching);

        assert!(session.enrichment_finished(&ticket, enriched_with_email()).unwrap());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.sensitive_words().count(), 1);
    }

    #[test]
    fn visibility_toggle_only_in_ready() {
        let mut session = session();
        assert!(session.toggle_visibility().is_err());

        let mut session = ready_session();
        let container = ContainerSize::new(100.0, 10.0);
        assert_eq!(session.overlay_rects(container).len(), 1);

        assert!(session.toggle_visibility().unwrap());
        assert!(session.overlay_rects(container).is_empty());
        assert!(session.result().is_some());

        assert!(!session.toggle_visibility().unwrap());
        assert_eq!(session.overlay_rects(container).len(), 1);
    }

    #[test]
    fn overlay_rects_follow_container_size() {
        let session = ready_session();
        let small = session.overlay_rects(ContainerSize::new(100.0, 10.0));
        let large = session.overlay_rects(ContainerSize::new(200.0, 20.0));
        assert_eq!(small[0].left, 8.0);
        assert_eq!(large[0].left, 18.0);
        assert_eq!(large[0].width, 20.0);
    }

    #[test]
    fn selecting_image_discards_result() {
        let mut session = ready_session();
        session.select_image(image("b"));
        assert_eq!(session.state(), SessionState::ImageSelected);
        assert!(session.result().is_none());
        assert_eq!(session.sensitive_words().count(), 0);
    }

    #[test]
    fn stale_results_are_ignored() {
        let mut session = session();
        session.select_image(image("a"));
        let (old, _) = session.begin_recognition().unwrap();
        assert!(session.recognition_succeeded(&old).unwrap());

        // The user picks another image mid-enrichment.
        session.select_image(image("b"));
        assert!(!session.enrichment_finished(&old, enriched_with_email()).unwrap());
        assert_eq!(session.state(), SessionState::ImageSelected);
        assert!(session.result().is_none());
        assert_eq!(session.image().unwrap().name, "b");

        assert!(!session.run_failed(&old, &RedactError::BridgeClosed));
        assert_eq!(session.state(), SessionState::ImageSelected);
    }

    #[test]
    fn failure_moves_to_error_and_allows_retry() {
        let mut session = session();
        session.select_image(image("a"));
        let (ticket, _) = session.begin_recognition().unwrap();
        assert!(session.run_failed(
            &ticket,
            &RedactError::BridgeRequestFailed("no text engine".to_owned())
        ));
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.last_error(), Some("OCR failed: no text engine"));

        let (retry, _) = session.begin_recognition().unwrap();
        assert!(retry.is_current());
        assert!(!ticket.is_current());
        assert!(session.last_error().is_none());

        // Picking an image also leaves the error state.
        assert!(session.run_failed(&retry, &RedactError::BridgeClosed));
        session.select_image(image("b"));
        assert_eq!(session.state(), SessionState::ImageSelected);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn export_needs_ready_state() {
        let mut session = session();
        session.select_image(image("a"));
        assert!(session.export_snapshot().is_err());

        let session = ready_session();
        let snapshot = session.export_snapshot().unwrap();
        assert_eq!(snapshot.rects.len(), 1);
        // Exporting doesn't change anything.
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.export_snapshot().is_ok());
    }
}
