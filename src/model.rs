//! Data model shared by the recognition, enrichment and overlay stages.
//!
//! Field names serialize in `camelCase`, because the same shapes travel over
//! the OCR bridge and show up in our JSON reports.

use std::str::FromStr;

use schemars::JsonSchema;

use crate::prelude::*;

/// The natural pixel size of a source image.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize,
)]
pub struct ImageDimensions {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl ImageDimensions {
    /// Create new dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Is either side zero? Such images can't be projected meaningfully.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The extent of one recognized word, in image-pixel coordinates.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    /// Create a new box, normalizing the corners so that `x1 >= x0` and
    /// `y1 >= y0`.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }
}

/// A single word, as produced by the OCR engine.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct OcrWord {
    /// The recognized text.
    pub text: String,

    /// Where the word is in the image.
    pub bbox: BoundingBox,

    /// Engine confidence between 0 and 100, if the engine reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A named entity found by the classifier inside one word's text.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMatch {
    /// The classifier's label, e.g. `EMAIL`.
    pub category: String,

    /// The span of text the classifier matched.
    pub matched_word: String,

    /// Confidence between 0.0 and 1.0.
    pub score: f64,

    /// Start of the match, in characters within the word's own text.
    pub start_offset: usize,

    /// End of the match, in characters within the word's own text.
    pub end_offset: usize,

    /// The classifier's token index, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_index: Option<usize>,
}

/// Did we manage to ask the classifier about a word?
#[derive(
    Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityCheck {
    /// Not checked yet, or the word had no text to check.
    #[default]
    Skipped,

    /// The classifier answered. `entities` holds its answer, which may be empty.
    Checked,

    /// The classifier call failed. `entities` is empty, but that does not mean
    /// the word is clean.
    Failed,
}

/// An [`OcrWord`] plus the entities the classifier found in it.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedWord {
    #[serde(flatten)]
    pub word: OcrWord,

    /// Entities in classifier response order.
    #[serde(default)]
    pub entities: Vec<EntityMatch>,

    /// Whether `entities` reflects a real classifier answer.
    #[serde(default)]
    pub entity_check: EntityCheck,
}

impl From<OcrWord> for EnrichedWord {
    fn from(word: OcrWord) -> Self {
        Self {
            word,
            entities: vec![],
            entity_check: EntityCheck::Skipped,
        }
    }
}

/// The output of one recognition run.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    /// The full recognized text, trimmed.
    pub text: String,

    /// The natural size of the image the boxes refer to.
    pub image_size: ImageDimensions,

    /// Words in recognition order.
    pub words: Vec<EnrichedWord>,
}

impl OcrResult {
    /// Build an un-enriched result from raw OCR output.
    pub fn from_ocr(
        text: &str,
        image_size: ImageDimensions,
        words: Vec<OcrWord>,
    ) -> Self {
        Self {
            text: text.trim().to_owned(),
            image_size,
            words: words.into_iter().map(EnrichedWord::from).collect(),
        }
    }
}

/// An overlay rectangle in display (container) pixel coordinates.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ProjectedRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// The size of the display area an image is shown in.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ContainerSize {
    pub width: f64,
    pub height: f64,
}

impl ContainerSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl From<ImageDimensions> for ContainerSize {
    fn from(dims: ImageDimensions) -> Self {
        Self::new(f64::from(dims.width), f64::from(dims.height))
    }
}

/// Parses `WIDTHxHEIGHT`, like `300x280`.
impl FromStr for ContainerSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, found {:?}", s))?;
        let parse = |dim: &str| -> Result<f64> {
            let value = dim
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid container dimension {:?}", dim))?;
            if !(value.is_finite() && value > 0.0) {
                return Err(anyhow!("container dimensions must be positive, found {}", value));
            }
            Ok(value)
        };
        Ok(Self::new(parse(width)?, parse(height)?))
    }
}
