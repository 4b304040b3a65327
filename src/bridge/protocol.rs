//! JSON messages exchanged with the OCR worker.
//!
//! Each message is a single JSON object on its own line. The host sends
//! [`HostRequest`]s; the worker answers with [`WorkerMessage`]s. The exact
//! wire shapes are:
//!
//! ```text
//! worker -> host  {"ok":true,"ready":true}
//! host -> worker  {"cmd":"ocr","imageBase64":"..."}
//! worker -> host  {"ok":true,"text":"...","boxes":[...],"imageSize":{"width":W,"height":H}}
//! worker -> host  {"ok":false,"error":"..."}
//! ```

use base64::{Engine as _, prelude::BASE64_STANDARD};
use schemars::JsonSchema;

use crate::{
    errors::RedactError,
    model::{ImageDimensions, OcrWord},
    prelude::*,
};

/// A request from the host to the worker.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HostRequest {
    /// Recognize all the text in one complete image.
    #[serde(rename_all = "camelCase")]
    Ocr {
        /// The full image, Base64-encoded.
        image_base64: String,
    },
}

impl HostRequest {
    /// Build an OCR request for raw image bytes.
    pub fn ocr(image: &[u8]) -> Self {
        Self::Ocr {
            image_base64: BASE64_STANDARD.encode(image),
        }
    }

    /// Parse a request line.
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("malformed OCR request")
    }

    /// Serialize as a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize OCR request")
    }
}

/// A successful recognition response.
#[derive(Clone, Debug, PartialEq)]
pub struct OcrResponse {
    pub text: String,
    pub boxes: Vec<OcrWord>,
    pub image_size: ImageDimensions,
}

/// A message from the worker to the host.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerMessage {
    /// Sent exactly once, before the worker accepts requests.
    Ready,

    /// A request succeeded.
    Success(OcrResponse),

    /// A request failed. The message is meant for humans.
    Failure { error: String },
}

impl WorkerMessage {
    /// Parse a message line. Anything we don't understand is a
    /// [`RedactError::BridgeMalformedMessage`].
    pub fn parse(line: &str) -> Result<Self, RedactError> {
        let wire = serde_json::from_str::<WorkerMessageWire>(line)
            .map_err(RedactError::malformed)?;
        Self::try_from(wire)
    }

    /// Serialize as a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(&WorkerMessageWire::from(self.clone()))
            .context("failed to serialize worker message")
    }
}

/// The flat JSON shape shared by every worker message. `ok` plus the set of
/// fields present tells us which kind of message it is.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMessageWire {
    /// Did the worker succeed?
    pub ok: bool,

    /// Present and `true` only on the readiness handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// Full recognized text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// One entry per recognized word.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boxes: Option<Vec<OcrWord>>,

    /// Natural size of the recognized image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<ImageDimensions>,

    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TryFrom<WorkerMessageWire> for WorkerMessage {
    type Error = RedactError;

    fn try_from(wire: WorkerMessageWire) -> Result<Self, Self::Error> {
        match wire {
            WorkerMessageWire {
                ok: true,
                ready: Some(true),
                ..
            } => Ok(WorkerMessage::Ready),
            WorkerMessageWire {
                ok: true,
                text: Some(text),
                boxes: Some(boxes),
                image_size: Some(image_size),
                ..
            } => Ok(WorkerMessage::Success(OcrResponse {
                text,
                boxes,
                image_size,
            })),
            WorkerMessageWire {
                ok: false,
                error: Some(error),
                ..
            } => Ok(WorkerMessage::Failure { error }),
            WorkerMessageWire { ok: true, .. } => Err(RedactError::malformed(
                "success message is missing text, boxes or imageSize",
            )),
            WorkerMessageWire { ok: false, .. } => Err(RedactError::malformed(
                "failure message is missing error",
            )),
        }
    }
}

impl From<WorkerMessage> for WorkerMessageWire {
    fn from(msg: WorkerMessage) -> Self {
        match msg {
            WorkerMessage::Ready => Self {
                ok: true,
                ready: Some(true),
                ..Default::default()
            },
            WorkerMessage::Success(OcrResponse {
                text,
                boxes,
                image_size,
            }) => Self {
                ok: true,
                text: Some(text),
                boxes: Some(boxes),
                image_size: Some(image_size),
                ..Default::default()
            },
            WorkerMessage::Failure { error } => Self {
                ok: false,
                error: Some(error),
                ..Default::default()
            },
        }
    }
}
