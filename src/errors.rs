//! Errors that end a recognition run.
//!
//! Everything here is scoped to a single run. None of it should take down the
//! process, and each variant renders as one line suitable for showing a user.

use thiserror::Error;

/// An error from the redaction pipeline.
#[derive(Debug, Error)]
pub enum RedactError {
    /// The OCR worker never said it was ready.
    #[error("OCR worker is unavailable: {0}")]
    BridgeUnavailable(String),

    /// Someone tried to start a second OCR request while one was in flight.
    #[error("OCR worker is already processing a request")]
    BridgeBusy,

    /// The OCR worker answered with `ok: false`.
    #[error("OCR failed: {0}")]
    BridgeRequestFailed(String),

    /// A message from the OCR worker could not be understood.
    #[error("OCR worker sent a malformed message: {0}")]
    BridgeMalformedMessage(String),

    /// The OCR worker went away mid-conversation.
    #[error("OCR worker closed the connection")]
    BridgeClosed,

    /// A single classifier call failed. Recovered per word.
    #[error("entity classification failed: {0}")]
    ClassificationFailed(String),

    /// The source image could not be read.
    #[error("could not read image: {0}")]
    ImageReadFailed(String),

    /// The redacted composite could not be written.
    #[error("could not export redacted image: {0}")]
    ExportFailed(String),

    /// The session isn't in a state where this action makes sense.
    #[error("cannot {action} while session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl RedactError {
    /// Build a [`RedactError::BridgeMalformedMessage`] from any displayable
    /// error.
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::BridgeMalformedMessage(err.to_string())
    }
}
