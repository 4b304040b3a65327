//! Host side of the OCR bridge.
//!
//! The OCR engine runs in an isolated worker that we can only reach by
//! passing messages (see [`protocol`]). [`OcrBridge`] turns that into a typed
//! async call:
//!
//! 1. [`OcrBridge::connect`] waits for the worker's readiness handshake. We
//!    never send a request before we've seen it.
//! 2. [`OcrBridge::recognize`] sends one image and waits for the answer. Only
//!    one request may be in flight; a second caller gets
//!    [`RedactError::BridgeBusy`] instead of queueing.
//!
//! If a caller gives up on a request (timeout, or the future is dropped
//! because the user picked another image), the worker will still answer it
//! eventually. We remember that, and throw the late answer away before
//! sending the next request, so answers can never be matched to the wrong
//! image.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, time};

use crate::{errors::RedactError, prelude::*};

use self::{
    protocol::{HostRequest, OcrResponse, WorkerMessage},
    transport::LineTransport,
};

pub mod protocol;
pub mod tesseract;
pub mod transport;
pub mod worker;

/// Timeouts for talking to the worker.
#[derive(Clone, Copy, Debug)]
pub struct BridgeTimeouts {
    /// How long to wait for the readiness handshake.
    pub ready: Duration,

    /// How long to wait for an answer to one request.
    pub request: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            ready: Duration::from_secs(30),
            request: Duration::from_secs(120),
        }
    }
}

/// What the worker still owes us from a request we gave up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outstanding {
    /// Nothing. The next line we read answers the next request.
    Nothing,

    /// A request was sent but its answer was never read.
    Answer,

    /// We were dropped while sending, so part of a line may be on the wire
    /// without its newline.
    PartialLine,
}

/// The connection state guarded by our busy lock.
struct Connection {
    transport: Box<dyn LineTransport>,
    outstanding: Outstanding,
}

/// A connected OCR worker.
#[derive(Clone)]
pub struct OcrBridge {
    connection: Arc<Mutex<Connection>>,
    timeouts: BridgeTimeouts,
}

impl OcrBridge {
    /// Wait for the worker on `transport` to announce it is ready.
    #[instrument(level = "debug", skip_all)]
    pub async fn connect(
        mut transport: Box<dyn LineTransport>,
        timeouts: BridgeTimeouts,
    ) -> Result<Self, RedactError> {
        let handshake = time::timeout(timeouts.ready, transport.recv_line())
            .await
            .map_err(|_| {
                RedactError::BridgeUnavailable(format!(
                    "no readiness handshake within {:?}",
                    timeouts.ready
                ))
            })?
            .map_err(|err| RedactError::BridgeUnavailable(format!("{err:#}")))?;

        match handshake {
            None => Err(RedactError::BridgeUnavailable(
                "worker exited before it was ready".to_owned(),
            )),
            Some(line) => match WorkerMessage::parse(&line)? {
                WorkerMessage::Ready => {
                    debug!("OCR worker is ready");
                    Ok(Self {
                        connection: Arc::new(Mutex::new(Connection {
                            transport,
                            outstanding: Outstanding::Nothing,
                        })),
                        timeouts,
                    })
                }
                other => Err(RedactError::BridgeUnavailable(format!(
                    "expected readiness handshake, got {other:?}"
                ))),
            },
        }
    }

    /// Is a request currently in flight?
    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.connection.try_lock().is_err()
    }

    /// Recognize the text in one complete image.
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    pub async fn recognize(&self, image: &[u8]) -> Result<OcrResponse, RedactError> {
        let mut conn = self
            .connection
            .try_lock()
            .map_err(|_| RedactError::BridgeBusy)?;

        if conn.outstanding == Outstanding::PartialLine {
            // Finish the fragment. The worker ignores blank lines, so this is
            // harmless if the whole request did go out.
            debug!("Terminating a partially sent OCR request");
            conn.transport
                .send_line("")
                .await
                .map_err(|err| RedactError::BridgeUnavailable(format!("{err:#}")))?;
            conn.outstanding = Outstanding::Answer;
        }
        if conn.outstanding == Outstanding::Answer {
            debug!("Discarding answer to an abandoned OCR request");
            let stale = time::timeout(self.timeouts.request, read_answer(&mut *conn)).await;
            match stale {
                Ok(Ok(_)) | Ok(Err(RedactError::BridgeRequestFailed(_))) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(RedactError::BridgeUnavailable(
                        "worker is still stuck on an earlier request".to_owned(),
                    ));
                }
            }
        }

        let line = HostRequest::ocr(image)
            .to_line()
            .map_err(|err| RedactError::BridgeUnavailable(format!("{err:#}")))?;
        conn.outstanding = Outstanding::PartialLine;
        conn.transport
            .send_line(&line)
            .await
            .map_err(|err| RedactError::BridgeUnavailable(format!("{err:#}")))?;
        conn.outstanding = Outstanding::Answer;

        time::timeout(self.timeouts.request, read_answer(&mut *conn))
            .await
            .map_err(|_| {
                RedactError::BridgeUnavailable(format!(
                    "no answer within {:?}",
                    self.timeouts.request
                ))
            })?
    }
}

/// Read the answer to the outstanding request.
async fn read_answer(conn: &mut Connection) -> Result<OcrResponse, RedactError> {
    loop {
        let line = conn
            .transport
            .recv_line()
            .await
            .map_err(|err| RedactError::BridgeUnavailable(format!("{err:#}")))?
            .ok_or(RedactError::BridgeClosed)?;
        let msg = WorkerMessage::parse(&line);
        // Once we've read a whole line, the request is answered, even if we
        // can't understand the answer.
        conn.outstanding = Outstanding::Nothing;
        match msg? {
            WorkerMessage::Ready => {
                warn!("OCR worker repeated its readiness handshake");
                conn.outstanding = Outstanding::Answer;
            }
            WorkerMessage::Success(response) => return Ok(response),
            WorkerMessage::Failure { error } => {
                return Err(RedactError::BridgeRequestFailed(error));
            }
        }
    }
}
