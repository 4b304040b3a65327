//! Worker side of the OCR bridge.
//!
//! A worker announces that it's ready, then answers requests one at a time
//! until the host hangs up. It keeps no state between requests.

use std::sync::Arc;

use base64::{Engine as _, prelude::BASE64_STANDARD};

use crate::prelude::*;

use super::{
    protocol::{HostRequest, OcrResponse, WorkerMessage},
    transport::LineTransport,
};

/// Interface to an OCR engine that turns image bytes into word boxes.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize all the words in an encoded image.
    async fn recognize(&self, image: &[u8]) -> Result<OcrResponse>;
}

/// Run the worker loop over `transport` until the host disconnects.
#[instrument(level = "debug", skip_all)]
pub async fn serve(
    mut transport: impl LineTransport,
    engine: Arc<dyn OcrEngine>,
) -> Result<()> {
    transport
        .send_line(&WorkerMessage::Ready.to_line()?)
        .await
        .context("cannot send readiness handshake")?;

    while let Some(line) = transport.recv_line().await? {
        // The host may send a bare newline to finish a request it was
        // interrupted while sending. Blank lines get no reply.
        if line.trim().is_empty() {
            continue;
        }
        let reply = match handle_request(&line, engine.as_ref()).await {
            Ok(response) => WorkerMessage::Success(response),
            Err(err) => {
                warn!("OCR request failed: {:#}", err);
                WorkerMessage::Failure {
                    error: format!("{err:#}"),
                }
            }
        };
        transport
            .send_line(&reply.to_line()?)
            .await
            .context("cannot send OCR reply")?;
    }
    debug!("Host disconnected, OCR worker exiting");
    Ok(())
}

/// Decode and answer one request line.
async fn handle_request(line: &str, engine: &dyn OcrEngine) -> Result<OcrResponse> {
    let HostRequest::Ocr { image_base64 } = HostRequest::parse(line)?;
    let image = BASE64_STANDARD
        .decode(image_base64.trim())
        .context("image payload is not valid Base64")?;
    let mut response = engine.recognize(&image).await?;
    response.text = response.text.trim().to_owned();
    Ok(response)
}
