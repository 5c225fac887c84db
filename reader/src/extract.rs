use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::Stream;
use mjpeg_ocr_common::config::DecodeErrorPolicy;
use mjpeg_ocr_common::frame::{DecodedFrame, FrameError};
use tracing::{debug, info, warn};

use crate::mjpeg::{MultipartReader, StreamError};

/// Receives every decoded frame, in arrival order.
#[async_trait(?Send)]
pub trait FrameHandler {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&mut self, frame: &DecodedFrame) -> Result<(), Self::Error>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub parts_read: u64,
    pub frames_handled: u64,
    pub frames_skipped: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("stream failed after {frames_handled} frames: {source}")]
    Stream {
        frames_handled: u64,
        #[source]
        source: StreamError,
    },
    #[error(transparent)]
    Decode(FrameError),
    #[error("frame handler failed on frame {seq}: {source}")]
    Handler {
        seq: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Pull parts until the stream closes, decoding each as JPEG and passing it
/// to `handler`.
///
/// Returns the summary on a clean end of stream. A read error, a handler
/// error, or (under [`DecodeErrorPolicy::Abort`]) a decode error stops the
/// loop at once; no further parts are read.
pub async fn extract_frames<S, E, H>(
    reader: &mut MultipartReader<S>,
    handler: &mut H,
    policy: DecodeErrorPolicy,
) -> Result<ExtractSummary, ExtractError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    H: FrameHandler,
{
    let mut summary = ExtractSummary::default();

    loop {
        let part = match reader.next_part().await {
            Ok(Some(part)) => part,
            Ok(None) => {
                info!(
                    parts = summary.parts_read,
                    handled = summary.frames_handled,
                    skipped = summary.frames_skipped,
                    "stream closed"
                );
                return Ok(summary);
            }
            Err(source) => {
                return Err(ExtractError::Stream {
                    frames_handled: summary.frames_handled,
                    source,
                })
            }
        };

        summary.parts_read = reader.parts_read();
        let seq = summary.parts_read - 1;

        if let Some(content_type) = part.header("content-type") {
            if !content_type.eq_ignore_ascii_case("image/jpeg") {
                debug!(seq, content_type, "part is not labelled image/jpeg, decoding anyway");
            }
        }

        let received_at_ms = Utc::now().timestamp_millis();
        let frame = match DecodedFrame::decode_jpeg(part.body(), seq, received_at_ms) {
            Ok(frame) => frame,
            Err(e) if policy == DecodeErrorPolicy::Skip => {
                warn!(error = %e, seq, bytes = part.body().len(), "skipping undecodable frame");
                summary.frames_skipped += 1;
                continue;
            }
            Err(e) => return Err(ExtractError::Decode(e)),
        };

        debug!(
            seq,
            width = frame.width(),
            height = frame.height(),
            bytes = frame.source_len,
            "frame decoded"
        );

        handler
            .handle(&frame)
            .await
            .map_err(|e| ExtractError::Handler {
                seq,
                source: Box::new(e),
            })?;
        summary.frames_handled += 1;
    }
}
