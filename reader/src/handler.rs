use async_trait::async_trait;
use mjpeg_ocr_common::frame::{DecodedFrame, FrameError};
use tracing::info;

use crate::extract::FrameHandler;
use crate::ocr::{OcrEngine, OcrError};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Encode(#[from] FrameError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

/// Re-encodes each frame to JPEG, runs it through the OCR engine and logs
/// the recognized text.
pub struct OcrFrameHandler {
    engine: Box<dyn OcrEngine>,
    jpeg_quality: u8,
    recognized: u64,
}

impl OcrFrameHandler {
    pub fn new(engine: Box<dyn OcrEngine>, jpeg_quality: u8) -> Self {
        Self {
            engine,
            jpeg_quality,
            recognized: 0,
        }
    }

    /// Release the engine. Returns the number of frames recognized.
    pub async fn close(mut self) -> Result<u64, OcrError> {
        self.engine.close().await?;
        info!(
            engine = self.engine.name(),
            frames = self.recognized,
            "OCR engine released"
        );
        Ok(self.recognized)
    }
}

#[async_trait(?Send)]
impl FrameHandler for OcrFrameHandler {
    type Error = HandlerError;

    async fn handle(&mut self, frame: &DecodedFrame) -> Result<(), HandlerError> {
        let jpeg = frame.encode_jpeg(self.jpeg_quality)?;
        let text = self.engine.recognize(&jpeg).await?;
        self.recognized += 1;

        // Frames with no text are logged too, with an empty `text`.
        info!(
            seq = frame.seq,
            width = frame.width(),
            height = frame.height(),
            received_at = %frame.received_at(),
            text = %text,
            "text recognized"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extract::tests::jpeg;
    use crate::extract::{extract_frames, ExtractError};
    use crate::mjpeg::tests::{body_of, chunked};
    use crate::mjpeg::MultipartReader;
    use mjpeg_ocr_common::config::DecodeErrorPolicy;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub(crate) struct EngineLog {
        /// Width of every image submitted, in order.
        pub(crate) submitted: Vec<u32>,
        pub(crate) closed: bool,
    }

    struct ScriptedEngine {
        log: Rc<RefCell<EngineLog>>,
        replies: Vec<Result<String, OcrError>>,
    }

    #[async_trait(?Send)]
    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn recognize(&mut self, jpeg: &[u8]) -> Result<String, OcrError> {
            let frame = DecodedFrame::decode_jpeg(jpeg, 0, 0)
                .map_err(|e| OcrError::Recognize(e.to_string()))?;
            self.log.borrow_mut().submitted.push(frame.width());
            if self.replies.is_empty() {
                Ok(String::new())
            } else {
                self.replies.remove(0)
            }
        }

        async fn close(&mut self) -> Result<(), OcrError> {
            self.log.borrow_mut().closed = true;
            Ok(())
        }
    }

    /// Engine that answers with `replies` in order, then empty text.
    pub(crate) fn scripted_engine(
        replies: Vec<Result<String, OcrError>>,
    ) -> (Box<dyn OcrEngine>, Rc<RefCell<EngineLog>>) {
        let log = Rc::new(RefCell::new(EngineLog::default()));
        let engine = ScriptedEngine {
            log: Rc::clone(&log),
            replies,
        };
        (Box::new(engine), log)
    }

    fn handler(replies: Vec<Result<String, OcrError>>) -> (OcrFrameHandler, Rc<RefCell<EngineLog>>) {
        let (engine, log) = scripted_engine(replies);
        (OcrFrameHandler::new(engine, 75), log)
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn two_frames_are_submitted_in_order() {
        let (first, second) = (jpeg(16), jpeg(24));
        let data = body_of(&[first.as_slice(), second.as_slice()], false);
        let mut reader = MultipartReader::new(chunked(data, 256), "frame");
        let (mut handler, log) = handler(vec![Ok("HELLO".into()), Ok("WORLD".into())]);

        let summary = extract_frames(&mut reader, &mut handler, DecodeErrorPolicy::Abort)
            .await
            .unwrap();
        assert_eq!(summary.frames_handled, 2);
        assert_eq!(handler.close().await.unwrap(), 2);

        let log = log.borrow();
        assert_eq!(log.submitted, vec![16, 24]);
        assert!(log.closed);
    }

    #[tokio::test]
    async fn engine_error_aborts_extraction() {
        let frames = [jpeg(16), jpeg(24), jpeg(32)];
        let refs: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
        let mut reader = MultipartReader::new(chunked(body_of(&refs, true), 512), "frame");
        let (mut handler, log) = handler(vec![
            Ok("ok".into()),
            Err(OcrError::Recognize("engine crashed".into())),
        ]);

        let err = extract_frames(&mut reader, &mut handler, DecodeErrorPolicy::Abort)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Handler { seq: 1, .. }));
        assert_eq!(log.borrow().submitted, vec![16, 24]);

        handler.close().await.unwrap();
        assert!(log.borrow().closed);
    }

    #[tokio::test]
    async fn empty_text_still_counts_as_recognized() {
        let (mut handler, log) = handler(Vec::new());
        let frame = DecodedFrame::decode_jpeg(&jpeg(12), 0, 0).unwrap();
        handler.handle(&frame).await.unwrap();
        assert_eq!(log.borrow().submitted, vec![12]);
        assert_eq!(handler.close().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_text_is_logged_at_info() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (mut handler, _log) = handler(Vec::new());
        let frame = DecodedFrame::decode_jpeg(&jpeg(12), 4, 0).unwrap();
        handler.handle(&frame).await.unwrap();

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("text recognized"), "log was: {output}");
        assert!(output.contains("seq=4"), "log was: {output}");
    }
}
