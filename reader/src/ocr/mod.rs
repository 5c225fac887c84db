//! Text recognition backends.
//!
//! An engine is opened once before the first frame, fed JPEG bytes for every
//! frame, and closed once after the stream ends or fails.

#[cfg(feature = "leptess")]
mod libtesseract;
mod tesseract;

use async_trait::async_trait;
use mjpeg_ocr_common::config::{OcrBackend, OcrConfig};

#[async_trait(?Send)]
pub trait OcrEngine {
    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    /// Recognize the text in one JPEG image.
    async fn recognize(&mut self, jpeg: &[u8]) -> Result<String, OcrError>;

    /// Release the engine. Called exactly once, on every exit path.
    async fn close(&mut self) -> Result<(), OcrError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR engine {command} is unavailable: {reason}")]
    Unavailable { command: String, reason: String },
    #[error("failed to spawn OCR engine: {0}")]
    Spawn(String),
    #[error("OCR engine I/O failed: {0}")]
    Io(String),
    #[error("OCR engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },
    #[error("failed to initialize OCR engine: {0}")]
    #[cfg_attr(not(feature = "leptess"), allow(dead_code))]
    Init(String),
    #[error("OCR recognition failed: {0}")]
    #[cfg_attr(not(feature = "leptess"), allow(dead_code))]
    Recognize(String),
    #[error("OCR backend {0} is not compiled in; rebuild with --features {0}")]
    BackendNotCompiled(&'static str),
}

/// Open the configured backend.
pub async fn open(config: &OcrConfig) -> Result<Box<dyn OcrEngine>, OcrError> {
    match config.backend {
        OcrBackend::Tesseract => Ok(Box::new(tesseract::TesseractCli::open(config).await?)),
        #[cfg(feature = "leptess")]
        OcrBackend::Leptess => Ok(Box::new(libtesseract::LeptessEngine::open(config)?)),
        #[cfg(not(feature = "leptess"))]
        OcrBackend::Leptess => Err(OcrError::BackendNotCompiled("leptess")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "leptess"))]
    #[tokio::test]
    async fn leptess_requires_feature() {
        let config = OcrConfig {
            backend: OcrBackend::Leptess,
            ..OcrConfig::default()
        };
        assert!(matches!(
            open(&config).await,
            Err(OcrError::BackendNotCompiled("leptess"))
        ));
    }

    #[tokio::test]
    async fn missing_tesseract_binary_is_unavailable() {
        let config = OcrConfig {
            command: "/nonexistent/bin/tesseract".into(),
            ..OcrConfig::default()
        };
        assert!(matches!(
            open(&config).await,
            Err(OcrError::Unavailable { .. })
        ));
    }
}
