use async_trait::async_trait;
use leptess::LepTess;
use mjpeg_ocr_common::config::OcrConfig;
use tracing::{debug, info, warn};

use super::{OcrEngine, OcrError};

/// In-process libtesseract handle, created once and reused for every frame.
/// The native handle is released when the engine is dropped.
pub struct LeptessEngine {
    api: Option<LepTess>,
    frames: u64,
}

impl LeptessEngine {
    pub fn open(config: &OcrConfig) -> Result<Self, OcrError> {
        let api = LepTess::new(config.data_path.as_deref(), &config.language)
            .map_err(|e| OcrError::Init(e.to_string()))?;
        if config.page_seg_mode.is_some() {
            warn!("ocr.page_seg_mode is ignored by the leptess backend");
        }
        info!(language = config.language, "libtesseract engine ready");
        Ok(Self {
            api: Some(api),
            frames: 0,
        })
    }
}

#[async_trait(?Send)]
impl OcrEngine for LeptessEngine {
    fn name(&self) -> &'static str {
        "leptess"
    }

    async fn recognize(&mut self, jpeg: &[u8]) -> Result<String, OcrError> {
        let api = self
            .api
            .as_mut()
            .ok_or_else(|| OcrError::Recognize("engine already closed".into()))?;
        api.set_image_from_mem(jpeg)
            .map_err(|e| OcrError::Recognize(e.to_string()))?;
        let text = api
            .get_utf8_text()
            .map_err(|e| OcrError::Recognize(e.to_string()))?;
        self.frames += 1;
        Ok(text.trim().to_string())
    }

    async fn close(&mut self) -> Result<(), OcrError> {
        if self.api.take().is_some() {
            debug!(frames = self.frames, "libtesseract engine closed");
        }
        Ok(())
    }
}
