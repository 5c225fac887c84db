use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

/// A camera frame decoded from one multipart part.
///
/// Lives for exactly one extractor iteration: it is decoded, handed to the
/// frame handler and dropped.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    image: DynamicImage,
    /// Position of the source part in the stream, starting at 0.
    pub seq: u64,
    /// Wall-clock arrival time (Unix millis).
    pub received_at_ms: i64,
    /// Size of the JPEG the frame was decoded from.
    pub source_len: usize,
}

impl DecodedFrame {
    /// Decode `jpeg_data` strictly as JPEG; other image formats are rejected.
    pub fn decode_jpeg(jpeg_data: &[u8], seq: u64, received_at_ms: i64) -> Result<Self, FrameError> {
        if jpeg_data.is_empty() {
            return Err(FrameError::Empty { seq });
        }
        let image = image::load_from_memory_with_format(jpeg_data, ImageFormat::Jpeg)
            .map_err(|source| FrameError::Decode { seq, source })?;
        Ok(Self {
            image,
            seq,
            received_at_ms,
            source_len: jpeg_data.len(),
        })
    }

    pub fn from_image(image: DynamicImage, seq: u64, received_at_ms: i64) -> Self {
        Self {
            image,
            seq,
            received_at_ms,
            source_len: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Re-encode the raster as baseline JPEG. `quality` is clamped to 1..=100.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let rgb = self.image.to_rgb8();
        let mut out = Vec::with_capacity(self.source_len.max(16 * 1024));
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|source| FrameError::Encode {
                seq: self.seq,
                source,
            })?;
        Ok(out)
    }

    /// Arrival time formatted for log lines.
    pub fn received_at(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.received_at_ms)
            .unwrap_or_else(chrono::Utc::now)
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame {seq}: part body is empty")]
    Empty { seq: u64 },
    #[error("frame {seq}: JPEG decode failed: {source}")]
    Decode {
        seq: u64,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {seq}: JPEG encode failed: {source}")]
    Encode {
        seq: u64,
        #[source]
        source: image::ImageError,
    },
}
