use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Bounds the TCP connect and the wait for response headers.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Bounds each wait for the next body chunk. Unbounded when absent.
    #[serde(default)]
    pub frame_timeout_secs: Option<u64>,
    #[serde(default = "default_max_part_bytes")]
    pub max_part_bytes: usize,
}

/// What the extractor does with a part that is not a decodable JPEG.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Stop the run with the decode error.
    #[default]
    Abort,
    /// Log the bad frame and keep reading.
    Skip,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractConfig {
    #[serde(default)]
    pub on_decode_error: DecodeErrorPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    /// The `tesseract` command-line program, spawned per frame.
    #[default]
    Tesseract,
    /// In-process libtesseract (requires the `leptess` cargo feature).
    Leptess,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub backend: OcrBackend,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub page_seg_mode: Option<u8>,
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            frame_timeout_secs: None,
            max_part_bytes: default_max_part_bytes(),
        }
    }
}

impl StreamConfig {
    /// Basic auth is only attached when both halves are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackend::default(),
            command: default_ocr_command(),
            language: default_language(),
            page_seg_mode: None,
            data_path: None,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks the values that can only be judged once file and command line are merged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if self.stream.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.connect_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.stream.frame_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "stream.frame_timeout_secs",
                reason: "must be greater than zero when set".into(),
            });
        }
        if self.stream.max_part_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.max_part_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if !(1..=100).contains(&self.ocr.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                field: "ocr.jpeg_quality",
                reason: format!("{} is outside 1..=100", self.ocr.jpeg_quality),
            });
        }
        if self.ocr.language.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ocr.language",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("no stream url given; set --url or stream.url")]
    MissingUrl,
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// Default value functions
fn default_connect_timeout() -> u64 {
    5
}
fn default_max_part_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_ocr_command() -> String {
    "tesseract".into()
}
fn default_language() -> String {
    "eng".into()
}
fn default_jpeg_quality() -> u8 {
    75
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.stream.connect_timeout_secs, 5);
        assert_eq!(config.stream.frame_timeout_secs, None);
        assert_eq!(config.extract.on_decode_error, DecodeErrorPolicy::Abort);
        assert_eq!(config.ocr.backend, OcrBackend::Tesseract);
        assert_eq!(config.ocr.language, "eng");
        assert_eq!(config.ocr.jpeg_quality, 75);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_all_sections() {
        let config = Config::from_toml(
            r#"
            [stream]
            url = "http://cam.local/stream"
            username = "admin"
            password = "secret"
            connect_timeout_secs = 10
            frame_timeout_secs = 30

            [extract]
            on_decode_error = "skip"

            [ocr]
            backend = "leptess"
            language = "deu"
            page_seg_mode = 6
            jpeg_quality = 90

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.url, "http://cam.local/stream");
        assert_eq!(config.stream.credentials(), Some(("admin", "secret")));
        assert_eq!(config.stream.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.stream.frame_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.extract.on_decode_error, DecodeErrorPolicy::Skip);
        assert_eq!(config.ocr.backend, OcrBackend::Leptess);
        assert_eq!(config.ocr.page_seg_mode, Some(6));
        assert_eq!(config.ocr.jpeg_quality, 90);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let err = Config::from_toml("[extract]\non_decode_error = \"retry\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn credentials_need_both_halves() {
        let mut stream = StreamConfig {
            username: "admin".into(),
            ..StreamConfig::default()
        };
        assert_eq!(stream.credentials(), None);
        stream.password = "secret".into();
        assert_eq!(stream.credentials(), Some(("admin", "secret")));
        stream.username.clear();
        assert_eq!(stream.credentials(), None);
    }

    #[test]
    fn validate_requires_url() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingUrl)));
    }

    #[test]
    fn validate_rejects_bad_quality() {
        let mut config = Config::default();
        config.stream.url = "http://cam.local/stream".into();
        config.ocr.jpeg_quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "ocr.jpeg_quality", .. })
        ));
        config.ocr.jpeg_quality = 75;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stream]\nurl = \"http://cam.local/stream\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.stream.url, "http://cam.local/stream");
    }

    #[test]
    fn load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/mjpeg-ocr.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
