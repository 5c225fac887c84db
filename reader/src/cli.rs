use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use mjpeg_ocr_common::config::{Config, ConfigError, DecodeErrorPolicy};

/// Long flags that may also be spelled with a single dash (`-url`).
const SINGLE_DASH_FLAGS: &[&str] = &["url", "username", "password", "config"];

#[derive(Parser, Debug)]
#[command(
    name = "mjpeg-ocr",
    version,
    about = "Read an MJPEG camera stream and log the text found in every frame"
)]
pub struct Cli {
    /// MJPEG stream URL
    #[arg(long, env = "MJPEG_OCR_URL")]
    pub url: Option<String>,

    /// HTTP Basic auth username (optional)
    #[arg(long, env = "MJPEG_OCR_USERNAME")]
    pub username: Option<String>,

    /// HTTP Basic auth password (optional)
    #[arg(long, env = "MJPEG_OCR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// TOML config file; command-line values take precedence
    #[arg(long, env = "MJPEG_OCR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Timeout for connecting and receiving response headers
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// OCR language, e.g. "eng" or "eng+deu"
    #[arg(long)]
    pub language: Option<String>,

    /// Log and drop frames that fail to decode instead of stopping
    #[arg(long)]
    pub skip_corrupt_frames: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Parse the process arguments, accepting `-url` style spellings.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    /// Load the config file (if any) and apply command-line overrides.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(url) = self.url {
            config.stream.url = url;
        }
        if let Some(username) = self.username {
            config.stream.username = username;
        }
        if let Some(password) = self.password {
            config.stream.password = password;
        }
        if let Some(secs) = self.timeout_secs {
            config.stream.connect_timeout_secs = secs;
        }
        if let Some(language) = self.language {
            config.ocr.language = language;
        }
        if self.skip_corrupt_frames {
            config.extract.on_decode_error = DecodeErrorPolicy::Skip;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        Ok(config)
    }
}

/// Rewrite `-url`, `-url=x` and friends to their `--` form.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            if i == 0 || passthrough {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                passthrough = true;
                return arg;
            }
            match text.strip_prefix('-') {
                Some(rest) if !rest.starts_with('-') => {
                    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
                    if SINGLE_DASH_FLAGS.contains(&name) {
                        OsString::from(format!("-{text}"))
                    } else {
                        arg
                    }
                }
                _ => arg,
            }
        })
        .collect()
}
