mod cli;
mod extract;
mod handler;
mod media_type;
mod mjpeg;
mod ocr;

use std::time::Duration;

use bytes::Bytes;
use cli::Cli;
use extract::{ExtractError, ExtractSummary};
use futures_util::Stream;
use handler::OcrFrameHandler;
use mjpeg::MultipartReader;
use mjpeg_ocr_common::config::Config;
use ocr::OcrEngine;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("invalid stream url {0:?}: {1}")]
    InvalidUrl(String, String),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("no response headers within {0:?}")]
    HttpTimeout(Duration),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    MediaType(#[from] media_type::MediaTypeError),
    #[error(transparent)]
    Ocr(#[from] ocr::OcrError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse_args();
    let config_path = cli.config.clone();

    let config = match cli.into_config() {
        Ok(c) => c,
        Err(e) => {
            match config_path {
                Some(path) => eprintln!("Failed to load config from {}: {e}", path.display()),
                None => eprintln!("Failed to load config: {e}"),
            }
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    info!(
        url = config.stream.url,
        backend = ?config.ocr.backend,
        language = config.ocr.language,
        on_decode_error = ?config.extract.on_decode_error,
        "starting mjpeg-ocr"
    );

    match run(&config).await {
        Ok(summary) => {
            info!(
                parts = summary.parts_read,
                frames = summary.frames_handled,
                skipped = summary.frames_skipped,
                "stream ended"
            );
        }
        Err(e) => {
            error!(error = %e, "stopping");
            std::process::exit(1);
        }
    }
}

/// Connect, resolve the boundary, open the OCR engine and run frames through
/// it until the stream ends.
async fn run(config: &Config) -> Result<ExtractSummary, ReaderError> {
    let response = mjpeg::open_stream(&config.stream).await?;
    let mut reader = mjpeg::multipart_reader(response, &config.stream)?;
    let engine = ocr::open(&config.ocr).await?;
    process(&mut reader, engine, config).await
}

/// Feed every frame to `engine`. The engine is closed whatever the outcome.
async fn process<S, E>(
    reader: &mut MultipartReader<S>,
    engine: Box<dyn OcrEngine>,
    config: &Config,
) -> Result<ExtractSummary, ReaderError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut handler = OcrFrameHandler::new(engine, config.ocr.jpeg_quality);
    let result =
        extract::extract_frames(reader, &mut handler, config.extract.on_decode_error).await;

    if let Err(e) = handler.close().await {
        warn!(error = %e, "failed to release OCR engine");
    }

    Ok(result?)
}
