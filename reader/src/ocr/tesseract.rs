use std::process::Stdio;

use async_trait::async_trait;
use mjpeg_ocr_common::config::OcrConfig;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{OcrEngine, OcrError};

/// Runs the `tesseract` command-line program once per frame, piping the JPEG
/// through stdin and reading the text from stdout.
pub struct TesseractCli {
    command: String,
    args: Vec<String>,
    version: String,
    frames: u64,
}

impl TesseractCli {
    /// Probe the binary with `--version` so a missing install fails before
    /// the first frame arrives.
    pub async fn open(config: &OcrConfig) -> Result<Self, OcrError> {
        let output = Command::new(&config.command)
            .arg("--version")
            .output()
            .await
            .map_err(|e| OcrError::Unavailable {
                command: config.command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(OcrError::Unavailable {
                command: config.command.clone(),
                reason: format!("--version exited with {}", output.status),
            });
        }

        // Older releases print the banner on stderr.
        let banner = if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        let version = String::from_utf8_lossy(banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        info!(
            command = config.command,
            version,
            language = config.language,
            "tesseract engine ready"
        );

        Ok(Self {
            command: config.command.clone(),
            args: recognition_args(config),
            version,
            frames: 0,
        })
    }
}

fn recognition_args(config: &OcrConfig) -> Vec<String> {
    let mut args = vec![
        "stdin".to_string(),
        "stdout".to_string(),
        "-l".to_string(),
        config.language.clone(),
    ];
    if let Some(psm) = config.page_seg_mode {
        args.push("--psm".into());
        args.push(psm.to_string());
    }
    if let Some(dir) = &config.data_path {
        args.push("--tessdata-dir".into());
        args.push(dir.clone());
    }
    args
}

#[async_trait(?Send)]
impl OcrEngine for TesseractCli {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&mut self, jpeg: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Spawn("could not get stdin handle".into()))?;
        stdin
            .write_all(jpeg)
            .await
            .map_err(|e| OcrError::Io(e.to_string()))?;
        // Close stdin so tesseract knows the image is complete.
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OcrError::Io(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(stderr = %stderr, "tesseract exited with error");
            return Err(OcrError::EngineFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        self.frames += 1;
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(frames = self.frames, chars = text.len(), "tesseract finished");
        Ok(text)
    }

    async fn close(&mut self) -> Result<(), OcrError> {
        debug!(
            version = self.version,
            frames = self.frames,
            "tesseract engine closed"
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    const FAKE_TESSERACT: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "tesseract 5.3.0"
    exit 0
fi
cat > /dev/null
if [ "$4" = "fail" ]; then
    echo "Failed loading language 'fail'" >&2
    exit 1
fi
echo "  $*  "
"#;

    /// Written once per test binary so no test execs a file another test is
    /// still writing.
    fn fake_tesseract() -> PathBuf {
        static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
        let dir = DIR.get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("tesseract");
            std::fs::write(&path, FAKE_TESSERACT).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            dir
        });
        dir.path().join("tesseract")
    }

    fn config(language: &str) -> OcrConfig {
        OcrConfig {
            command: fake_tesseract().display().to_string(),
            language: language.into(),
            ..OcrConfig::default()
        }
    }

    #[test]
    fn args_include_optional_flags() {
        let config = OcrConfig {
            language: "eng+deu".into(),
            page_seg_mode: Some(6),
            data_path: Some("/usr/share/tessdata".into()),
            ..OcrConfig::default()
        };
        assert_eq!(
            recognition_args(&config),
            vec!["stdin", "stdout", "-l", "eng+deu", "--psm", "6", "--tessdata-dir", "/usr/share/tessdata"]
        );
    }

    #[tokio::test]
    async fn open_reads_version() {
        let engine = TesseractCli::open(&config("eng")).await.unwrap();
        assert_eq!(engine.version, "tesseract 5.3.0");
        assert_eq!(engine.name(), "tesseract");
    }

    #[tokio::test]
    async fn recognize_returns_trimmed_stdout() {
        let mut engine = TesseractCli::open(&config("eng")).await.unwrap();
        let text = engine.recognize(&[0xFF, 0xD8, 0xFF, 0xD9]).await.unwrap();
        assert_eq!(text, "stdin stdout -l eng");
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_engine_failure() {
        let mut engine = TesseractCli::open(&config("fail")).await.unwrap();
        match engine.recognize(b"jpeg").await {
            Err(OcrError::EngineFailed { stderr, .. }) => {
                assert!(stderr.contains("Failed loading language"));
            }
            other => panic!("expected engine failure, got {other:?}"),
        }
    }
}
