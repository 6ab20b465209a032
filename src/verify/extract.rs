use std::path::Path;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::process::Command;

/// Opaque OCR collaborator: image path in, text out.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &Path) -> anyhow::Result<String>;
}

/// Shells out to the `tesseract` CLI, printing recognized text to stdout.
#[derive(Debug, Clone)]
pub struct TesseractExtractor {
    command: String,
}

impl TesseractExtractor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(&self, image: &Path) -> anyhow::Result<String> {
        // the child dies with the future when the caller's deadline fires
        let output = Command::new(&self.command)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg("eng")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("could not start {}", self.command))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let extractor = TesseractExtractor::new("definitely-not-an-ocr-binary");
        let err = extractor.extract(Path::new("nope.png")).await.unwrap_err();
        assert!(err.to_string().contains("could not start"));
    }
}
