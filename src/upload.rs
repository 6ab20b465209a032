use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AppError, AppResult};

/// An uploaded document written under the upload directory.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub path: PathBuf,
    /// Name recorded on the verified record.
    pub reference: String,
}

impl StoredDocument {
    /// Removes the file after a failed verification attempt.
    pub async fn discard(&self) {
        if let Err(err) = tokio::fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %err, "could not remove discarded upload");
        }
    }
}

/// Directory holding uploaded verification documents, one file per upload.
#[derive(Clone, Debug)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Pulls the multipart field called `field` and stores its bytes.
    pub async fn save(&self, multipart: &mut Multipart, field: &str) -> AppResult<StoredDocument> {
        while let Some(part) = multipart.next_field().await? {
            if part.name() != Some(field) {
                continue;
            }

            let extension = part
                .file_name()
                .and_then(|name| Path::new(name).extension())
                .and_then(|ext| ext.to_str())
                .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
                .map(str::to_ascii_lowercase);
            let bytes = part.bytes().await?;
            if bytes.is_empty() {
                return Err(AppError::validation(format!("{field} is empty")));
            }

            return self.write(&bytes, extension.as_deref()).await;
        }

        Err(AppError::validation(format!("no {field} uploaded")))
    }

    pub async fn write(&self, bytes: &[u8], extension: Option<&str>) -> AppResult<StoredDocument> {
        self.ensure_root().await?;

        let reference = match extension {
            Some(ext) => format!("{}.{ext}", Uuid::now_v7().simple()),
            None => Uuid::now_v7().simple().to_string(),
        };
        let path = self.root.join(&reference);

        persist(&path, bytes).await?;

        debug!(path = %path.display(), size = bytes.len(), "upload stored");
        Ok(StoredDocument { path, reference })
    }
}

/// Writes `bytes` to `path`, removing whatever was written if any step fails.
async fn persist(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Err(err) = write_file(path, bytes).await {
        warn!(path = %path.display(), error = %err, "upload write failed");
        let _ = tokio::fs::remove_file(path).await;
        return Err(anyhow::anyhow!("failed to store upload {}: {err}", path.display()));
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn written_documents_can_be_discarded() {
        let root = std::env::temp_dir().join(format!("pedalshare-upload-{}", Uuid::now_v7().simple()));
        let uploads = UploadDir::new(root.clone());

        let doc = uploads.write(b"RECEIPT", Some("png")).await.unwrap();
        assert!(doc.reference.ends_with(".png"));
        assert_eq!(tokio::fs::read(&doc.path).await.unwrap(), b"RECEIPT");

        doc.discard().await;
        assert!(!tokio::fs::try_exists(&doc.path).await.unwrap());
        // discarding twice is harmless
        doc.discard().await;

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn failed_writes_leave_nothing_behind() {
        let root = std::env::temp_dir().join(format!("pedalshare-upload-{}", Uuid::now_v7().simple()));
        let uploads = UploadDir::new(root.clone());
        uploads.ensure_root().await.unwrap();

        let path = root.join("missing").join("doc.png");
        assert!(persist(&path, b"RECEIPT").await.is_err());
        assert!(!tokio::fs::try_exists(&path).await.unwrap());

        let mut entries = tokio::fs::read_dir(&root).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        tokio::fs::remove_dir_all(root).await.unwrap();
    }
}
