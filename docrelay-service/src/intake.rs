//! Upload intake: validate an uploaded file and persist it for extraction.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::config::{LimitsConfig, StorageConfig};
use crate::error::IntakeError;

/// Extensions accepted for upload (compared lowercase)
const ALLOWED_EXTENSIONS: &[&str] = &["pdf"];

/// Every PDF starts with this header
const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A validated upload waiting to be extracted
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub id: String,
    pub path: PathBuf,
    pub original_filename: String,
    pub size: u64,
    /// SHA-256 of the content, hex encoded
    pub content_hash: String,
    pub validated: bool,
    pub received_at: DateTime<Utc>,
}

/// Validates and stores incoming uploads
pub struct Intake {
    uploads_dir: PathBuf,
    max_upload_bytes: u64,
}

impl Intake {
    pub fn new(storage: &StorageConfig, limits: &LimitsConfig) -> Self {
        Self {
            uploads_dir: storage.uploads_dir.clone(),
            max_upload_bytes: limits.max_upload_bytes,
        }
    }

    /// Validate `content` and persist it as `<uuid>.<ext>` in the uploads directory.
    ///
    /// Nothing is written unless every check passes.
    pub async fn accept(&self, filename: &str, content: &[u8]) -> Result<UploadJob, IntakeError> {
        if filename.trim().is_empty() {
            return Err(IntakeError::NoFileSelected);
        }

        let Some(extension) = allowed_extension(filename) else {
            return Err(IntakeError::InvalidFileType {
                filename: filename.to_string(),
            });
        };

        let size = content.len() as u64;
        if size > self.max_upload_bytes {
            return Err(IntakeError::FileTooLarge {
                size,
                max: self.max_upload_bytes,
            });
        }

        if !has_pdf_magic(content) {
            return Err(IntakeError::InvalidPdf);
        }

        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .map_err(|source| IntakeError::Io {
                path: self.uploads_dir.clone(),
                source,
            })?;

        let id = Uuid::new_v4().to_string();
        let path = self.uploads_dir.join(format!("{}.{}", id, extension));
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| IntakeError::Io {
                path: path.clone(),
                source,
            })?;

        let job = UploadJob {
            id,
            path,
            original_filename: filename.to_string(),
            size,
            content_hash: compute_content_hash(content),
            validated: true,
            received_at: Utc::now(),
        };

        info!(
            job_id = %job.id,
            filename = %job.original_filename,
            size = job.size,
            hash = %job.content_hash,
            "Upload accepted"
        );

        Ok(job)
    }
}

/// Return the lowercased extension if it is on the allow-list
fn allowed_extension(filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    let extension = extension.to_lowercase();
    ALLOWED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

/// Check the 4-byte `%PDF` header
pub fn has_pdf_magic(content: &[u8]) -> bool {
    content.starts_with(PDF_MAGIC)
}

/// Compute SHA-256 hash of a byte slice, returning a hex string.
fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
