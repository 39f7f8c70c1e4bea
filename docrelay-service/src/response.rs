//! Response payloads for the upload route.

use serde::Serialize;
use std::path::Path;

use crate::error::StorageError;
use crate::storage::UploadManifest;

pub const UPLOADED_MESSAGE: &str = "PDF processed and uploaded to Dropbox successfully!";
pub const UPLOAD_FAILED_MESSAGE: &str = "PDF processed successfully, but Dropbox upload failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Where the extracted folder ended up in Dropbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub dropbox_folder: String,
    pub shared_link: Option<String>,
    pub view_link: Option<String>,
    pub files_uploaded: usize,
    /// View link when there is one, otherwise the shared link
    pub clickable_link: Option<String>,
}

impl From<&UploadManifest> for UploadSummary {
    fn from(manifest: &UploadManifest) -> Self {
        let view_link = manifest
            .view_link
            .clone()
            .or_else(|| manifest.shared_link.clone());
        Self {
            dropbox_folder: manifest.destination_root.clone(),
            shared_link: manifest.shared_link.clone(),
            clickable_link: view_link.clone(),
            view_link,
            files_uploaded: manifest.total_files,
        }
    }
}

/// Result of processing one upload.
///
/// A failed Dropbox upload after a successful extraction is still a success;
/// the failure is reported in `dropbox_error`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResponse {
    pub status: Status,
    pub message: String,
    pub output_folder: String,
    #[serde(flatten)]
    pub upload: Option<UploadSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropbox_error: Option<String>,
}

impl ProcessResponse {
    /// Extraction and upload both succeeded
    pub fn uploaded(output_folder: &Path, manifest: &UploadManifest) -> Self {
        Self {
            status: Status::Success,
            message: UPLOADED_MESSAGE.to_string(),
            output_folder: output_folder.display().to_string(),
            upload: Some(UploadSummary::from(manifest)),
            dropbox_error: None,
        }
    }

    /// Extraction succeeded but the upload did not
    pub fn upload_failed(output_folder: &Path, error: &StorageError) -> Self {
        Self {
            status: Status::Success,
            message: UPLOAD_FAILED_MESSAGE.to_string(),
            output_folder: output_folder.display().to_string(),
            upload: None,
            dropbox_error: Some(format!("Dropbox upload failed: {}", error)),
        }
    }
}
