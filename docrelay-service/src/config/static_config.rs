//! Configuration types and their defaults.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default = "default_extraction")]
    pub extraction: ExtractionConfig,

    #[serde(default = "default_dropbox")]
    pub dropbox: DropboxConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Local filesystem layout
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Raw intake files, one `<uuid>.pdf` per upload
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// One subdirectory per extraction
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,

    /// Result archives are spooled here while being unpacked
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

/// Upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

/// Adobe PDF Services (extraction) configuration
#[derive(Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default = "default_extraction_base_url")]
    pub base_url: String,

    /// Delay between job status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on a job that has not finished after this long
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Dropbox (storage) configuration
#[derive(Clone, Deserialize)]
pub struct DropboxConfig {
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_dropbox_api_url")]
    pub api_url: String,

    #[serde(default = "default_dropbox_content_url")]
    pub content_url: String,

    /// Remote folder every extraction is uploaded under
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,

    /// Files strictly larger than this use an upload session
    #[serde(default = "default_large_file_threshold_bytes")]
    pub large_file_threshold_bytes: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ExtractionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DropboxConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Secrets stay out of logs; `Debug` only reports whether they are set.

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("client_id", &self.client_id.as_ref().map(|_| "<set>"))
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for DropboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropboxConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("content_url", &self.content_url)
            .field("namespace", &self.namespace)
            .field("chunk_size_bytes", &self.chunk_size_bytes)
            .field("large_file_threshold_bytes", &self.large_file_threshold_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ==================== Default Value Functions ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

pub(crate) fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub(crate) fn default_port() -> u16 {
    5000
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        uploads_dir: default_uploads_dir(),
        outputs_dir: default_outputs_dir(),
        scratch_dir: default_scratch_dir(),
    }
}

pub(crate) fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

pub(crate) fn default_outputs_dir() -> PathBuf {
    PathBuf::from("generated")
}

pub(crate) fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

pub(crate) fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_upload_bytes: default_max_upload_bytes(),
    }
}

pub(crate) fn default_max_upload_bytes() -> u64 {
    16 * MIB
}

pub(crate) fn default_extraction() -> ExtractionConfig {
    ExtractionConfig {
        client_id: None,
        client_secret: None,
        base_url: default_extraction_base_url(),
        poll_interval_ms: default_poll_interval_ms(),
        job_timeout_secs: default_job_timeout_secs(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

pub(crate) fn default_extraction_base_url() -> String {
    "https://pdf-services.adobe.io".to_string()
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    2000
}

pub(crate) fn default_job_timeout_secs() -> u64 {
    600
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_dropbox() -> DropboxConfig {
    DropboxConfig {
        token: None,
        api_url: default_dropbox_api_url(),
        content_url: default_dropbox_content_url(),
        namespace: default_namespace(),
        chunk_size_bytes: default_chunk_size_bytes(),
        large_file_threshold_bytes: default_large_file_threshold_bytes(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

pub(crate) fn default_dropbox_api_url() -> String {
    "https://api.dropboxapi.com/2".to_string()
}

pub(crate) fn default_dropbox_content_url() -> String {
    "https://content.dropboxapi.com/2".to_string()
}

pub(crate) fn default_namespace() -> String {
    "/pdf_extractions".to_string()
}

pub(crate) fn default_chunk_size_bytes() -> u64 {
    8 * MIB
}

pub(crate) fn default_large_file_threshold_bytes() -> u64 {
    150 * MIB
}

#[cfg(test)]
impl Config {
    /// Defaults with every directory rooted under `root` and dummy credentials.
    pub(crate) fn for_tests(root: &std::path::Path) -> Self {
        let mut extraction = default_extraction();
        extraction.client_id = Some("test-client".to_string());
        extraction.client_secret = Some("test-secret".to_string());
        let mut dropbox = default_dropbox();
        dropbox.token = Some("test-token".to_string());

        Self {
            server: default_server(),
            storage: StorageConfig {
                uploads_dir: root.join("uploads"),
                outputs_dir: root.join("generated"),
                scratch_dir: root.join("scratch"),
            },
            limits: default_limits(),
            extraction,
            dropbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_transfer_limits() {
        let dropbox = default_dropbox();
        assert_eq!(dropbox.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(dropbox.large_file_threshold_bytes, 150 * 1024 * 1024);
        assert_eq!(dropbox.namespace, "/pdf_extractions");
        assert_eq!(default_max_upload_bytes(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut dropbox = default_dropbox();
        dropbox.token = Some("sl.very-secret".to_string());
        let mut extraction = default_extraction();
        extraction.client_secret = Some("p8e-secret".to_string());

        let rendered = format!("{:?} {:?}", dropbox, extraction);
        assert!(!rendered.contains("sl.very-secret"));
        assert!(!rendered.contains("p8e-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
