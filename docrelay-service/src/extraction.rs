//! Extraction orchestrator.
//!
//! Sends a validated PDF to the remote extraction service and unpacks the
//! result archive into a fresh output directory:
//!
//! ```text
//! <outputs_dir>/<uuid>/
//!     structuredData.json
//!     text.txt
//!     figures/
//!     tables/
//! ```
//!
//! The directory is removed again if any step fails.

mod archive;
mod client;
mod transcript;

pub use archive::ExtractedFiles;
pub use client::PdfServicesClient;

#[cfg(test)]
pub(crate) use archive::tests::build_zip;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::ExtractionError;

use archive::{FIGURES_DIR, TABLES_DIR};

/// A remote service that turns a PDF into a result archive
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Run one extraction job to completion and return the archive bytes
    async fn extract(&self, pdf: Bytes) -> Result<Bytes, ExtractionError>;
}

/// Output of one successful extraction
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub output_dir: PathBuf,
    pub files: ExtractedFiles,
}

/// Runs extraction jobs and lays out their results on disk
pub struct Extractor {
    backend: Arc<dyn ExtractionBackend>,
    outputs_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl Extractor {
    pub fn new(backend: Arc<dyn ExtractionBackend>, storage: &StorageConfig) -> Self {
        Self {
            backend,
            outputs_dir: storage.outputs_dir.clone(),
            scratch_dir: storage.scratch_dir.clone(),
        }
    }

    /// Extract `source` into a newly created output directory
    pub async fn extract(&self, source: &Path) -> Result<ExtractionResult, ExtractionError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(ExtractionError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        let output_dir = self.outputs_dir.join(Uuid::new_v4().to_string());

        match self.run(source, &output_dir).await {
            Ok(files) => {
                info!(
                    output_dir = %output_dir.display(),
                    figures = files.figures.len(),
                    tables = files.tables.len(),
                    "Extraction complete"
                );
                Ok(ExtractionResult { output_dir, files })
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&output_dir).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(
                        output_dir = %output_dir.display(),
                        error = %cleanup,
                        "Failed to remove output directory after extraction failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run(&self, source: &Path, output_dir: &Path) -> Result<ExtractedFiles, ExtractionError> {
        let dirs = [
            output_dir.join(FIGURES_DIR),
            output_dir.join(TABLES_DIR),
            self.scratch_dir.clone(),
        ];
        for path in dirs {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|source| ExtractionError::Io {
                    path: path.clone(),
                    source,
                })?;
        }

        let pdf = tokio::fs::read(source).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractionError::SourceNotFound {
                path: source.to_path_buf(),
            },
            _ => ExtractionError::Io {
                path: source.to_path_buf(),
                source: e,
            },
        })?;

        let archive = self.backend.extract(Bytes::from(pdf)).await?;

        let output_dir = output_dir.to_path_buf();
        let scratch_dir = self.scratch_dir.clone();
        tokio::task::spawn_blocking(move || archive::unpack(&archive, &output_dir, &scratch_dir))
            .await
            .map_err(|e| ExtractionError::ArchiveParse {
                message: format!("Unpacking task failed: {}", e),
            })?
    }
}
