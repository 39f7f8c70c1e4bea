//! Service coordinator: runs intake, extraction and upload for one request.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use crate::extraction::{ExtractionBackend, Extractor, PdfServicesClient};
use crate::intake::Intake;
use crate::response::ProcessResponse;
use crate::storage::{DropboxClient, StorageBackend, Uploader};

/// Main service coordinator
pub struct RelayService {
    intake: Intake,
    extractor: Extractor,
    uploader: Uploader,
}

impl RelayService {
    /// Build the service against the real Adobe and Dropbox clients.
    ///
    /// Missing credentials fail here, before any network call.
    pub fn new(config: &Config) -> ServiceResult<Self> {
        let extraction = PdfServicesClient::new(&config.extraction).map_err(|e| {
            ServiceError::Config {
                message: e.to_string(),
            }
        })?;
        let storage = DropboxClient::new(&config.dropbox).map_err(|e| ServiceError::Config {
            message: e.to_string(),
        })?;

        Ok(Self::with_backends(
            config,
            Arc::new(extraction),
            Arc::new(storage),
        ))
    }

    pub fn with_backends(
        config: &Config,
        extraction: Arc<dyn ExtractionBackend>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            intake: Intake::new(&config.storage, &config.limits),
            extractor: Extractor::new(extraction, &config.storage),
            uploader: Uploader::new(storage, &config.dropbox),
        }
    }

    /// Process one uploaded file end to end.
    ///
    /// Intake and extraction failures fail the request. An upload failure
    /// after a successful extraction still yields a success response carrying
    /// the upload error.
    pub async fn process_upload(
        &self,
        filename: &str,
        content: &[u8],
    ) -> ServiceResult<ProcessResponse> {
        let job = self.intake.accept(filename, content).await?;
        debug_assert!(job.validated);
        debug!(
            job_id = %job.id,
            path = %job.path.display(),
            received_at = %job.received_at,
            "Starting extraction"
        );

        let extraction = self.extractor.extract(&job.path).await.inspect_err(|e| {
            warn!(job_id = %job.id, error = %e, "Extraction failed");
        })?;
        info!(
            job_id = %job.id,
            output_dir = %extraction.output_dir.display(),
            files = extraction.files.len(),
            "Extraction stored"
        );

        match self.uploader.upload_folder(&extraction.output_dir).await {
            Ok(manifest) => {
                info!(
                    job_id = %job.id,
                    dropbox_folder = %manifest.destination_root,
                    files = manifest.total_files,
                    "Upload finished"
                );
                Ok(ProcessResponse::uploaded(&extraction.output_dir, &manifest))
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Dropbox upload failed");
                Ok(ProcessResponse::upload_failed(&extraction.output_dir, &e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::error::{ExtractionError, IntakeError};
    use crate::extraction::tests::{FakeExtraction, sample_archive};
    use crate::response::Status;
    use crate::storage::tests::{Call, FakeBehavior, FakeStorage};

    const PDF: &[u8] = b"%PDF-1.7\n%fake body";

    fn service(
        root: &Path,
        extraction: Arc<FakeExtraction>,
        storage: Arc<FakeStorage>,
    ) -> RelayService {
        RelayService::with_backends(&Config::for_tests(root), extraction, storage)
    }

    fn dir_entries(path: &Path) -> usize {
        std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_process_upload_success() {
        let dir = tempfile::tempdir().unwrap();
        let extraction = FakeExtraction::returning(Ok(sample_archive()));
        let storage = FakeStorage::with(FakeBehavior::default());
        let service = service(dir.path(), extraction.clone(), storage.clone());

        let response = service.process_upload("Report.PDF", PDF).await.unwrap();

        assert_eq!(response.status, Status::Success);
        let upload = response.upload.unwrap();
        assert_eq!(upload.files_uploaded, 4);
        assert!(upload.dropbox_folder.starts_with("/pdf_extractions/"));
        assert!(upload.clickable_link.is_some());
        assert!(response.dropbox_error.is_none());
        assert!(Path::new(&response.output_folder).join("text.txt").is_file());

        assert_eq!(extraction.received.lock().unwrap()[0].as_ref(), PDF);
        assert_eq!(dir_entries(&dir.path().join("uploads")), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_extraction_success() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FakeStorage::with(FakeBehavior {
            unauthorized: true,
            ..Default::default()
        });
        let service = service(
            dir.path(),
            FakeExtraction::returning(Ok(sample_archive())),
            storage.clone(),
        );

        let response = service.process_upload("report.pdf", PDF).await.unwrap();

        assert_eq!(response.status, Status::Success);
        assert_eq!(
            response.message,
            "PDF processed successfully, but Dropbox upload failed"
        );
        assert!(response.upload.is_none());
        assert!(
            response
                .dropbox_error
                .as_deref()
                .unwrap()
                .contains("invalid_access_token")
        );
        assert!(Path::new(&response.output_folder).is_dir());
        assert_eq!(storage.calls(), vec![Call::VerifyAccount]);
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_request() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FakeStorage::with(FakeBehavior::default());
        let service = service(
            dir.path(),
            FakeExtraction::returning(Err(ExtractionError::RemoteJob {
                message: "DISQUALIFIED: encrypted".to_string(),
            })),
            storage.clone(),
        );

        let err = service.process_upload("report.pdf", PDF).await.unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Extraction(ExtractionError::RemoteJob { .. })
        ));
        assert!(err.to_string().starts_with("PDF processing failed: "));
        assert_eq!(dir_entries(&dir.path().join("generated")), 0);
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_upload_never_reaches_backends() {
        let dir = tempfile::tempdir().unwrap();
        let extraction = FakeExtraction::returning(Ok(sample_archive()));
        let storage = FakeStorage::with(FakeBehavior::default());
        let service = service(dir.path(), extraction.clone(), storage.clone());

        let err = service
            .process_upload("notes.txt", b"plain text")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Intake(IntakeError::InvalidFileType { .. })
        ));

        let err = service
            .process_upload("fake.pdf", b"GIF89a")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Intake(IntakeError::InvalidPdf)));

        assert!(extraction.received.lock().unwrap().is_empty());
        assert!(storage.calls().is_empty());
        assert_eq!(dir_entries(&dir.path().join("uploads")), 0);
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_tests(dir.path());
        config.dropbox.token = None;

        match RelayService::new(&config) {
            Err(ServiceError::Config { message }) => {
                assert!(message.contains("DROPBOX_TOKEN"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("service built without a Dropbox token"),
        }

        config.extraction.client_secret = Some("  ".to_string());
        assert!(matches!(
            RelayService::new(&config),
            Err(ServiceError::Config { .. })
        ));
    }
}
