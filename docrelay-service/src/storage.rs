//! Storage uploader.
//!
//! Mirrors a local output directory into Dropbox under
//! `<namespace>/<directory name>/`, then asks for a shareable link to the
//! uploaded folder.

mod client;
mod error;
mod links;
mod transfer;

pub use client::DropboxClient;
pub use error::DropboxError;
pub use transfer::UploadSession;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use walkdir::WalkDir;

use crate::config::DropboxConfig;
use crate::error::StorageError;

use transfer::TransferPolicy;

/// Remote file store operations the uploader needs
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Cheap authenticated call used to validate credentials
    async fn verify_account(&self) -> Result<(), DropboxError>;

    async fn create_folder(&self, path: &str) -> Result<(), DropboxError>;

    /// Upload a whole file in one request, overwriting
    async fn upload(&self, path: &str, data: Bytes) -> Result<(), DropboxError>;

    /// Open an upload session with its first chunk, returning the session id
    async fn start_session(&self, chunk: Bytes) -> Result<String, DropboxError>;

    /// Append a chunk at `session.offset`
    async fn append_session(&self, session: &UploadSession, chunk: Bytes) -> Result<(), DropboxError>;

    /// Send the last chunk and commit to `session.destination`, overwriting
    async fn finish_session(&self, session: &UploadSession, chunk: Bytes) -> Result<(), DropboxError>;

    async fn create_shared_link_with_settings(&self, path: &str) -> Result<String, DropboxError>;

    async fn list_shared_links(&self, path: &str) -> Result<Vec<String>, DropboxError>;

    async fn create_shared_link(&self, path: &str) -> Result<String, DropboxError>;
}

/// Record of one folder upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadManifest {
    pub destination_root: String,
    /// Paths relative to the destination root, in upload order
    pub uploaded_files: Vec<String>,
    pub shared_link: Option<String>,
    pub view_link: Option<String>,
    pub total_files: usize,
}

/// Uploads extraction output folders
pub struct Uploader {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
    policy: TransferPolicy,
}

impl Uploader {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &DropboxConfig) -> Self {
        Self {
            backend,
            namespace: config.namespace.clone(),
            policy: TransferPolicy::new(config),
        }
    }

    /// Upload every file under `folder`.
    ///
    /// Stops at the first failed file. Files sent before the failure stay in
    /// Dropbox.
    pub async fn upload_folder(&self, folder: &Path) -> Result<UploadManifest, StorageError> {
        let folder = match tokio::fs::canonicalize(folder).await {
            Ok(path) => path,
            Err(_) => {
                return Err(StorageError::SourceNotFound {
                    path: folder.to_path_buf(),
                });
            }
        };
        if !folder.is_dir() {
            return Err(StorageError::NotADirectory { path: folder });
        }

        self.backend.verify_account().await.map_err(|e| match e {
            DropboxError::Unauthorized { message } => StorageError::AuthConfiguration { message },
            other => StorageError::Connection(other),
        })?;

        let folder_name = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let root = destination_root(&self.namespace, &folder_name);

        match self.backend.create_folder(&root).await {
            Ok(()) => {}
            Err(e) if e.is_path_conflict() => {
                info!(root = %root, "Destination folder already exists");
            }
            Err(e) => {
                return Err(StorageError::Transfer {
                    path: root,
                    source: Box::new(e),
                });
            }
        }

        let walk_root = folder.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&walk_root))
            .await
            .map_err(|e| StorageError::Transfer {
                path: folder.display().to_string(),
                source: Box::new(e),
            })??;

        let mut uploaded_files = Vec::with_capacity(files.len());
        for (local, relative) in files {
            let destination = format!("{}/{}", root, relative);
            let mode =
                transfer::upload_file(self.backend.as_ref(), &self.policy, &local, &destination)
                    .await?;
            info!(
                source = %local.display(),
                destination = %destination,
                mode = ?mode,
                "Uploaded file"
            );
            uploaded_files.push(relative);
        }

        let shared_link = links::resolve_shared_link(self.backend.as_ref(), &root).await;
        let view_link = shared_link.as_deref().map(links::view_link);

        info!(
            root = %root,
            files = uploaded_files.len(),
            shared = shared_link.is_some(),
            "Folder upload complete"
        );

        Ok(UploadManifest {
            destination_root: root,
            total_files: uploaded_files.len(),
            uploaded_files,
            shared_link,
            view_link,
        })
    }
}

fn destination_root(namespace: &str, folder_name: &str) -> String {
    format!("{}/{}", namespace.trim_end_matches('/'), folder_name)
}

/// Every regular file under `root` with its `/`-separated relative path,
/// sorted by that path
fn collect_files(root: &Path) -> Result<Vec<(PathBuf, String)>, StorageError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| StorageError::Transfer {
            path: root.display().to_string(),
            source: Box::new(e),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.into_path(), relative));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::config::Config;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        VerifyAccount,
        CreateFolder(String),
        Upload { path: String, len: usize },
        Start { len: usize },
        Append { offset: u64, len: usize },
        Finish { offset: u64, len: usize, path: String },
        CreateLinkWithSettings(String),
        ListLinks(String),
        CreatePlainLink(String),
    }

    /// Knobs for the fake's failure modes
    #[derive(Default)]
    pub(crate) struct FakeBehavior {
        pub(crate) unauthorized: bool,
        pub(crate) folder_exists: bool,
        pub(crate) fail_upload_of: Option<String>,
        pub(crate) link_already_exists: bool,
        pub(crate) existing_links: Vec<String>,
        pub(crate) plain_link_fails: bool,
    }

    /// In-memory Dropbox that records every call and the bytes it receives
    #[derive(Default)]
    pub(crate) struct FakeStorage {
        pub(crate) behavior: FakeBehavior,
        pub(crate) calls: Mutex<Vec<Call>>,
        pub(crate) files: Mutex<BTreeMap<String, Vec<u8>>>,
        sessions: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl FakeStorage {
        pub(crate) fn with(behavior: FakeBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                ..Default::default()
            })
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn conflict(summary: &str) -> DropboxError {
            DropboxError::Api {
                status: 409,
                summary: summary.to_string(),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for FakeStorage {
        async fn verify_account(&self) -> Result<(), DropboxError> {
            self.record(Call::VerifyAccount);
            if self.behavior.unauthorized {
                return Err(DropboxError::Unauthorized {
                    message: "invalid_access_token".to_string(),
                });
            }
            Ok(())
        }

        async fn create_folder(&self, path: &str) -> Result<(), DropboxError> {
            self.record(Call::CreateFolder(path.to_string()));
            if self.behavior.folder_exists {
                return Err(Self::conflict("path/conflict/folder/.."));
            }
            Ok(())
        }

        async fn upload(&self, path: &str, data: Bytes) -> Result<(), DropboxError> {
            self.record(Call::Upload {
                path: path.to_string(),
                len: data.len(),
            });
            if self
                .behavior
                .fail_upload_of
                .as_deref()
                .is_some_and(|name| path.ends_with(name))
            {
                return Err(DropboxError::Api {
                    status: 507,
                    summary: "insufficient_space/..".to_string(),
                });
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn start_session(&self, chunk: Bytes) -> Result<String, DropboxError> {
            self.record(Call::Start { len: chunk.len() });
            let mut sessions = self.sessions.lock().unwrap();
            let id = format!("session-{}", sessions.len());
            sessions.insert(id.clone(), chunk.to_vec());
            Ok(id)
        }

        async fn append_session(
            &self,
            session: &UploadSession,
            chunk: Bytes,
        ) -> Result<(), DropboxError> {
            self.record(Call::Append {
                offset: session.offset,
                len: chunk.len(),
            });
            let mut sessions = self.sessions.lock().unwrap();
            let buffer = sessions.get_mut(&session.session_id).unwrap();
            assert_eq!(buffer.len() as u64, session.offset, "append at wrong offset");
            buffer.extend_from_slice(&chunk);
            Ok(())
        }

        async fn finish_session(
            &self,
            session: &UploadSession,
            chunk: Bytes,
        ) -> Result<(), DropboxError> {
            self.record(Call::Finish {
                offset: session.offset,
                len: chunk.len(),
                path: session.destination.clone(),
            });
            let mut buffer = self
                .sessions
                .lock()
                .unwrap()
                .remove(&session.session_id)
                .expect("session committed twice");
            assert_eq!(buffer.len() as u64, session.offset, "finish at wrong offset");
            buffer.extend_from_slice(&chunk);
            self.files
                .lock()
                .unwrap()
                .insert(session.destination.clone(), buffer);
            Ok(())
        }

        async fn create_shared_link_with_settings(&self, path: &str) -> Result<String, DropboxError> {
            self.record(Call::CreateLinkWithSettings(path.to_string()));
            if self.behavior.link_already_exists {
                return Err(Self::conflict("shared_link_already_exists/metadata/.."));
            }
            Ok(format!("https://www.dropbox.com/scl/fo/new{}?rlkey=abc&dl=1", path))
        }

        async fn list_shared_links(&self, path: &str) -> Result<Vec<String>, DropboxError> {
            self.record(Call::ListLinks(path.to_string()));
            Ok(self.behavior.existing_links.clone())
        }

        async fn create_shared_link(&self, path: &str) -> Result<String, DropboxError> {
            self.record(Call::CreatePlainLink(path.to_string()));
            if self.behavior.plain_link_fails {
                return Err(DropboxError::Api {
                    status: 400,
                    summary: "access_denied/..".to_string(),
                });
            }
            Ok(format!("https://www.dropbox.com/s/plain{}?dl=0", path))
        }
    }

    fn write(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// An output directory shaped like an extraction result
    fn output_folder() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("3f1c9a7e-job");
        write(&folder.join("structuredData.json"), b"{}");
        write(&folder.join("text.txt"), b"Title\nBody");
        write(&folder.join("figures/fileoutpart0.png"), b"png");
        write(&folder.join("tables/fileoutpart1.csv"), b"a,b\n");
        std::fs::create_dir_all(folder.join("empty")).unwrap();
        (dir, folder)
    }

    fn uploader(backend: Arc<FakeStorage>) -> Uploader {
        let dir = std::env::temp_dir();
        Uploader::new(backend, &Config::for_tests(&dir).dropbox)
    }

    #[test]
    fn test_destination_root() {
        assert_eq!(destination_root("/pdf_extractions", "abc"), "/pdf_extractions/abc");
        assert_eq!(destination_root("/pdf_extractions/", "abc"), "/pdf_extractions/abc");
        assert_eq!(destination_root("", "abc"), "/abc");
    }

    #[test]
    fn test_collect_files_sorted_relative_paths() {
        let (_dir, folder) = output_folder();
        let relative: Vec<String> = collect_files(&folder)
            .unwrap()
            .into_iter()
            .map(|(_, relative)| relative)
            .collect();

        assert_eq!(
            relative,
            vec![
                "figures/fileoutpart0.png",
                "structuredData.json",
                "tables/fileoutpart1.csv",
                "text.txt",
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_mirrors_local_tree() {
        let (_dir, folder) = output_folder();
        let fake = FakeStorage::with(FakeBehavior::default());

        let manifest = uploader(fake.clone()).upload_folder(&folder).await.unwrap();

        assert_eq!(manifest.destination_root, "/pdf_extractions/3f1c9a7e-job");
        assert_eq!(manifest.total_files, 4);

        let local = collect_files(&folder.canonicalize().unwrap()).unwrap();
        let remote = fake.files.lock().unwrap().clone();
        assert_eq!(remote.len(), local.len());
        for (path, relative) in local {
            let key = format!("/pdf_extractions/3f1c9a7e-job/{}", relative);
            assert_eq!(remote.get(&key), Some(&std::fs::read(path).unwrap()), "{key}");
        }
        let remote_paths: Vec<String> = manifest
            .uploaded_files
            .iter()
            .map(|relative| format!("{}/{}", manifest.destination_root, relative))
            .collect();
        assert_eq!(remote_paths, remote.keys().cloned().collect::<Vec<_>>());

        let calls = fake.calls();
        assert_eq!(calls[0], Call::VerifyAccount);
        assert_eq!(
            calls[1],
            Call::CreateFolder("/pdf_extractions/3f1c9a7e-job".to_string())
        );
        assert_eq!(
            manifest.shared_link.as_deref(),
            Some("https://www.dropbox.com/scl/fo/new/pdf_extractions/3f1c9a7e-job?rlkey=abc&dl=1")
        );
        assert_eq!(
            manifest.view_link.as_deref(),
            Some("https://www.dropbox.com/scl/fo/new/pdf_extractions/3f1c9a7e-job?rlkey=abc&dl=0")
        );
    }

    #[tokio::test]
    async fn test_existing_folder_is_not_an_error() {
        let (_dir, folder) = output_folder();
        let fake = FakeStorage::with(FakeBehavior {
            folder_exists: true,
            ..Default::default()
        });

        let manifest = uploader(fake).upload_folder(&folder).await.unwrap();
        assert_eq!(manifest.total_files, 4);
    }

    #[tokio::test]
    async fn test_large_file_uses_session() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("job");
        let content: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        write(&folder.join("big.bin"), &content);
        write(&folder.join("small.txt"), b"tiny");

        let fake = FakeStorage::with(FakeBehavior::default());
        let mut config = Config::for_tests(dir.path()).dropbox;
        config.chunk_size_bytes = 8;
        config.large_file_threshold_bytes = 150;
        let uploader = Uploader::new(fake.clone(), &config);

        uploader.upload_folder(&folder).await.unwrap();

        let calls = fake.calls();
        let starts = calls.iter().filter(|c| matches!(c, Call::Start { .. })).count();
        let appends: Vec<(u64, usize)> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Append { offset, len } => Some((*offset, *len)),
                _ => None,
            })
            .collect();
        let finishes: Vec<&Call> = calls
            .iter()
            .filter(|c| matches!(c, Call::Finish { .. }))
            .collect();

        // ceil(500 / 8) = 63 chunks: opening chunk, 61 appends, one commit
        assert_eq!(starts, 1);
        assert_eq!(appends.len(), 61);
        for (i, (offset, len)) in appends.iter().enumerate() {
            assert_eq!(*offset, 8 * (i as u64 + 1));
            assert_eq!(*len, 8);
        }
        assert_eq!(
            finishes,
            vec![&Call::Finish {
                offset: 496,
                len: 4,
                path: "/pdf_extractions/job/big.bin".to_string()
            }]
        );
        assert!(calls.contains(&Call::Upload {
            path: "/pdf_extractions/job/small.txt".to_string(),
            len: 4
        }));
        assert_eq!(
            fake.files.lock().unwrap().get("/pdf_extractions/job/big.bin"),
            Some(&content)
        );
    }

    #[tokio::test]
    async fn test_existing_link_is_reused() {
        let (_dir, folder) = output_folder();
        let existing = "https://www.dropbox.com/scl/fo/existing/job?rlkey=zz&dl=0".to_string();
        let fake = FakeStorage::with(FakeBehavior {
            link_already_exists: true,
            existing_links: vec![existing.clone(), "https://www.dropbox.com/other".to_string()],
            ..Default::default()
        });

        let manifest = uploader(fake.clone()).upload_folder(&folder).await.unwrap();

        assert_eq!(manifest.shared_link.as_deref(), Some(existing.as_str()));
        assert_eq!(manifest.view_link.as_deref(), Some(existing.as_str()));
        let calls = fake.calls();
        assert!(calls.contains(&Call::ListLinks("/pdf_extractions/3f1c9a7e-job".to_string())));
        assert!(!calls.iter().any(|c| matches!(c, Call::CreatePlainLink(_))));
    }

    #[tokio::test]
    async fn test_plain_link_fallback() {
        let (_dir, folder) = output_folder();
        let fake = FakeStorage::with(FakeBehavior {
            link_already_exists: true,
            ..Default::default()
        });

        let manifest = uploader(fake).upload_folder(&folder).await.unwrap();

        assert_eq!(
            manifest.shared_link.as_deref(),
            Some("https://www.dropbox.com/s/plain/pdf_extractions/3f1c9a7e-job?dl=0")
        );
    }

    #[tokio::test]
    async fn test_link_failure_is_not_fatal() {
        let (_dir, folder) = output_folder();
        let fake = FakeStorage::with(FakeBehavior {
            link_already_exists: true,
            plain_link_fails: true,
            ..Default::default()
        });

        let manifest = uploader(fake).upload_folder(&folder).await.unwrap();

        assert_eq!(manifest.total_files, 4);
        assert!(manifest.shared_link.is_none());
        assert!(manifest.view_link.is_none());
    }

    #[tokio::test]
    async fn test_transfer_failure_aborts() {
        let (_dir, folder) = output_folder();
        let fake = FakeStorage::with(FakeBehavior {
            fail_upload_of: Some("structuredData.json".to_string()),
            ..Default::default()
        });

        let err = uploader(fake.clone()).upload_folder(&folder).await.unwrap_err();

        match err {
            StorageError::Transfer { path, .. } => {
                assert_eq!(path, "/pdf_extractions/3f1c9a7e-job/structuredData.json")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Files sorted before the failing one were already sent; nothing after it was
        let uploaded: Vec<String> = fake.files.lock().unwrap().keys().cloned().collect();
        assert_eq!(uploaded, vec!["/pdf_extractions/3f1c9a7e-job/figures/fileoutpart0.png"]);
        assert!(!fake.calls().iter().any(|c| matches!(c, Call::CreateLinkWithSettings(_))));
    }

    #[tokio::test]
    async fn test_invalid_token_fails_before_transfer() {
        let (_dir, folder) = output_folder();
        let fake = FakeStorage::with(FakeBehavior {
            unauthorized: true,
            ..Default::default()
        });

        let err = uploader(fake.clone()).upload_folder(&folder).await.unwrap_err();

        assert!(matches!(err, StorageError::AuthConfiguration { .. }));
        assert_eq!(fake.calls(), vec![Call::VerifyAccount]);
    }

    #[tokio::test]
    async fn test_source_validation() {
        let (dir, folder) = output_folder();
        let fake = FakeStorage::with(FakeBehavior::default());
        let uploader = uploader(fake.clone());

        let err = uploader
            .upload_folder(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SourceNotFound { .. }));

        let err = uploader
            .upload_folder(&folder.join("text.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory { .. }));

        assert!(fake.calls().is_empty());
    }
}
