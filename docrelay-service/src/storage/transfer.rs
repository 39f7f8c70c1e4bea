//! Single-file transfers: one-shot for small files, upload sessions for large ones.

use bytes::Bytes;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::config::DropboxConfig;
use crate::error::StorageError;

use super::StorageBackend;

/// State of an open upload session.
///
/// `offset` always equals the number of bytes handed to the session so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: String,
    pub offset: u64,
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    SingleShot,
    Chunked,
}

/// One call in a chunked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStep {
    Start,
    Append,
    Finish,
}

/// A chunk to send: which call, where it starts, how long it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCall {
    pub step: ChunkStep,
    pub offset: u64,
    pub len: u64,
}

/// Size limits that decide how a file is sent
#[derive(Debug, Clone, Copy)]
pub struct TransferPolicy {
    pub chunk_size: u64,
    pub large_file_threshold: u64,
}

impl TransferPolicy {
    pub fn new(config: &DropboxConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes.max(1),
            large_file_threshold: config.large_file_threshold_bytes,
        }
    }

    pub fn mode_for(&self, size: u64) -> TransferMode {
        if size > self.large_file_threshold {
            TransferMode::Chunked
        } else {
            TransferMode::SingleShot
        }
    }
}

/// Lay out the session calls for a file of `size` bytes.
///
/// The first chunk opens the session, full chunks are appended while more than
/// one chunk remains, and the remainder (possibly empty) commits the file.
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<ChunkCall> {
    let first = size.min(chunk_size);
    let mut calls = vec![ChunkCall {
        step: ChunkStep::Start,
        offset: 0,
        len: first,
    }];

    let mut offset = first;
    while size - offset > chunk_size {
        calls.push(ChunkCall {
            step: ChunkStep::Append,
            offset,
            len: chunk_size,
        });
        offset += chunk_size;
    }

    calls.push(ChunkCall {
        step: ChunkStep::Finish,
        offset,
        len: size - offset,
    });
    calls
}

/// Upload `local` to `destination`, returning the mode that was used
pub async fn upload_file(
    backend: &dyn StorageBackend,
    policy: &TransferPolicy,
    local: &Path,
    destination: &str,
) -> Result<TransferMode, StorageError> {
    let failed = |source: Box<dyn std::error::Error + Send + Sync>| StorageError::Transfer {
        path: destination.to_string(),
        source,
    };

    let size = tokio::fs::metadata(local)
        .await
        .map_err(|e| failed(e.into()))?
        .len();
    let mode = policy.mode_for(size);

    match mode {
        TransferMode::SingleShot => {
            let content = tokio::fs::read(local)
                .await
                .map_err(|e| failed(e.into()))?;
            backend
                .upload(destination, Bytes::from(content))
                .await
                .map_err(|e| failed(e.into()))?;
        }
        TransferMode::Chunked => {
            let mut file = File::open(local).await.map_err(|e| failed(e.into()))?;
            upload_chunked(backend, &mut file, size, policy.chunk_size, destination)
                .await
                .map_err(failed)?;
        }
    }

    Ok(mode)
}

async fn upload_chunked(
    backend: &dyn StorageBackend,
    file: &mut File,
    size: u64,
    chunk_size: u64,
    destination: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut session: Option<UploadSession> = None;

    for call in plan_chunks(size, chunk_size) {
        let chunk = read_chunk(file, call.len).await?;

        if call.step == ChunkStep::Start {
            let session_id = backend.start_session(chunk).await?;
            debug!(session_id = %session_id, destination, "Upload session started");
            session = Some(UploadSession {
                session_id,
                offset: call.len,
                destination: destination.to_string(),
            });
            continue;
        }

        let Some(open) = session.as_mut() else {
            return Err(format!("{:?} before the upload session was started", call.step).into());
        };
        debug_assert_eq!(open.offset, call.offset);

        if call.step == ChunkStep::Append {
            backend.append_session(open, chunk).await?;
            open.offset += call.len;
        } else {
            backend.finish_session(open, chunk).await?;
            open.offset += call.len;
            debug!(
                session_id = %open.session_id,
                bytes = open.offset,
                destination,
                "Upload session committed"
            );
        }
    }

    Ok(())
}

/// Read exactly `len` bytes, failing if the file ends early
async fn read_chunk(file: &mut File, len: u64) -> std::io::Result<Bytes> {
    let mut buffer = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut buffer).await?;
    if (buffer.len() as u64) < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "file shrank during upload",
        ));
    }
    Ok(Bytes::from(buffer))
}
