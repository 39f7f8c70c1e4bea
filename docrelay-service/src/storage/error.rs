//! Error types for the Dropbox API.

#[derive(Debug, thiserror::Error)]
pub enum DropboxError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid Dropbox token: {message}")]
    Unauthorized { message: String },

    #[error("API error (status {status}): {summary}")]
    Api { status: u16, summary: String },
}

impl DropboxError {
    fn summary(&self) -> Option<&str> {
        match self {
            DropboxError::Api { summary, .. } => Some(summary),
            _ => None,
        }
    }

    /// Something already exists at the requested path
    pub fn is_path_conflict(&self) -> bool {
        self.summary()
            .is_some_and(|s| s.starts_with("path/conflict"))
    }

    /// A shared link for the path was created earlier
    pub fn is_shared_link_already_exists(&self) -> bool {
        self.summary()
            .is_some_and(|s| s.starts_with("shared_link_already_exists"))
    }
}
