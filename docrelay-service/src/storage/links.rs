//! Shareable links for uploaded folders.

use reqwest::Url;
use tracing::{debug, warn};

use super::StorageBackend;
use super::error::DropboxError;

/// Ways of obtaining a shared link, tried in order until one yields a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStrategy {
    /// New link with public audience and viewer access
    CreateWithSettings,
    /// First link already shared for the path
    ReuseExisting,
    /// New link with the account's default settings
    CreatePlain,
}

pub const LINK_STRATEGIES: [LinkStrategy; 3] = [
    LinkStrategy::CreateWithSettings,
    LinkStrategy::ReuseExisting,
    LinkStrategy::CreatePlain,
];

impl LinkStrategy {
    async fn attempt(
        self,
        backend: &dyn StorageBackend,
        path: &str,
    ) -> Result<Option<String>, DropboxError> {
        match self {
            LinkStrategy::CreateWithSettings => backend
                .create_shared_link_with_settings(path)
                .await
                .map(Some),
            LinkStrategy::ReuseExisting => Ok(backend
                .list_shared_links(path)
                .await?
                .into_iter()
                .next()),
            LinkStrategy::CreatePlain => backend.create_shared_link(path).await.map(Some),
        }
    }
}

/// Obtain a shared link for `path`, or `None` if every strategy fails
pub async fn resolve_shared_link(backend: &dyn StorageBackend, path: &str) -> Option<String> {
    for strategy in LINK_STRATEGIES {
        match strategy.attempt(backend, path).await {
            Ok(Some(url)) => {
                debug!(?strategy, path, "Shared link resolved");
                return Some(url);
            }
            Ok(None) => debug!(?strategy, path, "No shared link from strategy"),
            Err(e) if e.is_shared_link_already_exists() => {
                debug!(?strategy, path, "Shared link already exists");
            }
            Err(e) => warn!(?strategy, path, error = %e, "Shared link strategy failed"),
        }
    }
    None
}

/// Turn a Dropbox download link (`dl=1`) into its viewing form (`dl=0`).
///
/// Anything that is not a Dropbox URL with `dl=1` comes back unchanged.
pub fn view_link(shared: &str) -> String {
    let Ok(mut url) = Url::parse(shared) else {
        return shared.to_string();
    };

    let is_dropbox = url
        .host_str()
        .is_some_and(|host| host == "dropbox.com" || host.ends_with(".dropbox.com"));
    let Some(query) = url.query().filter(|_| is_dropbox) else {
        return shared.to_string();
    };
    if !query.split('&').any(|segment| segment == "dl=1") {
        return shared.to_string();
    }

    // Only the dl segment changes; the others keep their original encoding
    let rewritten = query
        .split('&')
        .map(|segment| if segment == "dl=1" { "dl=0" } else { segment })
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(&rewritten));
    url.to_string()
}
