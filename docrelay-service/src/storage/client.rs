//! Dropbox API v2 client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::DropboxConfig;
use crate::error::StorageError;

use super::error::DropboxError;
use super::transfer::UploadSession;
use super::StorageBackend;

/// Header carrying the JSON arguments of content endpoints
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Dropbox API client
pub struct DropboxClient {
    client: Client,
    api_url: String,
    content_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error_summary: String,
}

#[derive(Deserialize)]
struct SessionStartResult {
    session_id: String,
}

#[derive(Deserialize)]
struct SharedLinkMetadata {
    url: String,
}

#[derive(Deserialize)]
struct ListSharedLinksResult {
    links: Vec<SharedLinkMetadata>,
}

#[derive(Serialize)]
struct Cursor<'a> {
    session_id: &'a str,
    offset: u64,
}

impl<'a> From<&'a UploadSession> for Cursor<'a> {
    fn from(session: &'a UploadSession) -> Self {
        Self {
            session_id: &session.session_id,
            offset: session.offset,
        }
    }
}

impl DropboxClient {
    /// Create a new client; fails without making any request if the token is missing
    pub fn new(config: &DropboxConfig) -> Result<Self, StorageError> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StorageError::AuthConfiguration {
                message: "Missing DROPBOX_TOKEN".to_string(),
            })?;

        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| StorageError::AuthConfiguration {
                message: "DROPBOX_TOKEN contains characters not allowed in a header".to_string(),
            })?;
        auth.set_sensitive(true);
        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("docrelay/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| StorageError::Connection(DropboxError::Request(e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            content_url: config.content_url.trim_end_matches('/').to_string(),
        })
    }

    /// Call an RPC endpoint with a JSON body
    async fn rpc<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        args: &serde_json::Value,
    ) -> Result<T, DropboxError> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let response = self.client.post(&url).json(args).send().await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    /// Call a content-upload endpoint, returning the raw response
    async fn content(
        &self,
        endpoint: &str,
        args: &serde_json::Value,
        data: Bytes,
    ) -> Result<Response, DropboxError> {
        let url = format!("{}/{}", self.content_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header(API_ARG_HEADER, header_safe_json(args))
            .header(header::CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.as_ref())
            .body(data)
            .send()
            .await?;
        check(response).await
    }
}

#[async_trait]
impl StorageBackend for DropboxClient {
    async fn verify_account(&self) -> Result<(), DropboxError> {
        let url = format!("{}/users/get_current_account", self.api_url);
        let response = self.client.post(&url).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<(), DropboxError> {
        let _: serde_json::Value = self
            .rpc(
                "files/create_folder_v2",
                &json!({ "path": path, "autorename": false }),
            )
            .await?;
        Ok(())
    }

    async fn upload(&self, path: &str, data: Bytes) -> Result<(), DropboxError> {
        self.content(
            "files/upload",
            &json!({ "path": path, "mode": "overwrite", "mute": true }),
            data,
        )
        .await?;
        Ok(())
    }

    async fn start_session(&self, chunk: Bytes) -> Result<String, DropboxError> {
        let response = self
            .content("files/upload_session/start", &json!({ "close": false }), chunk)
            .await?;
        let started: SessionStartResult = response.json().await?;
        Ok(started.session_id)
    }

    async fn append_session(&self, session: &UploadSession, chunk: Bytes) -> Result<(), DropboxError> {
        self.content(
            "files/upload_session/append_v2",
            &json!({ "cursor": Cursor::from(session), "close": false }),
            chunk,
        )
        .await?;
        Ok(())
    }

    async fn finish_session(&self, session: &UploadSession, chunk: Bytes) -> Result<(), DropboxError> {
        self.content(
            "files/upload_session/finish",
            &json!({
                "cursor": Cursor::from(session),
                "commit": { "path": session.destination, "mode": "overwrite", "mute": true },
            }),
            chunk,
        )
        .await?;
        Ok(())
    }

    async fn create_shared_link_with_settings(&self, path: &str) -> Result<String, DropboxError> {
        let link: SharedLinkMetadata = self
            .rpc(
                "sharing/create_shared_link_with_settings",
                &json!({
                    "path": path,
                    "settings": {
                        "requested_visibility": "public",
                        "audience": "public",
                        "access": "viewer",
                    },
                }),
            )
            .await?;
        Ok(link.url)
    }

    async fn list_shared_links(&self, path: &str) -> Result<Vec<String>, DropboxError> {
        let listed: ListSharedLinksResult = self
            .rpc(
                "sharing/list_shared_links",
                &json!({ "path": path, "direct_only": true }),
            )
            .await?;
        Ok(listed.links.into_iter().map(|link| link.url).collect())
    }

    async fn create_shared_link(&self, path: &str) -> Result<String, DropboxError> {
        let link: SharedLinkMetadata = self
            .rpc("sharing/create_shared_link", &json!({ "path": path }))
            .await?;
        Ok(link.url)
    }
}

/// Map a non-2xx response onto a `DropboxError`
async fn check(response: Response) -> Result<Response, DropboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(DropboxError::Unauthorized { message: body });
    }

    let summary = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error_summary)
        .unwrap_or(body);
    Err(DropboxError::Api {
        status: status.as_u16(),
        summary,
    })
}

/// Serialize `value` as JSON with every non-ASCII character `\u`-escaped.
///
/// HTTP header values must be ASCII, and Dropbox expects paths in
/// `Dropbox-API-Arg` escaped this way.
fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    escaped
}
