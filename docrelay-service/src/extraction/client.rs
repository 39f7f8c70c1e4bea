//! Adobe PDF Services client for the Extract PDF operation.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;

use super::ExtractionBackend;

/// Adobe PDF Services API client
pub struct PdfServicesClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    poll_interval: Duration,
    job_timeout: Duration,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetRequest<'a> {
    media_type: &'a str,
}

#[derive(Deserialize)]
struct AssetResponse {
    #[serde(rename = "uploadUri")]
    upload_uri: String,
    #[serde(rename = "assetID")]
    asset_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ElementType {
    Text,
    Tables,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum RenditionType {
    Tables,
    Figures,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum TableOutputFormat {
    Csv,
}

/// Body of an Extract PDF job submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractPdfParams {
    #[serde(rename = "assetID")]
    asset_id: String,
    elements_to_extract: Vec<ElementType>,
    elements_to_extract_renditions: Vec<RenditionType>,
    table_output_format: TableOutputFormat,
}

impl ExtractPdfParams {
    fn new(asset_id: String) -> Self {
        Self {
            asset_id,
            elements_to_extract: vec![ElementType::Text, ElementType::Tables],
            elements_to_extract_renditions: vec![RenditionType::Tables, RenditionType::Figures],
            table_output_format: TableOutputFormat::Csv,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum JobState {
    #[serde(rename = "in progress")]
    InProgress,
    Done,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct JobStatus {
    status: JobState,
    #[serde(default)]
    resource: Option<ResultAsset>,
    #[serde(default)]
    error: Option<JobFailure>,
}

#[derive(Deserialize)]
struct ResultAsset {
    #[serde(rename = "downloadUri")]
    download_uri: String,
}

#[derive(Deserialize)]
struct JobFailure {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl JobFailure {
    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => code.clone(),
            (None, None) => "no error detail provided".to_string(),
        }
    }
}

impl PdfServicesClient {
    /// Create a new client; fails without making any request if credentials are missing
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let (client_id, client_secret) = match (
            non_blank(config.client_id.as_deref()),
            non_blank(config.client_secret.as_deref()),
        ) {
            (Some(id), Some(secret)) => (id.to_string(), secret.to_string()),
            _ => {
                return Err(ExtractionError::AuthConfiguration {
                    message: "Missing CLIENT_ID / CLIENT_SECRET".to_string(),
                });
            }
        };

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("docrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ExtractionError::Request {
                context: "Failed to create HTTP client",
                source,
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            poll_interval: config.poll_interval(),
            job_timeout: config.job_timeout(),
        })
    }

    /// Exchange the client credentials for an access token
    async fn access_token(&self) -> Result<String, ExtractionError> {
        let url = format!("{}/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|source| ExtractionError::Request {
                context: "Failed to request access token",
                source,
            })?;
        let response = ensure_success(response, "Authentication failed").await?;

        let token: TokenResponse = response.json().await.map_err(|source| {
            ExtractionError::Request {
                context: "Invalid token response",
                source,
            }
        })?;
        Ok(token.access_token)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .bearer_auth(token)
            .header("x-api-key", &self.client_id)
    }

    /// Create an asset and upload the PDF into it, returning the asset id
    async fn upload_asset(&self, token: &str, pdf: Bytes) -> Result<String, ExtractionError> {
        let url = format!("{}/assets", self.base_url);
        let response = self
            .authorized(self.client.post(&url), token)
            .json(&AssetRequest {
                media_type: mime::APPLICATION_PDF.as_ref(),
            })
            .send()
            .await
            .map_err(|source| ExtractionError::Request {
                context: "Failed to create asset",
                source,
            })?;
        let response = ensure_success(response, "Asset creation failed").await?;
        let asset: AssetResponse = response.json().await.map_err(|source| {
            ExtractionError::Request {
                context: "Invalid asset response",
                source,
            }
        })?;

        let response = self
            .client
            .put(&asset.upload_uri)
            .header(header::CONTENT_TYPE, mime::APPLICATION_PDF.as_ref())
            .body(pdf)
            .send()
            .await
            .map_err(|source| ExtractionError::Request {
                context: "Failed to upload PDF",
                source,
            })?;
        ensure_success(response, "PDF upload failed").await?;

        debug!(asset_id = %asset.asset_id, "PDF uploaded");
        Ok(asset.asset_id)
    }

    /// Submit the extraction job, returning its status URL
    async fn submit_job(&self, token: &str, asset_id: String) -> Result<String, ExtractionError> {
        let url = format!("{}/operation/extractpdf", self.base_url);
        let response = self
            .authorized(self.client.post(&url), token)
            .json(&ExtractPdfParams::new(asset_id))
            .send()
            .await
            .map_err(|source| ExtractionError::Request {
                context: "Failed to submit extraction job",
                source,
            })?;
        let response = ensure_success(response, "Job submission failed").await?;

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ExtractionError::RemoteJob {
                message: "Job submission response has no location header".to_string(),
            })
    }

    /// Poll the job until it finishes, returning the result download URL
    async fn wait_for_result(&self, token: &str, location: &str) -> Result<String, ExtractionError> {
        let deadline = Instant::now() + self.job_timeout;

        loop {
            let response = self
                .authorized(self.client.get(location), token)
                .send()
                .await
                .map_err(|source| ExtractionError::Request {
                    context: "Failed to poll extraction job",
                    source,
                })?;
            let response = ensure_success(response, "Job status request failed").await?;
            let status: JobStatus = response.json().await.map_err(|source| {
                ExtractionError::Request {
                    context: "Invalid job status response",
                    source,
                }
            })?;

            match status.status {
                JobState::Done => {
                    return status
                        .resource
                        .map(|resource| resource.download_uri)
                        .ok_or_else(|| ExtractionError::RemoteJob {
                            message: "Finished job has no result resource".to_string(),
                        });
                }
                JobState::Failed => {
                    let detail = status
                        .error
                        .map(|e| e.describe())
                        .unwrap_or_else(|| "no error detail provided".to_string());
                    return Err(ExtractionError::RemoteJob { message: detail });
                }
                JobState::InProgress | JobState::Unknown => {
                    if Instant::now() >= deadline {
                        return Err(ExtractionError::RemoteJob {
                            message: format!(
                                "Job did not finish within {}s",
                                self.job_timeout.as_secs()
                            ),
                        });
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn download(&self, uri: &str) -> Result<Bytes, ExtractionError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|source| ExtractionError::Request {
                context: "Failed to download extraction result",
                source,
            })?;
        let response = ensure_success(response, "Result download failed").await?;
        response
            .bytes()
            .await
            .map_err(|source| ExtractionError::Request {
                context: "Failed to read extraction result",
                source,
            })
    }
}

#[async_trait]
impl ExtractionBackend for PdfServicesClient {
    async fn extract(&self, pdf: Bytes) -> Result<Bytes, ExtractionError> {
        let size = pdf.len();
        let token = self.access_token().await?;
        let asset_id = self.upload_asset(&token, pdf).await?;
        let location = self.submit_job(&token, asset_id).await?;
        info!(location = %location, size, "Extraction job submitted");

        let download_uri = self.wait_for_result(&token, &location).await?;
        let archive = self.download(&download_uri).await?;
        info!(archive_bytes = archive.len(), "Extraction job finished");
        Ok(archive)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Turn a non-2xx response into a `RemoteJob` error carrying the provider's text
async fn ensure_success(response: Response, what: &str) -> Result<Response, ExtractionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ExtractionError::RemoteJob {
        message: format!("{} (status {}): {}", what, status.as_u16(), body),
    })
}
