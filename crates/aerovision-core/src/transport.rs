//! HTTP Transport to the Detection Server
//!
//! Wraps REST calls against the detection server's base URL. Every call
//! either returns a parsed body or fails with a single `CoreError` - there
//! is no retry policy, no backoff, and no circuit breaking; callers decide
//! whether a failure is fatal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::protocol::{
    HealthResponse, ImageDetectionResponse, JobStatusResponse, UploadResponse, VideoDetectRequest,
    VideoSubmitResponse,
};
use crate::types::{FileKind, JobId, UploadToken};

// =============================================================================
// Constants
// =============================================================================

/// Default base URL for the detection server API
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Per-request timeout; image detection runs inference synchronously
const REQUEST_TIMEOUT_SECS: u64 = 180;

/// Maximum allowed download size (2 GiB) to prevent unbounded disk usage.
const MAX_DOWNLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Maximum length for server-derived output filenames.
const MAX_OUTPUT_FILENAME_LEN: usize = 128;

// =============================================================================
// Transport Trait
// =============================================================================

/// Operations the job lifecycle needs from the server.
///
/// Seam for testing the session state machine against a scripted transport.
#[async_trait]
pub trait DetectionTransport: Send + Sync {
    /// `GET /health`
    async fn health(&self) -> CoreResult<HealthResponse>;

    /// `POST /upload` - multipart, file under a field named for its kind.
    /// Returns the server-issued filename token.
    async fn upload(&self, path: &Path, kind: FileKind) -> CoreResult<UploadToken>;

    /// `POST /detect/image` - synchronous single-image detection
    async fn detect_image(&self, token: &UploadToken) -> CoreResult<ImageDetectionResponse>;

    /// `POST /detect/video` - creates an asynchronous job
    async fn detect_video(&self, token: &UploadToken, frame_skip: u32) -> CoreResult<JobId>;

    /// `GET /status/{job_id}`
    async fn job_status(&self, job_id: &str) -> CoreResult<JobStatusResponse>;

    /// `GET /download/{file}` - streams the output into `dest_dir` and
    /// returns the local path.
    async fn download(&self, remote_file: &str, dest_dir: &Path) -> CoreResult<PathBuf>;
}

// =============================================================================
// Detection Client
// =============================================================================

/// HTTP client bound to a detection server base URL
pub struct DetectionClient {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for DetectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Flat error body the server returns on failures: `{"error": "..."}`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
}

impl DetectionClient {
    /// Creates a new client against the default base URL
    pub fn new() -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns the configured base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload", self.base_url)
    }

    fn detect_image_url(&self) -> String {
        format!("{}/detect/image", self.base_url)
    }

    fn detect_video_url(&self) -> String {
        format!("{}/detect/video", self.base_url)
    }

    fn status_url(&self, job_id: &str) -> String {
        format!("{}/status/{}", self.base_url, job_id)
    }

    fn download_url(&self, file: &str) -> String {
        format!("{}/download/{}", self.base_url, file)
    }

    /// Extracts the server's `error` field from a failure body, falling back
    /// to the truncated raw body with the HTTP status.
    fn error_body(status: StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
            if let Some(error) = parsed.error {
                return error;
            }
        }
        let truncated: String = body.chars().take(500).collect();
        format!("server error ({}): {}", status, truncated)
    }

    /// Sanitizes a server-supplied filename for use as a local path segment.
    fn sanitize_output_filename(remote_file: &str) -> String {
        let sanitized: String = remote_file
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_OUTPUT_FILENAME_LEN)
            .collect();

        let trimmed = sanitized.trim_matches('.');
        if trimmed.is_empty() {
            "detection_output".to_string()
        } else {
            trimmed.to_string()
        }
    }

    async fn read_body(resp: reqwest::Response) -> CoreResult<(StatusCode, String)> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to read response: {}", e)))?;
        Ok((status, body))
    }
}

#[async_trait]
impl DetectionTransport for DetectionClient {
    async fn health(&self) -> CoreResult<HealthResponse> {
        let resp = self
            .client
            .get(self.health_url())
            .send()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?;

        let (status, body) = Self::read_body(resp).await?;
        if !status.is_success() {
            return Err(CoreError::Connection(Self::error_body(status, &body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| CoreError::Connection(format!("Malformed health response: {}", e)))
    }

    async fn upload(&self, path: &Path, kind: FileKind) -> CoreResult<UploadToken> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CoreError::Validation(format!("Invalid file name: {}", path.display()))
            })?
            .to_string();

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CoreError::Upload(format!("Failed to read {}: {}", path.display(), e)))?;

        let part = multipart::Part::bytes(bytes).file_name(file_name.clone());
        let form = multipart::Form::new().part(kind.field_name(), part);

        let resp = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| CoreError::Upload(e.to_string()))?;

        let (status, body) = Self::read_body(resp).await?;
        if !status.is_success() {
            return Err(CoreError::Upload(Self::error_body(status, &body)));
        }

        let parsed: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| CoreError::Upload(format!("Malformed upload response: {}", e)))?;

        if !parsed.success {
            return Err(CoreError::Upload(
                parsed.error.unwrap_or_else(|| "Upload rejected".to_string()),
            ));
        }

        let filename = parsed
            .filename
            .ok_or_else(|| CoreError::Upload("Upload response missing filename".to_string()))?;

        info!("Uploaded {} {} as {}", kind, file_name, filename);
        Ok(UploadToken(filename))
    }

    async fn detect_image(&self, token: &UploadToken) -> CoreResult<ImageDetectionResponse> {
        let resp = self
            .client
            .post(self.detect_image_url())
            .json(&serde_json::json!({ "filename": token.as_str() }))
            .send()
            .await
            .map_err(|e| CoreError::Detection(e.to_string()))?;

        let (status, body) = Self::read_body(resp).await?;
        if !status.is_success() {
            return Err(CoreError::Detection(Self::error_body(status, &body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| CoreError::Detection(format!("Malformed detection response: {}", e)))
    }

    async fn detect_video(&self, token: &UploadToken, frame_skip: u32) -> CoreResult<JobId> {
        let request = VideoDetectRequest {
            filename: token.as_str().to_string(),
            frame_skip,
        };

        let resp = self
            .client
            .post(self.detect_video_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::Detection(e.to_string()))?;

        let (status, body) = Self::read_body(resp).await?;
        if !status.is_success() {
            return Err(CoreError::Detection(Self::error_body(status, &body)));
        }

        let parsed: VideoSubmitResponse = serde_json::from_str(&body)
            .map_err(|e| CoreError::Detection(format!("Malformed submit response: {}", e)))?;

        if !parsed.success {
            return Err(CoreError::Detection(
                parsed
                    .error
                    .unwrap_or_else(|| "Submission rejected".to_string()),
            ));
        }

        parsed
            .job_id
            .ok_or_else(|| CoreError::Detection("Submit response missing job_id".to_string()))
    }

    async fn job_status(&self, job_id: &str) -> CoreResult<JobStatusResponse> {
        let resp = self
            .client
            .get(self.status_url(job_id))
            .send()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?;

        let (status, body) = Self::read_body(resp).await?;
        if !status.is_success() {
            return Err(CoreError::Job(Self::error_body(status, &body)));
        }

        let parsed: JobStatusResponse = serde_json::from_str(&body)
            .map_err(|e| CoreError::Job(format!("Malformed status response: {}", e)))?;

        debug!("Status for job {}: {}", job_id, parsed.status);
        Ok(parsed)
    }

    async fn download(&self, remote_file: &str, dest_dir: &Path) -> CoreResult<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let filename = Self::sanitize_output_filename(remote_file);
        let output_path = dest_dir.join(&filename);

        // Stream to disk to avoid holding large outputs in memory.
        let mut resp = self
            .client
            .get(self.download_url(remote_file))
            .send()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::Internal(Self::error_body(status, &body)));
        }

        if let Some(content_len) = resp.content_length() {
            if content_len > MAX_DOWNLOAD_BYTES {
                return Err(CoreError::Validation(format!(
                    "Output is too large ({} bytes > {} bytes limit)",
                    content_len, MAX_DOWNLOAD_BYTES
                )));
            }
        }

        let mut file = tokio::fs::File::create(&output_path).await?;

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to read chunk: {}", e)))?
        {
            total_bytes = total_bytes.saturating_add(chunk.len() as u64);
            if total_bytes > MAX_DOWNLOAD_BYTES {
                let _ = tokio::fs::remove_file(&output_path).await;
                return Err(CoreError::Validation(format!(
                    "Output exceeded max size limit ({} bytes)",
                    MAX_DOWNLOAD_BYTES
                )));
            }

            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        info!(
            "Downloaded {} to {} ({} bytes)",
            remote_file,
            output_path.display(),
            total_bytes
        );

        Ok(output_path)
    }
}

// =============================================================================
// Scripted Transport (test support)
// =============================================================================


// =============================================================================
// Tests
// =============================================================================
