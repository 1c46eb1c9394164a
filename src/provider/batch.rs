//! Deferred batch service client
//!
//! Upload a set of encoded requests as one remote job, query its status and download
//! its line-oriented output.

use crate::error::ApiError;
use crate::provider::{build_provider_http_client, error_body, map_http_error};
use crate::task::{RequestRecord, CHAT_COMPLETIONS_URL};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Opaque reference to a submitted remote job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a remote job as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map a remote status string. Unknown statuses keep the job polling.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "queued" => JobStatus::Queued,
            "completed" => JobStatus::Completed,
            "failed" | "expired" | "cancelled" => JobStatus::Failed,
            _ => JobStatus::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    /// Status string exactly as reported by the service
    pub remote_status: String,
    pub output_ref: Option<String>,
    pub error_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputResponse {
    pub status_code: u16,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One line of remote output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<OutputResponse>,
    #[serde(default)]
    pub error: Option<OutputError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Record(OutputRecord),
    /// A line that could not be decoded into a record; it carries no usable id
    Undecodable { line: usize, reason: String },
}

/// Split a JSONL body into output lines, skipping blanks.
pub fn parse_output_lines(content: &str) -> Vec<OutputLine> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| match serde_json::from_str::<OutputRecord>(line) {
            Ok(record) => OutputLine::Record(record),
            Err(e) => OutputLine::Undecodable {
                line: index + 1,
                reason: e.to_string(),
            },
        })
        .collect()
}

/// Serialize request records as JSONL.
pub fn encode_request_lines(records: &[RequestRecord]) -> Result<String, ApiError> {
    let mut out = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| ApiError::InvalidInput(format!("Failed to encode request: {}", e)))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Remote batch service contract
#[async_trait]
pub trait BatchServiceClient: Send + Sync {
    async fn submit(&self, records: &[RequestRecord]) -> Result<JobHandle, ApiError>;

    async fn status(&self, handle: &JobHandle) -> Result<StatusReport, ApiError>;

    async fn fetch(&self, file_ref: &str) -> Result<Vec<OutputLine>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
}

/// OpenAI batch API client (`/files` + `/batches`)
pub struct OpenAIBatchClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    completion_window: String,
}

impl OpenAIBatchClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        completion_window: String,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_provider_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            completion_window,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn upload(&self, content: String) -> Result<String, ApiError> {
        let part = Part::bytes(content.into_bytes())
            .file_name("batch_requests.jsonl")
            .mime_str("application/jsonl")
            .map_err(map_http_error)?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .authorize(self.client.post(format!("{}/files", self.base_url)))
            .multipart(form)
            .send()
            .await
            .map_err(map_http_error)?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        let file: FileObject = response
            .json()
            .await
            .map_err(|e| ApiError::MalformedResponse(format!("Failed to parse file object: {}", e)))?;
        Ok(file.id)
    }
}

#[async_trait]
impl BatchServiceClient for OpenAIBatchClient {
    async fn submit(&self, records: &[RequestRecord]) -> Result<JobHandle, ApiError> {
        if records.is_empty() {
            return Err(ApiError::InvalidInput("Cannot submit an empty batch".to_string()));
        }
        let input_file_id = self.upload(encode_request_lines(records)?).await?;
        tracing::debug!(input_file_id = %input_file_id, records = records.len(), "Uploaded batch input");

        let response = self
            .authorize(self.client.post(format!("{}/batches", self.base_url)))
            .json(&json!({
                "input_file_id": input_file_id,
                "endpoint": CHAT_COMPLETIONS_URL,
                "completion_window": self.completion_window,
            }))
            .send()
            .await
            .map_err(map_http_error)?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| ApiError::MalformedResponse(format!("Failed to parse batch object: {}", e)))?;
        Ok(JobHandle(batch.id))
    }

    async fn status(&self, handle: &JobHandle) -> Result<StatusReport, ApiError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/batches/{}", self.base_url, handle.as_str())),
            )
            .send()
            .await
            .map_err(map_http_error)?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| ApiError::MalformedResponse(format!("Failed to parse batch object: {}", e)))?;
        Ok(StatusReport {
            status: JobStatus::from_remote(&batch.status),
            remote_status: batch.status,
            output_ref: batch.output_file_id,
            error_ref: batch.error_file_id,
        })
    }

    async fn fetch(&self, file_ref: &str) -> Result<Vec<OutputLine>, ApiError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/files/{}/content", self.base_url, file_ref)),
            )
            .send()
            .await
            .map_err(map_http_error)?;
        if !response.status().is_success() {
            return Err(error_body(response).await);
        }
        let content = response.text().await.map_err(map_http_error)?;
        Ok(parse_output_lines(&content))
    }
}
