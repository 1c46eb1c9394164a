//! Shared test doubles for integration tests
//!
//! `MockProvider` answers chat completions by echoing the user text into a
//! `{"result": ...}` object unless a reply is scripted for that text.
//! `MockBatchService` answers every submitted record from an in-memory output file.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use textbatch::error::ApiError;
use textbatch::provider::batch::{
    parse_output_lines, BatchServiceClient, JobHandle, JobStatus, OutputLine, StatusReport,
};
use textbatch::provider::{
    ChatMessage, CompletionOptions, CompletionResponse, ModelProviderClient, TokenUsage,
};
use textbatch::task::{RequestRecord, WorkItem};

#[derive(Debug, Clone)]
pub enum MockReply {
    Content(String),
    Transient,
    Fatal,
}

#[derive(Default)]
pub struct MockProvider {
    scripted: Mutex<HashMap<String, VecDeque<MockReply>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, usize>>,
    temperatures: Mutex<Vec<Option<f32>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    pub fn script(self, text: &str, replies: Vec<MockReply>) -> Self {
        self.scripted
            .lock()
            .insert(text.to_string(), replies.into_iter().collect());
        self
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().get(text).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn temperatures(&self) -> Vec<Option<f32>> {
        self.temperatures.lock().clone()
    }
}

#[async_trait]
impl ModelProviderClient for MockProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ApiError> {
        let text = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        *self.calls.lock().entry(text.clone()).or_insert(0) += 1;
        self.temperatures.lock().push(options.temperature);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self
            .delays
            .get(&text)
            .copied()
            .unwrap_or(Duration::from_millis(2));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .scripted
            .lock()
            .get_mut(&text)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| MockReply::Content(json!({ "result": text }).to_string()));

        match reply {
            MockReply::Content(content) => Ok(CompletionResponse {
                content,
                model: "mock-model".to_string(),
                usage: TokenUsage {
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    total_tokens: 10,
                },
                finish_reason: Some("stop".to_string()),
            }),
            MockReply::Transient => Err(ApiError::ProviderRequestFailed("connection reset".into())),
            MockReply::Fatal => Err(ApiError::ProviderAuthFailed("invalid api key".into())),
        }
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Remote statuses reported for one submission, in order; `completed` once exhausted.
#[derive(Default)]
pub struct MockBatchService {
    submissions: Mutex<Vec<Vec<RequestRecord>>>,
    status_scripts: Mutex<VecDeque<VecDeque<&'static str>>>,
    remote_failures: HashMap<String, String>,
    dropped: HashSet<String>,
    garbage_lines: usize,
    status_calls: AtomicUsize,
}

impl MockBatchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses for the next submission, consumed one per poll.
    pub fn with_statuses(self, statuses: Vec<&'static str>) -> Self {
        self.status_scripts
            .lock()
            .push_back(statuses.into_iter().collect());
        self
    }

    pub fn failing(mut self, id: &str, message: &str) -> Self {
        self.remote_failures
            .insert(id.to_string(), message.to_string());
        self
    }

    pub fn dropping(mut self, id: &str) -> Self {
        self.dropped.insert(id.to_string());
        self
    }

    pub fn with_garbage_lines(mut self, count: usize) -> Self {
        self.garbage_lines = count;
        self
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().len()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn submitted_ids(&self, submission: usize) -> Vec<String> {
        self.submissions.lock()[submission]
            .iter()
            .map(|r| r.custom_id.clone())
            .collect()
    }

    fn submission_index(handle: &JobHandle) -> Result<usize, ApiError> {
        handle
            .as_str()
            .trim_start_matches("batch_")
            .parse()
            .map_err(|_| ApiError::ProviderModelNotFound(format!("Unknown batch {}", handle)))
    }

    fn output_file(&self, index: usize) -> String {
        let submissions = self.submissions.lock();
        let mut lines = Vec::new();
        for record in &submissions[index] {
            if self.dropped.contains(&record.custom_id) {
                continue;
            }
            let line = match self.remote_failures.get(&record.custom_id) {
                Some(message) => json!({
                    "custom_id": record.custom_id,
                    "response": {"status_code": 500, "body": {"error": {"message": message}}},
                    "error": null
                }),
                None => {
                    let text = &record.body.messages.last().unwrap().content;
                    json!({
                        "custom_id": record.custom_id,
                        "response": {
                            "status_code": 200,
                            "body": {"choices": [{"message": {
                                "role": "assistant",
                                "content": json!({"result": text}).to_string()
                            }}]}
                        },
                        "error": null
                    })
                }
            };
            lines.push(line.to_string());
        }
        for _ in 0..self.garbage_lines {
            lines.push("{truncated".to_string());
        }
        lines.join("\n")
    }
}

#[async_trait]
impl BatchServiceClient for MockBatchService {
    async fn submit(&self, records: &[RequestRecord]) -> Result<JobHandle, ApiError> {
        let mut submissions = self.submissions.lock();
        submissions.push(records.to_vec());
        Ok(JobHandle(format!("batch_{}", submissions.len() - 1)))
    }

    async fn status(&self, handle: &JobHandle) -> Result<StatusReport, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let index = Self::submission_index(handle)?;

        let remote_status = {
            let mut scripts = self.status_scripts.lock();
            let next = scripts.front_mut().and_then(VecDeque::pop_front);
            match next {
                Some(status) => {
                    if status == "failed" || status == "completed" {
                        scripts.pop_front();
                    }
                    status
                }
                None => {
                    scripts.pop_front();
                    "completed"
                }
            }
        };

        let status = JobStatus::from_remote(remote_status);
        Ok(StatusReport {
            status,
            remote_status: remote_status.to_string(),
            output_ref: (status == JobStatus::Completed).then(|| format!("out-{}", index)),
            error_ref: None,
        })
    }

    async fn fetch(&self, file_ref: &str) -> Result<Vec<OutputLine>, ApiError> {
        let index: usize = file_ref
            .trim_start_matches("out-")
            .parse()
            .map_err(|_| ApiError::ProviderModelNotFound(format!("Unknown file {}", file_ref)))?;
        Ok(parse_output_lines(&self.output_file(index)))
    }
}

pub fn items(n: usize) -> Vec<WorkItem> {
    (1..=n)
        .map(|i| WorkItem::new(format!("item-{}", i), format!("text {}", i)))
        .collect()
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
