//! Validation-Retry Executor
//!
//! Runs one work item against a chat-completion client. The first attempt uses the base
//! temperature; when a caller predicate rejects the structured output, further attempts
//! are made at a perturbed temperature until one is accepted or the retry budget runs out.

use crate::error::ApiError;
use crate::provider::{ChatMessage, CompletionOptions, ModelProviderClient, TokenUsage};
use crate::task::{SchemaValidator, TaskDescriptor, TaskEncoder, WorkItem};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 1.5;

/// Caller-supplied acceptance predicate over the parsed output.
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Successful completion of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub value: Value,
    pub attempts: u32,
    pub analysis: Option<String>,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Completion),
    ValidationRejected { attempts: u32 },
    TransientError { attempts: u32, message: String },
    FatalError { message: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }

    /// Main-prompt attempts made. Fatal outcomes report zero.
    pub fn attempts(&self) -> u32 {
        match self {
            AttemptOutcome::Success(completion) => completion.attempts,
            AttemptOutcome::ValidationRejected { attempts }
            | AttemptOutcome::TransientError { attempts, .. } => *attempts,
            AttemptOutcome::FatalError { .. } => 0,
        }
    }

    fn fatal(err: ApiError) -> Self {
        AttemptOutcome::FatalError {
            message: err.to_string(),
        }
    }
}

/// Shift `base` by a random magnitude in `[0.1, 0.9)` of random sign, then clamp.
pub fn perturb_temperature<R: Rng + ?Sized>(base: f32, rng: &mut R) -> f32 {
    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    let delta: f32 = rng.gen_range(0.1..0.9);
    (base + sign * delta).clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

fn next_temperature(base: f32) -> f32 {
    let mut rng = rand::thread_rng();
    perturb_temperature(base, &mut rng)
}

pub struct ValidationRetryExecutor {
    client: Arc<dyn ModelProviderClient>,
    encoder: TaskEncoder,
    request_timeout: Option<Duration>,
}

impl ValidationRetryExecutor {
    pub fn new(client: Arc<dyn ModelProviderClient>, encoder: TaskEncoder) -> Self {
        Self {
            client,
            encoder,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn encoder(&self) -> &TaskEncoder {
        &self.encoder
    }

    pub async fn run(
        &self,
        item: &WorkItem,
        descriptor: &TaskDescriptor,
        validator: Option<&Validator>,
        max_retries: u32,
        base_temperature: f32,
    ) -> AttemptOutcome {
        let schema = match descriptor.schema.compile() {
            Ok(schema) => schema,
            Err(err) => return AttemptOutcome::fatal(err),
        };
        self.run_compiled(item, descriptor, &schema, validator, max_retries, base_temperature)
            .await
    }

    /// Same as [`run`](Self::run) with the output schema already compiled.
    pub async fn run_compiled(
        &self,
        item: &WorkItem,
        descriptor: &TaskDescriptor,
        schema: &SchemaValidator,
        validator: Option<&Validator>,
        max_retries: u32,
        base_temperature: f32,
    ) -> AttemptOutcome {
        if validator.is_some() && max_retries == 0 {
            return AttemptOutcome::fatal(ApiError::InvalidInput(
                "max_retries must be positive when a validator is supplied".to_string(),
            ));
        }

        let mut usage = TokenUsage::default();

        let analysis = match self.encoder.analysis_messages(item, descriptor) {
            Ok(Some(messages)) => {
                let options = CompletionOptions {
                    temperature: Some(base_temperature),
                    ..CompletionOptions::default()
                };
                match self.call(messages, options).await {
                    Ok(response) => {
                        usage.add(response.usage);
                        Some(response.content)
                    }
                    Err(err) if err.is_transient() => {
                        warn!(item_id = %item.id, error = %err, "Analysis request failed");
                        return AttemptOutcome::TransientError {
                            attempts: 0,
                            message: err.to_string(),
                        };
                    }
                    Err(err) => return AttemptOutcome::fatal(err),
                }
            }
            Ok(None) => None,
            Err(err) => return AttemptOutcome::fatal(err),
        };

        let record = match self
            .encoder
            .encode_with_analysis(item, descriptor, analysis.as_deref())
        {
            Ok(record) => record,
            Err(err) => return AttemptOutcome::fatal(err),
        };

        let total_attempts = if validator.is_some() { max_retries + 1 } else { 1 };

        for attempt in 1..=total_attempts {
            let temperature = if attempt == 1 {
                base_temperature
            } else {
                next_temperature(base_temperature)
            };
            debug!(item_id = %item.id, attempt, temperature, "Issuing completion");

            let options = record.body.completion_options(temperature);
            let result = match self.call(record.body.messages.clone(), options).await {
                Ok(response) => {
                    usage.add(response.usage);
                    parse_structured(&response.content, schema).map(|value| (value, response.model))
                }
                Err(err) => Err(err),
            };

            match result {
                Ok((value, model)) => {
                    if validator.map_or(true, |accept| accept(&value)) {
                        if attempt > 1 {
                            info!(item_id = %item.id, attempt, "Output accepted after retry");
                        }
                        return AttemptOutcome::Success(Completion {
                            value,
                            attempts: attempt,
                            analysis,
                            model,
                            usage,
                        });
                    }
                    debug!(item_id = %item.id, attempt, "Validator rejected output");
                }
                Err(err) if !err.is_transient() => {
                    warn!(item_id = %item.id, attempt, error = %err, "Fatal provider error");
                    return AttemptOutcome::fatal(err);
                }
                // Only retry attempts absorb transient failures.
                Err(err) if attempt == 1 || attempt == total_attempts => {
                    warn!(item_id = %item.id, attempt, error = %err, "Attempt failed");
                    return AttemptOutcome::TransientError {
                        attempts: attempt,
                        message: err.to_string(),
                    };
                }
                Err(err) => {
                    debug!(item_id = %item.id, attempt, error = %err, "Attempt failed, retrying");
                }
            }
        }

        warn!(item_id = %item.id, attempts = total_attempts, "Validation retries exhausted");
        AttemptOutcome::ValidationRejected {
            attempts: total_attempts,
        }
    }

    async fn call(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<crate::provider::CompletionResponse, ApiError> {
        let request = self.client.complete(messages, options);
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                ApiError::ProviderTimeout(format!("Request exceeded {}ms", limit.as_millis()))
            })?,
            None => request.await,
        }
    }
}

fn parse_structured(content: &str, schema: &SchemaValidator) -> Result<Value, ApiError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| ApiError::MalformedResponse(format!("Output is not valid JSON: {}", e)))?;
    schema
        .check(&value)
        .map_err(|e| ApiError::MalformedResponse(format!("Output violates schema: {}", e)))?;
    Ok(value)
}
