//! Bounded-Concurrency Fan-Out Scheduler
//!
//! Runs the validation-retry executor for every item of a submission with at most
//! `concurrency_limit` executions in flight. Results are indexed by input position, so
//! the returned list is always in input order.

use crate::error::ApiError;
use crate::executor::{AttemptOutcome, ValidationRetryExecutor, Validator};
use crate::task::{ensure_unique_ids, resolve_items, InputItem, TaskDescriptor, WorkItem};
use crate::types::{CompletionMetadata, FailureKind, FailureReason, ResultRecord};
use futures::future::{join_all, try_join_all};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

#[derive(Clone)]
pub struct FanOutOptions {
    pub concurrency_limit: usize,
    /// Abort the whole fan-out on the first item failure
    pub raise_on_error: bool,
    pub max_retries: u32,
    pub base_temperature: f32,
    pub validator: Option<Validator>,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            raise_on_error: false,
            max_retries: 3,
            base_temperature: 0.0,
            validator: None,
        }
    }
}

impl FanOutOptions {
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }
}

pub struct FanOutScheduler {
    executor: Arc<ValidationRetryExecutor>,
}

impl FanOutScheduler {
    pub fn new(executor: Arc<ValidationRetryExecutor>) -> Self {
        Self { executor }
    }

    pub async fn process_inputs(
        &self,
        inputs: Vec<InputItem>,
        descriptor: &TaskDescriptor,
        options: &FanOutOptions,
    ) -> Result<Vec<ResultRecord>, ApiError> {
        let items = resolve_items(inputs)?;
        self.process(&items, descriptor, options).await
    }

    /// One record per item, in input order.
    ///
    /// Configuration problems (zero concurrency, missing schema, duplicate ids, a
    /// validator without a retry budget) fail the call before any request is made.
    pub async fn process(
        &self,
        items: &[WorkItem],
        descriptor: &TaskDescriptor,
        options: &FanOutOptions,
    ) -> Result<Vec<ResultRecord>, ApiError> {
        if options.concurrency_limit == 0 {
            return Err(ApiError::InvalidInput(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if options.validator.is_some() && options.max_retries == 0 {
            return Err(ApiError::InvalidInput(
                "max_retries must be positive when a validator is supplied".to_string(),
            ));
        }
        ensure_unique_ids(items)?;
        let schema = descriptor.schema.compile()?;

        let total = items.len();
        let limit = options.concurrency_limit;
        let semaphore = Semaphore::new(limit);
        let processed = AtomicUsize::new(0);

        info!(items = total, concurrency_limit = limit, "Starting fan-out");

        let tasks = items.iter().map(|item| {
            let semaphore = &semaphore;
            let processed = &processed;
            let schema = &schema;
            async move {
                let permit = semaphore.acquire().await.map_err(|_| {
                    ApiError::ProviderError("Concurrency limiter closed".to_string())
                })?;
                let outcome = self
                    .executor
                    .run_compiled(
                        item,
                        descriptor,
                        schema,
                        options.validator.as_ref(),
                        options.max_retries,
                        options.base_temperature,
                    )
                    .await;
                drop(permit);

                let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                if is_progress_point(done, total, limit) {
                    info!(processed = done, total, "Fan-out progress");
                }
                into_record(item, outcome, options.raise_on_error)
            }
        });

        if options.raise_on_error {
            try_join_all(tasks).await
        } else {
            join_all(tasks).await.into_iter().collect()
        }
    }
}

/// Progress is reported after every `limit` completions and after the last one.
fn is_progress_point(done: usize, total: usize, limit: usize) -> bool {
    done % limit == 0 || done == total
}

fn into_record(
    item: &WorkItem,
    outcome: AttemptOutcome,
    raise_on_error: bool,
) -> Result<ResultRecord, ApiError> {
    let reason = match outcome {
        AttemptOutcome::Success(completion) => {
            debug!(item_id = %item.id, attempts = completion.attempts, "Item completed");
            let metadata = CompletionMetadata {
                attempts: completion.attempts,
                model: completion.model,
                analysis: completion.analysis,
                usage: completion.usage,
            };
            return Ok(
                ResultRecord::success(item.id.clone(), completion.value).with_metadata(metadata)
            );
        }
        AttemptOutcome::ValidationRejected { attempts } => {
            if raise_on_error {
                return Err(ApiError::ValidationRejected {
                    id: item.id.clone(),
                    attempts,
                });
            }
            FailureReason::new(
                FailureKind::ValidationRejected,
                format!("Output rejected by validator after {} attempts", attempts),
            )
        }
        AttemptOutcome::TransientError { message, .. } => {
            FailureReason::new(FailureKind::Transient, message)
        }
        AttemptOutcome::FatalError { message } => FailureReason::new(FailureKind::Fatal, message),
    };

    if raise_on_error {
        return Err(ApiError::ItemFailed {
            id: item.id.clone(),
            reason: reason.to_string(),
        });
    }
    Ok(ResultRecord::failure(item.id.clone(), reason))
}
