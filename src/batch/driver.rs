//! Batch Job Driver
//!
//! State machine for one remote job: `NEW -> SUBMITTED -> POLLING -> COMPLETED | FAILED`.
//! The job store record is the only state the driver keeps between calls, so a process
//! that restarts picks up a running job instead of submitting it again.

use crate::batch::handler::ResultHandler;
use crate::batch::reconcile::{missing_ids, reconcile};
use crate::batch::store::{check_job_name, JobRecord, JobStore};
use crate::batch::BatchOutcome;
use crate::error::ApiError;
use crate::provider::batch::{BatchServiceClient, JobStatus, OutputLine};
use crate::task::{TaskDescriptor, TaskEncoder, TaskMode, WorkItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub poll_interval: Duration,
    pub failure_backoff: Duration,
    /// Clear the job record once results have been handled
    pub remove_on_completion: bool,
    /// Unset means a failed job is resubmitted indefinitely
    pub max_submission_attempts: Option<u32>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            failure_backoff: Duration::from_secs(10),
            remove_on_completion: true,
            max_submission_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// A record already existed; nothing was submitted
    AlreadyRunning(JobRecord),
    Submitted(JobRecord),
}

impl StartOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            StartOutcome::AlreadyRunning(record) | StartOutcome::Submitted(record) => record,
        }
    }
}

pub struct BatchJobDriver {
    service: Arc<dyn BatchServiceClient>,
    store: Arc<dyn JobStore>,
    encoder: TaskEncoder,
    config: DriverConfig,
    handlers: Vec<Arc<dyn ResultHandler>>,
}

impl BatchJobDriver {
    pub fn new(
        service: Arc<dyn BatchServiceClient>,
        store: Arc<dyn JobStore>,
        encoder: TaskEncoder,
        config: DriverConfig,
    ) -> Self {
        Self {
            service,
            store,
            encoder,
            config,
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ResultHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Submit `items` as one remote job unless a record for `job_name` already exists.
    pub async fn start(
        &self,
        items: &[WorkItem],
        descriptor: &TaskDescriptor,
        job_name: &str,
    ) -> Result<StartOutcome, ApiError> {
        self.start_attempt(items, descriptor, job_name, 1).await
    }

    async fn start_attempt(
        &self,
        items: &[WorkItem],
        descriptor: &TaskDescriptor,
        job_name: &str,
        attempt: u32,
    ) -> Result<StartOutcome, ApiError> {
        check_job_name(job_name).map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        if let Some(existing) = self.store.load(job_name)? {
            info!(job_name, status = %existing.status, "Job already running, skipping submission");
            return Ok(StartOutcome::AlreadyRunning(existing));
        }
        if let TaskMode::WithAnalysis { .. } = descriptor.mode {
            return Err(ApiError::InvalidInput(
                "Analysis mode is not supported for batch jobs".to_string(),
            ));
        }
        if items.is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "Job '{}' has no items to submit",
                job_name
            )));
        }

        let records = self.encoder.encode_all(items, descriptor)?;
        let handle = self.service.submit(&records).await?;
        let record = JobRecord::submitted(job_name, handle, attempt);
        self.store.save(job_name, &record)?;

        info!(
            job_name,
            remote_handle = %record.remote_handle,
            items = records.len(),
            attempt,
            "Submitted batch job"
        );
        Ok(StartOutcome::Submitted(record))
    }

    /// Query the remote status once and persist it.
    pub async fn poll(&self, job_name: &str) -> Result<JobRecord, ApiError> {
        let mut record = self
            .store
            .load(job_name)?
            .ok_or_else(|| ApiError::JobNotFound(job_name.to_string()))?;
        let report = self.service.status(&record.remote_handle).await?;

        let previous = record.status;
        record.apply(&report);
        self.store.save(job_name, &record)?;

        if previous != record.status {
            info!(
                job_name,
                from = %previous,
                to = %record.status,
                remote_status = %report.remote_status,
                "Batch job status changed"
            );
        } else {
            debug!(job_name, status = %record.status, "Batch job polled");
        }
        Ok(record)
    }

    /// Poll until the job reaches `Completed` or `Failed`. There is no timeout.
    pub async fn wait_for_terminal(&self, job_name: &str) -> Result<JobRecord, ApiError> {
        loop {
            match self.poll(job_name).await {
                Ok(record) if record.status.is_terminal() => return Ok(record),
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    warn!(job_name, error = %err, "Status query failed, will poll again");
                }
                Err(err) => return Err(err),
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Download and reconcile a completed job's output, then run the handlers.
    pub async fn fetch_results(
        &self,
        items: &[WorkItem],
        descriptor: &TaskDescriptor,
        job_name: &str,
    ) -> Result<BatchOutcome, ApiError> {
        let record = self
            .store
            .load(job_name)?
            .ok_or_else(|| ApiError::JobNotFound(job_name.to_string()))?;
        if record.status != JobStatus::Completed {
            return Err(ApiError::InvalidInput(format!(
                "Job '{}' is not completed (status: {})",
                job_name, record.status
            )));
        }

        let mut lines: Vec<OutputLine> = Vec::new();
        for file_ref in [&record.output_ref, &record.error_ref].into_iter().flatten() {
            lines.extend(self.service.fetch(file_ref).await?);
        }

        let reconciliation = reconcile(&lines, descriptor)?;
        let missing = missing_ids(items.iter().map(|item| item.id.as_str()), &reconciliation.results);
        if !missing.is_empty() {
            warn!(job_name, missing = missing.len(), "Items absent from batch output");
        }

        let outcome = BatchOutcome {
            job_name: job_name.to_string(),
            results: reconciliation.results,
            error_log: reconciliation.error_log,
            missing,
        };

        for handler in &self.handlers {
            handler.handle(&outcome)?;
        }
        if self.config.remove_on_completion {
            self.store.clear(job_name)?;
        }
        Ok(outcome)
    }

    /// Drive `start -> poll -> fetch` to completion, resubmitting failed jobs.
    pub async fn run(
        &self,
        items: &[WorkItem],
        descriptor: &TaskDescriptor,
        job_name: &str,
    ) -> Result<BatchOutcome, ApiError> {
        let mut attempt = 1;
        loop {
            let started = self.start_attempt(items, descriptor, job_name, attempt).await?;
            attempt = started.record().submission_attempt;

            let record = self.wait_for_terminal(job_name).await?;
            if record.status == JobStatus::Completed {
                return self.fetch_results(items, descriptor, job_name).await;
            }

            self.store.clear(job_name)?;
            if let Some(max) = self.config.max_submission_attempts {
                if attempt >= max {
                    warn!(job_name, attempts = attempt, "Giving up on failed batch job");
                    return Err(ApiError::JobSubmissionFailed {
                        job_name: job_name.to_string(),
                        attempts: attempt,
                    });
                }
            }
            warn!(
                job_name,
                attempt,
                backoff_ms = self.config.failure_backoff.as_millis() as u64,
                "Batch job failed, resubmitting"
            );
            sleep(self.config.failure_backoff).await;
            attempt += 1;
        }
    }
}
