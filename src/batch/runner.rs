//! Drives every partition of a job through the driver, in order.

use crate::batch::driver::BatchJobDriver;
use crate::batch::partition::{named_partitions, PartitionConfig};
use crate::batch::store::check_job_name;
use crate::batch::BatchOutcome;
use crate::error::ApiError;
use crate::task::{ensure_unique_ids, resolve_items, InputItem, TaskDescriptor, WorkItem};
use std::sync::Arc;
use tracing::info;

pub struct BatchRunner {
    driver: Arc<BatchJobDriver>,
    partition_config: PartitionConfig,
}

impl BatchRunner {
    pub fn new(driver: Arc<BatchJobDriver>, partition_config: PartitionConfig) -> Self {
        Self {
            driver,
            partition_config,
        }
    }

    pub fn driver(&self) -> &Arc<BatchJobDriver> {
        &self.driver
    }

    pub async fn run_inputs(
        &self,
        job_name: &str,
        inputs: Vec<InputItem>,
        descriptor: &TaskDescriptor,
    ) -> Result<BatchOutcome, ApiError> {
        let items = resolve_items(inputs)?;
        self.run(job_name, &items, descriptor).await
    }

    /// Merged outcome of all partitions, named after `job_name`.
    pub async fn run(
        &self,
        job_name: &str,
        items: &[WorkItem],
        descriptor: &TaskDescriptor,
    ) -> Result<BatchOutcome, ApiError> {
        check_job_name(job_name).map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        ensure_unique_ids(items)?;
        let partitions = named_partitions(job_name, items, descriptor, &self.partition_config)?;
        info!(job_name, items = items.len(), partitions = partitions.len(), "Running batch job");

        let mut merged = BatchOutcome {
            job_name: job_name.to_string(),
            ..Default::default()
        };
        for partition in partitions {
            let outcome = self
                .driver
                .run(&partition.items, descriptor, &partition.job_name)
                .await?;
            merged.merge(outcome);
        }

        info!(
            job_name,
            succeeded = merged.success_count(),
            failed = merged.failure_count(),
            missing = merged.missing.len(),
            "Batch job finished"
        );
        Ok(merged)
    }
}
