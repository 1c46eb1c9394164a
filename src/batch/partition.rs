//! Token-budgeted partitioning of a submission.

use crate::error::ApiError;
use crate::task::{TaskDescriptor, WorkItem};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub max_items_per_partition: usize,
    pub max_total_tokens: u64,
    pub chars_per_token: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_items_per_partition: 100,
            max_total_tokens: 2_000_000,
            chars_per_token: 2.7,
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.max_items_per_partition == 0 {
            return Err(ApiError::InvalidInput(
                "max_items_per_partition must be at least 1".to_string(),
            ));
        }
        if !(self.chars_per_token > 0.0) {
            return Err(ApiError::InvalidInput(
                "chars_per_token must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// An ordered slice of a submission bound to its remote job name.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub job_name: String,
    pub items: Vec<WorkItem>,
}

/// Estimated tokens for the whole submission, prompt overhead included.
pub fn estimate_tokens(items: &[WorkItem], descriptor: &TaskDescriptor, chars_per_token: f64) -> f64 {
    let content: usize = items.iter().map(WorkItem::content_length).sum();
    let overhead = descriptor.instruction_overhead() * items.len();
    (content + overhead) as f64 / chars_per_token
}

/// Split `items` into ordered chunks. Under budget everything stays in one chunk.
pub fn partition(
    items: &[WorkItem],
    descriptor: &TaskDescriptor,
    config: &PartitionConfig,
) -> Result<Vec<Vec<WorkItem>>, ApiError> {
    config.validate()?;
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let estimated = estimate_tokens(items, descriptor, config.chars_per_token);
    if estimated < config.max_total_tokens as f64 {
        return Ok(vec![items.to_vec()]);
    }

    Ok(items
        .chunks(config.max_items_per_partition)
        .map(<[WorkItem]>::to_vec)
        .collect())
}

pub fn partition_job_name(job_name: &str, index: usize, count: usize) -> String {
    if count > 1 {
        format!("{}_part_{}", job_name, index + 1)
    } else {
        job_name.to_string()
    }
}

/// [`partition`] with each chunk bound to its job name.
pub fn named_partitions(
    job_name: &str,
    items: &[WorkItem],
    descriptor: &TaskDescriptor,
    config: &PartitionConfig,
) -> Result<Vec<Partition>, ApiError> {
    let chunks = partition(items, descriptor, config)?;
    let count = chunks.len();
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(index, items)| Partition {
            job_name: partition_job_name(job_name, index, count),
            items,
        })
        .collect())
}
