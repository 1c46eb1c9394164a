//! Deferred batch path
//!
//! Items are partitioned under a token budget, each partition is submitted as one remote
//! job, and the job's output is reconciled back into per-item results once the remote
//! service reports a terminal status.

pub mod driver;
pub mod handler;
pub mod partition;
pub mod reconcile;
pub mod runner;
pub mod store;

use crate::types::ResultRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use driver::{BatchJobDriver, DriverConfig, StartOutcome};
pub use handler::{JsonFileHandler, LogHandler, NoOpHandler, ResultHandler};
pub use partition::{partition, Partition, PartitionConfig};
pub use reconcile::{reconcile, ReconcileError, Reconciliation};
pub use runner::BatchRunner;
pub use store::{check_job_name, FileJobStore, JobRecord, JobStore, MemoryJobStore, SledJobStore};

/// Reconciled results of one job (or of all partitions of a job).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub job_name: String,
    pub results: BTreeMap<String, ResultRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_log: Vec<ReconcileError>,
    /// Submitted ids with no line in the remote output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl BatchOutcome {
    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    /// Fold another partition's outcome into this one.
    pub fn merge(&mut self, other: BatchOutcome) {
        for (id, record) in other.results {
            self.results.entry(id).or_insert(record);
        }
        self.error_log.extend(other.error_log);
        self.missing.extend(other.missing);
    }
}
