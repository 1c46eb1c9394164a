//! Result handlers invoked with each reconciled job outcome.

use crate::batch::BatchOutcome;
use crate::error::StorageError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub trait ResultHandler: Send + Sync {
    fn handle(&self, outcome: &BatchOutcome) -> Result<(), StorageError>;
}

/// Summarizes the outcome as a log event.
pub struct LogHandler;

impl ResultHandler for LogHandler {
    fn handle(&self, outcome: &BatchOutcome) -> Result<(), StorageError> {
        info!(
            job_name = %outcome.job_name,
            succeeded = outcome.success_count(),
            failed = outcome.failure_count(),
            missing = outcome.missing.len(),
            "Batch results ready"
        );
        Ok(())
    }
}

pub struct NoOpHandler;

impl ResultHandler for NoOpHandler {
    fn handle(&self, _outcome: &BatchOutcome) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Writes `<job>.json` (id to value for successes) and, when anything failed,
/// `<job>_log.json` with the error log and missing ids.
pub struct JsonFileHandler {
    output_dir: PathBuf,
}

impl JsonFileHandler {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn results_path(&self, job_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", job_name))
    }

    pub fn log_path(&self, job_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}_log.json", job_name))
    }
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), StorageError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| StorageError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    fs::write(path, body)?;
    Ok(())
}

impl ResultHandler for JsonFileHandler {
    fn handle(&self, outcome: &BatchOutcome) -> Result<(), StorageError> {
        fs::create_dir_all(&self.output_dir)?;

        let values: BTreeMap<&str, &Value> = outcome
            .results
            .iter()
            .filter_map(|(id, record)| record.value().map(|value| (id.as_str(), value)))
            .collect();
        let results_path = self.results_path(&outcome.job_name);
        write_json(&results_path, &values)?;

        let failures: Vec<_> = outcome
            .results
            .values()
            .filter_map(|record| record.failure_reason().map(|reason| (record.id.as_str(), reason)))
            .collect();
        if !failures.is_empty() || !outcome.error_log.is_empty() || !outcome.missing.is_empty() {
            let log = serde_json::json!({
                "failures": failures
                    .iter()
                    .map(|(id, reason)| serde_json::json!({"id": id, "kind": reason.kind, "message": reason.message}))
                    .collect::<Vec<_>>(),
                "error_log": outcome.error_log,
                "missing": outcome.missing,
            });
            write_json(&self.log_path(&outcome.job_name), &log)?;
        }

        info!(path = %results_path.display(), results = values.len(), "Saved batch results");
        Ok(())
    }
}
