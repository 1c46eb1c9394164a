//! Durable job records keyed by job name.
//!
//! `load` distinguishes "no record" (`Ok(None)`) from "record present but unreadable"
//! (`Err(StorageError::Corrupt)`). The driver treats any record as an active job.

use crate::error::StorageError;
use crate::provider::batch::{JobHandle, JobStatus, StatusReport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const TREE_JOBS: &str = "batch_jobs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_name: String,
    pub remote_handle: JobHandle,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_ref: Option<String>,
    /// 1-based count of submissions made for this job name
    #[serde(default = "first_attempt")]
    pub submission_attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl JobRecord {
    pub fn submitted(job_name: impl Into<String>, remote_handle: JobHandle, submission_attempt: u32) -> Self {
        let now = Utc::now();
        Self {
            job_name: job_name.into(),
            remote_handle,
            status: JobStatus::Submitted,
            created_at: now,
            updated_at: now,
            output_ref: None,
            error_ref: None,
            submission_attempt,
        }
    }

    pub fn apply(&mut self, report: &StatusReport) {
        self.status = report.status;
        self.output_ref = report.output_ref.clone();
        self.error_ref = report.error_ref.clone();
        self.updated_at = Utc::now();
    }
}

pub trait JobStore: Send + Sync {
    fn load(&self, job_name: &str) -> Result<Option<JobRecord>, StorageError>;

    fn save(&self, job_name: &str, record: &JobRecord) -> Result<(), StorageError>;

    /// Remove the record; clearing an absent record is not an error.
    fn clear(&self, job_name: &str) -> Result<(), StorageError>;
}

fn decode(job_name: &str, raw: &[u8]) -> Result<JobRecord, StorageError> {
    serde_json::from_slice(raw).map_err(|e| StorageError::Corrupt {
        job_name: job_name.to_string(),
        reason: e.to_string(),
    })
}

fn encode(record: &JobRecord) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(record)
        .map_err(|e| StorageError::IoError(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Sled tree backend
#[derive(Clone)]
pub struct SledJobStore {
    db: sled::Db,
    jobs: sled::Tree,
}

impl SledJobStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::Backend(format!("Failed to open sled database: {}", e))
        })?;
        Self::new(db)
    }

    pub fn new(db: sled::Db) -> Result<Self, StorageError> {
        let jobs = db.open_tree(TREE_JOBS)?;
        Ok(Self { db, jobs })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }
}

impl JobStore for SledJobStore {
    fn load(&self, job_name: &str) -> Result<Option<JobRecord>, StorageError> {
        let Some(raw) = self.jobs.get(job_name.as_bytes())? else {
            return Ok(None);
        };
        decode(job_name, &raw).map(Some)
    }

    fn save(&self, job_name: &str, record: &JobRecord) -> Result<(), StorageError> {
        self.jobs.insert(job_name.as_bytes(), encode(record)?)?;
        self.jobs.flush()?;
        Ok(())
    }

    fn clear(&self, job_name: &str) -> Result<(), StorageError> {
        self.jobs.remove(job_name.as_bytes())?;
        self.jobs.flush()?;
        Ok(())
    }
}

/// Job names double as file names, so they must stay a single path component.
pub fn check_job_name(job_name: &str) -> Result<(), StorageError> {
    let invalid = job_name.trim().is_empty()
        || job_name == "."
        || job_name == ".."
        || job_name.contains(&['/', '\\', '\0'][..]);
    if invalid {
        return Err(StorageError::InvalidJobName(job_name.to_string()));
    }
    Ok(())
}

/// One JSON file per job under a state directory
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, job_name: &str) -> Result<PathBuf, StorageError> {
        check_job_name(job_name)?;
        Ok(self.dir.join(format!("{}.json", job_name)))
    }
}

impl JobStore for FileJobStore {
    fn load(&self, job_name: &str) -> Result<Option<JobRecord>, StorageError> {
        match fs::read(self.path_for(job_name)?) {
            Ok(raw) => decode(job_name, &raw).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, job_name: &str, record: &JobRecord) -> Result<(), StorageError> {
        let path = self.path_for(job_name)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, encode(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn clear(&self, job_name: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(job_name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process backend; nothing survives the process.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn load(&self, job_name: &str) -> Result<Option<JobRecord>, StorageError> {
        Ok(self.records.read().get(job_name).cloned())
    }

    fn save(&self, job_name: &str, record: &JobRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .insert(job_name.to_string(), record.clone());
        Ok(())
    }

    fn clear(&self, job_name: &str) -> Result<(), StorageError> {
        self.records.write().remove(job_name);
        Ok(())
    }
}
