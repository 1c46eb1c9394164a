//! Result records shared by the fan-out and batch paths.

use crate::provider::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Per-item failure classification.
///
/// `DecodeFailed`, `SchemaViolation` and `RemoteError` are produced only by batch
/// reconciliation; the remaining kinds come from the single-item executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationRejected,
    Transient,
    Fatal,
    DecodeFailed,
    SchemaViolation,
    RemoteError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ValidationRejected => "validation_rejected",
            FailureKind::Transient => "transient",
            FailureKind::Fatal => "fatal",
            FailureKind::DecodeFailed => "decode_failed",
            FailureKind::SchemaViolation => "schema_violation",
            FailureKind::RemoteError => "remote_error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success(Value),
    Failure(FailureReason),
}

/// Details of the live completion behind a fan-out success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub attempts: u32,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    pub usage: TokenUsage,
}

/// Final result for one work item. At most one exists per item id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub outcome: ItemOutcome,
    /// Set only for fan-out successes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CompletionMetadata>,
}

impl ResultRecord {
    pub fn success(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            outcome: ItemOutcome::Success(value),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: CompletionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn failure(id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            id: id.into(),
            outcome: ItemOutcome::Failure(reason),
            metadata: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            ItemOutcome::Success(value) => Some(value),
            ItemOutcome::Failure(_) => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.outcome {
            ItemOutcome::Success(_) => None,
            ItemOutcome::Failure(reason) => Some(reason),
        }
    }
}
