//! Result Reconciler
//!
//! Turns remote output lines into per-item result records. Per-item problems never
//! fail the call; they become `Failure` records and error-log entries.

use crate::error::ApiError;
use crate::provider::batch::{OutputLine, OutputRecord};
use crate::task::{SchemaValidator, TaskDescriptor};
use crate::types::{FailureKind, FailureReason, ResultRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileError {
    /// Absent when the line could not be decoded far enough to find an id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub results: BTreeMap<String, ResultRecord>,
    pub error_log: Vec<ReconcileError>,
}

/// Fails only when the descriptor's schema cannot be compiled.
pub fn reconcile(lines: &[OutputLine], descriptor: &TaskDescriptor) -> Result<Reconciliation, ApiError> {
    let schema = descriptor.schema.compile()?;
    let mut out = Reconciliation::default();

    for line in lines {
        let record = match line {
            OutputLine::Record(record) => record,
            OutputLine::Undecodable { line, reason } => {
                warn!(line, reason = %reason, "Undecodable output line");
                out.error_log.push(ReconcileError {
                    custom_id: None,
                    kind: FailureKind::DecodeFailed,
                    message: format!("line {}: {}", line, reason),
                });
                continue;
            }
        };

        if out.results.contains_key(&record.custom_id) {
            warn!(custom_id = %record.custom_id, "Duplicate output record ignored");
            continue;
        }

        let result = match classify(record, &schema) {
            Ok(value) => ResultRecord::success(record.custom_id.clone(), value),
            Err(reason) => {
                warn!(custom_id = %record.custom_id, kind = %reason.kind, error = %reason.message, "Item failed in batch output");
                out.error_log.push(ReconcileError {
                    custom_id: Some(record.custom_id.clone()),
                    kind: reason.kind,
                    message: reason.message.clone(),
                });
                ResultRecord::failure(record.custom_id.clone(), reason)
            }
        };
        out.results.insert(record.custom_id.clone(), result);
    }

    Ok(out)
}

fn classify(record: &OutputRecord, schema: &SchemaValidator) -> Result<Value, FailureReason> {
    match (&record.response, &record.error) {
        (Some(response), _) if (200..300).contains(&response.status_code) => {
            let content = completion_content(&response.body)?;
            let value: Value = serde_json::from_str(content).map_err(|e| {
                FailureReason::new(FailureKind::DecodeFailed, format!("Output is not valid JSON: {}", e))
            })?;
            schema
                .check(&value)
                .map_err(|e| FailureReason::new(FailureKind::SchemaViolation, e))?;
            Ok(value)
        }
        (Some(response), _) => Err(FailureReason::new(
            FailureKind::RemoteError,
            response
                .body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_ERROR),
        )),
        (None, Some(error)) => Err(FailureReason::new(
            FailureKind::RemoteError,
            error.message.as_deref().unwrap_or(UNKNOWN_ERROR),
        )),
        (None, None) => Err(FailureReason::new(
            FailureKind::RemoteError,
            "Output record carries neither a response nor an error",
        )),
    }
}

fn completion_content(body: &Value) -> Result<&str, FailureReason> {
    let message = body.pointer("/choices/0/message").ok_or_else(|| {
        FailureReason::new(FailureKind::DecodeFailed, "Response body has no choices")
    })?;
    if let Some(content) = message.get("content").and_then(Value::as_str) {
        return Ok(content);
    }
    let reason = match message.get("refusal").and_then(Value::as_str) {
        Some(refusal) => format!("Model refused request: {}", refusal),
        None => "Response message has no content".to_string(),
    };
    Err(FailureReason::new(FailureKind::DecodeFailed, reason))
}

/// Expected ids with no entry in `results`, in the order given.
pub fn missing_ids<'a, I>(expected: I, results: &BTreeMap<String, ResultRecord>) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    expected
        .into_iter()
        .filter(|id| !results.contains_key(*id) && seen.insert(*id))
        .map(str::to_string)
        .collect()
}
