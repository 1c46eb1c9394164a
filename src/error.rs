//! Error types for bulk request execution.

use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt job record for '{job_name}': {reason}")]
    Corrupt { job_name: String, reason: String },

    #[error("Invalid job name '{0}': must be non-empty and contain no path separators")]
    InvalidJobName(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Execution and provider errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Provider request timed out: {0}")]
    ProviderTimeout(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation rejected output for '{id}' after {attempts} attempts")]
    ValidationRejected { id: String, attempts: u32 },

    #[error("Item '{id}' failed: {reason}")]
    ItemFailed { id: String, reason: String },

    #[error("Batch job '{job_name}' failed after {attempts} submission attempts")]
    JobSubmissionFailed { job_name: String, attempts: u32 },

    #[error("No job record for '{0}'")]
    JobNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl ApiError {
    /// Whether the error may clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::ProviderError(_)
            | ApiError::ProviderRequestFailed(_)
            | ApiError::ProviderRateLimit(_)
            | ApiError::ProviderTimeout(_)
            | ApiError::MalformedResponse(_) => true,
            ApiError::ProviderNotConfigured(_)
            | ApiError::ProviderAuthFailed(_)
            | ApiError::ProviderModelNotFound(_)
            | ApiError::InvalidInput(_)
            | ApiError::ConfigError(_)
            | ApiError::ValidationRejected { .. }
            | ApiError::ItemFailed { .. }
            | ApiError::JobSubmissionFailed { .. }
            | ApiError::JobNotFound(_)
            | ApiError::StorageError(_) => false,
        }
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
