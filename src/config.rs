//! Configuration System
//!
//! Layered configuration built with the `config` crate. Sources, later overriding
//! earlier: built-in defaults, the global file, the workspace files, and
//! `TEXTBATCH__`-prefixed environment variables (`TEXTBATCH__FANOUT__CONCURRENCY_LIMIT=8`).

use crate::batch::driver::DriverConfig;
use crate::batch::partition::PartitionConfig;
use crate::batch::store::{FileJobStore, JobStore, MemoryJobStore, SledJobStore};
use crate::error::ApiError;
use crate::fanout::FanOutOptions;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use crate::provider::{ProviderConfig, ProviderType};

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use sources::global_file::global_config_path;
pub use sources::workspace_file::ENV_NAME_VAR;

pub const ENV_PREFIX: &str = "TEXTBATCH";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextbatchConfig {
    /// Provider used when the command line names none
    #[serde(default)]
    pub default_provider: Option<String>,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub fanout: FanOutConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutConfig {
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub raise_on_error: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub base_temperature: f32,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            raise_on_error: false,
            max_retries: default_max_retries(),
            base_temperature: 0.0,
            request_timeout_secs: None,
        }
    }
}

impl FanOutConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_limit == 0 {
            return Err("concurrency_limit must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.base_temperature) {
            return Err(format!(
                "base_temperature must be within 0.0..=2.0, got {}",
                self.base_temperature
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err("request_timeout_secs must be positive when set".to_string());
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Scheduler options without a validator; callers attach one when needed.
    pub fn to_options(&self) -> FanOutOptions {
        FanOutOptions {
            concurrency_limit: self.concurrency_limit,
            raise_on_error: self.raise_on_error,
            max_retries: self.max_retries,
            base_temperature: self.base_temperature,
            validator: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sled,
    File,
    Memory,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Sled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_items_per_partition")]
    pub max_items_per_partition: usize,
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: u64,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_failure_backoff_secs")]
    pub failure_backoff_secs: u64,
    /// Unset resubmits a failed job indefinitely
    #[serde(default)]
    pub max_submission_attempts: Option<u32>,
    #[serde(default = "default_true")]
    pub remove_on_completion: bool,
    #[serde(default = "default_completion_window")]
    pub completion_window: String,
    #[serde(default)]
    pub store: StoreBackend,
    /// Relative paths resolve against the workspace root
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_max_items_per_partition() -> usize {
    100
}

fn default_max_total_tokens() -> u64 {
    2_000_000
}

fn default_chars_per_token() -> f64 {
    2.7
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_failure_backoff_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_completion_window() -> String {
    "24h".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".batch_jobs")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("batch_results")
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items_per_partition: default_max_items_per_partition(),
            max_total_tokens: default_max_total_tokens(),
            chars_per_token: default_chars_per_token(),
            poll_interval_secs: default_poll_interval_secs(),
            failure_backoff_secs: default_failure_backoff_secs(),
            max_submission_attempts: None,
            remove_on_completion: true,
            completion_window: default_completion_window(),
            store: StoreBackend::default(),
            state_dir: default_state_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.partition_config()
            .validate()
            .map_err(|e| e.to_string())?;
        if self.max_submission_attempts == Some(0) {
            return Err("max_submission_attempts must be positive when set".to_string());
        }
        if self.completion_window.trim().is_empty() {
            return Err("completion_window cannot be empty".to_string());
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err("state_dir cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            max_items_per_partition: self.max_items_per_partition,
            max_total_tokens: self.max_total_tokens,
            chars_per_token: self.chars_per_token,
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            failure_backoff: Duration::from_secs(self.failure_backoff_secs),
            remove_on_completion: self.remove_on_completion,
            max_submission_attempts: self.max_submission_attempts,
        }
    }

    pub fn state_path(&self, workspace_root: &Path) -> PathBuf {
        resolve(workspace_root, &self.state_dir)
    }

    pub fn output_path(&self, workspace_root: &Path) -> PathBuf {
        resolve(workspace_root, &self.output_dir)
    }

    pub fn open_store(&self, workspace_root: &Path) -> Result<Arc<dyn JobStore>, ApiError> {
        let state = self.state_path(workspace_root);
        let store: Arc<dyn JobStore> = match self.store {
            StoreBackend::Sled => Arc::new(SledJobStore::open(state.join("jobs.sled"))?),
            StoreBackend::File => Arc::new(FileJobStore::new(state)?),
            StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
        };
        Ok(store)
    }
}

fn resolve(workspace_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace_root.join(path)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Provider(String, String),
    FanOut(String),
    Batch(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(name, msg) => write!(f, "Provider '{}': {}", name, msg),
            ValidationError::FanOut(msg) => write!(f, "Fan-out: {}", msg),
            ValidationError::Batch(msg) => write!(f, "Batch: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl TextbatchConfig {
    /// Every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (name, provider) in &self.providers {
            if let Err(msg) = provider.validate() {
                errors.push(ValidationError::Provider(name.clone(), msg));
            }
        }
        if let Some(default) = &self.default_provider {
            if !self.providers.contains_key(default) {
                errors.push(ValidationError::Provider(
                    default.clone(),
                    "default_provider is not defined under [providers]".to_string(),
                ));
            }
        }
        if let Err(msg) = self.fanout.validate() {
            errors.push(ValidationError::FanOut(msg));
        }
        if let Err(msg) = self.batch.validate() {
            errors.push(ValidationError::Batch(msg));
        }
        if let Err(msg) = self.logging.validate() {
            errors.push(ValidationError::Logging(msg));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Requested provider, else the configured default, else the only one defined.
    pub fn resolve_provider_name(&self, requested: Option<&str>) -> Result<String, ApiError> {
        if let Some(name) = requested.or(self.default_provider.as_deref()) {
            return Ok(name.to_string());
        }
        let mut names = self.providers.keys();
        match (names.next(), names.next()) {
            (Some(only), None) => Ok(only.clone()),
            (None, _) => Err(ApiError::ProviderNotConfigured(
                "No providers configured".to_string(),
            )),
            _ => Err(ApiError::ConfigError(
                "Several providers configured; pass --provider or set default_provider"
                    .to_string(),
            )),
        }
    }
}

fn validation_failure(errors: Vec<ValidationError>) -> ApiError {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    ApiError::ConfigError(format!("Invalid configuration: {}", messages.join("; ")))
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for `workspace_root` from every layered source.
    pub fn load(workspace_root: &Path) -> Result<TextbatchConfig, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(environment());
        Self::finish(builder)
    }

    /// Load a single file, still honoring defaults and environment overrides.
    pub fn load_from_file(path: &Path) -> Result<TextbatchConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let builder = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path).required(true))
            .add_source(environment());
        Self::finish(builder)
    }

    pub fn default() -> TextbatchConfig {
        TextbatchConfig::default()
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<TextbatchConfig, ApiError> {
        let config: TextbatchConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(validation_failure)?;
        Ok(config)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
