//! CLI route: one dispatch table from parsed commands to the fan-out and batch services.

use crate::batch::{BatchJobDriver, BatchOutcome, BatchRunner, JsonFileHandler, LogHandler};
use crate::cli::parse::{BuiltinSchema, Commands, TaskArgs};
use crate::config::{ConfigLoader, TextbatchConfig};
use crate::error::ApiError;
use crate::executor::ValidationRetryExecutor;
use crate::fanout::FanOutScheduler;
use crate::provider::{ProviderConfig, ProviderRegistry};
use crate::task::{InputItem, OutputSchema, TaskDescriptor, TaskEncoder, TaskMode};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime context for CLI execution: workspace, loaded config and provider choice.
pub struct RunContext {
    workspace_root: PathBuf,
    config: TextbatchConfig,
    registry: ProviderRegistry,
    provider_override: Option<String>,
}

impl RunContext {
    pub fn new(
        workspace_root: PathBuf,
        config_path: Option<PathBuf>,
        provider_override: Option<String>,
    ) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self::from_config(workspace_root, config, provider_override))
    }

    pub fn from_config(
        workspace_root: PathBuf,
        config: TextbatchConfig,
        provider_override: Option<String>,
    ) -> Self {
        let registry = ProviderRegistry::from_config(&config);
        Self {
            workspace_root,
            config,
            registry,
            provider_override,
        }
    }

    pub fn config(&self) -> &TextbatchConfig {
        &self.config
    }

    /// Execute a CLI command and return the text to print.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to start async runtime: {}", e)))?;
        runtime.block_on(self.execute_async(command))
    }

    pub async fn execute_async(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Fanout {
                task,
                concurrency,
                max_retries,
                temperature,
                raise_on_error,
                analyze,
            } => {
                let mut descriptor = load_descriptor(task)?;
                if let Some(path) = analyze {
                    descriptor = descriptor.with_mode(TaskMode::WithAnalysis {
                        analyze_instructions: read_text(path)?,
                    });
                }
                let inputs = load_inputs(&task.input)?;

                let mut options = self.config.fanout.to_options();
                if let Some(limit) = concurrency {
                    options.concurrency_limit = *limit;
                }
                if let Some(retries) = max_retries {
                    options.max_retries = *retries;
                }
                if let Some(t) = temperature {
                    options.base_temperature = *t;
                }
                options.raise_on_error |= *raise_on_error;

                let (name, provider) = self.provider()?;
                let executor = ValidationRetryExecutor::new(
                    self.registry.create_client(&name)?,
                    encoder_for(provider),
                )
                .with_request_timeout(self.config.fanout.request_timeout());
                let scheduler = FanOutScheduler::new(Arc::new(executor));

                let results = scheduler.process_inputs(inputs, &descriptor, &options).await?;
                to_json(&results)
            }
            Commands::Batch { task, job_name } => {
                let descriptor = load_descriptor(task)?;
                let inputs = load_inputs(&task.input)?;
                let driver = self.driver()?;
                let output_dir = self.config.batch.output_path(&self.workspace_root);
                let driver = driver
                    .with_handler(Arc::new(LogHandler))
                    .with_handler(Arc::new(JsonFileHandler::new(&output_dir)));

                let runner = BatchRunner::new(Arc::new(driver), self.config.batch.partition_config());
                let outcome = runner.run_inputs(job_name, inputs, &descriptor).await?;
                to_json(&summarize(&outcome, &output_dir))
            }
            Commands::Status { job_name } => {
                let record = self.driver()?.poll(job_name).await?;
                to_json(&record)
            }
            Commands::Clear { job_name } => {
                let store = self.config.batch.open_store(&self.workspace_root)?;
                let existed = store.load(job_name)?.is_some();
                store.clear(job_name)?;
                info!(job_name = %job_name, existed, "Cleared job record");
                Ok(if existed {
                    format!("Cleared job record '{}'", job_name)
                } else {
                    format!("No job record for '{}'", job_name)
                })
            }
        }
    }

    fn provider(&self) -> Result<(String, &ProviderConfig), ApiError> {
        let name = self
            .config
            .resolve_provider_name(self.provider_override.as_deref())?;
        let provider = self.registry.get_or_error(&name)?;
        debug!(provider = %name, model = %provider.model, "Resolved provider");
        Ok((name, provider))
    }

    fn driver(&self) -> Result<BatchJobDriver, ApiError> {
        let (name, provider) = self.provider()?;
        let service = self
            .registry
            .create_batch_client(&name, &self.config.batch.completion_window)?;
        let store = self.config.batch.open_store(&self.workspace_root)?;
        Ok(BatchJobDriver::new(
            service,
            store,
            encoder_for(provider),
            self.config.batch.driver_config(),
        ))
    }
}

fn encoder_for(provider: &ProviderConfig) -> TaskEncoder {
    let mut encoder = TaskEncoder::new(provider.model.clone());
    if let Some(max_tokens) = provider.default_options.max_tokens {
        encoder = encoder.with_extra("max_tokens", json!(max_tokens));
    }
    if let Some(top_p) = provider.default_options.top_p {
        encoder = encoder.with_extra("top_p", json!(top_p));
    }
    encoder
}

fn read_text(path: &Path) -> Result<String, ApiError> {
    std::fs::read_to_string(path)
        .map_err(|e| ApiError::InvalidInput(format!("Failed to read {}: {}", path.display(), e)))
}

fn load_inputs(path: &Path) -> Result<Vec<InputItem>, ApiError> {
    serde_json::from_str(&read_text(path)?).map_err(|e| {
        ApiError::InvalidInput(format!(
            "{} must be a JSON array of strings or {{\"id\", \"text\"}} objects: {}",
            path.display(),
            e
        ))
    })
}

fn load_descriptor(task: &TaskArgs) -> Result<TaskDescriptor, ApiError> {
    let schema = match (&task.schema, task.output_type) {
        (Some(path), _) => serde_json::from_str::<OutputSchema>(&read_text(path)?).map_err(|e| {
            ApiError::InvalidInput(format!("Invalid schema file {}: {}", path.display(), e))
        })?,
        (None, Some(builtin)) => builtin_schema(builtin),
        (None, None) => {
            return Err(ApiError::InvalidInput(
                "Pass --schema or --output-type".to_string(),
            ))
        }
    };

    let mut descriptor = TaskDescriptor::new(schema, read_text(&task.instructions)?);
    if let Some(lang) = &task.output_lang {
        descriptor = descriptor.with_output_lang(lang.clone());
    }
    if let Some(prompt) = &task.user_prompt {
        descriptor = descriptor.with_user_prompt(prompt.clone());
    }
    Ok(descriptor)
}

fn builtin_schema(builtin: BuiltinSchema) -> OutputSchema {
    match builtin {
        BuiltinSchema::String => OutputSchema::string_result(),
        BuiltinSchema::Bool => OutputSchema::bool_result(),
        BuiltinSchema::StringList => OutputSchema::string_list_result(),
        BuiltinSchema::EntityList => OutputSchema::entity_list_result(),
        BuiltinSchema::ReasonList => OutputSchema::reason_list_result(),
    }
}

fn summarize(outcome: &BatchOutcome, output_dir: &Path) -> Value {
    json!({
        "job_name": outcome.job_name,
        "succeeded": outcome.success_count(),
        "failed": outcome.failure_count(),
        "missing": outcome.missing,
        "output_dir": output_dir.display().to_string(),
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::InvalidInput(format!("Failed to render output: {}", e)))
}
