//! Provider configuration schema and conversion into client descriptors.

use crate::error::ApiError;
use crate::provider::{CompletionOptions, ModelProvider};
use serde::{Deserialize, Serialize};

/// Environment variable consulted when an OpenAI provider has no configured key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[serde(alias = "open_ai")]
    OpenAI,
    Local,
}

pub fn provider_type_slug(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::OpenAI => "openai",
        ProviderType::Local => "local",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry name; filled from the config table key when omitted
    #[serde(default)]
    pub provider_name: Option<String>,

    pub provider_type: ProviderType,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL, e.g. `http://localhost:8000/v1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub default_options: CompletionOptions,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(format!(
                    "Endpoint must start with http:// or https://: {}",
                    endpoint
                ));
            }
        }
        if self.provider_type == ProviderType::Local && self.endpoint.is_none() {
            return Err("Local providers require an endpoint".to_string());
        }
        Ok(())
    }

    pub fn to_model_provider(&self) -> Result<ModelProvider, ApiError> {
        self.validate().map_err(ApiError::ConfigError)?;
        match self.provider_type {
            ProviderType::OpenAI => {
                let api_key = self
                    .api_key
                    .clone()
                    .or_else(|| std::env::var(OPENAI_API_KEY_ENV).ok())
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| {
                        ApiError::ProviderNotConfigured(format!(
                            "No API key for provider '{}' (set api_key or {})",
                            self.provider_name.as_deref().unwrap_or("openai"),
                            OPENAI_API_KEY_ENV
                        ))
                    })?;
                Ok(ModelProvider::OpenAI {
                    model: self.model.clone(),
                    api_key,
                    base_url: self.endpoint.clone(),
                })
            }
            ProviderType::Local => Ok(ModelProvider::LocalCustom {
                model: self.model.clone(),
                endpoint: self.endpoint.clone().unwrap_or_default(),
                api_key: self.api_key.clone(),
            }),
        }
    }
}
