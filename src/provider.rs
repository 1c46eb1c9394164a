//! Model Provider Abstraction
//!
//! Chat-completion clients for OpenAI-compatible services. Every request made by the
//! fan-out path goes through [`ModelProviderClient::complete`]; the deferred batch path
//! talks to the remote service through [`batch::BatchServiceClient`].

use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod batch;
pub mod profile;

pub use profile::{ProviderConfig, ProviderType};

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelProvider {
    OpenAI {
        model: String,
        api_key: String,
        base_url: Option<String>, // For custom endpoints (e.g., Azure OpenAI)
    },
    LocalCustom {
        model: String,
        endpoint: String, // Full endpoint URL (e.g., http://localhost:8000/v1)
        api_key: Option<String>,
    },
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Completion options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>, // 0.0-2.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Structured-output contract, sent verbatim as `response_format`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    /// Further body fields (e.g. `priority`), sent at the top level of the request
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// Model provider client trait
#[async_trait]
pub trait ModelProviderClient: Send + Sync {
    /// Generate a completion from a list of messages
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ApiError>;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Get the model name
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a Value>,
    stream: bool,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

// Helper function to map transport errors to ApiError
pub(crate) fn map_http_error(error: reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        map_status_error(status, &error.to_string())
    } else if error.is_timeout() {
        ApiError::ProviderTimeout(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ApiError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        ApiError::ProviderError(format!("HTTP error: {}", error))
    }
}

// Helper function to map non-success HTTP statuses to ApiError
pub(crate) fn map_status_error(status: StatusCode, error_text: &str) -> ApiError {
    match status.as_u16() {
        401 | 403 => ApiError::ProviderAuthFailed(format!("Authentication failed: {}", error_text)),
        404 => ApiError::ProviderModelNotFound(format!("Not found: {}", error_text)),
        400 | 422 => ApiError::InvalidInput(format!("Request rejected: {}", error_text)),
        408 | 504 => ApiError::ProviderTimeout(format!("Request timeout: {}", error_text)),
        429 => ApiError::ProviderRateLimit(format!("Rate limit exceeded: {}", error_text)),
        _ => ApiError::ProviderRequestFailed(format!(
            "Request failed with status {}: {}",
            status, error_text
        )),
    }
}

pub(crate) async fn error_body(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    map_status_error(status, &error_text)
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(900);

pub(crate) fn build_provider_http_client() -> Result<Client, ApiError> {
    Client::builder()
        .no_proxy()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .timeout(PROVIDER_HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

/// OpenAI-compatible chat completion client
///
/// Serves both the hosted API and local servers (vLLM, llama.cpp) that expose the
/// same `/chat/completions` surface.
pub struct OpenAIClient {
    client: Client,
    provider_name: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Result<Self, ApiError> {
        let base_url = base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            client: build_provider_http_client()?,
            provider_name: "openai".to_string(),
            model,
            api_key: Some(api_key),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn local(model: String, endpoint: String, api_key: Option<String>) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_provider_http_client()?,
            provider_name: "local".to_string(),
            model,
            api_key,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelProviderClient for OpenAIClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ApiError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            response_format: options.response_format.as_ref(),
            stream: false,
            extra: &options.extra,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut request_builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request_builder
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(error_body(response).await);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::MalformedResponse("No choices in response".to_string()))?;

        let content = match (choice.message.content, choice.message.refusal) {
            (Some(content), _) if !content.trim().is_empty() => content,
            (_, Some(refusal)) => {
                return Err(ApiError::MalformedResponse(format!(
                    "Model refused request: {}",
                    refusal
                )))
            }
            _ => return Err(ApiError::MalformedResponse("Empty completion content".to_string())),
        };

        Ok(CompletionResponse {
            content,
            model: completion.model,
            usage: completion.usage.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Provider factory for creating provider clients
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_client(provider: &ModelProvider) -> Result<Arc<dyn ModelProviderClient>, ApiError> {
        match provider {
            ModelProvider::OpenAI {
                model,
                api_key,
                base_url,
            } => Ok(Arc::new(OpenAIClient::new(
                model.clone(),
                api_key.clone(),
                base_url.clone(),
            )?)),
            ModelProvider::LocalCustom {
                model,
                endpoint,
                api_key,
            } => Ok(Arc::new(OpenAIClient::local(
                model.clone(),
                endpoint.clone(),
                api_key.clone(),
            )?)),
        }
    }

    pub fn create_batch_client(
        provider: &ModelProvider,
        completion_window: &str,
    ) -> Result<Arc<dyn batch::BatchServiceClient>, ApiError> {
        let (base_url, api_key) = match provider {
            ModelProvider::OpenAI {
                api_key, base_url, ..
            } => (
                base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                Some(api_key.clone()),
            ),
            ModelProvider::LocalCustom {
                endpoint, api_key, ..
            } => (endpoint.clone(), api_key.clone()),
        };
        Ok(Arc::new(batch::OpenAIBatchClient::new(
            base_url,
            api_key,
            completion_window.to_string(),
        )?))
    }
}

/// Provider registry keyed by configured provider name
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Load providers from configuration
    pub fn from_config(config: &crate::config::TextbatchConfig) -> Self {
        let mut registry = Self::new();
        for (name, provider_config) in &config.providers {
            let mut config_with_name = provider_config.clone();
            if config_with_name.provider_name.is_none() {
                config_with_name.provider_name = Some(name.clone());
            }
            registry.providers.insert(name.clone(), config_with_name);
        }
        registry
    }

    pub fn get(&self, provider_name: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider_name)
    }

    pub fn get_or_error(&self, provider_name: &str) -> Result<&ProviderConfig, ApiError> {
        self.get(provider_name).ok_or_else(|| {
            ApiError::ProviderNotConfigured(format!("Provider not found: {}", provider_name))
        })
    }

    pub fn create_client(&self, provider_name: &str) -> Result<Arc<dyn ModelProviderClient>, ApiError> {
        let model_provider = self.get_or_error(provider_name)?.to_model_provider()?;
        ProviderFactory::create_client(&model_provider)
    }

    pub fn create_batch_client(
        &self,
        provider_name: &str,
        completion_window: &str,
    ) -> Result<Arc<dyn batch::BatchServiceClient>, ApiError> {
        let model_provider = self.get_or_error(provider_name)?.to_model_provider()?;
        ProviderFactory::create_batch_client(&model_provider, completion_window)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
