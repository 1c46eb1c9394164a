//! Task Encoder
//!
//! Resolves caller input into identified work items and turns one item plus a task
//! descriptor into a schema-constrained chat-completion request. Encoding is pure: the
//! same item and descriptor always produce the same request, and item ids are carried
//! through unchanged so retries and resubmissions never mint new identities.

use crate::error::ApiError;
use crate::provider::{ChatMessage, CompletionOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Remote endpoint every encoded request targets.
pub const CHAT_COMPLETIONS_URL: &str = "/v1/chat/completions";

/// Body fields the live client sets itself; they never travel in `extra`.
const TYPED_BODY_FIELDS: &[&str] = &[
    "model",
    "messages",
    "temperature",
    "max_tokens",
    "top_p",
    "response_format",
    "stream",
];

/// Caller-facing input shape: either bare text or text with a caller-chosen id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputItem {
    Text(String),
    Identified {
        id: String,
        text: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
}

/// One unit of work with a stable identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub text: String,
    /// Values substituted into `{{name}}` placeholders of the instruction template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Character count used for token budgeting.
    pub fn content_length(&self) -> usize {
        self.text.chars().count()
    }
}

/// Resolve input once at the boundary. Bare texts get a fresh UUID; ids must be unique.
pub fn resolve_items(inputs: Vec<InputItem>) -> Result<Vec<WorkItem>, ApiError> {
    let items: Vec<WorkItem> = inputs
        .into_iter()
        .map(|input| match input {
            InputItem::Text(text) => WorkItem::new(uuid::Uuid::new_v4().simple().to_string(), text),
            InputItem::Identified { id, text, params } => WorkItem { id, text, params },
        })
        .collect();
    ensure_unique_ids(&items)?;
    Ok(items)
}

pub(crate) fn ensure_unique_ids(items: &[WorkItem]) -> Result<(), ApiError> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.id.is_empty() {
            return Err(ApiError::InvalidInput("Work item id must not be empty".to_string()));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(ApiError::InvalidInput(format!(
                "Duplicate work item id: {}",
                item.id
            )));
        }
    }
    Ok(())
}

/// Structured-output contract for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            strict: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty()
            || match &self.schema {
                Value::Null => true,
                Value::Object(map) => map.is_empty(),
                _ => false,
            }
    }

    /// `response_format` payload for the chat-completions API.
    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "schema": self.schema,
                "strict": self.strict,
            }
        })
    }

    pub fn compile(&self) -> Result<SchemaValidator, ApiError> {
        if self.is_empty() {
            return Err(missing_schema());
        }
        let inner = jsonschema::validator_for(&self.schema).map_err(|e| {
            ApiError::InvalidInput(format!("Invalid output schema '{}': {}", self.name, e))
        })?;
        Ok(SchemaValidator { inner })
    }

    fn result_object(name: &str, result: Value) -> Self {
        Self::new(
            name,
            json!({
                "type": "object",
                "properties": {"result": result},
                "required": ["result"],
                "additionalProperties": false
            }),
        )
    }

    pub fn string_result() -> Self {
        Self::result_object("StrOutput", json!({"type": "string"}))
    }

    pub fn bool_result() -> Self {
        Self::result_object("BoolOutput", json!({"type": "boolean"}))
    }

    pub fn string_list_result() -> Self {
        Self::result_object(
            "ListStrOutput",
            json!({"type": "array", "items": {"type": "string"}}),
        )
    }

    /// Entities as `{text, type}` pairs.
    pub fn entity_list_result() -> Self {
        Self::result_object(
            "ListDictStrStrOutput",
            json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"},
                        "type": {"type": "string"}
                    },
                    "required": ["text", "type"],
                    "additionalProperties": false
                }
            }),
        )
    }

    pub fn reason_list_result() -> Self {
        Self::new(
            "ReasonListStrOutput",
            json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string"},
                    "result": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["reason", "result"],
                "additionalProperties": false
            }),
        )
    }
}

/// Compiled form of an [`OutputSchema`].
pub struct SchemaValidator {
    inner: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let errors: Vec<String> = self.inner.iter_errors(value).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TaskMode {
    Direct,
    /// Run a free-text reasoning pass first and feed it into the main prompt.
    WithAnalysis { analyze_instructions: String },
}

impl Default for TaskMode {
    fn default() -> Self {
        TaskMode::Direct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub schema: OutputSchema,
    /// Instruction template; `{{name}}` is replaced with the item's `name` parameter
    pub instructions: String,
    #[serde(default)]
    pub mode: TaskMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

impl TaskDescriptor {
    pub fn new(schema: OutputSchema, instructions: impl Into<String>) -> Self {
        Self {
            schema,
            instructions: instructions.into(),
            mode: TaskMode::Direct,
            output_lang: None,
            user_prompt: None,
        }
    }

    pub fn with_mode(mut self, mode: TaskMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_output_lang(mut self, lang: impl Into<String>) -> Self {
        self.output_lang = Some(lang.into());
        self
    }

    pub fn with_user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = Some(prompt.into());
        self
    }

    /// Per-item prompt overhead, in characters, used for token budgeting.
    pub fn instruction_overhead(&self) -> usize {
        self.instructions.chars().count()
            + self.output_lang.as_deref().map_or(0, |s| s.chars().count())
            + self.user_prompt.as_deref().map_or(0, |s| s.chars().count())
    }
}

/// Line-oriented remote request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestBody {
    /// Live-request options equivalent to this body. Extra fields other than the
    /// typed ones are passed through unchanged.
    pub fn completion_options(&self, temperature: f32) -> CompletionOptions {
        let extra = self
            .extra
            .iter()
            .filter(|(key, _)| !TYPED_BODY_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        CompletionOptions {
            temperature: Some(temperature),
            max_tokens: self.extra.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
            top_p: self.extra.get("top_p").and_then(Value::as_f64).map(|v| v as f32),
            response_format: Some(self.response_format.clone()),
            extra,
        }
    }
}

/// Immutable encoder bound to one model and optional extra body parameters.
#[derive(Debug, Clone)]
pub struct TaskEncoder {
    model: String,
    extra_body: Map<String, Value>,
}

impl TaskEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            extra_body: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_body.insert(key.into(), value);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn encode(&self, item: &WorkItem, descriptor: &TaskDescriptor) -> Result<RequestRecord, ApiError> {
        self.encode_with_analysis(item, descriptor, None)
    }

    pub fn encode_with_analysis(
        &self,
        item: &WorkItem,
        descriptor: &TaskDescriptor,
        analysis: Option<&str>,
    ) -> Result<RequestRecord, ApiError> {
        check_inputs(item, descriptor)?;

        let messages = vec![
            ChatMessage::system(build_main_prompt(item, descriptor, analysis)),
            ChatMessage::user(item.text.trim()),
        ];

        Ok(RequestRecord {
            custom_id: item.id.clone(),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_URL.to_string(),
            body: RequestBody {
                model: self.model.clone(),
                messages,
                response_format: descriptor.schema.response_format(),
                extra: self.extra_body.clone(),
            },
        })
    }

    /// Messages for the reasoning pass, when the descriptor asks for one.
    pub fn analysis_messages(
        &self,
        item: &WorkItem,
        descriptor: &TaskDescriptor,
    ) -> Result<Option<Vec<ChatMessage>>, ApiError> {
        check_inputs(item, descriptor)?;
        match &descriptor.mode {
            TaskMode::Direct => Ok(None),
            TaskMode::WithAnalysis { analyze_instructions } => Ok(Some(vec![
                ChatMessage::system(render_template(analyze_instructions, &item.params)),
                ChatMessage::user(item.text.trim()),
            ])),
        }
    }

    /// Encode a whole submission; ids must be unique across it.
    pub fn encode_all(
        &self,
        items: &[WorkItem],
        descriptor: &TaskDescriptor,
    ) -> Result<Vec<RequestRecord>, ApiError> {
        ensure_unique_ids(items)?;
        items.iter().map(|item| self.encode(item, descriptor)).collect()
    }
}

fn missing_schema() -> ApiError {
    ApiError::InvalidInput("Task schema is missing or empty".to_string())
}

fn check_inputs(item: &WorkItem, descriptor: &TaskDescriptor) -> Result<(), ApiError> {
    if descriptor.schema.is_empty() {
        return Err(missing_schema());
    }
    if item.text.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!(
            "Payload for item '{}' is empty",
            item.id
        )));
    }
    Ok(())
}

fn build_main_prompt(item: &WorkItem, descriptor: &TaskDescriptor, analysis: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(analysis) = analysis {
        prompt.push_str(&format!("Based on this analysis:\n{}\n", analysis));
    }
    if let Some(lang) = &descriptor.output_lang {
        prompt.push_str(&format!("Respond only in the {} language.\n", lang));
    }
    if let Some(user_prompt) = &descriptor.user_prompt {
        prompt.push_str(&format!("Consider this instruction {}\n", user_prompt));
    }
    prompt.push_str(&render_template(&descriptor.instructions, &item.params));
    prompt
}

/// Replace `{{key}}` placeholders; unknown placeholders are left as written.
pub fn render_template(template: &str, params: &BTreeMap<String, String>) -> String {
    params.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}
