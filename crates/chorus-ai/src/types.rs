//! Core types for provider interactions

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Known chat-completion providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Google,
    Poe,
    Cohere,
    /// Any endpoint speaking the OpenAI chat-completions dialect (OpenRouter, Groq, ...)
    OpenAICompatible,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google",
            Provider::Poe => "Poe",
            Provider::Cohere => "Cohere",
            Provider::OpenAICompatible => "OpenAI-compatible",
        }
    }

    /// Default API base URL
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Poe => "https://api.poe.com/v1",
            Provider::Cohere => "https://api.cohere.com",
            Provider::OpenAICompatible => "https://openrouter.ai/api/v1",
        }
    }

    /// Environment variables consulted for this provider's API key, in order
    pub fn api_key_env_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAI => &["OPENAI_API_KEY"],
            Provider::Anthropic => &["ANTHROPIC_API_KEY"],
            Provider::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            Provider::Poe => &["POE_API_KEY"],
            Provider::Cohere => &["COHERE_API_KEY"],
            Provider::OpenAICompatible => &["OPENROUTER_API_KEY"],
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            "poe" => Ok(Provider::Poe),
            "cohere" => Ok(Provider::Cohere),
            "openai_compatible" | "openai-compatible" | "openrouter" | "compatible" => {
                Ok(Provider::OpenAICompatible)
            }
            other => Err(Error::UnsupportedProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection settings for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub api_key: String,
    /// Overrides [`Provider::default_base_url`]
    #[serde(default)]
    pub base_url: Option<String>,
    /// Additional headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
            headers: HashMap::new(),
        }
    }

    /// Build a config from the provider's API key environment variable
    pub fn from_env(provider: Provider) -> Result<Self> {
        provider
            .api_key_env_vars()
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|k| !k.is_empty()))
            .map(|key| Self::new(provider, key))
            .ok_or_else(|| Error::InvalidApiKey(provider.name().to_string()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Effective base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolCall,
    ToolResponse,
}

/// Binary input attached to a user turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    /// Base64 encoded payload
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Attachment {
    /// Create an attachment from raw bytes
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// `data:` URL form used by the OpenAI-shaped APIs
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A model-requested action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider call id
    pub id: String,
    pub tool_id: String,
    pub parameters: serde_json::Value,
    pub provider: Provider,
    /// Opaque token a provider needs echoed back with the call (thinking/thought signature)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuity_token: Option<String>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        tool_id: impl Into<String>,
        parameters: serde_json::Value,
        provider: Provider,
    ) -> Self {
        Self {
            id: id.into(),
            tool_id: tool_id.into(),
            parameters,
            provider,
            continuity_token: None,
        }
    }

    /// Arguments serialized the way the OpenAI-shaped APIs expect them
    pub fn arguments_json(&self) -> String {
        serde_json::to_string(&self.parameters).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Outcome of running a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolExecutionResult {
    Success {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl ToolExecutionResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self::Success {
            text: text.into(),
            details: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details (for UI rendering)
    pub fn with_details(self, details: serde_json::Value) -> Self {
        match self {
            Self::Success { text, .. } => Self::Success {
                text,
                details: Some(details),
            },
            Self::Error { message, .. } => Self::Error {
                message,
                details: Some(details),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Text handed back to the model in the tool_response turn
    pub fn content(&self) -> String {
        match self {
            Self::Success { text, .. } => text.clone(),
            Self::Error { message, .. } => format!("Error: {}", message),
        }
    }
}

/// One message in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl ConversationTurn {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            attachments: vec![],
            tool_call: None,
            tool_result: None,
            tool_call_id: None,
            tool_response_call_id: None,
            thoughts: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    /// Create a user turn carrying attachments
    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::with_role(Role::User, text)
        }
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    /// Create the tool_call turn of a completed tool round
    pub fn tool_call(
        call: ToolCall,
        result: ToolExecutionResult,
        preceding_text: impl Into<String>,
        thoughts: Option<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_call: Some(call),
            tool_result: Some(result),
            thoughts,
            ..Self::with_role(Role::ToolCall, preceding_text)
        }
    }

    /// Create the tool_response turn of a completed tool round
    pub fn tool_response(call_id: impl Into<String>, result: &ToolExecutionResult) -> Self {
        Self {
            tool_response_call_id: Some(call_id.into()),
            ..Self::with_role(Role::ToolResponse, result.content())
        }
    }
}

/// Find the tool_call turn answered by a tool_response call id
pub fn find_tool_call<'a>(turns: &'a [ConversationTurn], call_id: &str) -> Option<&'a ToolCall> {
    turns
        .iter()
        .filter_map(|t| t.tool_call.as_ref())
        .find(|c| c.id == call_id)
}

/// Tool definition for function calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (used in API calls)
    pub name: String,
    /// Description for the model
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Parameters schema guaranteed to be an object schema
    pub fn object_schema(&self) -> serde_json::Value {
        if self.parameters.is_object() {
            let mut schema = self.parameters.clone();
            if let Some(obj) = schema.as_object_mut() {
                obj.entry("type").or_insert(serde_json::json!("object"));
                obj.entry("properties").or_insert(serde_json::json!({}));
            }
            schema
        } else {
            serde_json::json!({ "type": "object", "properties": {} })
        }
    }
}

/// Reasoning/thinking budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    pub enabled: bool,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            enabled: true,
            budget_tokens,
        }
    }

    /// Effort level for APIs that take a coarse setting instead of a budget
    pub fn effort(&self) -> &'static str {
        match self.budget_tokens {
            0..=2048 => "low",
            2049..=8192 => "medium",
            _ => "high",
        }
    }
}

/// Everything an adapter needs to issue one provider call
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub turns: Vec<ConversationTurn>,
    pub tools: Vec<ToolSpec>,
    pub thinking: ThinkingConfig,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, turns: Vec<ConversationTurn>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            turns,
            tools: vec![],
            thinking: ThinkingConfig::default(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_thinking(mut self, thinking: ThinkingConfig) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}
