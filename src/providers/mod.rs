//! Chat model adapters
//!
//! Every backend turns the same [`ChatMessage`] list into its own wire payload
//! and normalizes the reply into a [`ModelResponse`]. None of them retry; the
//! shared policy in [`crate::invoker`] owns that.

pub mod ollama;
pub mod openai;
pub mod remote;

use crate::config::{ProvidersConfig, RunConfig};
use crate::error::{EvalError, InvocationError};
use crate::models::ModelResponse;
use crate::registry::{self, AdapterKind, Capability};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Accepts OpenAI and LangChain spellings
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// User turn carrying text plus an inline `data:` URL image
    pub fn user_with_image(text: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url.into() },
                },
            ]),
        }
    }

    /// Concatenated text parts; images are dropped
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn image_urls(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }

    pub fn has_image(&self) -> bool {
        !self.image_urls().is_empty()
    }

    /// Same message with multi-part content collapsed to text
    pub fn text_only(&self) -> Self {
        Self {
            role: self.role,
            content: MessageContent::Text(self.text()),
        }
    }

    /// Accepts `{"role", "content"}` records, LangChain-style `{"type", "content"}`
    /// objects and `["role", "content"]` tuples
    pub fn from_value(value: &Value) -> Result<Self, InvocationError> {
        let (role, content) = match value {
            Value::Array(pair) if pair.len() == 2 => (pair[0].as_str(), pair[1].clone()),
            Value::Object(map) => (
                map.get("role")
                    .or_else(|| map.get("type"))
                    .and_then(Value::as_str),
                map.get("content").cloned().unwrap_or(Value::Null),
            ),
            other => {
                return Err(InvocationError::Rejected(format!(
                    "unsupported message shape: {}",
                    other
                )));
            }
        };

        let role = role.and_then(Role::parse).ok_or_else(|| {
            InvocationError::Rejected(format!("message without a known role: {}", value))
        })?;

        let content = match content {
            Value::String(text) => MessageContent::Text(text),
            parts @ Value::Array(_) => serde_json::from_value(parts)
                .map(MessageContent::Parts)
                .map_err(|e| InvocationError::Rejected(format!("bad content parts: {}", e)))?,
            Value::Null => MessageContent::Text(String::new()),
            other => MessageContent::Text(other.to_string()),
        };

        Ok(Self { role, content })
    }
}

/// Collapse image parts when the target model cannot take them
pub fn prepare_messages(messages: &[ChatMessage], supports_image: bool) -> Vec<ChatMessage> {
    if supports_image {
        return messages.to_vec();
    }
    messages
        .iter()
        .map(|m| if m.has_image() { m.text_only() } else { m.clone() })
        .collect()
}

/// Uniform entry point used by the evaluation loop and the judge
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    fn supports_image(&self) -> bool;

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ModelResponse, InvocationError>;
}

/// Backend-specific half of a [`ChatModel`]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    type Request: Send;
    type Reply: Send;

    fn capability(&self) -> &Capability;

    fn to_request(&self, messages: &[ChatMessage]) -> Result<Self::Request, InvocationError>;

    fn from_reply(&self, reply: Self::Reply) -> Result<ModelResponse, InvocationError>;

    async fn send(&self, request: Self::Request) -> Result<Self::Reply, InvocationError>;
}

/// One request/reply round trip through an adapter
pub async fn dispatch<A>(adapter: &A, messages: &[ChatMessage]) -> Result<ModelResponse, InvocationError>
where
    A: ProviderAdapter + ?Sized,
{
    let prepared = prepare_messages(messages, adapter.capability().supports_image);
    let request = adapter.to_request(&prepared)?;
    let reply = adapter.send(request).await?;
    adapter.from_reply(reply)
}

/// Sampling settings shared by every adapter
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl From<&RunConfig> for GenerationSettings {
    fn from(run: &RunConfig) -> Self {
        Self {
            temperature: run.temperature,
            max_tokens: run.max_tokens,
        }
    }
}

fn api_key_from_env(var: &str) -> Result<String, EvalError> {
    std::env::var(var)
        .map_err(|_| EvalError::Configuration(format!("Environment variable {} not found", var)))
}

/// Resolve a model id through the registry and construct its adapter
pub fn build_model(
    providers: &ProvidersConfig,
    model_id: &str,
    settings: GenerationSettings,
) -> Result<Arc<dyn ChatModel>, EvalError> {
    let capability = registry::capability(model_id)?;

    if let Some(endpoint) = &providers.langserve_endpoint {
        tracing::debug!(model = model_id, endpoint, "routing through remote runnable");
        return Ok(Arc::new(remote::RemoteRunnable::new(endpoint, capability)));
    }

    let model: Arc<dyn ChatModel> = match capability.provider.adapter() {
        AdapterKind::Hosted => {
            let hosted = match capability.provider {
                registry::Provider::Anthropic => &providers.anthropic,
                registry::Provider::Google => &providers.google,
                _ => &providers.openai,
            };
            let api_key = api_key_from_env(&hosted.env_var_api_key)?;
            Arc::new(openai::OpenAiCompatible::new(
                &hosted.api_base,
                &api_key,
                capability,
                settings,
            ))
        }
        AdapterKind::Vllm => {
            let api_key = std::env::var(&providers.vllm_env_var_api_key)
                .unwrap_or_else(|_| "EMPTY".to_string());
            let api_base = format!("{}/v1", providers.vllm_endpoint.trim_end_matches('/'));
            Arc::new(openai::OpenAiCompatible::new(&api_base, &api_key, capability, settings))
        }
        AdapterKind::Ollama => Arc::new(ollama::OllamaChat::new(
            &providers.ollama_endpoint,
            providers.ollama_cookie.as_deref(),
            providers.ollama_cookie_key.as_deref(),
            capability,
            settings,
        )),
    };

    tracing::debug!(model = model_id, "chat model constructed");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_shapes() {
        let plain = ChatMessage::from_value(&json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(plain, ChatMessage::user("hi"));

        let rich = ChatMessage::from_value(&json!({"type": "human", "content": "hi"})).unwrap();
        assert_eq!(rich, ChatMessage::user("hi"));

        let tuple = ChatMessage::from_value(&json!(["system", "be brief"])).unwrap();
        assert_eq!(tuple, ChatMessage::system("be brief"));

        let parts = ChatMessage::from_value(&json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
            ]
        }))
        .unwrap();
        assert!(parts.has_image());
        assert_eq!(parts.text(), "look");
    }

    #[test]
    fn test_from_value_rejects_unknown_role() {
        let err = ChatMessage::from_value(&json!({"role": "tool", "content": "x"})).unwrap_err();
        assert!(matches!(err, InvocationError::Rejected(_)));
        assert!(ChatMessage::from_value(&json!(42)).is_err());
    }

    #[test]
    fn test_prepare_messages_collapses_images() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user_with_image("what is drawn?", "data:image/png;base64,AAAA"),
        ];

        let text_only = prepare_messages(&messages, false);
        assert!(!text_only[1].has_image());
        assert_eq!(text_only[1].content, MessageContent::Text("what is drawn?".into()));

        let kept = prepare_messages(&messages, true);
        assert!(kept[1].has_image());
    }

    #[test]
    fn test_build_model_routes_by_registry() {
        let mut providers: ProvidersConfig = toml::from_str("").unwrap();
        let model = build_model(&providers, "deepseek-r1-8b", GenerationSettings::default())
            .unwrap();
        assert!(model.supports_image());
        assert_eq!(model.model_id(), "deepseek-r1:8b");

        let model = build_model(&providers, "gpt-oss-20b", GenerationSettings::default()).unwrap();
        assert!(!model.supports_image());

        providers.langserve_endpoint = Some("http://localhost:8001".into());
        let model = build_model(&providers, "gpt-4.1", GenerationSettings::default()).unwrap();
        assert_eq!(model.model_id(), "gpt-4.1");
    }

    #[test]
    fn test_build_model_unknown_id() {
        let providers: ProvidersConfig = toml::from_str("").unwrap();
        let err = build_model(&providers, "no-such-model", GenerationSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, EvalError::Configuration(_)));
    }
}
