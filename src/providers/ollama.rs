use super::{ChatMessage, ChatModel, GenerationSettings, ProviderAdapter, dispatch};
use crate::error::InvocationError;
use crate::models::ModelResponse;
use crate::registry::Capability;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Ollama `/api/chat` client, optionally behind a cookie-gated proxy
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
    capability: Capability,
    tag: String,
    settings: GenerationSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, Value>,
}

/// Ollama tag for a catalog id: the last `-` becomes `:` and any namespace is dropped
pub fn ollama_tag(model_id: &str) -> String {
    let tagged = match model_id.rfind('-') {
        Some(idx) => format!("{}:{}", &model_id[..idx], &model_id[idx + 1..]),
        None => model_id.to_string(),
    };
    tagged.rsplit('/').next().unwrap_or(tagged.as_str()).to_string()
}

/// `key=value` is sent as-is; a bare value is joined with `cookie_key`
pub fn cookie_header(cookie: &str, cookie_key: Option<&str>) -> Option<String> {
    let cookie = cookie.trim();
    if cookie.is_empty() {
        return None;
    }
    if cookie.contains('=') {
        return Some(cookie.to_string());
    }
    match cookie_key {
        Some(key) => Some(format!("{}={}", key, cookie)),
        None => {
            tracing::warn!("Ollama cookie has no key; sending raw value which may be rejected");
            Some(cookie.to_string())
        }
    }
}

/// Payload of a `data:<mime>;base64,<payload>` URL
fn base64_payload(url: &str) -> Option<&str> {
    url.split_once("base64,").map(|(_, data)| data)
}

impl OllamaChat {
    pub fn new(
        endpoint: &str,
        cookie: Option<&str>,
        cookie_key: Option<&str>,
        capability: Capability,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: endpoint.trim_end_matches('/').to_string(),
            cookie: cookie.and_then(|c| cookie_header(c, cookie_key)),
            tag: ollama_tag(&capability.tag),
            capability,
            settings,
        }
    }

    fn headers(&self) -> Result<HeaderMap, InvocationError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| InvocationError::Rejected(format!("invalid cookie header: {}", e)))?;
            headers.insert(COOKIE, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaChat {
    type Request = OllamaRequest;
    type Reply = Value;

    fn capability(&self) -> &Capability {
        &self.capability
    }

    fn to_request(&self, messages: &[ChatMessage]) -> Result<OllamaRequest, InvocationError> {
        let messages = messages
            .iter()
            .map(|m| OllamaMessage {
                role: m.role.as_str(),
                content: m.text().trim().to_string(),
                images: m
                    .image_urls()
                    .into_iter()
                    .filter_map(base64_payload)
                    .map(str::to_string)
                    .collect(),
            })
            .collect();

        let mut options = serde_json::Map::new();
        if let Some(temperature) = self.settings.temperature {
            options.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = self.settings.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }

        Ok(OllamaRequest {
            model: self.tag.clone(),
            messages,
            stream: false,
            options,
        })
    }

    fn from_reply(&self, reply: Value) -> Result<ModelResponse, InvocationError> {
        let content = reply
            .pointer("/message/content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| reply.get("response").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| reply.to_string());

        let mut metadata = HashMap::new();
        for (from, to) in [
            ("prompt_eval_count", "prompt_tokens"),
            ("eval_count", "completion_tokens"),
        ] {
            if let Some(count) = reply.get(from) {
                metadata.insert(to.to_string(), count.clone());
            }
        }

        Ok(ModelResponse {
            content,
            metadata,
            raw: reply,
        })
    }

    async fn send(&self, request: OllamaRequest) -> Result<Value, InvocationError> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::trace!(%url, model = %request.model, "posting Ollama chat request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(InvocationError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(InvocationError::Authentication(
                "Not Authenticated - INVALIDCOOKIE".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvocationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| InvocationError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_id(&self) -> &str {
        &self.tag
    }

    fn supports_image(&self) -> bool {
        self.capability.supports_image
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ModelResponse, InvocationError> {
        dispatch(self, messages).await
    }
}
