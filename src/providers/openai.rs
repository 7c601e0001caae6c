use super::{
    ChatMessage, ChatModel, ContentPart, GenerationSettings, MessageContent, ProviderAdapter, Role,
    dispatch,
};
use crate::error::InvocationError;
use crate::models::ModelResponse;
use crate::registry::Capability;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    ImageDetail, ImageUrlArgs,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

/// Chat completions against any OpenAI-compatible endpoint (hosted or vLLM).
///
/// Requests and replies use the `async-openai` schema; the transport is plain
/// `reqwest` so the HTTP status survives into error classification.
pub struct OpenAiCompatible {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    capability: Capability,
    settings: GenerationSettings,
}

/// `{"error": {...}}` body returned by OpenAI-compatible servers
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

impl OpenAiCompatible {
    pub fn new(
        api_base: &str,
        api_key: &str,
        capability: Capability,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            capability,
            settings,
        }
    }
}

fn build_error(e: OpenAIError) -> InvocationError {
    InvocationError::Rejected(format!("failed to build request: {}", e))
}

fn to_openai_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, InvocationError> {
    let message = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.text())
            .build()
            .map_err(build_error)?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.text())
            .build()
            .map_err(build_error)?
            .into(),
        Role::User => {
            let content = match &message.content {
                MessageContent::Text(text) => ChatCompletionRequestUserMessageContent::Text(text.clone()),
                MessageContent::Parts(parts) => {
                    let mut converted = Vec::with_capacity(parts.len());
                    for part in parts {
                        converted.push(match part {
                            ContentPart::Text { text } => ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartTextArgs::default()
                                    .text(text.clone())
                                    .build()
                                    .map_err(build_error)?,
                            ),
                            ContentPart::ImageUrl { image_url } => {
                                ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                    ChatCompletionRequestMessageContentPartImageArgs::default()
                                        .image_url(
                                            ImageUrlArgs::default()
                                                .url(image_url.url.clone())
                                                .detail(ImageDetail::Auto)
                                                .build()
                                                .map_err(build_error)?,
                                        )
                                        .build()
                                        .map_err(build_error)?,
                                )
                            }
                        });
                    }
                    ChatCompletionRequestUserMessageContent::Array(converted)
                }
            };
            ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map_err(build_error)?
                .into()
        }
    };
    Ok(message)
}

/// Map a non-success reply onto the invocation taxonomy; the status decides
/// retryability unless the body names a credential or quota problem
fn classify_failure(status: StatusCode, body: &str) -> InvocationError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| body.to_string());
        return InvocationError::Authentication(message);
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => classify_api_error(status, envelope.error),
        Err(_) => InvocationError::Http {
            status: status.as_u16(),
            body: body.to_string(),
        },
    }
}

fn classify_api_error(status: StatusCode, api: ApiError) -> InvocationError {
    let kind = api.r#type.clone().unwrap_or_default().to_ascii_lowercase();
    let code = api
        .code
        .as_ref()
        .map(|c| c.to_string().to_ascii_lowercase())
        .unwrap_or_default();
    let message = api.message;

    if code.contains("invalid_api_key") || kind.contains("authentication") || kind.contains("permission") {
        return InvocationError::Authentication(message);
    }
    // Reported as 429 but never clears by waiting
    if code.contains("insufficient_quota") || kind.contains("insufficient_quota") {
        return InvocationError::Rejected(message);
    }
    InvocationError::Http {
        status: status.as_u16(),
        body: message,
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatible {
    type Request = CreateChatCompletionRequest;
    type Reply = CreateChatCompletionResponse;

    fn capability(&self) -> &Capability {
        &self.capability
    }

    fn to_request(&self, messages: &[ChatMessage]) -> Result<CreateChatCompletionRequest, InvocationError> {
        let messages = messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.capability.tag).messages(messages);
        if let Some(temperature) = self.settings.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = self.settings.max_tokens {
            args.max_tokens(u16::try_from(max_tokens).unwrap_or(u16::MAX));
        }
        args.build().map_err(build_error)
    }

    fn from_reply(&self, response: CreateChatCompletionResponse) -> Result<ModelResponse, InvocationError> {
        let raw = serde_json::to_value(&response)
            .map_err(|e| InvocationError::InvalidResponse(e.to_string()))?;

        let content = match response.choices.first() {
            Some(choice) => match &choice.message.content {
                Some(content) => content.clone(),
                None => String::new(),
            },
            None => String::new(),
        };

        let mut metadata = HashMap::new();
        if let Some(usage) = response.usage {
            metadata.insert("prompt_tokens".to_string(), json!(usage.prompt_tokens));
            metadata.insert("completion_tokens".to_string(), json!(usage.completion_tokens));
            metadata.insert("total_tokens".to_string(), json!(usage.total_tokens));
        }

        Ok(ModelResponse { content, metadata, raw })
    }

    async fn send(&self, request: CreateChatCompletionRequest) -> Result<CreateChatCompletionResponse, InvocationError> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(InvocationError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(InvocationError::from_reqwest)?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| InvocationError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatible {
    fn model_id(&self) -> &str {
        &self.capability.tag
    }

    fn supports_image(&self) -> bool {
        self.capability.supports_image
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ModelResponse, InvocationError> {
        dispatch(self, messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{Invoker, RetryPolicy};
    use crate::registry;
    use mockito::Matcher;
    use std::sync::Arc;
    use std::time::Duration;

    const COMPLETION: &str = r#"{
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-4.1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "so the answer is (B) concrete."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28}
    }"#;

    fn model(server: &mockito::Server, id: &str) -> OpenAiCompatible {
        OpenAiCompatible::new(
            &server.url(),
            "test-key",
            registry::capability(id).unwrap(),
            GenerationSettings {
                temperature: Some(0.0),
                max_tokens: None,
            },
        )
    }

    #[tokio::test]
    async fn test_chat_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({"model": "gpt-4.1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION)
            .create_async()
            .await;

        let response = model(&server, "gpt-4.1")
            .invoke(&[ChatMessage::system("sys"), ChatMessage::user("Which is cast?")])
            .await
            .unwrap();

        assert_eq!(response.content, "so the answer is (B) concrete.");
        assert_eq!(response.metadata["total_tokens"], 28);
        assert_eq!(response.raw["id"], "chatcmpl-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_image_parts_sent_to_vision_model() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("image_url".to_string()))
            .with_status(200)
            .with_body(COMPLETION)
            .create_async()
            .await;

        model(&server, "gpt-4.1")
            .invoke(&[ChatMessage::user_with_image("what is drawn?", "data:image/png;base64,QUJD")])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_text_parts_only_for_text_model() {
        let server_less = OpenAiCompatible::new(
            "http://localhost:8000/v1",
            "EMPTY",
            registry::capability("EXAONE-4.0-32B").unwrap(),
            GenerationSettings::default(),
        );
        let prepared = crate::providers::prepare_messages(
            &[ChatMessage::user_with_image("q", "data:image/png;base64,QUJD")],
            server_less.supports_image(),
        );
        let request = server_less.to_request(&prepared).unwrap();
        let body = serde_json::to_string(&request).unwrap();
        assert!(!body.contains("image_url"));
        assert!(body.contains("LGAI-EXAONE/EXAONE-4.0-32B"));
    }

    #[tokio::test]
    async fn test_invalid_api_key_is_authentication() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "param": null, "code": "invalid_api_key"}}"#)
            .create_async()
            .await;

        let err = model(&server, "gpt-4.1")
            .invoke(&[ChatMessage::user("q")])
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Authentication(_)));
    }

    fn invoker() -> Invoker {
        Invoker::new(RetryPolicy::default().with_backoff_unit(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_non_json_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_header("content-type", "text/html")
            .with_body("<html><body>Bad Request</body></html>")
            .expect(1)
            .create_async()
            .await;

        let model: Arc<dyn ChatModel> = Arc::new(model(&server, "gpt-4.1"));
        let err = invoker()
            .invoke(model, &[ChatMessage::user("q")], 3, None)
            .await
            .unwrap_err();
        assert!(matches!(&err, InvocationError::Http { status: 400, body } if body.contains("Bad Request")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_error_type_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(404)
            .with_body(r#"{"error": {"message": "model gpt-9 does not exist", "type": "not_found_error", "param": null, "code": null}}"#)
            .expect(1)
            .create_async()
            .await;

        let model: Arc<dyn ChatModel> = Arc::new(model(&server, "gpt-4.1"));
        let err = invoker()
            .invoke(model, &[ChatMessage::user("q")], 3, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(502)
            .with_body("upstream unavailable")
            .expect(2)
            .create_async()
            .await;

        let model: Arc<dyn ChatModel> = Arc::new(model(&server, "gpt-4.1"));
        let err = invoker()
            .invoke(model, &[ChatMessage::user("q")], 2, None)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Exhausted { attempts: 2, .. }));
        assert_eq!(err.status(), Some(502));
        mock.assert_async().await;
    }

    #[test]
    fn test_quota_is_rejected() {
        let body = r#"{"error": {"message": "You exceeded your current quota", "type": "insufficient_quota", "param": null, "code": "insufficient_quota"}}"#;
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(err, InvocationError::Rejected(_)));

        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err.status(), Some(429));
    }

    #[tokio::test]
    async fn test_bad_request_maps_to_400() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body(r#"{"error": {"message": "max_tokens is too large", "type": "invalid_request_error", "param": "max_tokens", "code": null}}"#)
            .create_async()
            .await;

        let err = model(&server, "gpt-4.1")
            .invoke(&[ChatMessage::user("q")])
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
    }
}
