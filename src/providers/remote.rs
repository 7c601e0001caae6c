use super::{ChatMessage, ChatModel, ContentPart, MessageContent, ProviderAdapter, Role, dispatch};
use crate::error::InvocationError;
use crate::models::ModelResponse;
use crate::registry::Capability;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Runnable served over HTTP (`POST <endpoint>/invoke`)
pub struct RemoteRunnable {
    client: reqwest::Client,
    endpoint: String,
    capability: Capability,
}

impl RemoteRunnable {
    pub fn new(endpoint: &str, capability: Capability) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            capability,
        }
    }
}

fn message_type(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "human",
        Role::Assistant => "ai",
    }
}

fn content_value(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::ImageUrl { image_url } => {
                        json!({"type": "image_url", "image_url": {"url": image_url.url}})
                    }
                })
                .collect(),
        ),
    }
}

/// Text out of an `output` that may be a bare string or a message object
fn output_text(output: &Value) -> Option<String> {
    match output {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map.get("content").and_then(|c| match c {
            Value::String(text) => Some(text.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            _ => None,
        }),
        _ => None,
    }
}

#[async_trait]
impl ProviderAdapter for RemoteRunnable {
    type Request = Value;
    type Reply = Value;

    fn capability(&self) -> &Capability {
        &self.capability
    }

    fn to_request(&self, messages: &[ChatMessage]) -> Result<Value, InvocationError> {
        let input: Vec<Value> = messages
            .iter()
            .map(|m| json!({"type": message_type(m.role), "content": content_value(&m.content)}))
            .collect();

        Ok(json!({
            "input": input,
            "config": {"configurable": {"model": self.capability.tag}},
            "kwargs": {}
        }))
    }

    fn from_reply(&self, reply: Value) -> Result<ModelResponse, InvocationError> {
        let output = reply.get("output").ok_or_else(|| {
            InvocationError::InvalidResponse(format!("remote reply without output: {}", reply))
        })?;
        let content = output_text(output)
            .ok_or_else(|| InvocationError::InvalidResponse(format!("unreadable output: {}", output)))?;

        let mut metadata = HashMap::new();
        if let Some(usage) = output.get("usage_metadata") {
            metadata.insert("usage".to_string(), usage.clone());
        }
        if let Some(run_id) = reply.pointer("/metadata/run_id") {
            metadata.insert("run_id".to_string(), run_id.clone());
        }

        Ok(ModelResponse {
            content,
            metadata,
            raw: reply,
        })
    }

    async fn send(&self, request: Value) -> Result<Value, InvocationError> {
        let url = format!("{}/invoke", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(InvocationError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(InvocationError::Authentication(format!(
                "remote runnable refused credentials ({})",
                status
            )));
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
impl ChatModel for RemoteRunnable {
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
    use crate::registry;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_invoke_posts_langchain_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/invoke")
            .match_body(Matcher::PartialJson(json!({
                "input": [
                    {"type": "system", "content": "answer briefly"},
                    {"type": "human", "content": "Which is cast?"}
                ]
            })))
            .with_status(200)
            .with_body(r#"{"output": {"content": "The answer is (B)", "type": "ai"}, "metadata": {"run_id": "r-1"}}"#)
            .create_async()
            .await;

        let runnable = RemoteRunnable::new(&server.url(), registry::capability("gpt-4.1").unwrap());
        let response = runnable
            .invoke(&[ChatMessage::system("answer briefly"), ChatMessage::user("Which is cast?")])
            .await
            .unwrap();

        assert_eq!(response.content, "The answer is (B)");
        assert_eq!(response.metadata["run_id"], "r-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_string_output() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invoke")
            .with_status(200)
            .with_body(r#"{"output": "A"}"#)
            .create_async()
            .await;

        let runnable = RemoteRunnable::new(&server.url(), registry::capability("gpt-4.1").unwrap());
        let response = runnable.invoke(&[ChatMessage::user("q")]).await.unwrap();
        assert_eq!(response.content, "A");
    }

    #[tokio::test]
    async fn test_missing_output_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invoke")
            .with_status(200)
            .with_body(r#"{"detail": "nope"}"#)
            .create_async()
            .await;

        let runnable = RemoteRunnable::new(&server.url(), registry::capability("gpt-4.1").unwrap());
        let err = runnable.invoke(&[ChatMessage::user("q")]).await.unwrap_err();
        assert!(matches!(err, InvocationError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_client_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invoke")
            .with_status(422)
            .with_body("bad input")
            .create_async()
            .await;

        let runnable = RemoteRunnable::new(&server.url(), registry::capability("gpt-4.1").unwrap());
        let err = runnable.invoke(&[ChatMessage::user("q")]).await.unwrap_err();
        assert_eq!(err.status(), Some(422));
    }
}
