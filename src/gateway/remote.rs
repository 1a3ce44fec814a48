//! Remote Provider: a single OpenAI-compatible wire adapter.
//!
//! Adapted from the host repo's `OpenAIAdapter` — same `reqwest::Client`
//! construction with a baked-in timeout and bearer token, same
//! POST-and-parse shape. Streaming is dropped; this delivery is
//! request/response only.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::json;

use crate::error::ErrorKind;

use super::provider::{Message, Provider, ProviderOutput, ProviderRequest, Role};

/// Calls an OpenAI-compatible `/v1/chat/completions` endpoint. On
/// schema-present requests, prepends a system instruction asking for
/// schema-conforming JSON and enables JSON mode if the transport supports it.
pub struct RemoteProvider {
    client: Client,
    base_url: String,
    model: String,
    name: String,
}

impl RemoteProvider {
    pub fn new(base_url: String, model: String, timeout_seconds: u64, api_key: Option<String>) -> Self {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = format!("Bearer {key}");
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&value)
                    .expect("API key contains invalid Authorization header characters"),
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("failed to build reqwest client");

        Self { client, base_url, model, name: "remote".to_string() }
    }

    fn to_wire_messages(messages: &[Message], schema_instruction: Option<&str>) -> Vec<serde_json::Value> {
        let mut wire: Vec<serde_json::Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(instruction) = schema_instruction {
            wire.push(json!({ "role": "system", "content": instruction }));
        }
        for m in messages {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            wire.push(json!({ "role": role, "content": m.content }));
        }
        wire
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    async fn generate(&self, request: ProviderRequest) -> ProviderOutput {
        let schema_instruction = request.schema.as_ref().map(|s| {
            format!(
                "Respond with a single JSON object matching this schema, no prose: {s}"
            )
        });

        let mut body = json!({
            "model": self.model,
            "messages": Self::to_wire_messages(&request.messages, schema_instruction.as_deref()),
            "max_tokens": request.max_output_tokens,
        });
        if request.schema.is_some() {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() { ErrorKind::Timeout } else { ErrorKind::ProviderError };
                return ProviderOutput {
                    text: String::new(),
                    json: None,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    error_kind: Some(kind),
                };
            }
        };

        let status = response.status();
        let body_text = match response.text().await {
            Ok(t) => t,
            Err(_) => {
                return ProviderOutput {
                    text: String::new(),
                    json: None,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    error_kind: Some(ErrorKind::ProviderError),
                };
            }
        };

        if !status.is_success() {
            return ProviderOutput {
                text: String::new(),
                json: None,
                prompt_tokens: 0,
                completion_tokens: 0,
                error_kind: Some(ErrorKind::ProviderError),
            };
        }

        let parsed: serde_json::Value = match serde_json::from_str(&body_text) {
            Ok(v) => v,
            Err(_) => {
                return ProviderOutput {
                    text: String::new(),
                    json: None,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    error_kind: Some(ErrorKind::ProviderError),
                };
            }
        };

        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let prompt_tokens = parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        let json = if request.schema.is_some() {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(v) => Some(v),
                Err(_) => {
                    return ProviderOutput {
                        text: String::new(),
                        json: None,
                        prompt_tokens,
                        completion_tokens,
                        error_kind: Some(ErrorKind::BadJson),
                    };
                }
            }
        } else {
            None
        };

        ProviderOutput { text, json, prompt_tokens, completion_tokens, error_kind: None }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hello there"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = RemoteProvider::new(server.uri(), "gpt-4o-mini".into(), 5, None);
        let out = provider
            .generate(ProviderRequest {
                messages: vec![Message { role: Role::User, content: "hi".into() }],
                schema: None,
                max_output_tokens: 100,
            })
            .await;

        assert_eq!(out.text, "hello there");
        assert_eq!(out.prompt_tokens, 5);
        assert_eq!(out.completion_tokens, 3);
        assert_eq!(out.error_kind, None);
    }

    #[tokio::test]
    async fn non_2xx_becomes_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = RemoteProvider::new(server.uri(), "gpt-4o-mini".into(), 5, None);
        let out = provider
            .generate(ProviderRequest {
                messages: vec![Message { role: Role::User, content: "hi".into() }],
                schema: None,
                max_output_tokens: 100,
            })
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::ProviderError));
    }

    #[tokio::test]
    async fn non_json_content_with_schema_becomes_bad_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "not json"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = RemoteProvider::new(server.uri(), "gpt-4o-mini".into(), 5, None);
        let out = provider
            .generate(ProviderRequest {
                messages: vec![Message { role: Role::User, content: "hi".into() }],
                schema: Some(json!({"properties": {"a": {"type": "number"}}})),
                max_output_tokens: 100,
            })
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::BadJson));
        assert_eq!(out.text, "");
    }

    #[tokio::test]
    async fn garbled_envelope_becomes_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .mount(&server)
            .await;

        let provider = RemoteProvider::new(server.uri(), "gpt-4o-mini".into(), 5, None);
        let out = provider
            .generate(ProviderRequest {
                messages: vec![Message { role: Role::User, content: "hi".into() }],
                schema: None,
                max_output_tokens: 100,
            })
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::ProviderError));
        assert_eq!(out.text, "");
    }
}
