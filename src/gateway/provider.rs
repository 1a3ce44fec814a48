//! Provider capability: the thing that actually produces text from messages.
//!
//! Kept as a trait with pluggable variants the way the host repo's
//! `BackendClient` enum dispatches over `OpenAIAdapter`/`AnthropicAdapter`/
//! `OllamaAdapter` — narrowed here to what the Gateway's normalized request
//! needs: a deterministic `Mock` for offline testing, and a single
//! OpenAI-compatible `Remote` wire adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Everything a Provider needs to produce an answer. Normalized by the
/// Gateway before the call — schema and max_tokens are already resolved.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<Message>,
    pub schema: Option<serde_json::Value>,
    pub max_output_tokens: u32,
}

/// What a Provider attempt produced. `error_kind` is one of
/// `None | Timeout | ProviderError | BadJson` — the three kinds a Provider
/// itself may report; `RateLimited` and the Harness-only kinds never
/// originate here.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub text: String,
    pub json: Option<serde_json::Value>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub error_kind: Option<ErrorKind>,
}

impl ProviderOutput {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, request: ProviderRequest) -> ProviderOutput;

    /// Short name used in audit records, pricing lookups, and `/healthz`.
    fn name(&self) -> &str;
}

/// Deterministic mock provider: response is derived from the content hash of
/// concatenated message contents, simulates ~50ms latency, and synthesizes a
/// JSON object with a value for every declared top-level schema key.
pub struct MockProvider {
    name: String,
}

impl MockProvider {
    pub fn new() -> Self {
        Self { name: "mock".to_string() }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn content_hash(messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    for m in messages {
        hasher.update(m.content.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn schema_property_names(schema: &serde_json::Value) -> Option<Vec<String>> {
    let properties = schema.get("properties")?.as_object()?;
    Some(properties.keys().cloned().collect())
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(&self, request: ProviderRequest) -> ProviderOutput {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let hash = content_hash(&request.messages);
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| (m.content.len() as u64 / 4).max(1))
            .sum();

        if let Some(schema) = &request.schema {
            let Some(keys) = schema_property_names(schema) else {
                return ProviderOutput {
                    text: String::new(),
                    json: None,
                    prompt_tokens,
                    completion_tokens: 0,
                    error_kind: Some(ErrorKind::BadJson),
                };
            };
            let mut object = serde_json::Map::new();
            for key in &keys {
                object.insert(key.clone(), serde_json::Value::String(format!("{key}-{hash:.8}")));
            }
            let json = serde_json::Value::Object(object);
            let text = serde_json::to_string(&json).unwrap_or_default();
            let completion_tokens = (text.len() as u64 / 4).max(1);
            return ProviderOutput {
                text,
                json: Some(json),
                prompt_tokens,
                completion_tokens,
                error_kind: None,
            };
        }

        let text = format!("mock response {:.8}", hash);
        let completion_tokens = (text.len() as u64 / 4).max(1);
        ProviderOutput {
            text,
            json: None,
            prompt_tokens,
            completion_tokens,
            error_kind: None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> Message {
        Message { role: Role::User, content: content.to_string() }
    }

    #[tokio::test]
    async fn mock_generates_nonempty_text_without_schema() {
        let provider = MockProvider::new();
        let out = provider
            .generate(ProviderRequest {
                messages: vec![msg("Hello")],
                schema: None,
                max_output_tokens: 256,
            })
            .await;
        assert!(!out.text.is_empty());
        assert!(out.prompt_tokens > 0);
        assert!(out.completion_tokens > 0);
        assert_eq!(out.error_kind, None);
    }

    #[tokio::test]
    async fn mock_synthesizes_json_for_every_schema_key() {
        let provider = MockProvider::new();
        let schema = serde_json::json!({"properties": {"name": {"type": "string"}, "age": {"type": "number"}}});
        let out = provider
            .generate(ProviderRequest {
                messages: vec![msg("give me a person")],
                schema: Some(schema),
                max_output_tokens: 256,
            })
            .await;
        let json = out.json.unwrap();
        assert!(json.get("name").is_some());
        assert!(json.get("age").is_some());
    }

    #[tokio::test]
    async fn mock_is_deterministic_for_identical_content() {
        let provider = MockProvider::new();
        let out1 = provider
            .generate(ProviderRequest { messages: vec![msg("same")], schema: None, max_output_tokens: 256 })
            .await;
        let out2 = provider
            .generate(ProviderRequest { messages: vec![msg("same")], schema: None, max_output_tokens: 256 })
            .await;
        assert_eq!(out1.text, out2.text);
    }

    #[tokio::test]
    async fn mock_reports_bad_json_for_malformed_schema() {
        let provider = MockProvider::new();
        let out = provider
            .generate(ProviderRequest {
                messages: vec![msg("x")],
                schema: Some(serde_json::json!({"not_a_schema": true})),
                max_output_tokens: 256,
            })
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::BadJson));
    }
}
