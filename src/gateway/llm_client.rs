//! Wraps a [`Provider`] with a hard per-attempt timeout and a bounded retry
//! budget. Grounded in spec prose (the original stub carries no retained
//! retry logic) using the host repo's `reqwest` per-adapter timeout idiom for
//! the deadline mechanism, here applied via `tokio::time::timeout`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;

use super::provider::{Provider, ProviderOutput, ProviderRequest};

/// `timeout_seconds` bounds each individual attempt. `max_retries` bounds how
/// many additional attempts follow a retryable failure, for
/// `max_retries + 1` total attempts. No backoff between attempts — the total
/// wall-clock budget is therefore bounded by `(max_retries + 1) *
/// timeout_seconds`, by construction, since attempts run sequentially and
/// each is wrapped in its own `tokio::time::timeout`.
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    timeout: Duration,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn Provider>, timeout_seconds: u64, max_retries: u32) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(timeout_seconds),
            max_retries,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run up to `max_retries + 1` attempts, retrying only `timeout` and
    /// `provider_error`. `bad_json` is preserved verbatim and never retried.
    /// A cancelled/timed-out attempt never reaches the caller having mutated
    /// any shared state — the Provider call is the only suspension point.
    pub async fn generate(&self, request: ProviderRequest) -> ProviderOutput {
        let attempts = self.max_retries + 1;
        let mut last = ProviderOutput {
            text: String::new(),
            json: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            error_kind: Some(ErrorKind::ProviderError),
        };

        for attempt in 0..attempts {
            let outcome = tokio::time::timeout(self.timeout, self.provider.generate(request.clone())).await;
            let output = match outcome {
                Ok(output) => output,
                Err(_) => ProviderOutput {
                    text: String::new(),
                    json: None,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    error_kind: Some(ErrorKind::Timeout),
                },
            };

            match output.error_kind {
                None => return output,
                Some(kind) if kind.is_retryable() && attempt + 1 < attempts => {
                    tracing::warn!(attempt, kind = %kind, "provider attempt failed, retrying");
                    last = output;
                    continue;
                }
                _ => return output,
            }
        }
        last
    }
}
