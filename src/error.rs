//! Error types for llmops-gateway.
//!
//! Two distinct layers exist, deliberately kept separate:
//!
//! - [`ErrorKind`] is the closed, serializable taxonomy carried *in-band* in a
//!   [`crate::gateway::GenerateResponse`] or a harness `RunRecord`. It is never
//!   used for Rust-level error propagation — it is data, not a failure signal.
//! - [`AppError`] wraps [`anyhow::Error`] and converts it into an HTTP response
//!   for axum handlers, the same way it does in the teacher's handler chain.
//!   It only appears for genuinely unexpected/programmer-error conditions —
//!   the Gateway never raises an `AppError` for a timeout, rate limit, or bad
//!   JSON; those are represented as an in-band [`ErrorKind`] with HTTP 200.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn my_handler(
//!     State(state): State<Arc<GatewayState>>,
//! ) -> Result<Json<Value>, AppError> {
//!     let result = state.some_fallible_operation().await?;
//!     Ok(Json(result))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The closed error-kind vocabulary shared by the Gateway and the Harness.
///
/// Closed deliberately: a new failure mode must be named here, not smuggled
/// in as a free-text `Other(String)` variant, so every aggregation path
/// (severity histograms, suspected-cause mapping, retry policy) stays
/// exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deadline exceeded on a Provider attempt. Retryable by the LLM Client.
    Timeout,
    /// Transport/API failure. Retryable by the LLM Client.
    ProviderError,
    /// Parse failure when schema/JSON output was required. Never retried.
    BadJson,
    /// Admission declined by the rate limiter. Carries a sub-reason.
    RateLimited,
    /// Harness-side: S1 contract violation or S2 soft-match failure.
    QualityFail,
    /// Harness-side wrapper for uncategorized failures.
    ToolError,
    /// Successful Provider call but no text was produced.
    EmptyOutput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ProviderError => "provider_error",
            Self::BadJson => "bad_json",
            Self::RateLimited => "rate_limited",
            Self::QualityFail => "quality_fail",
            Self::ToolError => "tool_error",
            Self::EmptyOutput => "empty_output",
        }
    }

    /// Whether the LLM Client should retry an attempt that failed this way.
    ///
    /// Only `timeout` and `provider_error` are retryable — `bad_json` is
    /// never retried even though it is also a Provider-reported failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::ProviderError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-reason for a [`ErrorKind::RateLimited`] decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    QpsLimit,
    TpmLimit,
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::QpsLimit => "qps_limit",
            Self::TpmLimit => "tpm_limit",
        })
    }
}

/// Wraps [`anyhow::Error`] so it can be returned from axum handlers.
///
/// Any type that implements `Into<anyhow::Error>` (which includes `io::Error`,
/// `reqwest::Error`, and any `#[derive(thiserror::Error)]` type) can be
/// converted into an [`AppError`] via the blanket [`From`] implementation.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "handler error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Convert any `Into<anyhow::Error>` into an [`AppError`].
///
/// This is the idiomatic axum pattern — see
/// <https://docs.rs/axum/latest/axum/error_handling/index.html>.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_to_snake_case_tag() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::BadJson).unwrap(),
            "\"bad_json\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ProviderError).unwrap(),
            "\"provider_error\""
        );
    }

    #[test]
    fn only_timeout_and_provider_error_are_retryable() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::ProviderError.is_retryable());
        assert!(!ErrorKind::BadJson.is_retryable());
        assert!(!ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::QualityFail.is_retryable());
        assert!(!ErrorKind::ToolError.is_retryable());
        assert!(!ErrorKind::EmptyOutput.is_retryable());
    }

    #[test]
    fn rate_limit_reason_display() {
        assert_eq!(RateLimitReason::QpsLimit.to_string(), "qps_limit");
        assert_eq!(RateLimitReason::TpmLimit.to_string(), "tpm_limit");
    }
}
