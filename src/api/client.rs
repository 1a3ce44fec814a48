//! Client-facing API (the client port) — the endpoint callers send
//! generation requests to.
//!
//! This is intentionally a thin layer: all pipeline logic lives in
//! [`crate::gateway::GatewayState`]. Handlers translate HTTP concerns (status
//! codes, JSON bodies) into calls against the Gateway and back.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::error::AppError;
use crate::gateway::{validate_generate_request, GatewayState, GenerateRequest};

/// Build the client-facing axum router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/v1/generate", post(generate))
        .route("/v1/prompts", get(list_prompts))
        .route("/v1/prompts/:version", get(get_prompt))
        .with_state(state)
}

/// POST /v1/generate — run the full request pipeline and return the result
/// in-band. Structural validation failures are the only case that produces a
/// non-200 response; every Provider-side failure (timeout, bad JSON, rate
/// limit) is carried in the response body as `error_kind`.
pub async fn generate(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_generate_request(&request)?;
    let response = state.generate(request).await;
    Ok((StatusCode::OK, Json(response)))
}

/// GET /v1/prompts — list known prompt versions, newest first.
pub async fn list_prompts(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let versions = state.prompts().list_versions();
    Json(json!({
        "default_version": state.prompts().default_version(),
        "versions": versions,
    }))
}

/// GET /v1/prompts/:version — fetch one prompt template.
pub async fn get_prompt(
    State(state): State<Arc<GatewayState>>,
    Path(version): Path<String>,
) -> impl IntoResponse {
    match state.prompts().get(&version) {
        Some(template) => (StatusCode::OK, Json(json!(template))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no prompt version {version:?}") })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_state(dir: &std::path::Path) -> Arc<GatewayState> {
        let mut config = Config::default();
        config.harness.log_dir = dir.to_path_buf();
        config.prompts.directory = dir.join("prompts");
        Arc::new(GatewayState::new(Arc::new(config), dir.join("config.toml")).unwrap())
    }

    #[tokio::test]
    async fn get_prompt_returns_none_for_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        assert!(state.prompts().get("nonexistent").is_none());
    }

    #[tokio::test]
    async fn list_prompts_is_empty_for_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        assert!(state.prompts().list_versions().is_empty());
    }
}
