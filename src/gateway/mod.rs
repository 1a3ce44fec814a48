//! The Gateway request pipeline: admission → cache lookup → prompt
//! resolution → execution → costing → cache insertion → audit → response.
//!
//! `GatewayState` plays the role the host repo's `RouterState` plays: an
//! `Arc`-bundle of shared, mostly-immutable resources threaded through every
//! request handler, with the config itself hot-swappable behind
//! `Arc<RwLock<Arc<Config>>>`.

pub mod cache;
pub mod llm_client;
pub mod pricing;
pub mod prompt_registry;
pub mod provider;
pub mod remote;
pub mod rate_limiter;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Config, ProviderKind};
use crate::error::{ErrorKind, RateLimitReason};
use crate::store::{AuditLogStore, AuditRecord};
use crate::traffic::{TrafficEntry, TrafficLog};
use crate::api::rate_limit::IpRateLimiter;

use cache::{compute_cache_key, ResponseCache};
use llm_client::LlmClient;
use prompt_registry::PromptRegistry;
use provider::{Message, MockProvider, Provider, ProviderRequest};
use rate_limiter::RateLimiter;
use remote::RemoteProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub prompt_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub request_id: String,
    pub text: String,
    pub json: Option<serde_json::Value>,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub prompt_version_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub cache_hit: bool,
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_reason: Option<RateLimitReason>,
}

/// Bound on `max_output_tokens` the structural validator enforces — one past
/// either bound is rejected, matching the boundary-behavior spec.
pub const MIN_MAX_OUTPUT_TOKENS: u32 = 1;
pub const MAX_MAX_OUTPUT_TOKENS: u32 = 8192;

pub fn validate_generate_request(request: &GenerateRequest) -> anyhow::Result<()> {
    anyhow::ensure!(!request.messages.is_empty(), "messages must not be empty");
    anyhow::ensure!(
        (MIN_MAX_OUTPUT_TOKENS..=MAX_MAX_OUTPUT_TOKENS).contains(&request.max_output_tokens),
        "max_output_tokens must be between {MIN_MAX_OUTPUT_TOKENS} and {MAX_MAX_OUTPUT_TOKENS}"
    );
    Ok(())
}

/// Rough token estimate used for TPM admission, ahead of the real Provider
/// call — 1 token per ~4 characters of message content plus the requested
/// output budget.
fn estimate_tokens(request: &GenerateRequest) -> u64 {
    let input: u64 = request
        .messages
        .iter()
        .map(|m| (m.content.len() as u64 / 4).max(1))
        .sum();
    input + request.max_output_tokens as u64
}

fn content_fingerprint(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{}:{}", hex::encode(hasher.finalize())[..16].to_string(), content.len())
}

/// The Arc-bundle of shared Gateway resources, generalized from the host
/// repo's `RouterState`: hot-swappable config, plus the process-wide
/// rate limiter / cache / prompt registry / audit store / provider client.
pub struct GatewayState {
    config_lock: Arc<RwLock<Arc<Config>>>,
    config_path: PathBuf,
    rate_limiter: RateLimiter,
    cache: ResponseCache,
    prompts: PromptRegistry,
    audit: Arc<AuditLogStore>,
    llm_client: LlmClient,
    started_at: Instant,
    traffic: Arc<TrafficLog>,
    ip_rate_limiter: Option<IpRateLimiter>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, config_path: PathBuf) -> anyhow::Result<Self> {
        let rate_limiter = RateLimiter::new(config.rate_limit.max_qps, config.rate_limit.max_tpm);
        let cache = ResponseCache::new(
            config.cache.enabled,
            config.cache.ttl_seconds,
            config.cache.max_entries,
        );
        let prompts = PromptRegistry::load_dir(&config.prompts.directory, &config.prompts.default_version)?;
        let audit = Arc::new(AuditLogStore::new(&config.harness.log_dir));

        let provider: Arc<dyn Provider> = match config.provider.kind {
            ProviderKind::Mock => Arc::new(MockProvider::new()),
            ProviderKind::Remote => Arc::new(RemoteProvider::new(
                config
                    .provider
                    .base_url
                    .clone()
                    .expect("validated: remote provider requires base_url"),
                config.provider.model.clone(),
                config.provider.timeout_seconds,
                config.provider.api_key(),
            )),
        };
        let llm_client = LlmClient::new(provider, config.provider.timeout_seconds, config.provider.max_retries);
        let traffic = Arc::new(TrafficLog::new(config.gateway.traffic_log_capacity));
        let ip_rate_limiter = config.gateway.client_rpm.map(IpRateLimiter::new);

        Ok(Self {
            config_lock: Arc::new(RwLock::new(config)),
            config_path,
            rate_limiter,
            cache,
            prompts,
            audit,
            llm_client,
            started_at: Instant::now(),
            traffic,
            ip_rate_limiter,
        })
    }

    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().unwrap().clone()
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Swap in a freshly parsed+validated config. Resources tied to config
    /// values at construction time (rate limiter buckets, cache capacity,
    /// provider client) are NOT live-rebuilt by this delivery — only fields
    /// read fresh on every request (ports are read once at startup; thresholds
    /// and env overrides are re-read from the swapped config on each access
    /// through `config()`) reflect the hot reload, matching the host repo's
    /// own `replace_config` scope.
    pub fn replace_config(&self, new_config: Arc<Config>) {
        *self.config_lock.write().unwrap() = new_config;
    }

    pub fn audit(&self) -> &Arc<AuditLogStore> {
        &self.audit
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn provider_name(&self) -> &str {
        self.llm_client.provider_name()
    }

    pub fn traffic(&self) -> &Arc<TrafficLog> {
        &self.traffic
    }

    pub fn ip_rate_limiter(&self) -> Option<&IpRateLimiter> {
        self.ip_rate_limiter.as_ref()
    }

    /// Run the full request pipeline: admission, cache lookup, prompt
    /// resolution, execution, costing, cache insertion, audit, response.
    pub async fn generate(&self, mut request: GenerateRequest) -> GenerateResponse {
        let start = Instant::now();
        let request_id = request.request_id.take().unwrap_or_else(|| Uuid::new_v4().to_string());

        let estimated_tokens = estimate_tokens(&request);
        let admission = self.rate_limiter.check(estimated_tokens);
        if !admission.allowed {
            let response = GenerateResponse {
                request_id: request_id.clone(),
                text: String::new(),
                json: None,
                provider: self.provider_name().to_string(),
                model: self.config().provider.model.clone(),
                latency_ms: start.elapsed().as_millis() as u64,
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
                cost_usd: 0.0,
                prompt_version_used: String::new(),
                error_kind: Some(ErrorKind::RateLimited),
                cache_hit: false,
                rate_limited: true,
                rate_limit_reason: admission.reason,
            };
            self.emit_audit(&request, &response, false).await;
            return response;
        }

        // The registry only resolves which version is *in effect* for caching
        // and the response envelope — it does not rewrite caller-supplied
        // messages; composing the conversation from a template is the
        // Harness's job (§4.9), not the Gateway's.
        let effective_version = match self.prompts.resolve(request.prompt_version.as_deref()) {
            Some((_, version)) => version,
            None => "none".to_string(),
        };

        let config = self.config();
        let cache_key = compute_cache_key(
            &serde_json::to_value(&request.messages).unwrap_or_default(),
            &request.schema,
            request.max_output_tokens,
            self.provider_name(),
            &config.provider.model,
            &effective_version,
        );

        if let Some(cached) = self.cache.get(&cache_key) {
            let response = GenerateResponse {
                request_id: request_id.clone(),
                text: cached.text,
                json: cached.json,
                provider: self.provider_name().to_string(),
                model: config.provider.model.clone(),
                latency_ms: start.elapsed().as_millis() as u64,
                prompt_tokens: cached.prompt_tokens,
                completion_tokens: cached.completion_tokens,
                total_tokens: cached.total_tokens,
                cost_usd: cached.cost_usd,
                prompt_version_used: effective_version,
                error_kind: None,
                cache_hit: true,
                rate_limited: false,
                rate_limit_reason: None,
            };
            self.emit_audit(&request, &response, true).await;
            return response;
        }

        let output = self
            .llm_client
            .generate(ProviderRequest {
                messages: request.messages.clone(),
                schema: request.schema.clone(),
                max_output_tokens: request.max_output_tokens,
            })
            .await;

        let cost_usd = pricing::calculate_cost_usd(
            self.provider_name(),
            &config.provider.model,
            output.prompt_tokens,
            output.completion_tokens,
        );

        let response = GenerateResponse {
            request_id: request_id.clone(),
            text: output.text.clone(),
            json: output.json.clone(),
            provider: self.provider_name().to_string(),
            model: config.provider.model.clone(),
            latency_ms: start.elapsed().as_millis() as u64,
            prompt_tokens: output.prompt_tokens,
            completion_tokens: output.completion_tokens,
            total_tokens: output.total_tokens(),
            cost_usd,
            prompt_version_used: effective_version,
            error_kind: output.error_kind,
            cache_hit: false,
            rate_limited: false,
            rate_limit_reason: None,
        };

        if response.error_kind.is_none() {
            self.cache.insert(
                cache_key,
                cache::CachedResponse {
                    text: output.text,
                    json: output.json,
                    prompt_tokens: output.prompt_tokens,
                    completion_tokens: output.completion_tokens,
                    total_tokens: output.total_tokens(),
                    cost_usd,
                },
            );
        }

        self.emit_audit(&request, &response, false).await;
        response
    }

    async fn emit_audit(&self, request: &GenerateRequest, response: &GenerateResponse, cache_hit_override: bool) {
        let record = AuditRecord {
            timestamp: chrono::Utc::now(),
            request_id: response.request_id.clone(),
            provider: response.provider.clone(),
            model: response.model.clone(),
            latency_ms: response.latency_ms,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            total_tokens: response.total_tokens,
            cost_usd: response.cost_usd,
            prompt_version_requested: request.prompt_version.clone(),
            prompt_version_used: response.prompt_version_used.clone(),
            error_kind: response.error_kind,
            message_fingerprints: request.messages.iter().map(|m| content_fingerprint(&m.content)).collect(),
            has_schema: request.schema.is_some(),
            json_generated: response.json.is_some(),
            cache_hit: cache_hit_override || response.cache_hit,
            rate_limited: response.rate_limited,
            rate_limit_reason: response.rate_limit_reason,
        };
        if let Err(e) = self.audit.append_audit(&record).await {
            tracing::warn!(error = %e, "failed to write audit record");
        }

        let entry = TrafficEntry::new(
            response.request_id.clone(),
            response.provider.clone(),
            response.model.clone(),
            response.latency_ms,
        )
        .with_tokens(response.prompt_tokens, response.completion_tokens)
        .with_cost(response.cost_usd)
        .with_cache_hit(record.cache_hit)
        .with_rate_limited(response.rate_limited)
        .with_error_kind(response.error_kind.map(|k| k.as_str().to_string()));
        self.traffic.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::Role;

    fn test_state(dir: &std::path::Path) -> GatewayState {
        let mut config = Config::default();
        config.harness.log_dir = dir.to_path_buf();
        config.prompts.directory = dir.join("prompts");
        GatewayState::new(Arc::new(config), dir.join("config.toml")).unwrap()
    }

    fn req(content: &str, max_tokens: u32) -> GenerateRequest {
        GenerateRequest {
            request_id: None,
            messages: vec![Message { role: Role::User, content: content.to_string() }],
            schema: None,
            max_output_tokens: max_tokens,
            prompt_version: None,
        }
    }

    #[tokio::test]
    async fn mock_end_to_end_without_schema_produces_nonempty_response() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let response = state.generate(req("Hello", 256)).await;
        assert!(!response.text.is_empty());
        assert!(response.prompt_tokens > 0);
        assert!(response.completion_tokens > 0);
        assert_eq!(response.error_kind, None);
        assert!(!response.cache_hit);
    }

    #[tokio::test]
    async fn second_identical_request_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let first = state.generate(req("same request", 256)).await;
        let second = state.generate(req("same request", 256)).await;
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn rate_limited_request_yields_in_band_error_and_audit_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.harness.log_dir = dir.path().to_path_buf();
        config.rate_limit.max_qps = Some(1.0);
        let state = GatewayState::new(Arc::new(config), dir.path().join("config.toml")).unwrap();

        let _first = state.generate(req("a", 16)).await;
        let second = state.generate(req("b", 16)).await;
        assert_eq!(second.error_kind, Some(ErrorKind::RateLimited));
        assert_eq!(second.rate_limit_reason, Some(RateLimitReason::QpsLimit));
        assert_eq!(second.prompt_tokens, 0);
    }

    #[test]
    fn validate_rejects_empty_messages() {
        let request = GenerateRequest {
            request_id: None,
            messages: vec![],
            schema: None,
            max_output_tokens: 10,
            prompt_version: None,
        };
        assert!(validate_generate_request(&request).is_err());
    }

    #[test]
    fn validate_rejects_out_of_bounds_max_output_tokens() {
        let mut request = req("x", MAX_MAX_OUTPUT_TOKENS + 1);
        assert!(validate_generate_request(&request).is_err());
        request.max_output_tokens = MAX_MAX_OUTPUT_TOKENS;
        assert!(validate_generate_request(&request).is_ok());
        request.max_output_tokens = 0;
        assert!(validate_generate_request(&request).is_err());
    }
}
