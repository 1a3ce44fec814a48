//! Process configuration: loaded once from TOML, hot-reloadable, with
//! environment-variable overrides layered on top of the file.
//!
//! Mirrors the host repo's `Config::load` + `Arc<RwLock<Arc<Config>>>` hot-swap
//! shape: a background task polls the file's mtime and atomically swaps in a
//! freshly parsed and validated `Config`, discarding (and logging) a bad
//! reload rather than crashing the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_client_port() -> u16 {
    8080
}
fn default_admin_port() -> u16 {
    8081
}
fn default_traffic_log_capacity() -> usize {
    500
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_cache_ttl_seconds() -> u64 {
    300
}
fn default_cache_max_entries() -> usize {
    1000
}
fn default_model() -> String {
    "mock-model".to_string()
}
fn default_prompt_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_prompt_version() -> String {
    "latest".to_string()
}
fn default_harness_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_s1_threshold() -> f64 {
    100.0
}
fn default_overall_threshold() -> f64 {
    80.0
}
fn default_top_n() -> usize {
    5
}
const fn default_cache_enabled() -> bool {
    true
}

/// Which Provider adapter the Gateway should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Mock,
    Remote,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Mock => "mock",
            Self::Remote => "remote",
        })
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "remote" => Ok(Self::Remote),
            other => anyhow::bail!("unknown provider kind {other:?} (expected mock|remote)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub client_port: u16,
    pub admin_port: u16,
    pub traffic_log_capacity: usize,
    pub admin_token_env: Option<String>,
    /// Per-IP requests-per-minute limit on the client port. Absent disables
    /// the middleware entirely.
    pub client_rpm: Option<u32>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_port: default_client_port(),
            admin_port: default_admin_port(),
            traffic_log_capacity: default_traffic_log_capacity(),
            admin_token_env: None,
            client_rpm: None,
        }
    }
}

impl GatewayConfig {
    /// Resolve the admin bearer token from the configured environment
    /// variable, if any. `None` both when unset and when the env var itself
    /// is absent — either way the admin-auth middleware is a no-op.
    pub fn admin_token(&self) -> Option<String> {
        self.admin_token_env.as_ref().and_then(|var| std::env::var(var).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_seconds: default_cache_ttl_seconds(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Absent = QPS bucket disabled (never declines).
    pub max_qps: Option<f64>,
    /// Absent = TPM bucket disabled (never declines).
    pub max_tpm: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Mock,
            model: default_model(),
            api_key_env: None,
            base_url: None,
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key from the configured environment variable, if any.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub directory: PathBuf,
    pub default_version: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            directory: default_prompt_dir(),
            default_version: default_prompt_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub log_dir: PathBuf,
    pub s1_threshold: f64,
    pub overall_threshold: f64,
    pub top_n: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_dir: default_harness_log_dir(),
            s1_threshold: default_s1_threshold(),
            overall_threshold: default_overall_threshold(),
            top_n: default_top_n(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub provider: ProviderConfig,
    pub prompts: PromptsConfig,
    pub harness: HarnessConfig,
}

/// The closed set of environment variables that override config-file fields,
/// applied after parsing — file gives structure, env gives secrets/overrides,
/// the same layering the host repo's `BackendConfig::api_key()` pattern uses.
fn apply_env_overrides(mut config: Config, env: &HashMap<String, String>) -> Result<Config> {
    if let Some(v) = env.get("LLM_PROVIDER") {
        config.provider.kind = v.parse().context("LLM_PROVIDER")?;
    }
    if let Some(v) = env.get("LLM_MODEL") {
        config.provider.model = v.clone();
    }
    if let Some(v) = env.get("LLM_TIMEOUT_SECONDS") {
        config.provider.timeout_seconds =
            v.parse().context("LLM_TIMEOUT_SECONDS must be an integer")?;
    }
    if let Some(v) = env.get("LLM_MAX_RETRIES") {
        config.provider.max_retries = v.parse().context("LLM_MAX_RETRIES must be an integer")?;
    }
    if let Some(v) = env.get("CACHE_ENABLED") {
        config.cache.enabled = parse_bool(v).context("CACHE_ENABLED must be true/false")?;
    }
    if let Some(v) = env.get("CACHE_TTL_SECONDS") {
        config.cache.ttl_seconds = v.parse().context("CACHE_TTL_SECONDS must be an integer")?;
    }
    if let Some(v) = env.get("CACHE_MAX_ENTRIES") {
        config.cache.max_entries = v.parse().context("CACHE_MAX_ENTRIES must be an integer")?;
    }
    if let Some(v) = env.get("RATE_LIMIT_QPS") {
        config.rate_limit.max_qps = Some(v.parse().context("RATE_LIMIT_QPS must be a number")?);
    }
    if let Some(v) = env.get("RATE_LIMIT_TPM") {
        config.rate_limit.max_tpm = Some(v.parse().context("RATE_LIMIT_TPM must be a number")?);
    }
    if let Some(v) = env.get("PROMPT_VERSION") {
        config.prompts.default_version = v.clone();
    }
    if let Some(v) = env.get("LOG_DIR") {
        config.harness.log_dir = PathBuf::from(v);
    }
    Ok(config)
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("cannot parse {other:?} as a boolean"),
    }
}

impl Config {
    /// Parse + apply env overrides + validate, in that order.
    pub fn from_toml_str(raw: &str, env: &HashMap<String, String>) -> Result<Self> {
        let config: Config = toml::from_str(raw).context("parsing config TOML")?;
        let config = apply_env_overrides(config, env)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, layering the real process environment on top.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_toml_str(&raw, &env)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.gateway.client_port != self.gateway.admin_port,
            "client_port and admin_port must differ"
        );
        anyhow::ensure!(
            self.provider.timeout_seconds > 0,
            "provider.timeout_seconds must be positive"
        );
        if self.provider.kind == ProviderKind::Remote {
            anyhow::ensure!(
                self.provider.base_url.is_some(),
                "provider.base_url is required when provider.kind = \"remote\""
            );
        }
        if let Some(qps) = self.rate_limit.max_qps {
            anyhow::ensure!(qps > 0.0, "rate_limit.max_qps must be positive when set");
        }
        if let Some(tpm) = self.rate_limit.max_tpm {
            anyhow::ensure!(tpm > 0.0, "rate_limit.max_tpm must be positive when set");
        }
        Ok(())
    }

    /// A config view safe to expose over `/admin/config`. Secrets (API keys)
    /// are never loaded into this struct — only the environment variable
    /// *name* that holds them — so no redaction step is needed beyond
    /// omitting the resolved value, which this struct never stores.
    pub fn redacted(&self) -> &Self {
        self
    }
}
