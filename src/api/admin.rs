//! Admin API (the admin port) — operator-facing introspection and
//! regression-gate endpoints.
//!
//! These endpoints are separated onto a different port so they can be
//! network-restricted independently of the client API (e.g. accessible only
//! from the internal network, never exposed to callers).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::gateway::GatewayState;
use crate::harness::catalogue;
use crate::harness::check::{run_check, split_by_trailing_days};
use crate::harness::gate_config::{GateConfig, Thresholds};
use crate::store::{LogRecord, RunRecord};

/// Build the admin-facing axum router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/audit/recent", get(audit_recent))
        .route("/admin/config", get(config))
        .route("/metrics", get(crate::api::metrics::metrics))
        .route("/admin/gate-check", post(gate_check))
        .with_state(state)
}

/// GET /admin/health — liveness plus a few process-level facts.
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "provider": state.provider_name(),
        "uptime_seconds": state.uptime().as_secs(),
    }))
}

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/audit/recent?limit=N — recent N traffic entries plus a
/// sliding-window summary (default 100).
pub async fn audit_recent(
    State(state): State<Arc<GatewayState>>,
    Query(q): Query<AuditQuery>,
) -> impl IntoResponse {
    let entries = state.traffic().recent(q.limit).await;
    let stats = state.traffic().stats().await;
    Json(json!({
        "stats": stats,
        "entries": entries,
    }))
}

/// GET /admin/config — returns the current config with secrets redacted.
pub async fn config(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let config = state.config();
    Json(config.redacted().clone())
}

#[derive(Debug, Deserialize)]
pub struct GateCheckRequest {
    /// Trailing days of the log store to treat as "current". Ignored when
    /// `baseline_dir` is supplied with an external baseline.
    #[serde(default = "default_current_days")]
    pub current_days: i64,
    /// Trailing days preceding the current window to treat as the baseline.
    /// Zero disables the baseline comparison entirely.
    #[serde(default = "default_baseline_days")]
    pub baseline_days: i64,
    /// Path to a directory of JSONL day-files to use as the baseline instead
    /// of `baseline_days` within this store.
    #[serde(default)]
    pub baseline_dir: Option<std::path::PathBuf>,
    /// Path to a `.agentreg.toml`. Falls back to auto-discovery in the audit
    /// log directory when absent.
    #[serde(default)]
    pub config_path: Option<std::path::PathBuf>,
    /// Path to a case catalogue (CSV file or directory) for per-case
    /// thresholds.
    #[serde(default)]
    pub catalogue_path: Option<std::path::PathBuf>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub changed_paths: Vec<String>,
    #[serde(default)]
    pub overrides: Thresholds,
}
fn default_current_days() -> i64 {
    7
}
fn default_baseline_days() -> i64 {
    7
}

fn to_run_records(records: Vec<LogRecord>) -> Vec<RunRecord> {
    records
        .into_iter()
        .filter_map(|r| match r {
            LogRecord::Run(run) => Some(run),
            LogRecord::Audit(_) => None,
        })
        .collect()
}

/// POST /admin/gate-check — run the Gate Checker on-demand over the on-disk
/// audit log and return the verdict as JSON. Mirrors `llmops gate-check`'s
/// window/threshold contract so CI and ad-hoc operator checks agree.
pub async fn gate_check(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<GateCheckRequest>,
) -> Result<impl IntoResponse, AppError> {
    let log_dir = state.audit().log_dir();

    let (current, baseline) = if let Some(baseline_dir) = &req.baseline_dir {
        let all = to_run_records(crate::store::AuditLogStore::load_all_in_dir(log_dir)?);
        let current = all
            .into_iter()
            .filter(|r| r.timestamp >= chrono::Utc::now() - chrono::Duration::days(req.current_days))
            .collect();
        let baseline = to_run_records(crate::store::AuditLogStore::load_all_in_dir(baseline_dir)?);
        (current, baseline)
    } else {
        let all = to_run_records(state.audit().load_trailing(req.current_days + req.baseline_days)?);
        split_by_trailing_days(&all, req.current_days, req.baseline_days)
    };

    let gate_config = match &req.config_path {
        Some(path) => Some(GateConfig::load(path)?),
        None => GateConfig::discover(log_dir)?,
    };
    let thresholds = match &gate_config {
        Some(gc) => gc.resolve_thresholds(&req.labels, &req.changed_paths, req.overrides.clone()),
        None => req.overrides.resolved(),
    };

    let cases = match &req.catalogue_path {
        Some(path) => Some(catalogue::load(path)?),
        None => None,
    };

    let verdict = run_check(&current, &baseline, thresholds, cases.as_deref());
    let status = if verdict.passes() { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };

    Ok((
        status,
        Json(json!({
            "passes": verdict.passes(),
            "exit_code": verdict.exit_code(),
            "overall_rate": verdict.overall_rate,
            "s1_rate": verdict.s1_rate_display,
            "s1_passed": verdict.s1_passed,
            "s1_total": verdict.s1_total,
            "s2_rate": verdict.s2_rate_display,
            "s2_passed": verdict.s2_passed,
            "s2_total": verdict.s2_total,
            "threshold_results": verdict.threshold_results.iter().map(|t| json!({
                "name": t.name,
                "actual": t.actual,
                "required": t.required,
                "passed": t.passed,
            })).collect::<Vec<_>>(),
            "case_threshold_results": verdict.case_threshold_results.iter().map(|t| json!({
                "case_id": t.case_id,
                "actual_pct": t.actual_pct,
                "required_pct": t.required_pct,
                "passed": t.passed,
            })).collect::<Vec<_>>(),
            "top_regressions": verdict.top_regressions.iter().map(|r| json!({
                "case_id": r.case_id,
                "severity": r.severity,
                "category": r.category,
                "baseline_pct": r.baseline_pct,
                "current_pct": r.current_pct,
                "delta_pct": r.delta_pct,
                "failure_types": r.failure_types,
            })).collect::<Vec<_>>(),
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_check_request_defaults_to_a_week_each_way() {
        let req: GateCheckRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.current_days, 7);
        assert_eq!(req.baseline_days, 7);
        assert!(req.baseline_dir.is_none());
        assert!(req.labels.is_empty());
    }
}
