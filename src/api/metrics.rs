//! Prometheus-compatible `/metrics` endpoint.
//!
//! All metrics are derived from the in-memory ring-buffer window. Because the
//! buffer has a fixed capacity, values represent a **sliding window** of recent
//! requests rather than lifetime counters. Use `TYPE gauge` throughout for
//! semantic accuracy — values may decrease as old entries rotate out.
//!
//! Metric families:
//! - `llmops_window_size`          — entries currently in the ring buffer
//! - `llmops_requests`             — per-provider/model/cache_hit request counts
//! - `llmops_latency_ms_sum`       — sum of latencies per provider/model (for avg)
//! - `llmops_latency_ms_count`     — denominator matching the sum above
//! - `llmops_cost_usd_sum`         — sum of cost per provider/model
//! - `llmops_cache_hits_total`     — requests served from cache
//! - `llmops_rate_limited_total`   — requests declined by the admission gate
//! - `llmops_errors_total`         — requests that returned an error, by kind

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::gateway::GatewayState;

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let entries = state.traffic().recent(usize::MAX).await;

    let window_size = entries.len();
    let mut cache_hits: u64 = 0;
    let mut rate_limited: u64 = 0;

    // (provider, model, cache_hit) -> count
    let mut request_counts: HashMap<(String, String, bool), u64> = HashMap::new();
    // (provider, model) -> (latency_sum_ms, count, cost_sum_usd)
    let mut per_model: HashMap<(String, String), (u64, u64, f64)> = HashMap::new();
    // error_kind -> count
    let mut error_counts: HashMap<String, u64> = HashMap::new();

    for e in &entries {
        if e.cache_hit {
            cache_hits += 1;
        }
        if e.rate_limited {
            rate_limited += 1;
        }
        if let Some(kind) = &e.error_kind {
            *error_counts.entry(kind.clone()).or_default() += 1;
        }

        *request_counts
            .entry((e.provider.clone(), e.model.clone(), e.cache_hit))
            .or_default() += 1;

        let agg = per_model.entry((e.provider.clone(), e.model.clone())).or_default();
        agg.0 += e.latency_ms;
        agg.1 += 1;
        agg.2 += e.cost_usd;
    }

    let mut out = String::with_capacity(1024);

    out.push_str("# HELP llmops_window_size Number of requests currently held in the ring-buffer window.\n");
    out.push_str("# TYPE llmops_window_size gauge\n");
    out.push_str(&format!("llmops_window_size {window_size}\n\n"));

    out.push_str("# HELP llmops_requests Request count in the current window, labelled by provider, model, and cache_hit.\n");
    out.push_str("# TYPE llmops_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((provider, model, cache_hit), count) in req_rows {
        out.push_str(&format!(
            "llmops_requests{{provider=\"{provider}\",model=\"{model}\",cache_hit=\"{cache_hit}\"}} {count}\n"
        ));
    }
    out.push('\n');

    out.push_str("# HELP llmops_latency_ms_sum Sum of request latency (ms) in the current window, grouped by provider and model.\n");
    out.push_str("# TYPE llmops_latency_ms_sum gauge\n");
    out.push_str("# HELP llmops_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE llmops_latency_ms_count gauge\n");
    out.push_str("# HELP llmops_cost_usd_sum Sum of estimated cost (USD) in the current window, grouped by provider and model.\n");
    out.push_str("# TYPE llmops_cost_usd_sum gauge\n");
    let mut model_rows: Vec<_> = per_model.iter().collect();
    model_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((provider, model), (latency_sum, count, cost_sum)) in model_rows {
        out.push_str(&format!(
            "llmops_latency_ms_sum{{provider=\"{provider}\",model=\"{model}\"}} {latency_sum}\n"
        ));
        out.push_str(&format!(
            "llmops_latency_ms_count{{provider=\"{provider}\",model=\"{model}\"}} {count}\n"
        ));
        out.push_str(&format!(
            "llmops_cost_usd_sum{{provider=\"{provider}\",model=\"{model}\"}} {cost_sum}\n"
        ));
    }
    out.push('\n');

    out.push_str("# HELP llmops_cache_hits_total Requests served from the response cache in the current window.\n");
    out.push_str("# TYPE llmops_cache_hits_total gauge\n");
    out.push_str(&format!("llmops_cache_hits_total {cache_hits}\n\n"));

    out.push_str("# HELP llmops_rate_limited_total Requests declined by the admission gate in the current window.\n");
    out.push_str("# TYPE llmops_rate_limited_total gauge\n");
    out.push_str(&format!("llmops_rate_limited_total {rate_limited}\n\n"));

    out.push_str("# HELP llmops_errors_total Requests that returned an error in the current window, labelled by error kind.\n");
    out.push_str("# TYPE llmops_errors_total gauge\n");
    let mut error_rows: Vec<_> = error_counts.iter().collect();
    error_rows.sort_by(|a, b| a.0.cmp(b.0));
    for (kind, count) in error_rows {
        out.push_str(&format!("llmops_errors_total{{kind=\"{kind}\"}} {count}\n"));
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::traffic::{TrafficEntry, TrafficLog};

    fn mock_log() -> Arc<TrafficLog> {
        let log = Arc::new(TrafficLog::new(100));
        log.push(
            TrafficEntry::new("r1".into(), "remote".into(), "gpt-4o".into(), 120)
                .with_tokens(10, 20)
                .with_cost(0.01),
        );
        log.push(
            TrafficEntry::new("r2".into(), "remote".into(), "gpt-4o".into(), 95)
                .with_tokens(10, 20)
                .with_cache_hit(true),
        );
        log.push(
            TrafficEntry::new("r3".into(), "mock".into(), "mock-model".into(), 430),
        );
        log.push(
            TrafficEntry::new("r4".into(), "remote".into(), "gpt-4o".into(), 80)
                .with_error_kind(Some("timeout".to_string())),
        );
        log
    }

    #[tokio::test]
    async fn window_size_equals_entry_count() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn error_count_is_accurate() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let errors = entries.iter().filter(|e| e.error_kind.is_some()).count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn latency_sum_is_accurate_per_provider_model() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let sum: u64 = entries
            .iter()
            .filter(|e| e.provider == "remote" && e.model == "gpt-4o")
            .map(|e| e.latency_ms)
            .sum();
        // 120 + 95 + 80 = 295
        assert_eq!(sum, 295);
    }
}
