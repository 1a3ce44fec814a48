//! In-memory traffic log exposed through the admin API.
//!
//! [`TrafficLog`] is a fixed-capacity ring-buffer: once full, the oldest entry
//! is evicted to make room for the newest. This gives a bounded, O(1) memory
//! footprint regardless of request volume. Distinct from [`crate::store::AuditLogStore`]:
//! this buffer is the sliding window behind `/admin/audit/recent` and
//! `/metrics`; the audit store is the durable on-disk log the Gate Checker
//! reads from.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push] uses
/// a non-blocking `try_lock` so it never delays request handling; in the
/// unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    /// Create a new log with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a completed request.
    ///
    /// This is a best-effort, non-blocking operation: if the mutex is contended
    /// the entry is dropped rather than blocking the request path.
    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Compute aggregate statistics over all buffered entries.
    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };

        let error_count = entries.iter().filter(|e| e.error_kind.is_some()).count();
        let cache_hit_count = entries.iter().filter(|e| e.cache_hit).count();
        let rate_limited_count = entries.iter().filter(|e| e.rate_limited).count();
        let total_cost_usd = entries.iter().map(|e| e.cost_usd).sum();

        let mut provider_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for entry in entries.iter() {
            *provider_counts.entry(entry.provider.clone()).or_default() += 1;
        }

        TrafficStats {
            total_requests: total,
            error_count,
            cache_hit_count,
            rate_limited_count,
            avg_latency_ms,
            total_cost_usd,
            provider_counts,
        }
    }
}

/// A single completed Gateway request, as exposed over `/admin/audit/recent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub cache_hit: bool,
    pub rate_limited: bool,
    pub error_kind: Option<String>,
}

impl TrafficEntry {
    pub fn new(request_id: String, provider: String, model: String, latency_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            request_id,
            provider,
            model,
            latency_ms,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            cache_hit: false,
            rate_limited: false,
            error_kind: None,
        }
    }

    pub fn with_tokens(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_rate_limited(mut self, rate_limited: bool) -> Self {
        self.rate_limited = rate_limited;
        self
    }

    pub fn with_error_kind(mut self, error_kind: Option<String>) -> Self {
        self.error_kind = error_kind;
        self
    }
}

/// Aggregate statistics derived from all buffered [`TrafficEntry`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub cache_hit_count: usize,
    pub rate_limited_count: usize,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub provider_counts: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(provider: &str, latency_ms: u64) -> TrafficEntry {
        TrafficEntry::new("req-1".into(), provider.into(), "mock-model".into(), latency_ms)
    }

    #[tokio::test]
    async fn push_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.push(make_entry("mock", 42));

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].provider, "mock");
        assert_eq!(recent[0].latency_ms, 42);
    }

    #[tokio::test]
    async fn recent_returns_entries_newest_first() {
        let log = TrafficLog::new(10);
        log.push(make_entry("mock", 1));
        log.push(make_entry("remote", 2));
        log.push(make_entry("mock", 3));

        let recent = log.recent(10).await;
        assert_eq!(recent[0].latency_ms, 3);
        assert_eq!(recent[2].latency_ms, 1);
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(3);
        log.push(make_entry("mock", 1));
        log.push(make_entry("mock", 2));
        log.push(make_entry("mock", 3));
        log.push(make_entry("mock", 4));

        let all = log.recent(100).await;
        assert_eq!(all.len(), 3);
        assert!(!all.iter().any(|e| e.latency_ms == 1));
        assert!(all.iter().any(|e| e.latency_ms == 4));
    }

    #[tokio::test]
    async fn stats_on_empty_log() {
        let log = TrafficLog::new(10);
        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
    }

    #[tokio::test]
    async fn stats_averages_latency_and_sums_cost() {
        let log = TrafficLog::new(10);
        log.push(make_entry("mock", 100).with_cost(0.01));
        log.push(make_entry("mock", 200).with_cost(0.02));
        log.push(make_entry("mock", 300).with_cost(0.03));

        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!((stats.total_cost_usd - 0.06).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stats_counts_errors_and_cache_hits() {
        let log = TrafficLog::new(10);
        log.push(make_entry("mock", 10).with_cache_hit(true));
        log.push(make_entry("mock", 20).with_error_kind(Some("timeout".to_string())));
        log.push(make_entry("mock", 30));

        let stats = log.stats().await;
        assert_eq!(stats.cache_hit_count, 1);
        assert_eq!(stats.error_count, 1);
    }

    #[test]
    fn entry_has_unique_ids() {
        let a = make_entry("mock", 1);
        let b = make_entry("mock", 1);
        assert_ne!(a.id, b.id, "every entry must have a unique UUID");
    }
}
