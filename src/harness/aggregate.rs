//! Aggregator: pure functions over a flat list of [`RunRecord`]s. Grounded
//! near 1:1 in the original `aggregate.py`.

use std::collections::HashMap;

use crate::store::RunRecord;

use super::catalogue::Severity;

/// `"N/A"` when `total == 0`, else a percentage string with one decimal.
pub fn format_rate(passed: usize, total: usize) -> String {
    if total == 0 {
        "N/A".to_string()
    } else {
        format!("{:.1}", passed as f64 / total as f64 * 100.0)
    }
}

pub fn overall_pass_rate(records: &[RunRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let passed = records.iter().filter(|r| r.passed).count();
    passed as f64 / records.len() as f64 * 100.0
}

/// Among records whose canonicalized severity matches `severity`:
/// `(passed, total)`. No matching records → `(0, 0)`, to be rendered as
/// `"N/A"` by the caller via [`format_rate`], never as 0%.
pub fn severity_pass_rate(records: &[RunRecord], severity: Severity) -> (usize, usize) {
    let matching: Vec<&RunRecord> = records
        .iter()
        .filter(|r| Severity::canonicalize(&r.severity) == severity)
        .collect();
    let total = matching.len();
    let passed = matching.iter().filter(|r| r.passed).count();
    (passed, total)
}

/// 1-based position: `values[max(0, ceil(p/100 * N) - 1)]`, sorted ascending.
/// Zero on empty input.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len() as f64;
    let idx = ((p / 100.0 * n).ceil() as isize - 1).max(0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Failure type for a record: `failure_type` if set, else "empty_output" —
/// mirrors the original's `error string -> empty_output` fallback chain,
/// collapsed here because `RunRecord.failure_type` is the single typed
/// source of truth in this port (no separate free-text error field).
fn failure_type_of(record: &RunRecord) -> String {
    record
        .failure_type
        .clone()
        .unwrap_or_else(|| "empty_output".to_string())
}

/// Count of failing records bucketed by failure type, sorted by count
/// descending.
pub fn failure_breakdown(records: &[RunRecord]) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records.iter().filter(|r| !r.passed) {
        *counts.entry(failure_type_of(record)).or_insert(0) += 1;
    }
    let mut entries: Vec<_> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
}

/// Per case_id: `(passed, total)` → pass rate in `[0, 1]`.
pub fn case_pass_rates(records: &[RunRecord]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for record in records {
        let entry = counts.entry(record.case_id.clone()).or_insert((0, 0));
        entry.1 += 1;
        if record.passed {
            entry.0 += 1;
        }
    }
    counts
        .into_iter()
        .map(|(case_id, (passed, total))| (case_id, passed as f64 / total as f64))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopFailure {
    pub case_id: String,
    pub failure_type: String,
    pub count: usize,
    pub is_s1: bool,
    pub suspected_cause: String,
}

fn suspected_cause(failure_type: &str) -> &'static str {
    match failure_type {
        "timeout" => "infra/provider",
        "bad_json" => "prompt/schema",
        "loop" => "tool/routing",
        "policy_violation" => "safety",
        "quality_fail" => "prompt/agent-logic",
        "provider_error" => "infra/provider",
        "rate_limited" => "rate-limit config",
        "empty_output" => "model/prompt",
        _ => "investigate",
    }
}

/// Count failing `(case_id, failure_type)` pairs; sort S1-first then by
/// count descending; cap at 10.
pub fn top_failures(records: &[RunRecord]) -> Vec<TopFailure> {
    let mut counts: HashMap<(String, String), (usize, bool)> = HashMap::new();
    for record in records.iter().filter(|r| !r.passed) {
        let key = (record.case_id.clone(), failure_type_of(record));
        let is_s1 = Severity::canonicalize(&record.severity) == Severity::S1;
        let entry = counts.entry(key).or_insert((0, is_s1));
        entry.0 += 1;
    }
    let mut entries: Vec<TopFailure> = counts
        .into_iter()
        .map(|((case_id, failure_type), (count, is_s1))| TopFailure {
            suspected_cause: suspected_cause(&failure_type).to_string(),
            case_id,
            failure_type,
            count,
            is_s1,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.is_s1
            .cmp(&a.is_s1)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| a.case_id.cmp(&b.case_id))
    });
    entries.truncate(10);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn run(case_id: &str, severity: &str, passed: bool, failure_type: Option<&str>) -> RunRecord {
        RunRecord {
            timestamp: Utc::now(),
            run_id: "r1".into(),
            case_id: case_id.into(),
            severity: severity.into(),
            category: "tools".into(),
            passed,
            failure_type: failure_type.map(str::to_string),
            latency_ms: 10,
            reasons: vec![],
            provider: "mock".into(),
            model: "mock-model".into(),
            prompt_version: "1".into(),
            prompt_tokens: 1,
            completion_tokens: 1,
            output_json: None,
            cost_usd: 0.0,
        }
    }

    #[test]
    fn format_rate_is_na_on_zero_total_not_zero_percent() {
        assert_eq!(format_rate(0, 0), "N/A");
        assert_eq!(format_rate(1, 2), "50.0");
    }

    #[test]
    fn severity_pass_rate_buckets_only_matching_records() {
        let records = vec![
            run("TC1", "S1", true, None),
            run("TC2", "S2", false, Some("quality_fail")),
            run("TC3", "weird", true, None),
        ];
        let (passed, total) = severity_pass_rate(&records, Severity::S1);
        assert_eq!((passed, total), (1, 1));
        let (passed, total) = severity_pass_rate(&records, Severity::S2);
        assert_eq!((passed, total), (0, 1));
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn percentile_uses_one_based_ceil_position() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        // p50 -> ceil(0.5*4)=2 -> index 1 -> 20.0
        assert_eq!(percentile(&values, 50.0), 20.0);
        // p100 -> ceil(4)=4 -> index 3 -> 40.0
        assert_eq!(percentile(&values, 100.0), 40.0);
    }

    #[test]
    fn failure_breakdown_sorted_by_count_descending() {
        let records = vec![
            run("TC1", "S1", false, Some("timeout")),
            run("TC2", "S1", false, Some("timeout")),
            run("TC3", "S1", false, Some("bad_json")),
        ];
        let breakdown = failure_breakdown(&records);
        assert_eq!(breakdown[0], ("timeout".to_string(), 2));
        assert_eq!(breakdown[1], ("bad_json".to_string(), 1));
    }

    #[test]
    fn top_failures_are_s1_first_then_count_desc_capped_at_10() {
        let mut records = vec![];
        for i in 0..15 {
            records.push(run(&format!("TC{i}"), "S2", false, Some("quality_fail")));
        }
        records.push(run("TCS1", "S1", false, Some("timeout")));
        let top = top_failures(&records);
        assert_eq!(top.len(), 10);
        assert!(top[0].is_s1);
        assert_eq!(top[0].suspected_cause, "infra/provider");
    }
}
