//! Analyzer: compares a current period of [`RunRecord`]s against a baseline
//! period. Grounded in the original `analyze.py`, `flakiness.py`, and
//! `diff_explain.py`.

use std::collections::{HashMap, HashSet};

use crate::store::RunRecord;

use super::aggregate::{case_pass_rates, severity_pass_rate};
use super::catalogue::Severity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassRateDelta {
    pub baseline_pct: f64,
    pub current_pct: f64,
    pub delta_pct: f64,
}

/// `(baseline%, current%, delta%)`. Empty current → all zeros. Empty
/// baseline → baseline 0, delta = current.
pub fn compute_pass_rate_delta(
    current: &[RunRecord],
    baseline: &[RunRecord],
    severity: Option<Severity>,
) -> PassRateDelta {
    if current.is_empty() {
        return PassRateDelta { baseline_pct: 0.0, current_pct: 0.0, delta_pct: 0.0 };
    }

    let current_pct = match severity {
        Some(s) => {
            let (passed, total) = severity_pass_rate(current, s);
            if total == 0 { 0.0 } else { passed as f64 / total as f64 * 100.0 }
        }
        None => {
            let passed = current.iter().filter(|r| r.passed).count();
            passed as f64 / current.len() as f64 * 100.0
        }
    };

    let baseline_pct = if baseline.is_empty() {
        0.0
    } else {
        match severity {
            Some(s) => {
                let (passed, total) = severity_pass_rate(baseline, s);
                if total == 0 { 0.0 } else { passed as f64 / total as f64 * 100.0 }
            }
            None => {
                let passed = baseline.iter().filter(|r| r.passed).count();
                passed as f64 / baseline.len() as f64 * 100.0
            }
        }
    };

    PassRateDelta { baseline_pct, current_pct, delta_pct: current_pct - baseline_pct }
}

fn failure_type_of(record: &RunRecord) -> String {
    record.failure_type.clone().unwrap_or_else(|| "empty_output".to_string())
}

/// For each failure type present in either period, `current_count - baseline_count`.
pub fn compute_failure_type_delta(current: &[RunRecord], baseline: &[RunRecord]) -> Vec<(String, i64)> {
    let mut current_counts: HashMap<String, i64> = HashMap::new();
    for r in current.iter().filter(|r| !r.passed) {
        *current_counts.entry(failure_type_of(r)).or_insert(0) += 1;
    }
    let mut baseline_counts: HashMap<String, i64> = HashMap::new();
    for r in baseline.iter().filter(|r| !r.passed) {
        *baseline_counts.entry(failure_type_of(r)).or_insert(0) += 1;
    }
    let all_types: HashSet<&String> = current_counts.keys().chain(baseline_counts.keys()).collect();
    let mut deltas: Vec<(String, i64)> = all_types
        .into_iter()
        .map(|t| {
            let delta = current_counts.get(t).copied().unwrap_or(0) - baseline_counts.get(t).copied().unwrap_or(0);
            (t.clone(), delta)
        })
        .collect();
    deltas.sort_by(|a, b| a.0.cmp(&b.0));
    deltas
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopRegression {
    pub case_id: String,
    pub severity: String,
    pub category: String,
    pub baseline_pct: f64,
    pub current_pct: f64,
    pub delta_pct: f64,
    pub failure_types: Vec<String>,
}

fn case_metadata(records: &[RunRecord]) -> HashMap<String, (String, String)> {
    let mut meta = HashMap::new();
    for r in records {
        meta.entry(r.case_id.clone()).or_insert_with(|| (r.severity.clone(), r.category.clone()));
    }
    meta
}

/// For each case_id present in `current`, `delta = current_rate -
/// baseline_rate` (missing baseline defaults to 1.0 — previously passing).
/// Includes every case with `delta <= 0`. Sorted by delta ascending, S1
/// tie-broken before S2. Capped at `top_n`.
pub fn compute_top_regressions(current: &[RunRecord], baseline: &[RunRecord], top_n: usize) -> Vec<TopRegression> {
    let current_rates = case_pass_rates(current);
    let baseline_rates = case_pass_rates(baseline);
    let metadata = case_metadata(current);

    let mut failure_types_by_case: HashMap<String, Vec<String>> = HashMap::new();
    for r in current.iter().filter(|r| !r.passed) {
        failure_types_by_case.entry(r.case_id.clone()).or_default().push(failure_type_of(r));
    }

    let mut regressions: Vec<TopRegression> = Vec::new();
    for (case_id, &current_rate) in &current_rates {
        let baseline_rate = baseline_rates.get(case_id).copied().unwrap_or(1.0);
        let delta = current_rate - baseline_rate;
        if delta <= 0.0 {
            let (severity, category) = metadata.get(case_id).cloned().unwrap_or_default();
            let mut failure_types = failure_types_by_case.get(case_id).cloned().unwrap_or_default();
            failure_types.sort();
            failure_types.dedup();
            regressions.push(TopRegression {
                case_id: case_id.clone(),
                severity,
                category,
                baseline_pct: baseline_rate * 100.0,
                current_pct: current_rate * 100.0,
                delta_pct: delta * 100.0,
                failure_types,
            });
        }
    }

    regressions.sort_by(|a, b| {
        a.delta_pct
            .partial_cmp(&b.delta_pct)
            .unwrap()
            .then_with(|| is_s1(&b.severity).cmp(&is_s1(&a.severity)))
            .then_with(|| a.case_id.cmp(&b.case_id))
    });
    regressions.truncate(top_n);
    regressions
}

fn is_s1(severity: &str) -> bool {
    Severity::canonicalize(severity) == Severity::S1
}

/// Among case_ids present in BOTH periods (no default substitution), the one
/// with the smallest (most negative) delta. `None` when there is no baseline
/// data or no overlap.
pub fn worst_regression(current: &[RunRecord], baseline: &[RunRecord]) -> Option<(String, f64)> {
    if baseline.is_empty() {
        return None;
    }
    let current_rates = case_pass_rates(current);
    let baseline_rates = case_pass_rates(baseline);

    current_rates
        .iter()
        .filter_map(|(case_id, &current_rate)| {
            baseline_rates.get(case_id).map(|&baseline_rate| (case_id.clone(), (current_rate - baseline_rate) * 100.0))
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stable,
    Caution,
    Critical,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Caution => "caution",
            Self::Critical => "critical",
        }
    }
}

/// Evaluated in order: `critical` wins over `stable`'s positive criteria.
pub fn overall_status(
    overall_pct: f64,
    s1: Option<(usize, usize)>,
    s2: Option<(usize, usize)>,
    worst_delta: Option<f64>,
) -> Status {
    let s1_pct = s1.filter(|(_, total)| *total > 0).map(|(passed, total)| passed as f64 / total as f64 * 100.0);
    let s2_pct = s2.filter(|(_, total)| *total > 0).map(|(passed, total)| passed as f64 / total as f64 * 100.0);

    let critical = overall_pct < 95.0
        || s1_pct.is_some_and(|p| p < 95.0)
        || worst_delta.is_some_and(|d| d <= -5.0);
    if critical {
        return Status::Critical;
    }

    let stable = overall_pct >= 98.0
        && s1_pct.map(|p| p >= 98.0).unwrap_or(true)
        && s2_pct.map(|p| p >= 98.0).unwrap_or(true)
        && worst_delta.map(|d| d >= -1.0).unwrap_or(true);
    if stable {
        return Status::Stable;
    }

    Status::Caution
}

/// Up to 3 suggested action strings. Priority list keyed by present failure
/// types, then a worst-regression callout, then padded with a generic
/// catch-all to always reach exactly 3.
pub fn suggested_actions(present_failure_types: &HashSet<String>, worst: &Option<(String, f64)>) -> Vec<String> {
    const PRIORITY: &[(&str, &str)] = &[
        ("timeout", "investigate provider/infra latency causing timeouts"),
        ("bad_json", "tighten prompt/schema instructions for JSON output"),
        ("loop", "review tool-routing logic for repeated loops"),
        ("policy_violation", "audit safety/policy guardrails"),
        ("quality_fail", "review prompt or agent logic for affected cases"),
        ("provider_error", "check provider/infra health and error rates"),
    ];

    let mut actions = Vec::new();
    for (failure_type, action) in PRIORITY {
        if present_failure_types.contains(*failure_type) {
            actions.push(action.to_string());
        }
        if actions.len() == 3 {
            return actions;
        }
    }

    if let Some((case_id, delta)) = worst {
        actions.push(format!("investigate the worst regression: {case_id} ({delta:.1} pts)"));
        if actions.len() == 3 {
            return actions;
        }
    }

    while actions.len() < 3 {
        actions.push("review regression thresholds".to_string());
    }
    actions
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDiff {
    pub missing_keys: Vec<String>,
    pub extra_keys: Vec<String>,
    pub type_changes: Vec<(String, String, String)>,
}

fn collect_keys(values: &[&serde_json::Value]) -> HashSet<String> {
    values
        .iter()
        .filter_map(|v| v.as_object())
        .flat_map(|obj| obj.keys().cloned())
        .collect()
}

fn value_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Compare top-level key sets of current-failure outputs vs baseline-run
/// outputs (S1 only).
pub fn detect_schema_diff(current_failures: &[&RunRecord], baseline_runs: &[&RunRecord]) -> SchemaDiff {
    let current_jsons: Vec<&serde_json::Value> = current_failures.iter().filter_map(|r| r.output_json.as_ref()).collect();
    let baseline_jsons: Vec<&serde_json::Value> = baseline_runs.iter().filter_map(|r| r.output_json.as_ref()).collect();

    let current_keys = collect_keys(&current_jsons);
    let baseline_keys = collect_keys(&baseline_jsons);

    let mut missing_keys: Vec<String> = baseline_keys.difference(&current_keys).cloned().collect();
    missing_keys.sort();
    let mut extra_keys: Vec<String> = current_keys.difference(&baseline_keys).cloned().collect();
    extra_keys.sort();

    let mut baseline_key_types: HashMap<String, &'static str> = HashMap::new();
    for json in &baseline_jsons {
        if let Some(obj) = json.as_object() {
            for (k, v) in obj {
                baseline_key_types.entry(k.clone()).or_insert_with(|| value_kind(v));
            }
        }
    }
    let mut type_changes = Vec::new();
    for json in &current_jsons {
        if let Some(obj) = json.as_object() {
            for (k, v) in obj {
                if let Some(&baseline_kind) = baseline_key_types.get(k) {
                    let current_kind = value_kind(v);
                    if current_kind != baseline_kind {
                        type_changes.push((k.clone(), baseline_kind.to_string(), current_kind.to_string()));
                    }
                }
            }
        }
    }
    type_changes.sort();
    type_changes.dedup();

    SchemaDiff { missing_keys, extra_keys, type_changes }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseStability {
    pub case_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f64,
    pub is_flaky: bool,
    pub failure_types: Vec<String>,
    pub latency_mean_ms: f64,
    pub latency_std_ms: f64,
    pub latency_cv: f64,
    pub is_s1: bool,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() { 0.0 } else { values.iter().sum::<f64>() / values.len() as f64 }
}

fn std_dev(values: &[f64], avg: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// For cases with >= `min_runs` records: total/passed/failed/pass_rate,
/// `is_flaky = 0 < failed < total`, union of failure types, latency
/// mean/std/coefficient-of-variation. Sorted: flaky first, then pass rate
/// ascending, S1 before S2.
pub fn compute_flakiness(records: &[RunRecord], min_runs: usize) -> Vec<CaseStability> {
    let mut by_case: HashMap<String, Vec<&RunRecord>> = HashMap::new();
    for r in records {
        by_case.entry(r.case_id.clone()).or_default().push(r);
    }

    let mut stabilities: Vec<CaseStability> = by_case
        .into_iter()
        .filter(|(_, runs)| runs.len() >= min_runs)
        .map(|(case_id, runs)| {
            let total = runs.len();
            let passed = runs.iter().filter(|r| r.passed).count();
            let failed = total - passed;
            let pass_rate = passed as f64 / total as f64;
            let latencies: Vec<f64> = runs.iter().map(|r| r.latency_ms as f64).collect();
            let latency_mean_ms = mean(&latencies);
            let latency_std_ms = std_dev(&latencies, latency_mean_ms);
            let latency_cv = if latency_mean_ms > 0.0 { latency_std_ms / latency_mean_ms } else { 0.0 };
            let mut failure_types: Vec<String> = runs.iter().filter(|r| !r.passed).map(|r| failure_type_of(r)).collect();
            failure_types.sort();
            failure_types.dedup();
            let is_s1 = runs.first().is_some_and(|r| is_s1(&r.severity));
            CaseStability {
                case_id,
                total,
                passed,
                failed,
                pass_rate,
                is_flaky: failed > 0 && failed < total,
                failure_types,
                latency_mean_ms,
                latency_std_ms,
                latency_cv,
                is_s1,
            }
        })
        .collect();

    stabilities.sort_by(|a, b| {
        b.is_flaky
            .cmp(&a.is_flaky)
            .then_with(|| a.pass_rate.partial_cmp(&b.pass_rate).unwrap())
            .then_with(|| b.is_s1.cmp(&a.is_s1))
            .then_with(|| a.case_id.cmp(&b.case_id))
    });
    stabilities
}

#[derive(Debug, Clone)]
pub struct FailureExplanation {
    pub case_id: String,
    pub severity: String,
    pub signals: Vec<String>,
}

impl FailureExplanation {
    pub fn explanation(&self) -> String {
        if self.signals.is_empty() {
            "no distinguishing signal found".to_string()
        } else {
            self.signals.join("; ")
        }
    }
}

/// For each currently-failing case, a structured signal list: new-vs-persistent
/// regression, failure-type change, schema diff (S1), latency spike >= 2x
/// baseline median, token increase >= 1.5x baseline median.
pub fn explain_failures(current: &[RunRecord], baseline: &[RunRecord]) -> Vec<FailureExplanation> {
    let baseline_by_case: HashMap<String, Vec<&RunRecord>> = baseline.iter().fold(HashMap::new(), |mut acc, r| {
        acc.entry(r.case_id.clone()).or_default().push(r);
        acc
    });

    let mut explanations = Vec::new();
    for record in current.iter().filter(|r| !r.passed) {
        let mut signals = Vec::new();
        let baseline_runs = baseline_by_case.get(&record.case_id);

        match baseline_runs {
            None => signals.push("new regression: no baseline history for this case".to_string()),
            Some(runs) => {
                let baseline_failed = runs.iter().any(|r| !r.passed);
                if !baseline_failed {
                    signals.push("regression: case passed in baseline, fails now".to_string());
                } else {
                    signals.push("persistent failure across baseline and current".to_string());
                }

                let baseline_type = runs.iter().find(|r| !r.passed).and_then(|r| r.failure_type.clone());
                let current_type = record.failure_type.clone();
                if baseline_type.is_some() && baseline_type != current_type {
                    signals.push(format!(
                        "failure type changed: {} -> {}",
                        baseline_type.unwrap_or_default(),
                        current_type.clone().unwrap_or_default()
                    ));
                }

                if is_s1(&record.severity) {
                    let diff = detect_schema_diff(&[record], &runs.clone());
                    if !diff.missing_keys.is_empty() || !diff.type_changes.is_empty() {
                        signals.push(format!(
                            "schema diff: missing={:?} type_changes={:?}",
                            diff.missing_keys, diff.type_changes
                        ));
                    }
                }

                let baseline_latencies: Vec<f64> = runs.iter().map(|r| r.latency_ms as f64).collect();
                let baseline_latency_median = percentile_median(&baseline_latencies);
                if baseline_latency_median > 0.0 && record.latency_ms as f64 >= 2.0 * baseline_latency_median {
                    signals.push(format!(
                        "latency spike: {}ms vs baseline median {:.0}ms",
                        record.latency_ms, baseline_latency_median
                    ));
                }

                let baseline_tokens: Vec<f64> = runs.iter().map(|r| (r.prompt_tokens + r.completion_tokens) as f64).collect();
                let baseline_tokens_median = percentile_median(&baseline_tokens);
                let current_tokens = (record.prompt_tokens + record.completion_tokens) as f64;
                if baseline_tokens_median > 0.0 && current_tokens >= 1.5 * baseline_tokens_median {
                    signals.push(format!(
                        "token increase: {current_tokens} vs baseline median {baseline_tokens_median:.0}"
                    ));
                }
            }
        }

        explanations.push(FailureExplanation {
            case_id: record.case_id.clone(),
            severity: record.severity.clone(),
            signals,
        });
    }

    explanations.sort_by(|a, b| {
        is_s1(&b.severity)
            .cmp(&is_s1(&a.severity))
            .then_with(|| b.signals.len().cmp(&a.signals.len()))
    });
    explanations
}

fn percentile_median(values: &[f64]) -> f64 {
    super::aggregate::percentile(values, 50.0)
}
