//! Report Renderer: pure function from aggregator + analyzer output to a
//! structured plain-text report. No I/O. Grounded in the original
//! `report.py`'s section layout.

use std::collections::HashSet;

use crate::store::RunRecord;

use super::aggregate::{failure_breakdown, format_rate, overall_pass_rate, percentile, severity_pass_rate, top_failures};
use super::analyze::{
    compute_failure_type_delta, compute_pass_rate_delta, compute_top_regressions, overall_status, suggested_actions,
    worst_regression,
};
use super::catalogue::Severity;

/// Render the full report. `baseline` may be empty, in which case the
/// week-over-week section is omitted.
pub fn render_report(current: &[RunRecord], baseline: &[RunRecord]) -> String {
    let mut sections = Vec::new();

    if !baseline.is_empty() {
        sections.push(render_week_over_week(current, baseline));
    }
    sections.push(render_executive_summary(current, baseline));
    sections.push(render_key_metrics(current));
    sections.push(render_failure_type_delta(current, baseline));
    sections.push(render_top_failures(current));
    if !baseline.is_empty() {
        sections.push(render_top_regressions(current, baseline));
    }
    sections.push(render_per_run_breakdown(current));

    sections.join("\n\n")
}

fn render_week_over_week(current: &[RunRecord], baseline: &[RunRecord]) -> String {
    let delta = compute_pass_rate_delta(current, baseline, None);
    let s1_delta = compute_pass_rate_delta(current, baseline, Some(Severity::S1));
    let s2_delta = compute_pass_rate_delta(current, baseline, Some(Severity::S2));
    format!(
        "== Week-over-week ==\nOverall: {:.1}% -> {:.1}% ({:+.1})\nS1: {:.1}% -> {:.1}% ({:+.1})\nS2: {:.1}% -> {:.1}% ({:+.1})",
        delta.baseline_pct, delta.current_pct, delta.delta_pct,
        s1_delta.baseline_pct, s1_delta.current_pct, s1_delta.delta_pct,
        s2_delta.baseline_pct, s2_delta.current_pct, s2_delta.delta_pct,
    )
}

fn render_executive_summary(current: &[RunRecord], baseline: &[RunRecord]) -> String {
    let overall = overall_pass_rate(current);
    let (s1_passed, s1_total) = severity_pass_rate(current, Severity::S1);
    let (s2_passed, s2_total) = severity_pass_rate(current, Severity::S2);
    let worst = worst_regression(current, baseline);
    let s1_delta = compute_pass_rate_delta(current, baseline, Some(Severity::S1));
    let s2_delta = compute_pass_rate_delta(current, baseline, Some(Severity::S2));

    let status = overall_status(
        overall,
        if s1_total > 0 { Some((s1_passed, s1_total)) } else { None },
        if s2_total > 0 { Some((s2_passed, s2_total)) } else { None },
        worst.as_ref().map(|(_, delta)| *delta),
    );

    let present_failure_types: HashSet<String> = failure_breakdown(current).into_iter().map(|(t, _)| t).collect();
    let actions = suggested_actions(&present_failure_types, &worst);

    let worst_line = match &worst {
        Some((case_id, delta)) => format!("{case_id} ({delta:+.1} pts)"),
        None => "none".to_string(),
    };

    format!(
        "== Executive summary ==\nStatus: {}\nS1: {} ({:+.1} pts)\nS2: {} ({:+.1} pts)\nWorst regression: {}\nNext actions:\n{}",
        status.as_str(),
        format_rate(s1_passed, s1_total),
        s1_delta.delta_pct,
        format_rate(s2_passed, s2_total),
        s2_delta.delta_pct,
        worst_line,
        actions.iter().map(|a| format!("  - {a}")).collect::<Vec<_>>().join("\n"),
    )
}

fn render_key_metrics(current: &[RunRecord]) -> String {
    let total = current.len();
    let passed = current.iter().filter(|r| r.passed).count();
    let latencies: Vec<f64> = current.iter().map(|r| r.latency_ms as f64).collect();
    let p50 = percentile(&latencies, 50.0);
    let p95 = percentile(&latencies, 95.0);
    let p99 = percentile(&latencies, 99.0);
    let total_cost: f64 = current.iter().map(|r| r.cost_usd).sum();
    let cost_per_task = if total == 0 { 0.0 } else { total_cost / total as f64 };
    let breakdown = failure_breakdown(current);

    let mut lines = vec![
        "== Key metrics ==".to_string(),
        format!("Total runs: {total}"),
        format!("Passed: {passed}"),
        format!("Latency p50/p95/p99 (ms): {p50:.0}/{p95:.0}/{p99:.0}"),
        format!("Total cost (USD): {total_cost:.6}"),
        format!("Cost per task (USD): {cost_per_task:.6}"),
        "Failure histogram:".to_string(),
    ];
    if breakdown.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        for (failure_type, count) in breakdown {
            lines.push(format!("  {failure_type}: {count}"));
        }
    }
    lines.join("\n")
}

fn render_failure_type_delta(current: &[RunRecord], baseline: &[RunRecord]) -> String {
    let deltas = compute_failure_type_delta(current, baseline);
    let mut lines = vec!["== Failure-type delta ==".to_string()];
    if deltas.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        for (failure_type, delta) in deltas {
            lines.push(format!("  {failure_type}: {delta:+}"));
        }
    }
    lines.join("\n")
}

fn render_top_failures(current: &[RunRecord]) -> String {
    let failures = top_failures(current);
    let mut lines = vec!["== Top failures ==".to_string()];
    if failures.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        for f in failures {
            lines.push(format!(
                "  {} [{}] x{} (suspected: {})",
                f.case_id, f.failure_type, f.count, f.suspected_cause
            ));
        }
    }
    lines.join("\n")
}

fn render_top_regressions(current: &[RunRecord], baseline: &[RunRecord]) -> String {
    let regressions = compute_top_regressions(current, baseline, 5);
    let mut lines = vec!["== Top regressions ==".to_string()];
    if regressions.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        for r in regressions {
            lines.push(format!(
                "  {} [{}]: {:.1}% -> {:.1}% ({:+.1})",
                r.case_id, r.severity, r.baseline_pct, r.current_pct, r.delta_pct
            ));
        }
    }
    lines.join("\n")
}

fn render_per_run_breakdown(current: &[RunRecord]) -> String {
    let mut by_run: std::collections::HashMap<String, (usize, usize)> = std::collections::HashMap::new();
    for r in current {
        let entry = by_run.entry(r.run_id.clone()).or_insert((0, 0));
        entry.1 += 1;
        if r.passed {
            entry.0 += 1;
        }
    }
    let mut entries: Vec<_> = by_run.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut lines = vec!["== Per-run breakdown ==".to_string()];
    if entries.is_empty() {
        lines.push("  (none)".to_string());
    } else {
        for (run_id, (passed, total)) in entries {
            lines.push(format!("  {run_id}: {} ({}/{})", format_rate(passed, total), passed, total));
        }
    }
    lines.join("\n")
}
