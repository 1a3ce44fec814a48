//! Append-only audit log store, partitioned by UTC calendar day.
//!
//! Shared by the Gateway's [`AuditRecord`] and the Harness's [`RunRecord`];
//! both are written as JSON Lines into the same per-day file and a tolerant
//! reader distinguishes them by field presence (`case_id`/`run_id` marks a
//! `RunRecord`, their absence marks an `AuditRecord`), per the tagged-variant
//! design generalized from the host repo's `tokio::sync::Mutex`-guarded
//! traffic ring buffer — here guarding a per-day file handle instead of an
//! in-memory buffer.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, RateLimitReason};

/// One request handled by the Gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub prompt_version_requested: Option<String>,
    pub prompt_version_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Content-hashed fingerprints, never raw message content.
    pub message_fingerprints: Vec<String>,
    pub has_schema: bool,
    pub json_generated: bool,
    pub cache_hit: bool,
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_reason: Option<RateLimitReason>,
}

/// One evaluated Harness case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub case_id: String,
    pub severity: String,
    pub category: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    pub latency_ms: u64,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub provider: String,
    pub model: String,
    pub prompt_version: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_json: Option<serde_json::Value>,
    pub cost_usd: f64,
}

/// Either record kind, as read back from a log file. Untagged so each line's
/// own fields decide the variant — a `RunRecord` always carries `case_id` /
/// `run_id`, which `AuditRecord` never has.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogRecord {
    Run(RunRecord),
    Audit(AuditRecord),
}

impl LogRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Run(r) => r.timestamp,
            Self::Audit(r) => r.timestamp,
        }
    }
}

/// Append-only JSONL store, one file per UTC calendar day (`YYYYMMDD.jsonl`).
///
/// Each open file handle is guarded by its own `tokio::sync::Mutex`, the same
/// per-resource-lock convention the host repo uses for its traffic ring
/// buffer — writes across different days never contend, writes within a day
/// are serialized so lines never interleave.
pub struct AuditLogStore {
    dir: PathBuf,
    open_files: Mutex<HashMap<NaiveDate, Arc<Mutex<std::fs::File>>>>,
}

impl AuditLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open_files: Mutex::new(HashMap::new()),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y%m%d")))
    }

    async fn file_for(&self, date: NaiveDate) -> Result<Arc<Mutex<std::fs::File>>> {
        let mut files = self.open_files.lock().await;
        if let Some(existing) = files.get(&date) {
            return Ok(existing.clone());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating audit log directory {}", self.dir.display()))?;
        let path = self.path_for(date);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening audit log file {}", path.display()))?;
        let handle = Arc::new(Mutex::new(file));
        files.insert(date, handle.clone());
        Ok(handle)
    }

    async fn append_line(&self, date: NaiveDate, line: &str) -> Result<()> {
        let handle = self.file_for(date).await?;
        let mut file = handle.lock().await;
        writeln!(file, "{line}").context("writing audit log line")?;
        file.flush().context("flushing audit log line")?;
        Ok(())
    }

    pub async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("serializing AuditRecord")?;
        self.append_line(record.timestamp.date_naive(), &line).await
    }

    pub async fn append_run(&self, record: &RunRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("serializing RunRecord")?;
        self.append_line(record.timestamp.date_naive(), &line).await
    }

    /// Load every record from files whose date falls within `[from, to]` (UTC, inclusive).
    ///
    /// Unparseable lines are skipped with a warning; no compaction or
    /// indexing is attempted — this is the only read path, a linear scan.
    pub fn load_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        let mut day = from;
        while day <= to {
            let path = self.path_for(day);
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading audit log file {}", path.display()))?;
                for (lineno, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LogRecord>(line) {
                        Ok(record) => records.push(record),
                        Err(e) => tracing::warn!(
                            file = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "skipping unparseable audit log line"
                        ),
                    }
                }
            }
            day = day.succ_opt().unwrap_or(day);
            if day == from {
                break;
            }
        }
        Ok(records)
    }

    /// Load the trailing `days` calendar days ending today (UTC), inclusive.
    pub fn load_trailing(&self, days: i64) -> Result<Vec<LogRecord>> {
        let today = Utc::now().date_naive();
        let from = today - chrono::Duration::days((days - 1).max(0));
        self.load_range(from, today)
    }

    /// Load every record across an arbitrary directory of day files — used
    /// when a dedicated baseline directory is supplied instead of a trailing
    /// window within this store's own directory.
    pub fn load_all_in_dir(dir: &Path) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        if !dir.exists() {
            return Ok(records);
        }
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("reading directory {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
            .collect();
        entries.sort();
        for path in entries {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading audit log file {}", path.display()))?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(
                        file = %path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping unparseable audit log line"
                    ),
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_run(case_id: &str, passed: bool) -> RunRecord {
        RunRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap(),
            run_id: "run-1".into(),
            case_id: case_id.into(),
            severity: "S1".into(),
            category: "tools".into(),
            passed,
            failure_type: if passed { None } else { Some("quality_fail".into()) },
            latency_ms: 42,
            reasons: vec![],
            provider: "mock".into(),
            model: "mock-model".into(),
            prompt_version: "1".into(),
            prompt_tokens: 10,
            completion_tokens: 5,
            output_json: None,
            cost_usd: 0.0,
        }
    }

    #[tokio::test]
    async fn append_and_reload_run_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditLogStore::new(dir.path());
        store.append_run(&sample_run("TC001", true)).await.unwrap();
        store.append_run(&sample_run("TC002", false)).await.unwrap();

        let records = store.load_trailing(1).unwrap();
        // trailing(1) from "today" won't see 2026-07-01 fixtures; load by explicit range instead.
        assert_eq!(records.len(), 0);

        let records = store
            .load_range(
                NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            )
            .unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            LogRecord::Run(r) => assert_eq!(r.case_id, "TC001"),
            LogRecord::Audit(_) => panic!("expected RunRecord"),
        }
    }

    #[test]
    fn unparseable_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20260701.jsonl");
        std::fs::write(&path, "not json\n{\"broken\n").unwrap();
        let store = AuditLogStore::new(dir.path());
        let records = store
            .load_range(
                NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            )
            .unwrap();
        assert!(records.is_empty());
    }
}
