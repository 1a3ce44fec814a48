//! Command-line surface: `serve` (the default, an HTTP server) plus the
//! offline/CI-facing `harness run`, `gate-check`, and `report` subcommands
//! wrapping the Harness/Gate Checker/Report Renderer for use outside the
//! running Gateway process.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::harness::gate_config::Thresholds;

#[derive(Parser)]
#[command(name = "llmops-gateway", version, about = "LLM gateway with a regression-harness CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the Gateway HTTP server. Equivalent to no subcommand at all.
    Serve,
    /// Evaluate a case catalogue against the configured Provider.
    Harness(HarnessArgs),
    /// Evaluate gate thresholds over the audit log; exits 0 on pass, 1 on fail-or-no-data.
    GateCheck(GateCheckArgs),
    /// Render a plain-text report over the audit log.
    Report(ReportArgs),
}

#[derive(Args)]
pub struct HarnessArgs {
    /// Path to a case catalogue: a single CSV file or a directory of them.
    #[arg(long)]
    pub catalogue: PathBuf,
    /// Directory to write run records into (also read by gate-check/report).
    #[arg(long)]
    pub log_dir: PathBuf,
    /// Config file to construct the Gateway from.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct GateCheckArgs {
    /// Directory of JSONL audit/run-record day-files.
    #[arg(long)]
    pub log_dir: PathBuf,
    /// Trailing days of `log_dir` to treat as "current".
    #[arg(long, default_value_t = 7)]
    pub current_days: i64,
    /// Trailing days preceding the current window to treat as the baseline.
    #[arg(long, default_value_t = 7)]
    pub baseline_days: i64,
    /// Directory of day-files to use as the baseline instead of `baseline_days`.
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,
    /// Override the S1 pass-rate threshold (percent).
    #[arg(long)]
    pub s1_threshold: Option<f64>,
    /// Override the overall pass-rate threshold (percent).
    #[arg(long)]
    pub overall_threshold: Option<f64>,
    /// Override how many top regressions to report.
    #[arg(long)]
    pub top_n: Option<usize>,
    /// Write the rendered report alongside the verdict to this path.
    #[arg(long)]
    pub summary_out: Option<PathBuf>,
    /// Path to `.agentreg.toml`. Falls back to auto-discovery in `log_dir`.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Caller labels used to select a matching rule (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,
    /// Optional case catalogue for per-case thresholds.
    #[arg(long)]
    pub catalogue: Option<PathBuf>,
}

impl GateCheckArgs {
    pub fn overrides(&self) -> Thresholds {
        Thresholds {
            s1_pass_rate: self.s1_threshold,
            overall_pass_rate: self.overall_threshold,
            top_n: self.top_n,
        }
    }
}

#[derive(Args)]
pub struct ReportArgs {
    /// Directory of JSONL audit/run-record day-files.
    #[arg(long)]
    pub log_dir: PathBuf,
    /// Trailing days of `log_dir` to treat as "current".
    #[arg(long, default_value_t = 7)]
    pub current_days: i64,
    /// Trailing days preceding the current window to treat as the baseline.
    #[arg(long, default_value_t = 7)]
    pub baseline_days: i64,
    /// Directory of day-files to use as the baseline instead of `baseline_days`.
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,
}
