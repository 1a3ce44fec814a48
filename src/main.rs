use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

mod api;
mod cli;
mod config;
mod error;
mod gateway;
mod harness;
mod store;
mod traffic;

pub use config::Config;
pub use error::AppError;

use cli::{Cli, Command, GateCheckArgs, HarnessArgs, ReportArgs};
use gateway::GatewayState;
use harness::catalogue;
use harness::check::{run_check, split_by_trailing_days};
use harness::gate_config::GateConfig;
use harness::report::render_report;
use store::{AuditLogStore, LogRecord, RunRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llmops_gateway=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Harness(args) => run_harness(args).await,
        Command::GateCheck(args) => run_gate_check(args).await,
        Command::Report(args) => run_report(args).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let config_path = std::env::var("LLMOPS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/llmops-gateway/config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!(
        client_port = config.gateway.client_port,
        admin_port = config.gateway.admin_port,
        "llmops-gateway starting"
    );

    let config = Arc::new(config);
    let state = Arc::new(GatewayState::new(Arc::clone(&config), config_path.clone())?);

    tokio::spawn(config_watcher(Arc::clone(&state)));

    let client_addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.client_port).parse()?;
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.gateway.admin_port).parse()?;

    info!(%client_addr, "client API listening");
    info!(%admin_addr, "admin API listening");

    let client_listener = tokio::net::TcpListener::bind(client_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;

    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    let client_app = api::client::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            api::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());
    let admin_app = api::admin::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            api::admin_auth::admin_auth_middleware,
        ))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());

    tokio::select! {
        result = axum::serve(client_listener, client_app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.context("client API server error")?;
        }
        result = axum::serve(admin_listener, admin_app) => {
            result.context("admin API server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

/// `llmops-gateway harness run --catalogue <path> --log-dir <dir>` — drives
/// the Harness over a catalogue against an in-process Gateway built from
/// `--config`, appending one run record per case.
async fn run_harness(args: HarnessArgs) -> anyhow::Result<()> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    config.harness.log_dir = args.log_dir.clone();
    let state = GatewayState::new(Arc::new(config), args.config.clone())?;

    let cases = catalogue::load(&args.catalogue)
        .with_context(|| format!("loading case catalogue from {}", args.catalogue.display()))?;
    info!(cases = cases.len(), "running catalogue");

    let records = harness::run_all(&state, &cases).await;
    let passed = records.iter().filter(|r| r.passed).count();
    println!("{passed}/{} cases passed", records.len());

    Ok(())
}

/// Load the union of run records over `[current, baseline]` windows, either
/// by trailing-day split within `log_dir`, or by a dedicated `baseline_dir`.
fn load_windows(
    log_dir: &std::path::Path,
    current_days: i64,
    baseline_days: i64,
    baseline_dir: Option<&std::path::Path>,
) -> anyhow::Result<(Vec<RunRecord>, Vec<RunRecord>)> {
    fn to_run_records(records: Vec<LogRecord>) -> Vec<RunRecord> {
        records
            .into_iter()
            .filter_map(|r| match r {
                LogRecord::Run(run) => Some(run),
                LogRecord::Audit(_) => None,
            })
            .collect()
    }

    match baseline_dir {
        Some(baseline_dir) => {
            let store = AuditLogStore::new(log_dir);
            let current = to_run_records(store.load_trailing(current_days)?);
            let baseline = to_run_records(AuditLogStore::load_all_in_dir(baseline_dir)?);
            Ok((current, baseline))
        }
        None => {
            let store = AuditLogStore::new(log_dir);
            let all = to_run_records(store.load_trailing(current_days + baseline_days)?);
            Ok(split_by_trailing_days(&all, current_days, baseline_days))
        }
    }
}

/// `llmops-gateway gate-check ...` — wraps the Gate Checker; exits 0 on
/// pass, 1 on fail-or-no-data, matching the HTTP `/admin/gate-check`
/// endpoint's contract exactly.
async fn run_gate_check(args: GateCheckArgs) -> anyhow::Result<()> {
    let (current, baseline) = load_windows(
        &args.log_dir,
        args.current_days,
        args.baseline_days,
        args.baseline_dir.as_deref(),
    )?;

    let gate_config = match &args.config {
        Some(path) => Some(GateConfig::load(path)?),
        None => GateConfig::discover(&args.log_dir)?,
    };
    let thresholds = match &gate_config {
        Some(gc) => gc.resolve_thresholds(&args.labels, &[], args.overrides()),
        None => args.overrides().resolved(),
    };

    let cases = match &args.catalogue {
        Some(path) => Some(catalogue::load(path)?),
        None => None,
    };

    let verdict = run_check(&current, &baseline, thresholds, cases.as_deref());

    println!("Overall pass rate: {:.1}%", verdict.overall_rate);
    println!("S1 pass rate: {} ({}/{})", verdict.s1_rate_display, verdict.s1_passed, verdict.s1_total);
    println!("S2 pass rate: {} ({}/{})", verdict.s2_rate_display, verdict.s2_passed, verdict.s2_total);
    for result in &verdict.threshold_results {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        println!("[{mark}] {}: {:.1}% (required {:.1}%)", result.name, result.actual, result.required);
    }
    for result in &verdict.case_threshold_results {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        println!(
            "[{mark}] case {}: {:.1}% (required {:.1}%)",
            result.case_id, result.actual_pct, result.required_pct
        );
    }
    if !verdict.has_data {
        println!("no run records found in the evaluated window");
    }

    if let Some(summary_out) = &args.summary_out {
        let report = render_report(&current, &baseline);
        std::fs::write(summary_out, report)
            .with_context(|| format!("writing summary report to {}", summary_out.display()))?;
    }

    std::process::exit(verdict.exit_code());
}

/// `llmops-gateway report ...` — wraps the Aggregator, Analyzer, and Report
/// Renderer and prints the rendered report to stdout.
async fn run_report(args: ReportArgs) -> anyhow::Result<()> {
    let (current, baseline) = load_windows(
        &args.log_dir,
        args.current_days,
        args.baseline_days,
        args.baseline_dir.as_deref(),
    )?;
    println!("{}", render_report(&current, &baseline));
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `llmops-gateway --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("LLMOPS_CLIENT_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8080);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

/// Background task: polls the config file every 5 seconds and hot-reloads on change.
///
/// Uses filesystem `mtime` for change detection — no inotify/kqueue dependencies.
/// Parse failures are logged and ignored; the running config is unchanged.
async fn config_watcher(state: Arc<GatewayState>) {
    let path = state.config_path().clone();

    let mut last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

    // Initial tick fires immediately; skip it so we don't reload on startup.
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.tick().await;

    loop {
        interval.tick().await;

        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        if mtime == last_mtime {
            continue;
        }

        match Config::load(&path) {
            Ok(new_cfg) => {
                state.replace_config(Arc::new(new_cfg));
                info!(path = %path.display(), "config hot-reloaded");
                last_mtime = mtime;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config reload failed — keeping previous config");
            }
        }
    }
}
