//! vt-daemon: audio processing-stack daemon.
//!
//! This binary has three commands:
//! - `serve`: Run the TCP daemon with its janitor
//! - `gc`: Clean a cache folder
//! - `hash`: Print the signature of a request

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vt_daemon::cache::{collect, GcOptions};
use vt_daemon::cli::{Cli, Command, GcLevelArg};
use vt_daemon::config::DaemonConfig;
use vt_daemon::modules::ModuleRegistry;
use vt_daemon::processing::{Scheduler, SchedulerSettings};
use vt_daemon::registry::Janitor;
use vt_daemon::rpc::{run_server, ServerState};
use vt_daemon::types::{ProcessRequest, RequestDefaults};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    init_logging(&config)?;

    match cli.command {
        Command::Serve { .. } => run_serve(config),
        Command::Gc { level, simulate, .. } => run_gc(&config, level, simulate),
        Command::Hash { request } => run_hash(&config, &request),
    }
}

/// Sends logs to the configured file, or to stderr.
fn init_logging(config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("cannot initialize logging: {}", e))
}

/// Runs the daemon until Ctrl-C.
fn run_serve(config: DaemonConfig) -> anyhow::Result<()> {
    let scheduler = Scheduler::new(SchedulerSettings::from_config(&config), ModuleRegistry::with_builtins())?;
    let mut janitor = Janitor::start(
        Arc::clone(scheduler.store()),
        Arc::clone(scheduler.workers()),
        Arc::clone(scheduler.claims()),
        config.janitor_interval(),
        config.janitor_grace(),
    );

    info!(host = %config.host, port = config.port, "starting vt-daemon");
    let state = Arc::new(ServerState::new(scheduler, config));

    let runtime = tokio::runtime::Runtime::new().context("cannot start the async runtime")?;
    let served = runtime.block_on(run_server(state));

    janitor.shutdown();
    served?;
    Ok(())
}

/// Cleans a cache folder and prints what was removed.
fn run_gc(config: &DaemonConfig, level: GcLevelArg, simulate: bool) -> anyhow::Result<()> {
    let root = config.effective_cache_path();
    let options = GcOptions {
        level: level.into(),
        simulate,
        ..GcOptions::default()
    };
    let report = collect(&root, &options)?;

    let verb = if simulate { "would delete" } else { "deleted" };
    for path in &report.deleted_artifacts {
        println!("{} {}", verb, path.display());
    }
    for path in &report.deleted_job_files {
        println!("{} {}", verb, path.display());
    }
    for (path, reason) in &report.failures {
        eprintln!("failed {}: {}", path.display(), reason);
    }
    println!(
        "{}: {} artifacts, {} job files; kept {}",
        verb,
        report.deleted_artifacts.len(),
        report.deleted_job_files.len(),
        report.kept.len()
    );

    if !report.is_clean() {
        bail!("{} files could not be removed", report.failures.len());
    }
    Ok(())
}

/// Prints the signature of a request.
fn run_hash(config: &DaemonConfig, text: &str) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(text).context("invalid JSON request")?;
    let request = ProcessRequest::from_value(&value, &RequestDefaults::default())?;
    request.file.check_access()?;
    println!("{}", request.signature(&config.cache_format));
    Ok(())
}
