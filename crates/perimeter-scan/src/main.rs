//! CLI entry point for the perimeter attack-surface scanner.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use perimeter_core::events::ScanEvent;

use perimeter_scan::config::ScanConfig;
use perimeter_scan::diff;
use perimeter_scan::executor::ProcessExecutor;
use perimeter_scan::scheduler::ScanScheduler;
use perimeter_scan::tls::FallbackProbe;
use perimeter_scan::ScanOrchestrator;

#[derive(Parser)]
#[command(name = "perimeter")]
#[command(about = "Attack-surface scanner for a network segment")]
struct Cli {
    /// Config file prefix (default: perimeter).
    #[arg(short, long, default_value = "perimeter")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scan and print the result as JSON.
    Scan {
        /// Target to scan: IP, CIDR (e.g. 10.0.1.0/24), or hostname.
        #[arg(short, long)]
        target: String,
    },
    /// Diff two saved scan results. Exits with status 1 when the diff alerts.
    Diff {
        /// Path to the current scan JSON.
        #[arg(long)]
        current: PathBuf,
        /// Path to the previous scan JSON.
        #[arg(long)]
        previous: PathBuf,
    },
    /// Re-scan configured targets on their schedules until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();

    match cli.command {
        Command::Scan { target } => {
            let scan_config = load_scan_config(&cli.config)?;
            let cancel = cancel_on_ctrl_c();
            let orchestrator = build_orchestrator(scan_config)?;

            let result = orchestrator.run(&target, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Diff { current, previous } => {
            let current = diff::read_scan(&current)?;
            let previous = diff::read_scan(&previous)?;
            let report = diff::detect(&current, &previous);

            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("{}", report.summary());

            if report.should_alert() {
                std::process::exit(1);
            }
        }
        Command::Watch => {
            let scan_config = load_scan_config(&cli.config)?;
            if scan_config.targets.is_empty() {
                anyhow::bail!("No targets configured: add [[scan.targets]] entries to the config");
            }
            let cancel = cancel_on_ctrl_c();
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(log_events(rx));

            let orchestrator = build_orchestrator(scan_config)?.with_events(tx.clone());
            let scheduler = ScanScheduler::new(orchestrator).with_alerts(tx);
            scheduler.run(cancel).await?;
        }
    }

    Ok(())
}

fn build_orchestrator(scan_config: ScanConfig) -> anyhow::Result<ScanOrchestrator> {
    let probe = FallbackProbe::system()?;
    Ok(ScanOrchestrator::new(
        scan_config,
        Arc::new(ProcessExecutor),
        Arc::new(probe),
    ))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            token.cancel();
        }
    });
    cancel
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<ScanEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event.payload) {
            Ok(payload) => {
                tracing::debug!(scan_id = %event.scan_id, payload = %payload, "Scan event")
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode scan event"),
        }
    }
}

fn load_scan_config(file_prefix: &str) -> anyhow::Result<ScanConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            // PERIMETER_SCAN__NMAP_PATH -> scan.nmap_path
            config::Environment::with_prefix("PERIMETER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<ScanConfig>("scan") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(ScanConfig::default()),
        Err(e) => Err(e.into()),
    }
}
