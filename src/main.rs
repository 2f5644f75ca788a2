//! rvm-gateway - reverse-vending device gateway
//!
//! Supervises four independent loops: the acceptor serial link, the
//! scanner serial link (plus its dispatcher), the session protocol
//! client, and the inactivity watchdog. Each loop contains its own
//! failures and retries forever; the gateway is built for unattended
//! operation.

use clap::Parser;
use rvm_gateway::domain::session::SessionState;
use rvm_gateway::infra::{AcceptanceCodes, Config, ScanLog};
use rvm_gateway::io::{AcceptorLink, ScannerLink};
use rvm_gateway::services::{run_scan_dispatch, InactivityMonitor, ProtocolClient};
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// rvm-gateway - reverse vending machine gateway
#[derive(Parser, Debug)]
#[command(name = "rvm-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE env
    /// var, then config/gateway.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("rvm-gateway starting");

    let args = Args::parse();
    let config_path = args
        .config
        .unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        ws_url = %config.ws_url(),
        fandomat_id = %config.fandomat_id(),
        acceptor_port = %config.acceptor_port(),
        scanner_port = %config.scanner_port(),
        baud = %config.baud(),
        inactivity_timeout_secs = %config.inactivity_timeout().as_secs(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared context threaded into every loop
    let session = SessionState::new();
    let log = ScanLog::new(config.log_dir());
    let codes = AcceptanceCodes::load(config.fandomat_id(), config.sequence_file());

    // Acceptor serial link (command writer + status reader)
    let (acceptor_link, acceptor) = AcceptorLink::new(&config, session.clone(), log.clone());
    let acceptor_shutdown = shutdown_rx.clone();
    let acceptor_task = tokio::spawn(async move {
        acceptor_link.run(acceptor_shutdown).await;
    });

    // Session protocol client and the core shared with other loops
    let (protocol, core) = ProtocolClient::new(
        config.clone(),
        session.clone(),
        acceptor.clone(),
        log.clone(),
        codes,
    );
    let protocol_shutdown = shutdown_rx.clone();
    let protocol_task = tokio::spawn(async move {
        protocol.run(protocol_shutdown).await;
    });

    // Scanner link feeding the serialized check dispatcher. Capacity 1:
    // the scanner blocks on each check anyway, scans never queue.
    let (scan_tx, scan_rx) = mpsc::channel(1);
    let scanner = ScannerLink::new(&config, session.clone(), log.clone(), scan_tx);
    let scanner_shutdown = shutdown_rx.clone();
    let scanner_task = tokio::spawn(async move {
        scanner.run(scanner_shutdown).await;
    });
    let dispatch_task = tokio::spawn(run_scan_dispatch(
        core.clone(),
        scan_rx,
        shutdown_rx.clone(),
    ));

    // Inactivity watchdog
    let monitor = InactivityMonitor::new(
        &config,
        session.clone(),
        acceptor.clone(),
        core.sender(),
        log.clone(),
    );
    let monitor_task = tokio::spawn(monitor.run(shutdown_rx.clone()));

    // Handle shutdown on Ctrl+C
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Drain every loop so both serial ports and the socket are released
    let _ = tokio::join!(
        acceptor_task,
        scanner_task,
        dispatch_task,
        protocol_task,
        monitor_task
    );

    info!("rvm-gateway shutdown complete");
    Ok(())
}
