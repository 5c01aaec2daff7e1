//! Subnet Registrar
//!
//! Entry point for the registration scheduler. Loads configuration, discovers
//! wallets, wires the block sources, chain client and notifiers into a
//! `RegistrationCoordinator`, and writes the run report on exit.
//!
//! ## Features
//!
//! - **Window-aware scheduling**: attempts only inside the configured tempo range
//! - **Quorum block tracking**: median of several independent height sources
//! - **Adaptive fees**: multiplier driven by recent rejection feedback
//! - **Prometheus metrics** and optional Telegram notifications

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use subnet_registrar::block_monitor::build_source;
use subnet_registrar::chain::{ChainClient, RelayChainClient, SimulatedChainClient};
use subnet_registrar::config::{Config, RunMode};
use subnet_registrar::notifier::{CompositeNotifier, LogNotifier, Notifier, TelegramNotifier};
use subnet_registrar::wallet::{discover_wallets, select_wallets, Wallet, WalletEntry};
use subnet_registrar::{endpoints, observability, CancelReason, CancelSignal, RegistrationCoordinator};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Operating mode (simulation or production)
    #[arg(short, long)]
    mode: Option<String>,

    /// Wallets to register: `all` or comma-separated `coldkey/hotkey` ids
    #[arg(short, long, default_value = "all")]
    wallets: String,

    /// Network name
    #[arg(long, env = "REGISTRAR_NETWORK")]
    network: Option<String>,

    /// Target subnet id
    #[arg(long)]
    netuid: Option<u16>,

    /// Concurrent executors
    #[arg(long)]
    threads: Option<usize>,

    /// Minimum retry delay in milliseconds
    #[arg(long)]
    min_delay: Option<u64>,

    /// Maximum retry delay in milliseconds
    #[arg(long)]
    max_delay: Option<u64>,

    /// Disable the priority fee component
    #[arg(long)]
    no_priority_fee: bool,

    /// Write the JSON-lines run report here
    #[arg(long)]
    report: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Metrics port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, found) = load_config(&args.config)?;
    apply_args(&mut config, &args)?;

    observability::init_logging(args.verbose, config.monitoring.json_logs)?;

    info!("Starting subnet registrar");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if found {
        info!("Loaded configuration from: {}", args.config);
    } else {
        warn!("Config file '{}' not found, using defaults", args.config);
    }
    config.validate().context("Invalid configuration")?;

    info!(
        network = %config.network,
        subnet_id = config.subnet_id,
        mode = ?config.chain.mode,
        threads = config.thread_count,
        "Configuration loaded"
    );

    let wallets = load_wallets(&config, &args.wallets)?;
    if wallets.is_empty() {
        bail!("No wallets selected");
    }
    info!("Registering {} wallets", wallets.len());

    if config.monitoring.enable_metrics {
        let metrics_port = config.monitoring.metrics_port;
        info!("Starting metrics server on port {}", metrics_port);
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(metrics_port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let sources = config
        .sources
        .iter()
        .map(|s| build_source(s, config.source_timeout_ms))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to build block sources")?;
    info!("Tracking block height through {} sources", sources.len());

    let chain = build_chain(&config)?;
    let notifier = build_notifier(&config);

    let coordinator = RegistrationCoordinator::new(&config, sources, chain, notifier)
        .context("Failed to initialise coordinator")?;
    info!(run_id = %coordinator.run_id(), "Coordinator ready");

    let shutdown = CancelSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal.cancel(CancelReason::Shutdown);
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let report = coordinator.run(wallets, shutdown).await;

    if let Some(path) = &config.report.path {
        report
            .write_to_path(path)
            .with_context(|| format!("Failed to write report to {}", path))?;
        info!("Run report written to {}", path);
    }

    let progress = report.progress();
    info!(
        "Finished: {}/{} registered, {} abandoned, {} pending",
        progress.registered, progress.total, progress.abandoned, progress.pending
    );
    Ok(())
}

/// Load configuration from file with fallback to defaults.
///
/// Runs before logging is installed; the flag says whether the file existed.
fn load_config(path: &str) -> Result<(Config, bool)> {
    if Path::new(path).exists() {
        let config =
            Config::load(path).with_context(|| format!("Failed to load config from {}", path))?;
        Ok((config, true))
    } else {
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config
            .apply_env_overrides()
            .context("Invalid environment override")?;
        Ok((config, false))
    }
}

fn apply_args(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(mode) = &args.mode {
        config.chain.mode = match mode.as_str() {
            "production" => RunMode::Production,
            "simulation" => RunMode::Simulation,
            other => bail!("Unknown mode '{}'", other),
        };
    }
    if let Some(network) = &args.network {
        config.network = network.clone();
    }
    if let Some(netuid) = args.netuid {
        config.subnet_id = netuid;
    }
    if let Some(threads) = args.threads {
        config.thread_count = threads;
    }
    if let Some(min_delay) = args.min_delay {
        config.min_delay_ms = min_delay;
    }
    if let Some(max_delay) = args.max_delay {
        config.max_delay_ms = max_delay;
    }
    if args.no_priority_fee {
        config.enable_priority_fee = false;
    }
    if let Some(report) = &args.report {
        config.report.path = Some(report.clone());
    }
    if args.json_logs {
        config.monitoring.json_logs = true;
    }
    if let Some(port) = args.metrics_port {
        config.monitoring.metrics_port = port;
    }
    Ok(())
}

/// Configured wallets, else a scan of `wallet_root`, filtered by the selection
fn load_wallets(config: &Config, selection: &str) -> Result<Vec<Wallet>> {
    let entries: Vec<WalletEntry> = if !config.wallets.is_empty() {
        config.wallets.clone()
    } else if let Some(root) = &config.wallet_root {
        let root = expand_home(root);
        discover_wallets(&root)
            .with_context(|| format!("Failed to scan wallet directory {}", root.display()))?
    } else {
        bail!("No wallets configured: set `wallets` or `wallet_root`");
    };

    Ok(select_wallets(entries, selection)
        .into_iter()
        .map(WalletEntry::into_wallet)
        .collect())
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

fn build_chain(config: &Config) -> Result<Arc<dyn ChainClient>> {
    match config.chain.mode {
        RunMode::Simulation => {
            info!(
                clearing_price = config.chain.simulation.clearing_price,
                open_slots = config.chain.simulation.open_slots,
                "Using simulated chain"
            );
            Ok(Arc::new(SimulatedChainClient::new(&config.chain.simulation)))
        }
        RunMode::Production => {
            let relay = config
                .chain
                .relay_url
                .as_deref()
                .context("chain.relay_url is required in production mode")?;
            info!(relay = %relay, "Submitting through signing relay");
            Ok(Arc::new(RelayChainClient::new(
                relay,
                config.network.clone(),
                config.subnet_id,
                Duration::from_millis(config.submit_timeout_ms),
            )))
        }
    }
}

fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let (Some(token), Some(chat_id)) = (
        &config.notifications.telegram_token,
        &config.notifications.telegram_chat_id,
    ) {
        info!("Telegram notifications enabled");
        notifiers.push(Arc::new(TelegramNotifier::new(
            config.notifications.telegram_api_base.clone(),
            token.clone(),
            chat_id.clone(),
        )));
    }
    Arc::new(CompositeNotifier::new(notifiers))
}
