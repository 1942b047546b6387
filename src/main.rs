//! modnet - module discovery and allocation runtime
//!
//! Hosts the configured module instances on an in-process bus together with
//! one module registry, and runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use modnet::cli::{Cli, Commands, ConfigSubcommand};
use modnet::config::{self, NodeConfig};
use modnet::error::{Error, Result};
use modnet::logging;
use modnet::registry::{LoggingListener, ModuleRegistry};
use modnet::transport::LocalBus;
use modnet::ModuleNode;

/// Time allowed for final announcements to reach the registry
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        Commands::Run { .. } => {}
    }

    let config_path = match &cli.command {
        Commands::Run { config } => config.clone(),
        _ => None,
    };

    let config = match NodeConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting modnet");

    run(config)
}

/// Build the runtime and drive the modules until Ctrl+C
fn run(config: NodeConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().clamp(1, 4))
        .thread_name("modnet")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: NodeConfig) -> Result<()> {
    let timeout = config.status_timeout().ok_or_else(|| {
        Error::config_field_invalid("registry.timeout_ms", "registry.timeout_ms is required")
    })?;
    let topic = config.transport.discovery_topic.clone();

    let bus = Arc::new(LocalBus::with_queue_size(config.transport.queue_size));

    let registry = Arc::new(ModuleRegistry::new(timeout).with_sweep_interval(config.sweep_interval()));
    registry.add_listener(Arc::new(LoggingListener));
    registry.init();
    bus.attach_topic(&topic, "registry", registry.clone());

    info!(topic = %topic, "Registry listening on discovery topic");

    let mut nodes = Vec::new();
    for (identity, settings) in config.module_nodes() {
        let node = Arc::new(ModuleNode::new(identity, settings, bus.clone()));
        bus.attach(node.address(), node.clone());
        node.start();
        nodes.push(node);
    }

    if nodes.is_empty() {
        warn!("No modules configured; running the registry only");
    }

    info!(modules = nodes.len(), "modnet running, press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    shutdown(&nodes, &registry, &bus).await;
    Ok(())
}

/// Announce departure of every node, then drain the registry and the bus
async fn shutdown(nodes: &[Arc<ModuleNode>], registry: &Arc<ModuleRegistry>, bus: &Arc<LocalBus>) {
    let results = join_all(nodes.iter().map(|node| node.close())).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(failed, "Some modules could not announce their shutdown");
    }

    tokio::time::sleep(SHUTDOWN_GRACE).await;

    // Cover nodes whose final announcement did not arrive
    for node in nodes {
        registry.cancel(&node.status());
    }
    let removed = registry.sweep();
    info!(removed = removed.len(), "Final registry sweep complete");

    registry.close();
    bus.close();
    info!("modnet stopped");
}

fn print_version() {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    println!("modnet {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Protocol:   {}", modnet::protocol::PROTOCOL_VERSION);
    println!("Host:       {}", host);
    println!("CPUs:       {}", num_cpus::get());
    println!("OS/Arch:    {}/{}", std::env::consts::OS, std::env::consts::ARCH);
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = match NodeConfig::load(config.as_deref()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprint!("{}", e.format_for_terminal());
                    std::process::exit(e.exit_code());
                }
            };
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match NodeConfig::load(config.as_deref()) {
            Ok(cfg) => {
                println!("Configuration is valid.");
                println!("Modules: {}", cfg.modules.len());
            }
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
