//! topicbridge - pub/sub bus to network client bridge
//!
//! CLI entry point: loads configuration, sets up logging, and runs the
//! bridge with its client socket.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use topicbridge::bridge::Bridge;
use topicbridge::bus::MemoryBus;
use topicbridge::cli::{Cli, Command, ConfigFormat};
use topicbridge::config::Config;
use topicbridge::hub::ClientHub;
use topicbridge::hub::server::{cleanup_socket, create_listener_at, serve};

/// An explicit level (CLI or config) wins over RUST_LOG; INFO otherwise
fn setup_logging(level: Option<&str>, log_file: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new("info")),
    }
    .context("Invalid log level")?;

    match log_file {
        Some(name) => {
            let log_dir = dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("topicbridge")
                .join("logs");
            fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
            let file = fs::File::create(log_dir.join(name)).context("Failed to create log file")?;

            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!(level = level.unwrap_or("default"), "Logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let level = cli.log_level.clone().or_else(|| config.log_level.clone());
    let log_file = cli.log_file.clone().or_else(|| config.log_file.clone());
    setup_logging(level.as_deref(), log_file.as_deref()).context("Failed to setup logging")?;

    match cli.command {
        Some(Command::Serve {
            socket,
            robot_model,
            strict,
        }) => {
            if let Some(socket) = socket {
                config.server.socket_path = socket;
            }
            if let Some(model) = robot_model {
                config.bridge.robot_model = model;
            }
            config.bridge.strict_topics |= strict;
            cmd_serve(config).await
        }
        Some(Command::Config { format }) => cmd_config(&config, format),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Print the effective configuration
fn cmd_config(config: &Config, format: ConfigFormat) -> Result<()> {
    match format {
        ConfigFormat::Yaml => print!("{}", serde_yaml::to_string(config)?),
        ConfigFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Run the bridge until SIGINT/SIGTERM
async fn cmd_serve(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    info!(
        robot_model = %config.bridge.robot_model,
        base_frame = %config.bridge.base_frame(),
        socket = %config.server.socket_path.display(),
        "topicbridge starting"
    );

    // Loopback bus; real deployments supply their own BusBinding
    let bus = MemoryBus::new();
    let bridge = Bridge::builder(Arc::new(bus)).config(config.bridge.clone()).build();

    let hub = Arc::new(ClientHub::new(bridge.clone(), config.server.clone()));
    let pump = bridge.gateway().attach(hub.clone(), config.bridge.dispatch_buffer);

    let (listener, socket_path) =
        create_listener_at(&config.server.socket_path).context("Failed to create client socket")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = bridge.spawn(shutdown_rx.clone());
    let server = tokio::spawn(serve(
        listener,
        hub.clone(),
        config.server.max_message_size,
        shutdown_rx,
    ));

    info!("topicbridge running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("topicbridge shutting down...");
    let _ = shutdown_tx.send(true);

    for handle in loops {
        let _ = handle.await;
    }
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "Client server exited with error"),
        Err(e) => warn!(error = %e, "Client server task failed"),
        Ok(Ok(())) => {}
    }

    bridge.gateway().detach();
    let _ = pump.await;
    cleanup_socket(&socket_path);

    let stats = bridge.stats();
    info!(
        passes = stats.passes,
        dispatched = stats.dispatched,
        throttled = stats.throttled,
        "topicbridge stopped"
    );
    Ok(())
}
