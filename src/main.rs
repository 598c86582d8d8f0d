//! Trading Desk
//!
//! Console backend for gateways, accounts, modules and positions.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tradedesk::{
    api::{start_server, AppState},
    config::Config,
    desk::Desk,
    session::{hash_password, SessionStore},
    snapshot,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tradedesk")]
#[command(about = "Trading module lifecycle and position ledger service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the console API
    Serve {
        /// Override server.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load the configuration and print the effective values
    CheckConfig,
    /// Print the SHA-256 digest to put in auth.password_sha256
    HashPassword {
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::CheckConfig => check_config(&config),
        Commands::HashPassword { password } => {
            println!("{}", hash_password(&password));
            Ok(())
        }
    }
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    tracing::info!("Starting trading desk");

    let desk = Desk::new(config.strategies.catalog.clone());
    let state_path = config.storage.state_path();
    if let Some(path) = &state_path {
        if let Some(saved) = snapshot::load(path)? {
            desk.restore(saved)?;
        }
    } else {
        tracing::warn!("storage.state_file not set, state will not survive a restart");
    }
    if config.auth.password_sha256.is_none() {
        tracing::warn!("auth.password_sha256 not set, logins are disabled");
    }

    let state = Arc::new(AppState::new(desk, SessionStore::new(&config.auth)?));
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.host, port).parse()?;

    let autosave = match &state_path {
        Some(path) if config.storage.autosave_secs > 0 => Some(snapshot::spawn_autosave(
            state.desk.clone(),
            path.clone(),
            Duration::from_secs(config.storage.autosave_secs),
        )),
        _ => None,
    };

    start_server(state.clone(), addr, shutdown_signal()).await?;

    if let Some(handle) = autosave {
        handle.abort();
    }
    if let Some(path) = &state_path {
        snapshot::save(&state.desk.snapshot(), path)?;
        tracing::info!("Snapshot saved to {}", path.display());
    }
    tracing::info!("Trading desk stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested");
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    println!("server:      {}:{}", config.server.host, config.server.port);
    println!("auth user:   {}", config.auth.username);
    println!(
        "login:       {}",
        if config.auth.password_sha256.is_some() { "enabled" } else { "disabled" }
    );
    println!("session ttl: {}s", config.auth.session_ttl_secs);
    println!("strategies:  {}", config.strategies.catalog.join(", "));
    match config.storage.state_path() {
        Some(path) => println!("state file:  {}", path.display()),
        None => println!("state file:  (none)"),
    }
    println!("autosave:    {}s", config.storage.autosave_secs);
    println!("log level:   {}", config.logging.level);
    Ok(())
}
