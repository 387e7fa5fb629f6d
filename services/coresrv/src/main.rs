use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coresrv::{create_routes, AppState, CoresrvConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "CORESRV_CONFIG")]
    config: Option<PathBuf>,

    /// Override logging.level
    #[arg(long)]
    log_level: Option<String>,

    /// Override service.port
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP service (default)
    Serve,

    /// Print the effective configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = CoresrvConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(port) = args.port {
        config.service.port = port;
    }
    config.validate().context("Invalid configuration")?;

    match args.command {
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
        Some(Commands::Serve) | None => {
            coresrv::logging::init_logging(&config.logging)?;
            run_service(config).await
        },
    }
}

async fn run_service(config: CoresrvConfig) -> Result<()> {
    let bind_address = config.bind_address();
    let scheduler_enabled = config.scheduler.enabled;
    info!("Starting {} v{}", config.service.name, env!("CARGO_PKG_VERSION"));

    let state = AppState::new(config);

    let scheduler_handle = if scheduler_enabled {
        let scheduler = Arc::clone(&state.scheduler);
        Some(tokio::spawn(async move { scheduler.start().await }))
    } else {
        info!("Rule scheduler disabled");
        None
    };

    let app = create_routes(Arc::clone(&state));
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("API server listening on {}", bind_address);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    state.scheduler.stop();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
    served.context("API server error")?;
    info!("Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
