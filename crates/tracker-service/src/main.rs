use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tracker_core::config::TrackerConfig;
use tracker_core::identity::SystemIdentity;
use tracker_core::ipc::IpcServer;
use tracker_core::paths::{config_path_in, ipc_secret_path_in, ipc_socket_path_in, resolve_data_dir};
use tracker_core::secret;
use tracker_core::subsystem::Subsystem;
use tracker_service::handler::ServiceHandler;
use tracker_service::intercept::DeletionWatcher;

#[derive(Parser, Debug)]
#[command(author, version, about = "File deletion tracking service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tracking service in the foreground
    Run {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Config file (defaults to config.json in the data directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { data_dir, config } => run_command(data_dir, config).await,
    }
}

async fn run_command(data_dir_override: Option<PathBuf>, config_override: Option<PathBuf>) -> Result<()> {
    let data = resolve_data_dir(data_dir_override)?;
    std::fs::create_dir_all(&data).with_context(|| format!("create {}", data.display()))?;
    let config_path = config_override.unwrap_or_else(|| config_path_in(&data));
    let config = TrackerConfig::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(config = %config_path.display(), "configuration loaded");

    let subsystem = Arc::new(Subsystem::start(&config, Arc::new(SystemIdentity::new()))?);

    let ipc_secret = secret::create(&ipc_secret_path_in(&data))?;
    let socket_path = ipc_socket_path_in(&data);
    let handler = Arc::new(ServiceHandler::new(subsystem.clone()));
    let server = Arc::new(IpcServer::new(ipc_secret, socket_path.clone()));
    let server_task = {
        let server = server.clone();
        let handler = handler.clone();
        tokio::spawn(async move { server.start(handler).await })
    };

    let watcher = if config.watch_roots.is_empty() {
        None
    } else {
        match DeletionWatcher::start(subsystem.clone(), &config.watch_roots) {
            Ok(w) => Some(w),
            Err(err) => {
                warn!(error = %err, "deletion watcher disabled");
                None
            }
        }
    };

    info!(socket = %socket_path.display(), "service started");
    signal::ctrl_c().await?;
    info!("service stopping");
    server_task.abort();
    if let Some(w) = watcher {
        w.stop();
    }
    subsystem.shutdown();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
