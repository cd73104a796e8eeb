use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tracker_core::canonical::canonicalize_with_base;
use tracker_core::control::ControlStatus;
use tracker_core::ipc::{IpcRequest, IpcResponse};
use tracker_core::ipc_client::IpcClient;
use tracker_core::paths::{ipc_secret_path_in, ipc_socket_path_in, resolve_data_dir};
use tracker_core::record::DeletionEvent;
use tracker_core::secret;

#[derive(Parser)]
#[command(name = "tracker-cli")]
#[command(about = "Control utility for the file deletion tracker", long_about = None)]
struct Cli {
    /// Service data directory (holds the IPC secret)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a file
    Add {
        path: PathBuf,
        /// Deny deletion of the file instead of only recording it
        #[arg(short, long)]
        protect: bool,
    },

    /// Stop tracking a file
    Remove { path: PathBuf },

    /// Fetch the oldest pending deletion event
    Next {
        #[arg(long)]
        json: bool,
    },

    /// Show registry and queue counters
    Status,

    /// Poll for deletion events until interrupted
    Watch {
        #[arg(long, default_value = "500")]
        interval_ms: u64,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let data = resolve_data_dir(cli.data_dir)?;
    let secret = secret::load(&ipc_secret_path_in(&data))?;
    let socket = ipc_socket_path_in(&data);
    debug!(socket = %socket.display(), "connecting");
    let mut client = IpcClient::connect(&socket, &secret).await?;

    match cli.command {
        Commands::Add { path, protect } => {
            let path = to_canonical(&path)?;
            let response = client
                .request(IpcRequest::AddTrackedFile {
                    path: path.clone(),
                    protected: protect,
                })
                .await?;
            expect_ok(response)?;
            let mode = if protect { "protected" } else { "tracked" };
            println!("{path} is now {mode}");
        }

        Commands::Remove { path } => {
            let path = to_canonical(&path)?;
            let response = client
                .request(IpcRequest::RemoveTrackedFile { path: path.clone() })
                .await?;
            expect_ok(response)?;
            println!("{path} is no longer tracked");
        }

        Commands::Next { json } => match next_event(&mut client).await? {
            Some(event) => print_event(&event, json)?,
            None => println!("{}", ControlStatus::NoEventsAvailable),
        },

        Commands::Status => {
            let response = client.request(IpcRequest::GetStatus).await?;
            match response {
                IpcResponse::TrackerStatus { status } => {
                    println!("{}", serde_json::to_string_pretty(&status)?)
                }
                other => return Err(unexpected(other)),
            }
        }

        Commands::Watch { interval_ms, json } => {
            let interval = Duration::from_millis(interval_ms.max(1));
            loop {
                while let Some(event) = next_event(&mut client).await? {
                    print_event(&event, json)?;
                }
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
    }

    Ok(())
}

fn to_canonical(path: &Path) -> Result<String> {
    let cwd = std::env::current_dir()?;
    let canonical = canonicalize_with_base(path, &cwd)
        .with_context(|| format!("invalid path {}", path.display()))?;
    Ok(canonical.as_str().to_string())
}

async fn next_event(client: &mut IpcClient) -> Result<Option<DeletionEvent>> {
    match client.request(IpcRequest::next_event()).await? {
        IpcResponse::DeleteEvent { record } => Ok(Some(IpcResponse::decode_event(&record)?)),
        IpcResponse::Status {
            status: ControlStatus::NoEventsAvailable,
        } => Ok(None),
        IpcResponse::Status { status } => Err(anyhow!("{status}")),
        other => Err(unexpected(other)),
    }
}

fn expect_ok(response: IpcResponse) -> Result<()> {
    match response {
        IpcResponse::Status { status } if status.is_ok() => Ok(()),
        IpcResponse::Status { status } => Err(anyhow!("{status}")),
        other => Err(unexpected(other)),
    }
}

fn unexpected(response: IpcResponse) -> anyhow::Error {
    anyhow!("unexpected response from service: {response:?}")
}

fn print_event(event: &DeletionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!(
            "#{} Operation=DELETE, Process={}, Path={}, DateTime={}",
            event.sequence_id, event.process_name, event.file_path, event.timestamp
        );
    }
    Ok(())
}
