//! drivelink command-line uploader.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drivelink_channel::WsConnector;
use drivelink_upload::{
    FileCatalog, HttpSessionInitiator, SelectedFile, UploadConfig, UploadCoordinator, UploadState,
};

use crate::config::UploaderConfig;

#[derive(Parser)]
#[command(name = "drivelink", version)]
#[command(about = "Upload files to a drivelink file service", long_about = None)]
struct Cli {
    /// HTTP API base URL (overrides the config file)
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// WebSocket API base URL (overrides the config file)
    #[arg(long, global = true)]
    ws_base: Option<String>,

    /// Bearer token for the file service
    #[arg(long, global = true, env = "DRIVELINK_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and wait until it is stored
    Upload {
        /// File to upload
        path: PathBuf,

        /// Bytes per upload frame
        #[arg(long)]
        chunk_size: Option<u32>,
    },

    /// Show metadata of a stored file
    Meta {
        /// File id
        id: String,
    },

    /// List your uploads
    History,

    /// Print the streaming URL of a stored file
    StreamUrl {
        /// File id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,drivelink=debug")),
        )
        .init();

    let cli = Cli::parse();

    let mut file_config = match UploaderConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to load config, using defaults");
            UploaderConfig::default()
        }
    };
    if let Some(api_base) = cli.api_base {
        file_config.api_base = api_base;
    }
    if let Some(ws_base) = cli.ws_base {
        file_config.ws_base = ws_base;
    }
    if let Commands::Upload {
        chunk_size: Some(chunk_size),
        ..
    } = &cli.command
    {
        file_config.chunk_size = *chunk_size;
    }
    let config = file_config.to_upload_config(cli.token);
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Upload { path, .. } => upload(client, config, path).await,
        Commands::Meta { id } => {
            let meta = FileCatalog::from_config(client, &config).file_meta(&id).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
            Ok(())
        }
        Commands::History => {
            let files = FileCatalog::from_config(client, &config).history().await?;
            for file in files {
                println!("{}\t{}\t{}", file.id, file.size, file.filename);
            }
            Ok(())
        }
        Commands::StreamUrl { id } => {
            println!("{}", FileCatalog::from_config(client, &config).stream_url(&id));
            Ok(())
        }
    }
}

async fn upload(client: reqwest::Client, config: UploadConfig, path: PathBuf) -> anyhow::Result<()> {
    let file = SelectedFile::from_path(&path)
        .await
        .with_context(|| format!("cannot upload {}", path.display()))?;

    let initiator = Arc::new(HttpSessionInitiator::from_config(client, &config));
    let mut coordinator = UploadCoordinator::new(initiator, Arc::new(WsConnector::new()), config);
    coordinator.select(file).await;
    coordinator.upload().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last = coordinator.snapshot().clone();
    let interrupted = loop {
        tokio::select! {
            snapshot = coordinator.next_update() => {
                if snapshot != last {
                    info!(
                        state = %snapshot.state,
                        upload = snapshot.browser_progress,
                        processing = snapshot.processing_progress,
                        "progress"
                    );
                }
                last = snapshot;
                if !last.state.is_active() {
                    break false;
                }
            }
            _ = &mut ctrl_c => break true,
        }
    };

    if interrupted {
        coordinator.reset().await;
        bail!("upload interrupted");
    }

    match last.state {
        UploadState::Success => {
            println!("{}", last.download_locator.unwrap_or_default());
            Ok(())
        }
        _ => bail!(
            "{}",
            last.error_message
                .unwrap_or_else(|| format!("upload ended in state {}", last.state))
        ),
    }
}
