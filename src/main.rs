use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pezzottify_offliner::config::{self, AppConfig};
use pezzottify_offliner::{Download, NetworkCost, Offliner, ResourceType, StaticNetworkProbe};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(path_buf))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.is_dir() {
        return Err(format!("Not an existing directory: {}", s));
    }
    Ok(path)
}

fn parse_resource_type(s: &str) -> Result<ResourceType, String> {
    ResourceType::from_str(s)
        .ok_or_else(|| format!("Unknown resource type '{}' (tracks, videos, albums, playlists)", s))
}

#[derive(Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding offline.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Where downloaded files go. Defaults to <db_dir>/offline.
    #[clap(long, value_parser = parse_path)]
    pub offline_dir: Option<PathBuf>,

    /// Base URL of the content API.
    #[clap(long)]
    pub api_url: Option<String>,

    #[clap(long)]
    pub installation_id: Option<String>,

    #[clap(long)]
    pub access_token: Option<String>,

    /// Timeout in seconds for API requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Seconds between scheduling passes in `sync` mode.
    #[clap(long, default_value_t = 300)]
    pub poll_interval_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep offline content in sync until interrupted.
    Sync,

    /// Make an item available offline and wait for its tasks to finish.
    Download {
        #[clap(value_parser = parse_resource_type)]
        resource_type: ResourceType,
        resource_id: String,
    },

    /// Remove an item from offline storage and wait for its tasks to finish.
    Remove {
        #[clap(value_parser = parse_resource_type)]
        resource_type: ResourceType,
        resource_id: String,
    },

    /// List stored items, optionally of a single type.
    List {
        #[clap(value_parser = parse_resource_type)]
        resource_type: Option<ResourceType>,
    },

    /// Show the ordered contents of a stored album or playlist.
    Collection {
        #[clap(value_parser = parse_resource_type)]
        resource_type: ResourceType,
        resource_id: String,
    },
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            offline_dir: args.offline_dir.clone(),
            api_url: args.api_url.clone(),
            installation_id: args.installation_id.clone(),
            access_token: args.access_token.clone(),
            request_timeout_sec: args.request_timeout_sec,
            poll_interval_secs: args.poll_interval_secs,
        }
    }
}

fn log_downloads(mut receiver: watch::Receiver<Vec<Download>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            for download in receiver.borrow_and_update().iter() {
                debug!(
                    "{} {} \"{}\": {:.0}%",
                    download.resource_type,
                    download.resource_id,
                    download.title,
                    download.fraction_complete * 100.0
                );
            }
        }
    })
}

async fn sync(offliner: &Offliner, app_config: &AppConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let cost = if app_config.network.assume_expensive {
        NetworkCost::Expensive
    } else {
        NetworkCost::Inexpensive
    };
    let monitor = offliner.watch_network(
        Arc::new(StaticNetworkProbe(cost)),
        std::time::Duration::from_secs(app_config.offliner.network_probe_interval_secs),
        shutdown.child_token(),
    );

    info!(
        "Syncing offline content every {:?}",
        app_config.poll_interval()
    );
    let mut ticker = tokio::time::interval(app_config.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = offliner.run().await {
                    error!("Scheduling pass failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    let cancelled = offliner.cancel_all();
    if cancelled > 0 {
        info!("Cancelled {} tasks", cancelled);
    }
    shutdown.cancel();
    let _ = monitor.await;
    Ok(())
}

/// Wait for the queue to drain, or for Ctrl+C.
async fn settle(offliner: &Offliner) {
    tokio::select! {
        _ = offliner.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, cancelling");
            offliner.cancel_all();
            offliner.wait_idle().await;
        }
    }
}

fn print_media_items(offliner: &Offliner, resource_type: ResourceType) -> Result<()> {
    for item in offliner.get_offline_media_items(resource_type)? {
        println!(
            "{}\t{}\t{}\t{}",
            resource_type,
            item.metadata.resource_id,
            item.metadata.title,
            item.media_path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(missing)".to_string())
        );
    }
    Ok(())
}

fn print_collections(offliner: &Offliner, resource_type: ResourceType) -> Result<()> {
    for collection in offliner.get_offline_collections(resource_type)? {
        let items = offliner
            .get_offline_collection_items(resource_type, &collection.metadata.resource_id)?;
        println!(
            "{}\t{}\t{}\t{} items",
            resource_type,
            collection.metadata.resource_id,
            collection.metadata.title,
            items.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;
    debug!("Resolved configuration: {:?}", app_config.offliner);

    let offliner = Offliner::from_config(&app_config)?;

    match cli_args.command {
        Command::Sync => {
            let logger = log_downloads(offliner.downloads());
            sync(&offliner, &app_config).await?;
            logger.abort();
        }
        Command::Download {
            resource_type,
            resource_id,
        } => {
            let logger = log_downloads(offliner.downloads());
            offliner.download(resource_type, &resource_id).await?;
            settle(&offliner).await;
            logger.abort();
        }
        Command::Remove {
            resource_type,
            resource_id,
        } => {
            offliner.remove(resource_type, &resource_id).await?;
            settle(&offliner).await;
        }
        Command::List { resource_type } => {
            let types = match resource_type {
                Some(resource_type) => vec![resource_type],
                None => vec![
                    ResourceType::Tracks,
                    ResourceType::Videos,
                    ResourceType::Albums,
                    ResourceType::Playlists,
                ],
            };
            for resource_type in types {
                if resource_type.is_media() {
                    print_media_items(&offliner, resource_type)?;
                } else {
                    print_collections(&offliner, resource_type)?;
                }
            }
        }
        Command::Collection {
            resource_type,
            resource_id,
        } => {
            for entry in offliner.get_offline_collection_items(resource_type, &resource_id)? {
                let media = &entry.item.metadata;
                println!(
                    "{}.{}\t{}\t{}\t{}",
                    entry.volume, entry.position, media.resource_type, media.resource_id, media.title
                );
            }
        }
    }

    Ok(())
}
