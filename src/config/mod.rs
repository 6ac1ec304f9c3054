mod file_config;

pub use file_config::{FileConfig, NetworkConfig, OfflinerConfig, RetryConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub offline_dir: Option<PathBuf>,
    pub api_url: Option<String>,
    pub installation_id: Option<String>,
    pub access_token: Option<String>,
    pub request_timeout_sec: u64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub offline_dir: PathBuf,
    pub api_url: Option<String>,
    pub installation_id: Option<String>,
    pub access_token: Option<String>,
    pub request_timeout_sec: u64,
    pub poll_interval_secs: u64,

    // Feature configs (with defaults)
    pub offliner: OfflinerSettings,
    pub retry: RetrySettings,
    pub network: NetworkSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let offline_dir = file
            .offline_dir
            .map(PathBuf::from)
            .or_else(|| cli.offline_dir.clone())
            .unwrap_or_else(|| db_dir.join("offline"));

        let api_url = file.api_url.or_else(|| cli.api_url.clone());
        let installation_id = file
            .installation_id
            .or_else(|| cli.installation_id.clone());
        let access_token = file.access_token.or_else(|| cli.access_token.clone());
        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        let poll_interval_secs = file.poll_interval_secs.unwrap_or(cli.poll_interval_secs);

        let offliner_file = file.offliner.unwrap_or_default();
        let defaults = OfflinerSettings::default();
        let offliner = OfflinerSettings {
            max_concurrent_tasks: offliner_file
                .max_concurrent_tasks
                .unwrap_or(defaults.max_concurrent_tasks),
            max_queue_size: offliner_file
                .max_queue_size
                .unwrap_or(defaults.max_queue_size),
            allow_downloads_on_expensive_networks: offliner_file
                .allow_downloads_on_expensive_networks
                .unwrap_or(defaults.allow_downloads_on_expensive_networks),
            network_probe_interval_secs: offliner_file
                .network_probe_interval_secs
                .unwrap_or(defaults.network_probe_interval_secs),
        };
        if offliner.max_concurrent_tasks == 0 {
            bail!("offliner.max_concurrent_tasks must be at least 1");
        }
        if offliner.max_queue_size == 0 {
            bail!("offliner.max_queue_size must be at least 1");
        }

        let retry_file = file.retry.unwrap_or_default();
        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            number_of_retries: retry_file
                .number_of_retries
                .unwrap_or(retry_defaults.number_of_retries),
            delay_millis: retry_file.delay_millis.unwrap_or(retry_defaults.delay_millis),
            delay_factor: retry_file.delay_factor.unwrap_or(retry_defaults.delay_factor),
        };

        let network = NetworkSettings {
            assume_expensive: file
                .network
                .and_then(|n| n.assume_expensive)
                .unwrap_or(false),
        };

        Ok(Self {
            db_dir,
            offline_dir,
            api_url,
            installation_id,
            access_token,
            request_timeout_sec,
            poll_interval_secs,
            offliner,
            retry,
            network,
        })
    }

    pub fn offline_db_path(&self) -> PathBuf {
        self.db_dir.join("offline.db")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Scheduler limits and admission policy.
#[derive(Debug, Clone)]
pub struct OfflinerSettings {
    pub max_concurrent_tasks: usize,
    pub max_queue_size: usize,
    pub allow_downloads_on_expensive_networks: bool,
    pub network_probe_interval_secs: u64,
}

impl Default for OfflinerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_queue_size: 80,
            allow_downloads_on_expensive_networks: false,
            network_probe_interval_secs: 30,
        }
    }
}

/// Exponential backoff applied to every remote call.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub number_of_retries: u32,
    pub delay_millis: u64,
    pub delay_factor: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            number_of_retries: 3,
            delay_millis: 500,
            delay_factor: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkSettings {
    pub assume_expensive: bool,
}
