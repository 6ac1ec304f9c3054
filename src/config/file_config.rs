use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub offline_dir: Option<String>,
    pub api_url: Option<String>,
    pub installation_id: Option<String>,
    pub access_token: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub poll_interval_secs: Option<u64>,

    // Feature configs
    pub offliner: Option<OfflinerConfig>,
    pub retry: Option<RetryConfig>,
    pub network: Option<NetworkConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct OfflinerConfig {
    pub max_concurrent_tasks: Option<usize>,
    pub max_queue_size: Option<usize>,
    pub allow_downloads_on_expensive_networks: Option<bool>,
    pub network_probe_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub number_of_retries: Option<u32>,
    pub delay_millis: Option<u64>,
    pub delay_factor: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    /// Treat the active network as metered (no OS probe is available).
    pub assume_expensive: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
