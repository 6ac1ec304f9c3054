//! Entry point for hosts: ask for content, watch it arrive, read it back.

use crate::config::{AppConfig, OfflinerSettings};
use crate::downloads::{Download, Downloads};
use crate::error::OfflinerError;
use crate::file_ref::FileReferenceStore;
use crate::handlers::{HandlerContext, TaskHandlers};
use crate::offline_store::{
    OfflineCollection, OfflineCollectionItem, OfflineMediaItem, OfflineStore,
    SqliteOfflineStore,
};
use crate::remote::{
    ContentFetchers, HttpContentFetcher, HttpTaskSource, OfflineTaskSource,
    StaticCredentialsProvider,
};
use crate::retry::ExponentialBackoffPolicy;
use crate::runner::{AdmissionGate, NetworkCost, NetworkMonitor, NetworkProbe, TaskRunner};
use crate::tasks::ResourceType;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Offliner {
    store: Arc<dyn OfflineStore>,
    source: Arc<dyn OfflineTaskSource>,
    runner: Arc<TaskRunner>,
    gate: Arc<AdmissionGate>,
    downloads: Downloads,
}

impl Offliner {
    /// Wire the engine around already-built collaborators.
    pub fn new(
        settings: &OfflinerSettings,
        store: Arc<dyn OfflineStore>,
        files: FileReferenceStore,
        fetchers: ContentFetchers,
        source: Arc<dyn OfflineTaskSource>,
        initial_cost: NetworkCost,
    ) -> Self {
        let downloads = Downloads::new();
        let gate = Arc::new(AdmissionGate::new(
            initial_cost,
            settings.allow_downloads_on_expensive_networks,
        ));
        let handlers = Arc::new(TaskHandlers::new(HandlerContext {
            store: store.clone(),
            files,
            fetchers,
            source: source.clone(),
            downloads: downloads.clone(),
        }));
        let runner = Arc::new(TaskRunner::new(
            settings,
            source.clone(),
            handlers,
            gate.clone(),
            downloads.clone(),
        ));

        Self {
            store,
            source,
            runner,
            gate,
            downloads,
        }
    }

    /// Build the HTTP-backed engine described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_url = config
            .api_url
            .as_deref()
            .ok_or_else(|| OfflinerError::Configuration("api_url".to_string()))?;

        std::fs::create_dir_all(&config.offline_dir)
            .with_context(|| format!("Failed to create {:?}", config.offline_dir))?;
        let files = FileReferenceStore::new(&config.offline_dir);
        let store = Arc::new(SqliteOfflineStore::new(
            config.offline_db_path(),
            files.clone(),
        )?);

        let credentials = Arc::new(StaticCredentialsProvider::new(
            config.access_token.clone(),
            config.installation_id.clone(),
        ));
        let retry = ExponentialBackoffPolicy::new(&config.retry);
        let source = Arc::new(HttpTaskSource::new(
            api_url,
            config.request_timeout_sec,
            credentials.clone(),
            retry.clone(),
        )?);
        let fetcher = Arc::new(HttpContentFetcher::new(
            api_url,
            config.request_timeout_sec,
            credentials,
            retry,
        )?);

        let initial_cost = if config.network.assume_expensive {
            NetworkCost::Expensive
        } else {
            NetworkCost::Inexpensive
        };
        info!(
            "Offline content in {:?}, network assumed {:?}",
            config.offline_dir, initial_cost
        );

        Ok(Self::new(
            &config.offliner,
            store,
            files,
            ContentFetchers::from_http(fetcher),
            source,
            initial_cost,
        ))
    }

    /// Ask the server to make an item available offline, then pick up the
    /// tasks it enqueued.
    pub async fn download(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError> {
        info!("Requesting {} {} offline", resource_type, resource_id);
        self.source.add_item(resource_type, resource_id).await?;
        self.runner.run().await
    }

    pub async fn remove(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError> {
        info!("Requesting removal of {} {}", resource_type, resource_id);
        self.source.remove_item(resource_type, resource_id).await?;
        self.runner.run().await
    }

    pub async fn run(&self) -> Result<(), OfflinerError> {
        self.runner.run().await
    }

    /// Live view of the in-flight media downloads. A new receiver sees the
    /// current list right away.
    pub fn downloads(&self) -> watch::Receiver<Vec<Download>> {
        self.downloads.subscribe()
    }

    pub fn current_downloads(&self) -> Vec<Download> {
        self.downloads.snapshot()
    }

    pub fn set_allow_downloads_on_expensive_networks(&self, allow: bool) {
        self.runner.set_allow_downloads_on_expensive_networks(allow);
    }

    pub fn allows_downloads_on_expensive_networks(&self) -> bool {
        self.gate.allows_expensive()
    }

    pub fn cancel(&self, task_id: &str) -> bool {
        self.runner.cancel(task_id)
    }

    pub fn cancel_all(&self) -> usize {
        self.runner.cancel_all()
    }

    /// Wait until every queued task that may run has run.
    pub async fn wait_idle(&self) {
        self.runner.wait_idle().await
    }

    /// Probe the network every `interval` and resume the scheduler whenever
    /// it turns inexpensive.
    pub fn watch_network(
        &self,
        probe: Arc<dyn NetworkProbe>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let runner = self.runner.clone();
        let monitor = NetworkMonitor::new(self.gate.clone(), probe, interval).on_inexpensive(
            move || {
                info!("Network became inexpensive, resuming offline tasks");
                runner.trigger();
            },
        );
        tokio::spawn(monitor.run(shutdown))
    }

    pub fn get_offline_media_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineMediaItem>> {
        self.store.get_media_item(resource_type, resource_id)
    }

    pub fn get_offline_media_items(
        &self,
        resource_type: ResourceType,
    ) -> Result<Vec<OfflineMediaItem>> {
        self.store.get_media_items(resource_type)
    }

    pub fn get_offline_collection(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineCollection>> {
        self.store.get_collection(resource_type, resource_id)
    }

    pub fn get_offline_collections(
        &self,
        resource_type: ResourceType,
    ) -> Result<Vec<OfflineCollection>> {
        self.store.get_collections(resource_type)
    }

    pub fn get_offline_collection_items(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Vec<OfflineCollectionItem>> {
        self.store.get_collection_items(resource_type, resource_id)
    }
}
