//! Collaborators living on the other side of the network.
//!
//! The scheduler and handlers only see the traits declared here. The HTTP
//! implementations take their credentials from an injected
//! [`CredentialsProvider`].

mod content_fetcher;
mod credentials;
mod device_auth;
mod http;
mod task_source;
mod wire;

pub use content_fetcher::HttpContentFetcher;
pub use credentials::{CredentialsProvider, StaticCredentialsProvider};
pub use device_auth::{DeviceAuthClient, DeviceAuthorization, TokenResponse};
pub use task_source::HttpTaskSource;

use crate::error::OfflinerError;
use crate::tasks::{MediaMetadata, ResourceType, TaskPage, TaskState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Server-held queue of offline tasks plus the offline inventory.
#[async_trait]
pub trait OfflineTaskSource: Send + Sync {
    /// Fetch one page of pending tasks. `None` starts from the beginning.
    async fn get_tasks(&self, cursor: Option<&str>) -> Result<TaskPage, OfflinerError>;

    async fn update_task(&self, task_id: &str, state: TaskState) -> Result<(), OfflinerError>;

    /// Declare an item as wanted offline; the server answers by enqueuing tasks.
    async fn add_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError>;

    async fn remove_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError>;
}

/// Outcome of a media download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub requires_license: bool,
    /// Opaque key request to hand to the license exchange.
    pub key_request: Option<Vec<u8>>,
}

pub type ProgressFn = dyn Fn(f64) + Send + Sync;

#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download the media file for `media` into `dest`, reporting progress in
    /// `[0, 1]`. Must stop promptly once `cancel` fires and leave no partial
    /// file behind.
    async fn download_media(
        &self,
        media: &MediaMetadata,
        dest: &Path,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<DownloadedMedia, OfflinerError>;
}

#[async_trait]
pub trait ArtworkDownloader: Send + Sync {
    async fn download_artwork(&self, url: &str, dest: &Path) -> Result<(), OfflinerError>;
}

#[async_trait]
pub trait LicenseExchanger: Send + Sync {
    /// Trade a key request for the license bytes.
    async fn exchange_license(
        &self,
        media: &MediaMetadata,
        key_request: &[u8],
    ) -> Result<Vec<u8>, OfflinerError>;
}

/// The content capabilities consumed by the handlers.
#[derive(Clone)]
pub struct ContentFetchers {
    pub media: Arc<dyn MediaDownloader>,
    pub artwork: Arc<dyn ArtworkDownloader>,
    /// `None` when no DRM provider is available on this device.
    pub license: Option<Arc<dyn LicenseExchanger>>,
}

impl ContentFetchers {
    /// All three capabilities served by the same HTTP fetcher.
    pub fn from_http(fetcher: Arc<HttpContentFetcher>) -> Self {
        Self {
            media: fetcher.clone(),
            artwork: fetcher.clone(),
            license: Some(fetcher),
        }
    }
}
