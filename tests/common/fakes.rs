//! In-process stand-ins for the remote task queue and the content servers.

use async_trait::async_trait;
use pezzottify_offliner::error::OfflinerError;
use pezzottify_offliner::remote::{
    ArtworkDownloader, DownloadedMedia, LicenseExchanger, MediaDownloader, OfflineTaskSource,
    ProgressFn,
};
use pezzottify_offliner::tasks::{
    CollectionMetadata, MediaMetadata, OfflineTask, RemoveTask, ResourceType,
    StoreCollectionTask, StoreItemTask, TaskPage, TaskState,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const PAGE_SIZE: usize = 3;

struct Album {
    metadata: CollectionMetadata,
    tracks: Vec<MediaMetadata>,
}

/// A server-side task queue. Adding an album enqueues one collection task
/// plus one task per track; a task leaves the queue once it is reported
/// finished.
#[derive(Default)]
pub struct FakeRemote {
    albums: HashMap<String, Album>,
    queue: Mutex<Vec<OfflineTask>>,
    reports: Mutex<Vec<(String, TaskState)>>,
    next_id: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_album(mut self, album_id: &str, title: &str, track_count: usize) -> Self {
        let tracks = (1..=track_count)
            .map(|n| MediaMetadata {
                resource_type: ResourceType::Tracks,
                resource_id: format!("{}-T{}", album_id, n),
                title: format!("{} track {}", title, n),
                artists: vec!["The Testers".to_string()],
                album_title: Some(title.to_string()),
                duration_secs: Some(180),
                artwork_url: Some(format!("https://img.test/{}.jpg", album_id)),
            })
            .collect();
        let metadata = CollectionMetadata {
            resource_type: ResourceType::Albums,
            resource_id: album_id.to_string(),
            title: title.to_string(),
            artists: vec!["The Testers".to_string()],
            number_of_items: Some(track_count as u32),
            artwork_url: Some(format!("https://img.test/{}.jpg", album_id)),
        };
        self.albums
            .insert(album_id.to_string(), Album { metadata, tracks });
        self
    }

    pub fn reports(&self) -> Vec<(String, TaskState)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn reported(&self, state: TaskState) -> usize {
        self.reports().iter().filter(|(_, s)| *s == state).count()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn next_task_id(&self) -> String {
        format!("task-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn album(&self, resource_type: ResourceType, id: &str) -> Result<&Album, OfflinerError> {
        match (resource_type, self.albums.get(id)) {
            (ResourceType::Albums, Some(album)) => Ok(album),
            _ => Err(OfflinerError::http(404, format!("{} {} not found", resource_type, id))),
        }
    }
}

#[async_trait]
impl OfflineTaskSource for FakeRemote {
    async fn get_tasks(&self, cursor: Option<&str>) -> Result<TaskPage, OfflinerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let queue = self.queue.lock().unwrap();
        let start = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| OfflinerError::http(400, "bad cursor"))?,
            None => 0,
        };
        let start = start.min(queue.len());
        let end = (start + PAGE_SIZE).min(queue.len());
        Ok(TaskPage {
            tasks: queue[start..end].to_vec(),
            next_cursor: (end < queue.len()).then(|| end.to_string()),
        })
    }

    async fn update_task(&self, task_id: &str, state: TaskState) -> Result<(), OfflinerError> {
        if matches!(state, TaskState::Completed | TaskState::Failed) {
            self.queue.lock().unwrap().retain(|t| t.id() != task_id);
        }
        self.reports
            .lock()
            .unwrap()
            .push((task_id.to_string(), state));
        Ok(())
    }

    async fn add_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError> {
        let album = self.album(resource_type, resource_id)?;
        let mut queue = self.queue.lock().unwrap();
        queue.push(OfflineTask::StoreCollection(StoreCollectionTask {
            id: self.next_task_id(),
            collection: album.metadata.clone(),
        }));
        for (index, track) in album.tracks.iter().enumerate() {
            queue.push(OfflineTask::StoreItem(StoreItemTask {
                id: self.next_task_id(),
                media: track.clone(),
                collection_type: resource_type,
                collection_id: resource_id.to_string(),
                volume: 1,
                position: index as i32 + 1,
            }));
        }
        Ok(())
    }

    async fn remove_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError> {
        let album = self.album(resource_type, resource_id)?;
        let mut queue = self.queue.lock().unwrap();
        queue.push(OfflineTask::Remove(RemoveTask {
            id: self.next_task_id(),
            resource_type,
            resource_id: resource_id.to_string(),
        }));
        for track in &album.tracks {
            queue.push(OfflineTask::Remove(RemoveTask {
                id: self.next_task_id(),
                resource_type: track.resource_type,
                resource_id: track.resource_id.clone(),
            }));
        }
        Ok(())
    }
}

/// Serves media, artwork and licenses from memory. With `hold` set, media
/// downloads wait for a permit before finishing.
#[derive(Default)]
pub struct FakeContent {
    pub hold: Option<Arc<Semaphore>>,
    pub requires_license: bool,
    pub media_downloads: AtomicUsize,
}

#[async_trait]
impl MediaDownloader for FakeContent {
    async fn download_media(
        &self,
        media: &MediaMetadata,
        dest: &Path,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<DownloadedMedia, OfflinerError> {
        self.media_downloads.fetch_add(1, Ordering::SeqCst);
        on_progress(0.25);
        if let Some(hold) = &self.hold {
            tokio::select! {
                _ = cancel.cancelled() => return Err(OfflinerError::Cancelled),
                permit = hold.acquire() => {
                    permit.map_err(|_| OfflinerError::Transport("closed".to_string()))?.forget();
                }
            }
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, format!("media:{}", media.resource_id)).await?;
        on_progress(1.0);
        Ok(DownloadedMedia {
            path: dest.to_path_buf(),
            requires_license: self.requires_license,
            key_request: self.requires_license.then(|| b"key-request".to_vec()),
        })
    }
}

#[async_trait]
impl ArtworkDownloader for FakeContent {
    async fn download_artwork(&self, url: &str, dest: &Path) -> Result<(), OfflinerError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, url.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl LicenseExchanger for FakeContent {
    async fn exchange_license(
        &self,
        media: &MediaMetadata,
        key_request: &[u8],
    ) -> Result<Vec<u8>, OfflinerError> {
        assert_eq!(key_request, b"key-request");
        Ok(format!("license:{}", media.resource_id).into_bytes())
    }
}
