use super::{remove_quietly, HandlerContext, InternalTask, TaskHandler};
use crate::downloads::Download;
use crate::error::{LicenseError, OfflinerError};
use crate::file_ref::FileKind;
use crate::offline_store::StoredRefs;
use crate::tasks::{OfflineTask, StoreItemTask};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Downloads one media item (plus license and artwork) and stores it at its
/// slot in a collection.
pub struct StoreItemHandler {
    context: HandlerContext,
}

impl StoreItemHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }

    /// Fetch every file of the item. `written` collects what lands on disk
    /// so the caller can clean up if the task does not commit.
    async fn fetch_files(
        &self,
        task: &StoreItemTask,
        cancel: &CancellationToken,
        written: &mut Vec<PathBuf>,
    ) -> Result<StoredRefs, OfflinerError> {
        let ctx = &self.context;
        let media = &task.media;
        let key = format!("{}:{}", media.resource_type, media.resource_id);

        let dest = ctx.files.allocate(FileKind::Media, &key);
        written.push(dest.with_extension("part"));
        written.push(dest.clone());
        let downloads = ctx.downloads.clone();
        let task_id = task.id.clone();
        let on_progress = move |fraction: f64| downloads.update_progress(&task_id, fraction);
        let downloaded = ctx
            .fetchers
            .media
            .download_media(media, &dest, &on_progress, cancel)
            .await?;
        if downloaded.path != dest {
            written.push(downloaded.path.clone());
        }
        let media_ref = ctx.files.create_ref(&downloaded.path)?;

        let license_ref = if downloaded.requires_license {
            let exchanger = ctx
                .fetchers
                .license
                .as_ref()
                .ok_or(LicenseError::MissingProvider)?;
            let key_request = downloaded
                .key_request
                .as_deref()
                .ok_or(LicenseError::MissingKeyRequest)?;
            let license = exchanger.exchange_license(media, key_request).await?;
            if license.is_empty() {
                return Err(LicenseError::EmptyLicense.into());
            }
            let license_path = ctx.files.allocate(FileKind::License, &key);
            written.push(license_path.clone());
            if let Some(parent) = license_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&license_path, &license).await?;
            Some(ctx.files.create_ref(&license_path)?)
        } else {
            None
        };

        let artwork = ctx
            .fetch_artwork(media.artwork_url.as_deref(), &key, cancel)
            .await?;
        let artwork_ref = match artwork {
            Some(path) => {
                written.push(path.clone());
                Some(ctx.files.create_ref(&path)?)
            }
            None => None,
        };

        Ok(StoredRefs {
            media: Some(media_ref),
            license: license_ref,
            artwork: artwork_ref,
        })
    }
}

#[async_trait]
impl TaskHandler for StoreItemHandler {
    fn handle(&self, task: OfflineTask) -> InternalTask {
        let download_id = match &task {
            OfflineTask::StoreItem(store_item) => {
                self.context.downloads.add(Download::for_task(store_item));
                Some(store_item.id.clone())
            }
            _ => None,
        };
        InternalTask { task, download_id }
    }

    async fn run(
        &self,
        task: &InternalTask,
        cancel: &CancellationToken,
    ) -> Result<(), OfflinerError> {
        let OfflineTask::StoreItem(task) = &task.task else {
            return Err(OfflinerError::malformed(task.id(), "not a store item task"));
        };
        let media = &task.media;
        info!(
            "Storing {} {} at {}/{} of {} {}",
            media.resource_type,
            media.resource_id,
            task.volume,
            task.position,
            task.collection_type,
            task.collection_id
        );

        let mut written = Vec::new();
        let stored = async {
            let refs = self.fetch_files(task, cancel, &mut written).await?;
            if cancel.is_cancelled() {
                return Err(OfflinerError::Cancelled);
            }
            Ok::<_, OfflinerError>(self.context.store.store_media_item(task, refs)?)
        }
        .await;

        match stored {
            Ok(superseded) => {
                self.context.delete_files(&superseded, "superseded").await;
                debug!("Stored {} {}", media.resource_type, media.resource_id);
                Ok(())
            }
            Err(e) => {
                for path in &written {
                    remove_quietly(path).await;
                }
                Err(e)
            }
        }
    }
}
