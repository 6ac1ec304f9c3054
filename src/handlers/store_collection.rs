use super::{remove_quietly, HandlerContext, InternalTask, TaskHandler};
use crate::error::OfflinerError;
use crate::tasks::OfflineTask;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stores an album's or playlist's own metadata and artwork.
pub struct StoreCollectionHandler {
    context: HandlerContext,
}

impl StoreCollectionHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl TaskHandler for StoreCollectionHandler {
    fn handle(&self, task: OfflineTask) -> InternalTask {
        InternalTask {
            task,
            download_id: None,
        }
    }

    async fn run(
        &self,
        task: &InternalTask,
        cancel: &CancellationToken,
    ) -> Result<(), OfflinerError> {
        let OfflineTask::StoreCollection(task) = &task.task else {
            return Err(OfflinerError::malformed(
                task.id(),
                "not a store collection task",
            ));
        };
        let ctx = &self.context;
        let collection = &task.collection;
        info!(
            "Storing {} {} ({})",
            collection.resource_type, collection.resource_id, collection.title
        );

        let key = format!("{}:{}", collection.resource_type, collection.resource_id);
        let artwork = ctx
            .fetch_artwork(collection.artwork_url.as_deref(), &key, cancel)
            .await?;

        let stored = async {
            let artwork_ref = match &artwork {
                Some(path) => Some(ctx.files.create_ref(path)?),
                None => None,
            };
            if cancel.is_cancelled() {
                return Err(OfflinerError::Cancelled);
            }
            Ok::<_, OfflinerError>(ctx.store.store_collection(task, artwork_ref)?)
        }
        .await;

        match stored {
            Ok(superseded) => {
                ctx.delete_files(&superseded, "superseded").await;
                Ok(())
            }
            Err(e) => {
                if let Some(path) = &artwork {
                    remove_quietly(path).await;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::offline_store::OfflineStore;
    use crate::tasks::{CollectionMetadata, ResourceType, StoreCollectionTask};
    use std::time::Duration;

    fn store_playlist(id: &str, artwork: Option<&str>) -> OfflineTask {
        OfflineTask::StoreCollection(StoreCollectionTask {
            id: id.to_string(),
            collection: CollectionMetadata {
                resource_type: ResourceType::Playlists,
                resource_id: "p-1".to_string(),
                title: "Road trip".to_string(),
                artists: vec![],
                number_of_items: Some(20),
                artwork_url: artwork.map(str::to_string),
            },
        })
    }

    #[tokio::test]
    async fn test_store_collection_replaces_artwork() {
        let fixture = fixture(Default::default(), Default::default(), None);
        let handler = StoreCollectionHandler::new(fixture.context.clone());

        let first = handler.handle(store_playlist("s-1", Some("https://img/v1.jpg")));
        assert!(first.download_id.is_none());
        handler.run(&first, &CancellationToken::new()).await.unwrap();
        let second = handler.handle(store_playlist("s-2", Some("https://img/v2.jpg")));
        handler.run(&second, &CancellationToken::new()).await.unwrap();

        let collection = fixture
            .store
            .get_collection(ResourceType::Playlists, "p-1")
            .unwrap()
            .unwrap();
        assert_eq!(collection.metadata.title, "Road trip");
        assert_eq!(
            std::fs::read(collection.artwork_path.unwrap()).unwrap(),
            b"https://img/v2.jpg"
        );
        assert_eq!(fixture.files_on_disk(), 1);
    }

    #[tokio::test]
    async fn test_store_collection_without_artwork() {
        let fixture = fixture(Default::default(), Default::default(), None);
        let handler = StoreCollectionHandler::new(fixture.context.clone());

        let task = handler.handle(store_playlist("s-1", None));
        handler.run(&task, &CancellationToken::new()).await.unwrap();

        let collection = fixture
            .store
            .get_collection(ResourceType::Playlists, "p-1")
            .unwrap()
            .unwrap();
        assert!(collection.artwork_path.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_collection_is_not_stored() {
        let fixture = fixture(Default::default(), Default::default(), None);
        let handler = StoreCollectionHandler::new(fixture.context.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = handler.handle(store_playlist("s-1", Some("https://img/v1.jpg")));
        let err = handler.run(&task, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(fixture
            .store
            .find_item(ResourceType::Playlists, "p-1")
            .unwrap()
            .is_none());
        assert_eq!(fixture.files_on_disk(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_artwork_download_removes_partial_file() {
        let fixture = fixture(
            Default::default(),
            MockArtworkDownloader {
                hang: true,
                ..Default::default()
            },
            None,
        );
        let handler = StoreCollectionHandler::new(fixture.context.clone());
        let cancel = CancellationToken::new();
        let task = handler.handle(store_playlist("s-1", Some("https://img/v1.jpg")));

        let cancel_once_written = async {
            while fixture.files_on_disk() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        };
        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(handler.run(&task, &cancel), cancel_once_written)
        })
        .await
        .unwrap();

        assert!(result.unwrap_err().is_cancelled());
        assert!(fixture
            .store
            .find_item(ResourceType::Playlists, "p-1")
            .unwrap()
            .is_none());
        assert_eq!(fixture.files_on_disk(), 0);
    }
}
