//! Per-task-type orchestration.
//!
//! Handlers are stateless: everything they touch comes in through a shared
//! [`HandlerContext`]. [`TaskHandlers`] picks the handler for a task, runs it
//! and reports the outcome to the remote task source.

mod remove;
mod store_collection;
mod store_item;

pub use remove::RemoveHandler;
pub use store_collection::StoreCollectionHandler;
pub use store_item::StoreItemHandler;

use crate::downloads::Downloads;
use crate::error::OfflinerError;
use crate::file_ref::{FileKind, FileRef, FileReferenceStore};
use crate::offline_store::OfflineStore;
use crate::remote::{ContentFetchers, OfflineTaskSource};
use crate::tasks::{OfflineTask, TaskState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A task plus what was derived from it when it was queued.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalTask {
    pub task: OfflineTask,
    /// Id of the Download record published for this task.
    pub download_id: Option<String>,
}

impl InternalTask {
    pub fn id(&self) -> &str {
        self.task.id()
    }
}

/// How a dispatched task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    /// Stopped before finishing; nothing is reported so the task stays
    /// pending on the remote side.
    Cancelled,
}

/// Collaborators shared by all handlers.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn OfflineStore>,
    pub files: FileReferenceStore,
    pub fetchers: ContentFetchers,
    pub source: Arc<dyn OfflineTaskSource>,
    pub downloads: Downloads,
}

impl HandlerContext {
    /// Delete files after the row that referenced them is gone. Failures
    /// leave a stray file behind and are only logged.
    pub(crate) async fn delete_files(&self, refs: &[FileRef], reason: &str) {
        for file_ref in refs {
            if let Err(e) = self.files.delete(file_ref).await {
                warn!("Failed to delete {} file: {}", reason, e);
            }
        }
        if !refs.is_empty() {
            debug!("Deleted {} {} files", refs.len(), reason);
        }
    }

    /// Fetch artwork into a fresh file. A missing url or a failed download
    /// only costs the artwork, never the task. Cancellation is the only error,
    /// and it removes whatever was written so far.
    pub(crate) async fn fetch_artwork(
        &self,
        url: Option<&str>,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, OfflinerError> {
        let Some(url) = url else {
            debug!("{}", OfflinerError::MissingArtwork(key.to_string()));
            return Ok(None);
        };
        let dest = self.files.allocate(FileKind::Artwork, key);
        let downloaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.fetchers.artwork.download_artwork(url, &dest) => Some(result),
        };
        match downloaded {
            None => {
                remove_quietly(&dest).await;
                Err(OfflinerError::Cancelled)
            }
            Some(Ok(())) => Ok(Some(dest)),
            Some(Err(e)) => {
                warn!("Artwork download for {} failed: {}", key, e);
                remove_quietly(&dest).await;
                Ok(None)
            }
        }
    }
}

/// Best-effort removal of a file this run created but did not commit.
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed uncommitted file {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove uncommitted file {:?}: {}", path, e),
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Decorate a freshly fetched task with derived data.
    fn handle(&self, task: OfflineTask) -> InternalTask;

    /// Execute the task. Must be idempotent: running it again after a partial
    /// failure converges on the same stored state.
    async fn run(&self, task: &InternalTask, cancel: &CancellationToken)
        -> Result<(), OfflinerError>;
}

/// Registry of the handlers, one per task variant.
pub struct TaskHandlers {
    context: HandlerContext,
    store_item: StoreItemHandler,
    store_collection: StoreCollectionHandler,
    remove: RemoveHandler,
}

impl TaskHandlers {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            store_item: StoreItemHandler::new(context.clone()),
            store_collection: StoreCollectionHandler::new(context.clone()),
            remove: RemoveHandler::new(context.clone()),
            context,
        }
    }

    fn handler_for(&self, task: &OfflineTask) -> &dyn TaskHandler {
        match task {
            OfflineTask::StoreItem(_) => &self.store_item,
            OfflineTask::StoreCollection(_) => &self.store_collection,
            OfflineTask::Remove(_) => &self.remove,
        }
    }

    pub fn handle(&self, task: OfflineTask) -> InternalTask {
        self.handler_for(&task).handle(task)
    }

    /// Run a task and report how it ended. Never fails: handler errors
    /// become a FAILED report.
    pub async fn run(&self, task: &InternalTask, cancel: &CancellationToken) -> TaskOutcome {
        let task_id = task.id();
        info!("Running {} task {}", task.task.kind(), task_id);
        self.report(task_id, TaskState::InProgress).await;

        match self.handler_for(&task.task).run(task, cancel).await {
            Ok(()) => {
                info!("Task {} completed", task_id);
                self.report(task_id, TaskState::Completed).await;
                TaskOutcome::Completed
            }
            Err(e) if e.is_cancelled() => {
                info!("Task {} cancelled", task_id);
                TaskOutcome::Cancelled
            }
            Err(e) => {
                warn!("Task {} failed: {}", task_id, e);
                self.report(task_id, TaskState::Failed).await;
                TaskOutcome::Failed
            }
        }
    }

    async fn report(&self, task_id: &str, state: TaskState) {
        if let Err(e) = self.context.source.update_task(task_id, state).await {
            warn!(
                "Failed to report task {} as {}: {}",
                task_id,
                state.as_str(),
                e
            );
        }
    }
}
