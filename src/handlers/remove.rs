use super::{HandlerContext, InternalTask, TaskHandler};
use crate::error::OfflinerError;
use crate::tasks::OfflineTask;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Removes a stored item or collection, then the files it referenced.
pub struct RemoveHandler {
    context: HandlerContext,
}

impl RemoveHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl TaskHandler for RemoveHandler {
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
        let OfflineTask::Remove(task) = &task.task else {
            return Err(OfflinerError::malformed(task.id(), "not a remove task"));
        };
        if cancel.is_cancelled() {
            return Err(OfflinerError::Cancelled);
        }
        let ctx = &self.context;

        let Some(item) = ctx.store.find_item(task.resource_type, &task.resource_id)? else {
            debug!(
                "{} {} is not stored, nothing to remove",
                task.resource_type, task.resource_id
            );
            return Ok(());
        };

        let refs = ctx.store.delete_item(&item.id)?;
        info!(
            "Removed {} {} ({} files)",
            task.resource_type,
            task.resource_id,
            refs.len()
        );
        ctx.delete_files(&refs, "removed").await;
        Ok(())
    }
}
