//! HTTP implementation of the remote task source.

use super::credentials::CredentialsProvider;
use super::http::{check_status, ApiClient};
use super::wire::{map_page, WireTaskPage, WireTaskUpdate};
use super::OfflineTaskSource;
use crate::error::OfflinerError;
use crate::retry::{self, ExponentialBackoffPolicy};
use crate::tasks::{ResourceType, TaskPage, TaskState};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct HttpTaskSource {
    api: ApiClient,
}

impl HttpTaskSource {
    pub fn new(
        base_url: &str,
        timeout_sec: u64,
        credentials: Arc<dyn CredentialsProvider>,
        retry: ExponentialBackoffPolicy,
    ) -> Result<Self, OfflinerError> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout_sec, credentials, retry)?,
        })
    }

    fn item_path(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<String, OfflinerError> {
        Ok(format!(
            "{}/offline-items/{}/{}",
            self.api.installation_path()?,
            resource_type.as_str(),
            urlencoding::encode(resource_id)
        ))
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<WireTaskPage, OfflinerError> {
        let mut url = self
            .api
            .url(&format!("{}/offline-tasks", self.api.installation_path()?));
        if let Some(cursor) = cursor {
            url.push_str(&format!("?cursor={}", urlencoding::encode(cursor)));
        }
        let url = url.as_str();
        let api = &self.api;
        retry::execute(api.retry(), move || async move {
            let request = api.authorized(api.client().get(url))?;
            let response = check_status(request.send().await?).await?;
            Ok::<_, OfflinerError>(response.json::<WireTaskPage>().await?)
        })
        .await
    }

    async fn send_update(&self, task_id: &str, state: TaskState) -> Result<(), OfflinerError> {
        let url = self.api.url(&format!(
            "{}/offline-tasks/{}",
            self.api.installation_path()?,
            urlencoding::encode(task_id)
        ));
        let url = url.as_str();
        let api = &self.api;
        retry::execute(api.retry(), move || async move {
            let request = api.authorized(api.client().put(url))?;
            check_status(request.json(&WireTaskUpdate { state }).send().await?).await?;
            Ok::<_, OfflinerError>(())
        })
        .await
    }
}

#[async_trait]
impl OfflineTaskSource for HttpTaskSource {
    async fn get_tasks(&self, cursor: Option<&str>) -> Result<TaskPage, OfflinerError> {
        let wire = self.fetch_page(cursor).await?;
        let (page, unmapped) = map_page(wire);
        debug!(
            "Fetched {} offline tasks ({} unmapped), next cursor {:?}",
            page.tasks.len(),
            unmapped.len(),
            page.next_cursor
        );

        for task in unmapped {
            warn!("Offline task {} cannot be mapped: {}", task.id, task.reason);
            if let Err(e) = self.send_update(&task.id, TaskState::Failed).await {
                warn!("Failed to report unmapped task {}: {}", task.id, e);
            }
        }
        Ok(page)
    }

    async fn update_task(&self, task_id: &str, state: TaskState) -> Result<(), OfflinerError> {
        self.send_update(task_id, state).await
    }

    async fn add_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError> {
        let url = self.api.url(&self.item_path(resource_type, resource_id)?);
        let url = url.as_str();
        let api = &self.api;
        retry::execute(api.retry(), move || async move {
            let request = api.authorized(api.client().post(url))?;
            check_status(request.send().await?).await?;
            Ok::<_, OfflinerError>(())
        })
        .await
    }

    async fn remove_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<(), OfflinerError> {
        let url = self.api.url(&self.item_path(resource_type, resource_id)?);
        let url = url.as_str();
        let api = &self.api;
        retry::execute(api.retry(), move || async move {
            let request = api.authorized(api.client().delete(url))?;
            check_status(request.send().await?).await?;
            Ok::<_, OfflinerError>(())
        })
        .await
    }
}
