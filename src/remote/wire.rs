//! JSON shapes exchanged with the offline API and their mapping to tasks.

use crate::tasks::{
    CollectionMetadata, MediaMetadata, OfflineTask, RemoveTask, ResourceType,
    StoreCollectionTask, StoreItemTask, TaskPage, TaskState,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireError {
    #[serde(default)]
    pub sub_status: Option<u32>,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTaskPage {
    pub data: Vec<WireTask>,
    #[serde(default)]
    pub included: Vec<WireResource>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTask {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub collection_type: Option<String>,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub volume: Option<i32>,
    #[serde(default)]
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    pub attributes: WireAttributes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireAttributes {
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album_title: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub number_of_items: Option<u32>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireTaskUpdate {
    pub state: TaskState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireMediaManifest {
    pub url: String,
    #[serde(default)]
    pub requires_license: bool,
    /// Base64 key request, present for protected media.
    #[serde(default)]
    pub key_request: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireLicenseRequest<'a> {
    pub resource_type: ResourceType,
    pub resource_id: &'a str,
    pub key_request: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireLicenseResponse {
    /// Base64 license payload.
    #[serde(default)]
    pub license: Option<String>,
}

/// A remote task that could not be turned into an [`OfflineTask`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnmappedTask {
    pub id: String,
    pub reason: String,
}

/// Split a wire page into tasks that can run and tasks to report as failed.
pub(crate) fn map_page(page: WireTaskPage) -> (TaskPage, Vec<UnmappedTask>) {
    let included: HashMap<(String, String), WireAttributes> = page
        .included
        .into_iter()
        .map(|r| ((r.resource_type, r.id), r.attributes))
        .collect();

    let mut tasks = Vec::with_capacity(page.data.len());
    let mut unmapped = Vec::new();
    for wire_task in page.data {
        let id = wire_task.id.clone();
        match map_task(wire_task, &included) {
            Ok(task) => tasks.push(task),
            Err(reason) => unmapped.push(UnmappedTask { id, reason }),
        }
    }
    (
        TaskPage {
            tasks,
            next_cursor: page.next_cursor,
        },
        unmapped,
    )
}

fn map_task(
    task: WireTask,
    included: &HashMap<(String, String), WireAttributes>,
) -> Result<OfflineTask, String> {
    let resource_type = ResourceType::from_str(&task.resource_type)
        .ok_or_else(|| format!("unknown resource type '{}'", task.resource_type))?;
    let attributes = || {
        included
            .get(&(task.resource_type.clone(), task.resource_id.clone()))
            .cloned()
            .ok_or_else(|| {
                format!(
                    "missing included resource {}/{}",
                    task.resource_type, task.resource_id
                )
            })
    };

    match task.action.as_str() {
        "STORE_ITEM" => {
            if !resource_type.is_media() {
                return Err(format!("cannot store {} as an item", resource_type));
            }
            let attributes = attributes()?;
            let collection_type = task
                .collection_type
                .as_deref()
                .and_then(ResourceType::from_str)
                .filter(|collection_type| !collection_type.is_media())
                .ok_or_else(|| "missing or invalid collection type".to_string())?;
            let collection_id = task
                .collection_id
                .clone()
                .ok_or_else(|| "missing collection id".to_string())?;
            Ok(OfflineTask::StoreItem(StoreItemTask {
                media: MediaMetadata {
                    resource_type,
                    resource_id: task.resource_id.clone(),
                    title: attributes.title,
                    artists: attributes.artists,
                    album_title: attributes.album_title,
                    duration_secs: attributes.duration,
                    artwork_url: attributes.artwork_url,
                },
                collection_type,
                collection_id,
                volume: task.volume.unwrap_or(1),
                position: task
                    .position
                    .ok_or_else(|| "missing position".to_string())?,
                id: task.id,
            }))
        }
        "STORE_COLLECTION" => {
            if resource_type.is_media() {
                return Err(format!("cannot store {} as a collection", resource_type));
            }
            let attributes = attributes()?;
            Ok(OfflineTask::StoreCollection(StoreCollectionTask {
                collection: CollectionMetadata {
                    resource_type,
                    resource_id: task.resource_id.clone(),
                    title: attributes.title,
                    artists: attributes.artists,
                    number_of_items: attributes.number_of_items,
                    artwork_url: attributes.artwork_url,
                },
                id: task.id,
            }))
        }
        "REMOVE" => Ok(OfflineTask::Remove(RemoveTask {
            id: task.id,
            resource_type,
            resource_id: task.resource_id,
        })),
        other => Err(format!("unknown action '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "data": [
            {"id": "t-1", "action": "STORE_ITEM", "resourceType": "tracks", "resourceId": "42",
             "collectionType": "albums", "collectionId": "a-1", "volume": 2, "position": 7},
            {"id": "t-2", "action": "STORE_COLLECTION", "resourceType": "albums", "resourceId": "a-1"},
            {"id": "t-3", "action": "REMOVE", "resourceType": "videos", "resourceId": "9"},
            {"id": "t-4", "action": "STORE_ITEM", "resourceType": "tracks", "resourceId": "43",
             "collectionType": "albums", "collectionId": "a-1", "position": 8},
            {"id": "t-5", "action": "SHUFFLE", "resourceType": "tracks", "resourceId": "42"}
        ],
        "included": [
            {"type": "tracks", "id": "42", "attributes": {"title": "Song", "artists": ["A"], "duration": 200}},
            {"type": "albums", "id": "a-1", "attributes": {"title": "Record", "numberOfItems": 12,
             "artworkUrl": "https://img/a-1.jpg"}}
        ],
        "nextCursor": "c-2"
    }"#;

    #[test]
    fn test_map_page() {
        let wire: WireTaskPage = serde_json::from_str(PAGE).unwrap();
        let (page, unmapped) = map_page(wire);

        assert_eq!(page.next_cursor.as_deref(), Some("c-2"));
        assert_eq!(page.tasks.len(), 3);

        match &page.tasks[0] {
            OfflineTask::StoreItem(task) => {
                assert_eq!(task.id, "t-1");
                assert_eq!(task.media.title, "Song");
                assert_eq!(task.media.duration_secs, Some(200));
                assert_eq!(task.collection_type, ResourceType::Albums);
                assert_eq!(task.collection_id, "a-1");
                assert_eq!((task.volume, task.position), (2, 7));
            }
            other => panic!("unexpected task {:?}", other),
        }
        match &page.tasks[1] {
            OfflineTask::StoreCollection(task) => {
                assert_eq!(task.collection.number_of_items, Some(12));
                assert_eq!(
                    task.collection.artwork_url.as_deref(),
                    Some("https://img/a-1.jpg")
                );
            }
            other => panic!("unexpected task {:?}", other),
        }
        assert!(matches!(page.tasks[2], OfflineTask::Remove(_)));

        let ids: Vec<&str> = unmapped.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["t-4", "t-5"]);
        assert!(unmapped[0].reason.contains("missing included resource"));
    }

    #[test]
    fn test_store_item_for_collection_type_is_unmapped() {
        let wire: WireTaskPage = serde_json::from_str(
            r#"{"data": [{"id": "t-1", "action": "STORE_ITEM", "resourceType": "albums",
                "resourceId": "1", "collectionId": "p", "position": 1}]}"#,
        )
        .unwrap();
        let (page, unmapped) = map_page(wire);
        assert!(page.tasks.is_empty());
        assert!(page.next_cursor.is_none());
        assert_eq!(unmapped.len(), 1);
    }

    #[test]
    fn test_store_item_needs_collection_type() {
        let wire: WireTaskPage = serde_json::from_str(
            r#"{"data": [
                {"id": "t-1", "action": "STORE_ITEM", "resourceType": "tracks", "resourceId": "1",
                 "collectionId": "p", "position": 1},
                {"id": "t-2", "action": "STORE_ITEM", "resourceType": "tracks", "resourceId": "1",
                 "collectionType": "videos", "collectionId": "p", "position": 1}
            ],
            "included": [{"type": "tracks", "id": "1", "attributes": {"title": "Song"}}]}"#,
        )
        .unwrap();
        let (page, unmapped) = map_page(wire);
        assert!(page.tasks.is_empty());
        assert_eq!(unmapped.len(), 2);
        assert!(unmapped.iter().all(|u| u.reason.contains("collection type")));
    }

    #[test]
    fn test_task_update_body() {
        let body = serde_json::to_string(&WireTaskUpdate {
            state: TaskState::Failed,
        })
        .unwrap();
        assert_eq!(body, r#"{"state":"FAILED"}"#);
    }
}
