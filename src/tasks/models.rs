//! Offline tasks as handed out by the remote task source.

use serde::{Deserialize, Serialize};

/// Kind of resource that can be stored offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Tracks,
    Videos,
    Albums,
    Playlists,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Tracks => "tracks",
            ResourceType::Videos => "videos",
            ResourceType::Albums => "albums",
            ResourceType::Playlists => "playlists",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tracks" => Some(ResourceType::Tracks),
            "videos" => Some(ResourceType::Videos),
            "albums" => Some(ResourceType::Albums),
            "playlists" => Some(ResourceType::Playlists),
            _ => None,
        }
    }

    /// Leaf media (tracks, videos) as opposed to collections.
    pub fn is_media(&self) -> bool {
        matches!(self, ResourceType::Tracks | ResourceType::Videos)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of a track or video, persisted verbatim with the offline item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album_title: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

/// Metadata of an album or playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub number_of_items: Option<u32>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

/// Store one media item at an ordered slot of an offline collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreItemTask {
    pub id: String,
    pub media: MediaMetadata,
    /// Album or playlist the slot belongs to.
    pub collection_type: ResourceType,
    pub collection_id: String,
    pub volume: i32,
    pub position: i32,
}

/// Materialize a collection's own metadata and artwork.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCollectionTask {
    pub id: String,
    pub collection: CollectionMetadata,
}

/// Remove a previously stored item or collection.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveTask {
    pub id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
}

/// A unit of work from the remote task source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum OfflineTask {
    StoreItem(StoreItemTask),
    StoreCollection(StoreCollectionTask),
    Remove(RemoveTask),
}

impl OfflineTask {
    pub fn id(&self) -> &str {
        match self {
            OfflineTask::StoreItem(t) => &t.id,
            OfflineTask::StoreCollection(t) => &t.id,
            OfflineTask::Remove(t) => &t.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OfflineTask::StoreItem(_) => "store_item",
            OfflineTask::StoreCollection(_) => "store_collection",
            OfflineTask::Remove(_) => "remove",
        }
    }
}

/// Status reported back to the remote task source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    InProgress,
    Failed,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Failed => "FAILED",
            TaskState::Completed => "COMPLETED",
        }
    }
}

/// One page of tasks from the remote source.
#[derive(Debug, Clone, Default)]
pub struct TaskPage {
    pub tasks: Vec<OfflineTask>,
    pub next_cursor: Option<String>,
}
