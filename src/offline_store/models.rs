//! Rows of the offline database and the resolved views handed to callers.

use crate::file_ref::FileRef;
use crate::tasks::{CollectionMetadata, MediaMetadata, ResourceType};
use std::path::PathBuf;

/// Primary key of the row stored for `resource_type`/`resource_id`.
///
/// Resource ids are only unique within their type, so the key carries both.
pub fn offline_item_id(resource_type: ResourceType, resource_id: &str) -> String {
    format!("{}:{}", resource_type, resource_id)
}

/// A persisted `offline_item` row, references still unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineItem {
    pub id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Serialized [`MediaMetadata`] or [`CollectionMetadata`].
    pub metadata: String,
    pub media_ref: Option<FileRef>,
    pub license_ref: Option<FileRef>,
    pub artwork_ref: Option<FileRef>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// Ordered membership of an item in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineRelationship {
    pub collection_id: String,
    pub member_id: String,
    pub volume: i32,
    pub position: i32,
}

/// File references produced by a StoreItem run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRefs {
    pub media: Option<FileRef>,
    pub license: Option<FileRef>,
    /// `None` keeps whatever artwork the item already had.
    pub artwork: Option<FileRef>,
}

/// A stored track or video with its files resolved to current paths.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineMediaItem {
    pub id: String,
    pub metadata: MediaMetadata,
    pub media_path: Option<PathBuf>,
    pub license_path: Option<PathBuf>,
    pub artwork_path: Option<PathBuf>,
    pub created_at: i64,
}

/// A stored album or playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineCollection {
    pub id: String,
    pub metadata: CollectionMetadata,
    pub artwork_path: Option<PathBuf>,
    pub created_at: i64,
}

/// One slot of a collection listing.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineCollectionItem {
    pub volume: i32,
    pub position: i32,
    pub item: OfflineMediaItem,
}
