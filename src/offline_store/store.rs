//! SQLite-backed storage of offline items and their collection membership.

use super::models::*;
use super::schema::{
    OFFLINE_ITEM_RELATIONSHIP_TABLE, OFFLINE_ITEM_TABLE, OFFLINE_VERSIONED_SCHEMAS,
};
use crate::file_ref::{FileRef, FileReferenceStore};
use crate::sqlite_persistence::{open_database, prepare_database};
use crate::tasks::{
    CollectionMetadata, MediaMetadata, ResourceType, StoreCollectionTask, StoreItemTask,
};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Persistence of offline items, collections and ordering relationships.
///
/// Every multi-statement write runs in one transaction. Reads resolve file
/// references and persist refreshed tokens for stale ones before returning.
pub trait OfflineStore: Send + Sync {
    /// Upsert a media item and its slot in the task's collection.
    ///
    /// Returns the references the write superseded; the caller deletes those
    /// files once this returns.
    fn store_media_item(&self, task: &StoreItemTask, refs: StoredRefs) -> Result<Vec<FileRef>>;

    /// Upsert a collection's own row. Returns the superseded artwork, if any.
    fn store_collection(
        &self,
        task: &StoreCollectionTask,
        artwork_ref: Option<FileRef>,
    ) -> Result<Vec<FileRef>>;

    /// Delete an item and every relationship it takes part in. `id` is the
    /// row key from [`offline_item_id`]. Returns the references the row held,
    /// empty when there was no such item.
    fn delete_item(&self, id: &str) -> Result<Vec<FileRef>>;

    /// Look up a raw row by natural key.
    fn find_item(&self, resource_type: ResourceType, resource_id: &str)
        -> Result<Option<OfflineItem>>;

    fn get_media_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineMediaItem>>;

    fn get_media_items(&self, resource_type: ResourceType) -> Result<Vec<OfflineMediaItem>>;

    fn get_collection(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineCollection>>;

    fn get_collections(&self, resource_type: ResourceType) -> Result<Vec<OfflineCollection>>;

    /// Members of a collection ordered by `(volume, position)`.
    fn get_collection_items(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Vec<OfflineCollectionItem>>;

    /// Relationship rows where `item_id` is either endpoint.
    fn get_relationships(&self, item_id: &str) -> Result<Vec<OfflineRelationship>>;
}

pub struct SqliteOfflineStore {
    conn: Arc<Mutex<Connection>>,
    files: FileReferenceStore,
}

impl SqliteOfflineStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P, files: FileReferenceStore) -> Result<Self> {
        let conn = open_database(db_path, OFFLINE_VERSIONED_SCHEMAS, "offline")?;
        Ok(SqliteOfflineStore {
            conn: Arc::new(Mutex::new(conn)),
            files,
        })
    }

    /// In-memory store, for tests and throwaway sessions.
    pub fn in_memory(files: FileReferenceStore) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        prepare_database(&mut conn, OFFLINE_VERSIONED_SCHEMAS, "offline")?;
        Ok(SqliteOfflineStore {
            conn: Arc::new(Mutex::new(conn)),
            files,
        })
    }

    pub fn files(&self) -> &FileReferenceStore {
        &self.files
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<OfflineItem> {
        let resource_type: String = row.get("resource_type")?;
        let resource_type = ResourceType::from_str(&resource_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown resource type '{}'", resource_type).into(),
            )
        })?;
        Ok(OfflineItem {
            id: row.get("id")?,
            resource_type,
            resource_id: row.get("resource_id")?,
            metadata: row.get("metadata")?,
            media_ref: row
                .get::<_, Option<Vec<u8>>>("media_ref")?
                .map(FileRef::from_bytes),
            license_ref: row
                .get::<_, Option<Vec<u8>>>("license_ref")?
                .map(FileRef::from_bytes),
            artwork_ref: row
                .get::<_, Option<Vec<u8>>>("artwork_ref")?
                .map(FileRef::from_bytes),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn query_items(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<OfflineItem>> {
        let mut stmt = conn.prepare(sql)?;
        let items = stmt
            .query_map(params, Self::row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn query_item_by_key(
        conn: &Connection,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineItem>> {
        let item = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE resource_type = ?1 AND resource_id = ?2",
                    OFFLINE_ITEM_TABLE
                ),
                params![resource_type.as_str(), resource_id],
                Self::row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    /// Resolve one reference column of an item, writing back a refreshed
    /// token when the stored one went stale. A reference that cannot be
    /// resolved reads as absent.
    fn resolve_column(
        &self,
        conn: &Connection,
        item_id: &str,
        column: &'static str,
        file_ref: Option<&FileRef>,
    ) -> Result<Option<PathBuf>> {
        let Some(file_ref) = file_ref else {
            return Ok(None);
        };
        match self.files.resolve(file_ref) {
            Ok(resolved) => {
                if let Some(refreshed) = resolved.refreshed {
                    conn.execute(
                        &format!(
                            "UPDATE {} SET {} = ?1 WHERE id = ?2",
                            OFFLINE_ITEM_TABLE, column
                        ),
                        params![refreshed.as_bytes(), item_id],
                    )
                    .with_context(|| format!("Failed to refresh {} of {}", column, item_id))?;
                    debug!("Refreshed stale {} of item {}", column, item_id);
                }
                Ok(Some(resolved.path))
            }
            Err(e) => {
                warn!("Could not resolve {} of item {}: {}", column, item_id, e);
                Ok(None)
            }
        }
    }

    fn to_media_item(&self, conn: &Connection, item: OfflineItem) -> Result<OfflineMediaItem> {
        let metadata: MediaMetadata = serde_json::from_str(&item.metadata)
            .with_context(|| format!("Corrupt metadata for item {}", item.id))?;
        Ok(OfflineMediaItem {
            media_path: self.resolve_column(conn, &item.id, "media_ref", item.media_ref.as_ref())?,
            license_path: self.resolve_column(
                conn,
                &item.id,
                "license_ref",
                item.license_ref.as_ref(),
            )?,
            artwork_path: self.resolve_column(
                conn,
                &item.id,
                "artwork_ref",
                item.artwork_ref.as_ref(),
            )?,
            metadata,
            created_at: item.created_at,
            id: item.id,
        })
    }

    fn to_collection(&self, conn: &Connection, item: OfflineItem) -> Result<OfflineCollection> {
        let metadata: CollectionMetadata = serde_json::from_str(&item.metadata)
            .with_context(|| format!("Corrupt metadata for collection {}", item.id))?;
        Ok(OfflineCollection {
            artwork_path: self.resolve_column(
                conn,
                &item.id,
                "artwork_ref",
                item.artwork_ref.as_ref(),
            )?,
            metadata,
            created_at: item.created_at,
            id: item.id,
        })
    }
}

/// `old` is superseded when the slot now holds something else.
fn push_superseded(superseded: &mut Vec<FileRef>, old: Option<FileRef>, new: Option<&FileRef>) {
    if let Some(old) = old {
        if new != Some(&old) {
            superseded.push(old);
        }
    }
}

impl OfflineStore for SqliteOfflineStore {
    fn store_media_item(&self, task: &StoreItemTask, refs: StoredRefs) -> Result<Vec<FileRef>> {
        let media = &task.media;
        if !media.resource_type.is_media() {
            bail!(
                "Cannot store {} {} as a media item",
                media.resource_type,
                media.resource_id
            );
        }
        if task.collection_type.is_media() {
            bail!(
                "Cannot add {} {} to {} {}",
                media.resource_type,
                media.resource_id,
                task.collection_type,
                task.collection_id
            );
        }
        let id = offline_item_id(media.resource_type, &media.resource_id);
        let collection_id = offline_item_id(task.collection_type, &task.collection_id);
        let metadata = serde_json::to_string(media)?;
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let previous = Self::query_item_by_key(&tx, media.resource_type, &media.resource_id)?;

        tx.execute(
            &format!(
                r#"INSERT INTO {} (
                    id, resource_type, resource_id, metadata,
                    media_ref, license_ref, artwork_ref, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(resource_type, resource_id) DO UPDATE SET
                    metadata = excluded.metadata,
                    media_ref = excluded.media_ref,
                    license_ref = excluded.license_ref,
                    artwork_ref = COALESCE(excluded.artwork_ref, artwork_ref),
                    updated_at = ?8"#,
                OFFLINE_ITEM_TABLE
            ),
            params![
                id,
                media.resource_type.as_str(),
                media.resource_id,
                metadata,
                refs.media.as_ref().map(FileRef::as_bytes),
                refs.license.as_ref().map(FileRef::as_bytes),
                refs.artwork.as_ref().map(FileRef::as_bytes),
                now,
            ],
        )
        .with_context(|| format!("Failed to upsert item {}", id))?;

        // The row keeps its original id when the natural key already existed.
        let member_id = match &previous {
            Some(item) => item.id.clone(),
            None => id,
        };

        tx.execute(
            &format!(
                r#"INSERT INTO {} (collection_id, member_id, volume, position)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(collection_id, volume, position) DO UPDATE SET
                    member_id = excluded.member_id"#,
                OFFLINE_ITEM_RELATIONSHIP_TABLE
            ),
            params![collection_id, member_id, task.volume, task.position],
        )
        .with_context(|| {
            format!(
                "Failed to upsert slot {}/{} of collection {}",
                task.volume, task.position, collection_id
            )
        })?;

        tx.commit()?;

        let mut superseded = Vec::new();
        if let Some(previous) = previous {
            push_superseded(&mut superseded, previous.media_ref, refs.media.as_ref());
            push_superseded(&mut superseded, previous.license_ref, refs.license.as_ref());
            if refs.artwork.is_some() {
                push_superseded(&mut superseded, previous.artwork_ref, refs.artwork.as_ref());
            }
        }
        debug!(
            "Stored {} {} at {}/{} of {} ({} superseded files)",
            media.resource_type,
            media.resource_id,
            task.volume,
            task.position,
            collection_id,
            superseded.len()
        );
        Ok(superseded)
    }

    fn store_collection(
        &self,
        task: &StoreCollectionTask,
        artwork_ref: Option<FileRef>,
    ) -> Result<Vec<FileRef>> {
        let collection = &task.collection;
        if collection.resource_type.is_media() {
            bail!(
                "Cannot store {} {} as a collection",
                collection.resource_type,
                collection.resource_id
            );
        }
        let id = offline_item_id(collection.resource_type, &collection.resource_id);
        let metadata = serde_json::to_string(collection)?;
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let previous =
            Self::query_item_by_key(&tx, collection.resource_type, &collection.resource_id)?;

        tx.execute(
            &format!(
                r#"INSERT INTO {} (id, resource_type, resource_id, metadata, artwork_ref, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(resource_type, resource_id) DO UPDATE SET
                    metadata = excluded.metadata,
                    artwork_ref = COALESCE(excluded.artwork_ref, artwork_ref),
                    updated_at = ?6"#,
                OFFLINE_ITEM_TABLE
            ),
            params![
                id,
                collection.resource_type.as_str(),
                collection.resource_id,
                metadata,
                artwork_ref.as_ref().map(FileRef::as_bytes),
                now,
            ],
        )
        .with_context(|| format!("Failed to upsert collection {}", id))?;

        tx.commit()?;

        let mut superseded = Vec::new();
        if let (Some(previous), Some(_)) = (previous, artwork_ref.as_ref()) {
            push_superseded(&mut superseded, previous.artwork_ref, artwork_ref.as_ref());
        }
        debug!(
            "Stored {} {} ({} superseded files)",
            collection.resource_type,
            collection.resource_id,
            superseded.len()
        );
        Ok(superseded)
    }

    fn delete_item(&self, id: &str) -> Result<Vec<FileRef>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let item = tx
            .query_row(
                &format!("SELECT * FROM {} WHERE id = ?1", OFFLINE_ITEM_TABLE),
                params![id],
                Self::row_to_item,
            )
            .optional()?;

        let relationships = tx.execute(
            &format!(
                "DELETE FROM {} WHERE collection_id = ?1 OR member_id = ?1",
                OFFLINE_ITEM_RELATIONSHIP_TABLE
            ),
            params![id],
        )?;
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", OFFLINE_ITEM_TABLE),
            params![id],
        )?;
        tx.commit()?;

        let Some(item) = item else {
            debug!("Deleted missing item {} ({} relationships)", id, relationships);
            return Ok(Vec::new());
        };
        debug!(
            "Deleted {} {} and {} relationships",
            item.resource_type, id, relationships
        );
        Ok([item.media_ref, item.license_ref, item.artwork_ref]
            .into_iter()
            .flatten()
            .collect())
    }

    fn find_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineItem>> {
        let conn = self.conn.lock().unwrap();
        Self::query_item_by_key(&conn, resource_type, resource_id)
    }

    fn get_media_item(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineMediaItem>> {
        if !resource_type.is_media() {
            bail!("{} is not a media type", resource_type);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let item = match Self::query_item_by_key(&tx, resource_type, resource_id)? {
            Some(item) => Some(self.to_media_item(&tx, item)?),
            None => None,
        };
        tx.commit()?;
        Ok(item)
    }

    fn get_media_items(&self, resource_type: ResourceType) -> Result<Vec<OfflineMediaItem>> {
        if !resource_type.is_media() {
            bail!("{} is not a media type", resource_type);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let rows = Self::query_items(
            &tx,
            &format!(
                "SELECT * FROM {} WHERE resource_type = ?1 ORDER BY created_at, id",
                OFFLINE_ITEM_TABLE
            ),
            &[&resource_type.as_str()],
        )?;
        let items = rows
            .into_iter()
            .map(|row| self.to_media_item(&tx, row))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(items)
    }

    fn get_collection(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<OfflineCollection>> {
        if resource_type.is_media() {
            bail!("{} is not a collection type", resource_type);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let collection = match Self::query_item_by_key(&tx, resource_type, resource_id)? {
            Some(item) => Some(self.to_collection(&tx, item)?),
            None => None,
        };
        tx.commit()?;
        Ok(collection)
    }

    fn get_collections(&self, resource_type: ResourceType) -> Result<Vec<OfflineCollection>> {
        if resource_type.is_media() {
            bail!("{} is not a collection type", resource_type);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let rows = Self::query_items(
            &tx,
            &format!(
                "SELECT * FROM {} WHERE resource_type = ?1 ORDER BY created_at, id",
                OFFLINE_ITEM_TABLE
            ),
            &[&resource_type.as_str()],
        )?;
        let collections = rows
            .into_iter()
            .map(|row| self.to_collection(&tx, row))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(collections)
    }

    fn get_collection_items(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Vec<OfflineCollectionItem>> {
        if resource_type.is_media() {
            bail!("{} is not a collection type", resource_type);
        }
        let collection_id = offline_item_id(resource_type, resource_id);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let slots: Vec<(OfflineItem, i32, i32)> = {
            let mut stmt = tx.prepare(&format!(
                r#"SELECT i.*, r.volume AS slot_volume, r.position AS slot_position
                FROM {} r
                JOIN {} i ON i.id = r.member_id
                WHERE r.collection_id = ?1
                ORDER BY r.volume, r.position"#,
                OFFLINE_ITEM_RELATIONSHIP_TABLE, OFFLINE_ITEM_TABLE
            ))?;
            let rows = stmt
                .query_map(params![collection_id], |row| {
                    Ok((
                        Self::row_to_item(row)?,
                        row.get("slot_volume")?,
                        row.get("slot_position")?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let items = slots
            .into_iter()
            .map(|(row, volume, position)| {
                Ok(OfflineCollectionItem {
                    volume,
                    position,
                    item: self.to_media_item(&tx, row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(items)
    }

    fn get_relationships(&self, item_id: &str) -> Result<Vec<OfflineRelationship>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            r#"SELECT collection_id, member_id, volume, position FROM {}
            WHERE collection_id = ?1 OR member_id = ?1
            ORDER BY collection_id, volume, position"#,
            OFFLINE_ITEM_RELATIONSHIP_TABLE
        ))?;
        let relationships = stmt
            .query_map(params![item_id], |row| {
                Ok(OfflineRelationship {
                    collection_id: row.get(0)?,
                    member_id: row.get(1)?,
                    volume: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_ref::FileKind;
    use tempfile::TempDir;

    fn track(id: &str, title: &str) -> MediaMetadata {
        MediaMetadata {
            resource_type: ResourceType::Tracks,
            resource_id: id.to_string(),
            title: title.to_string(),
            artists: vec!["Artist".to_string()],
            album_title: Some("Album".to_string()),
            duration_secs: Some(180),
            artwork_url: None,
        }
    }

    fn store_task(member: &str, collection: &str, volume: i32, position: i32) -> StoreItemTask {
        StoreItemTask {
            id: format!("task-{}-{}", member, position),
            media: track(member, &format!("Track {}", member)),
            collection_type: ResourceType::Albums,
            collection_id: collection.to_string(),
            volume,
            position,
        }
    }

    fn album_task(id: &str) -> StoreCollectionTask {
        StoreCollectionTask {
            id: format!("task-{}", id),
            collection: CollectionMetadata {
                resource_type: ResourceType::Albums,
                resource_id: id.to_string(),
                title: "Album".to_string(),
                artists: vec![],
                number_of_items: Some(10),
                artwork_url: None,
            },
        }
    }

    fn write_ref(files: &FileReferenceStore, kind: FileKind, key: &str) -> FileRef {
        let path = files.allocate(kind, key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, key.as_bytes()).unwrap();
        files.create_ref(&path).unwrap()
    }

    fn setup() -> (TempDir, SqliteOfflineStore) {
        let dir = TempDir::new().unwrap();
        let files = FileReferenceStore::new(dir.path().join("offline"));
        let store = SqliteOfflineStore::in_memory(files).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_and_get_media_item() {
        let (_dir, store) = setup();
        let media = write_ref(store.files(), FileKind::Media, "tracks:t1");
        let license = write_ref(store.files(), FileKind::License, "tracks:t1");

        let superseded = store
            .store_media_item(
                &store_task("t1", "a1", 1, 1),
                StoredRefs {
                    media: Some(media),
                    license: Some(license),
                    artwork: None,
                },
            )
            .unwrap();
        assert!(superseded.is_empty());

        let item = store
            .get_media_item(ResourceType::Tracks, "t1")
            .unwrap()
            .unwrap();
        assert_eq!(item.id, "tracks:t1");
        assert_eq!(item.metadata.title, "Track t1");
        assert!(item.media_path.unwrap().is_file());
        assert!(item.license_path.unwrap().is_file());
        assert!(item.artwork_path.is_none());

        assert!(store
            .get_media_item(ResourceType::Videos, "t1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_upsert_replaces_refs_and_reports_superseded() {
        let (_dir, store) = setup();
        let first = write_ref(store.files(), FileKind::Media, "tracks:t1");
        let second = write_ref(store.files(), FileKind::Media, "tracks:t1");
        let license = write_ref(store.files(), FileKind::License, "tracks:t1");

        store
            .store_media_item(
                &store_task("t1", "a1", 1, 1),
                StoredRefs {
                    media: Some(first.clone()),
                    license: Some(license.clone()),
                    artwork: None,
                },
            )
            .unwrap();
        let superseded = store
            .store_media_item(
                &store_task("t1", "a1", 1, 1),
                StoredRefs {
                    media: Some(second.clone()),
                    license: None,
                    artwork: None,
                },
            )
            .unwrap();

        assert_eq!(superseded, vec![first, license]);
        let row = store.find_item(ResourceType::Tracks, "t1").unwrap().unwrap();
        assert_eq!(row.media_ref, Some(second));
        assert!(row.license_ref.is_none());
        assert!(row.updated_at.is_some());
        assert_eq!(store.get_media_items(ResourceType::Tracks).unwrap().len(), 1);
        assert_eq!(store.get_relationships("tracks:t1").unwrap().len(), 1);
    }

    #[test]
    fn test_unchanged_refs_are_not_superseded() {
        let (_dir, store) = setup();
        let media = write_ref(store.files(), FileKind::Media, "tracks:t1");
        let refs = StoredRefs {
            media: Some(media),
            license: None,
            artwork: None,
        };

        store
            .store_media_item(&store_task("t1", "a1", 1, 1), refs.clone())
            .unwrap();
        let superseded = store
            .store_media_item(&store_task("t1", "a1", 1, 1), refs)
            .unwrap();
        assert!(superseded.is_empty());
    }

    #[test]
    fn test_missing_artwork_keeps_previous_artwork() {
        let (_dir, store) = setup();
        let artwork = write_ref(store.files(), FileKind::Artwork, "tracks:t1");
        store
            .store_media_item(
                &store_task("t1", "a1", 1, 1),
                StoredRefs {
                    artwork: Some(artwork.clone()),
                    ..Default::default()
                },
            )
            .unwrap();

        let superseded = store
            .store_media_item(&store_task("t1", "a1", 1, 1), StoredRefs::default())
            .unwrap();

        assert!(superseded.is_empty());
        let row = store.find_item(ResourceType::Tracks, "t1").unwrap().unwrap();
        assert_eq!(row.artwork_ref, Some(artwork));
    }

    #[test]
    fn test_slot_holds_last_written_member() {
        let (_dir, store) = setup();
        store
            .store_media_item(&store_task("t1", "C1", 1, 3), StoredRefs::default())
            .unwrap();
        store
            .store_media_item(&store_task("t2", "C1", 1, 3), StoredRefs::default())
            .unwrap();

        let items = store.get_collection_items(ResourceType::Albums, "C1").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item.id, "tracks:t2");
        assert_eq!((items[0].volume, items[0].position), (1, 3));
        assert!(store.get_relationships("tracks:t1").unwrap().is_empty());
    }

    #[test]
    fn test_collection_items_ordered_by_volume_and_position() {
        let (_dir, store) = setup();
        for (member, volume, position) in [("t4", 2, 1), ("t2", 1, 2), ("t3", 1, 10), ("t1", 1, 1)]
        {
            store
                .store_media_item(
                    &store_task(member, "a1", volume, position),
                    StoredRefs::default(),
                )
                .unwrap();
        }
        store
            .store_media_item(&store_task("t9", "other", 1, 1), StoredRefs::default())
            .unwrap();

        let ids: Vec<String> = store
            .get_collection_items(ResourceType::Albums, "a1")
            .unwrap()
            .into_iter()
            .map(|slot| slot.item.metadata.resource_id)
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4"]);
    }

    #[test]
    fn test_store_collection_and_supersede_artwork() {
        let (_dir, store) = setup();
        let old = write_ref(store.files(), FileKind::Artwork, "albums:a1");
        let new = write_ref(store.files(), FileKind::Artwork, "albums:a1");

        assert!(store
            .store_collection(&album_task("a1"), Some(old.clone()))
            .unwrap()
            .is_empty());
        assert!(store
            .store_collection(&album_task("a1"), None)
            .unwrap()
            .is_empty());
        let superseded = store
            .store_collection(&album_task("a1"), Some(new))
            .unwrap();
        assert_eq!(superseded, vec![old]);

        let collection = store
            .get_collection(ResourceType::Albums, "a1")
            .unwrap()
            .unwrap();
        assert_eq!(collection.metadata.number_of_items, Some(10));
        assert!(collection.artwork_path.unwrap().is_file());
        assert_eq!(store.get_collections(ResourceType::Albums).unwrap().len(), 1);
        assert!(store
            .get_collections(ResourceType::Playlists)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_item_removes_relationships_on_both_ends() {
        let (_dir, store) = setup();
        let media = write_ref(store.files(), FileKind::Media, "tracks:t1");
        store.store_collection(&album_task("a1"), None).unwrap();
        store
            .store_media_item(
                &store_task("t1", "a1", 1, 1),
                StoredRefs {
                    media: Some(media.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .store_media_item(&store_task("t1", "p1", 1, 5), StoredRefs::default())
            .unwrap();
        store
            .store_media_item(&store_task("t2", "a1", 1, 2), StoredRefs::default())
            .unwrap();

        // Removing the collection drops its slots but keeps the members.
        assert!(store.delete_item("albums:a1").unwrap().is_empty());
        assert!(store
            .get_collection_items(ResourceType::Albums, "a1")
            .unwrap()
            .is_empty());
        assert!(store.find_item(ResourceType::Tracks, "t2").unwrap().is_some());

        let removed = store.delete_item("tracks:t1").unwrap();
        assert_eq!(removed, vec![media]);
        assert!(store.get_relationships("tracks:t1").unwrap().is_empty());
        assert!(store
            .get_collection_items(ResourceType::Albums, "p1")
            .unwrap()
            .is_empty());
        assert!(store.find_item(ResourceType::Tracks, "t1").unwrap().is_none());

        assert!(store.delete_item("tracks:t1").unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_reads_as_absent() {
        let (_dir, store) = setup();
        let media = write_ref(store.files(), FileKind::Media, "tracks:t1");
        let path = store.files().resolve(&media).unwrap().path;
        store
            .store_media_item(
                &store_task("t1", "a1", 1, 1),
                StoredRefs {
                    media: Some(media),
                    ..Default::default()
                },
            )
            .unwrap();
        std::fs::remove_file(path).unwrap();

        let item = store
            .get_media_item(ResourceType::Tracks, "t1")
            .unwrap()
            .unwrap();
        assert!(item.media_path.is_none());
    }

    #[test]
    fn test_stale_reference_is_refreshed_on_read() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("offline.db");
        let old_root = dir.path().join("container-a");
        let new_root = dir.path().join("container-b");

        {
            let files = FileReferenceStore::new(&old_root);
            let media = write_ref(&files, FileKind::Media, "tracks:t1");
            let store = SqliteOfflineStore::new(&db_path, files).unwrap();
            store
                .store_media_item(
                    &store_task("t1", "a1", 1, 1),
                    StoredRefs {
                        media: Some(media),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        std::fs::rename(&old_root, &new_root).unwrap();

        let store = SqliteOfflineStore::new(&db_path, FileReferenceStore::new(&new_root)).unwrap();
        let item = store
            .get_collection_items(ResourceType::Albums, "a1")
            .unwrap()
            .pop()
            .unwrap()
            .item;
        assert!(item.media_path.unwrap().starts_with(&new_root));

        // The persisted token now resolves without going through the stale path.
        let row = store.find_item(ResourceType::Tracks, "t1").unwrap().unwrap();
        let resolved = store.files().resolve(&row.media_ref.unwrap()).unwrap();
        assert!(resolved.refreshed.is_none());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let (_dir, store) = setup();
        assert!(store.get_media_items(ResourceType::Albums).is_err());
        assert!(store.get_collections(ResourceType::Tracks).is_err());

        assert!(store.get_collection_items(ResourceType::Tracks, "t1").is_err());

        let mut task = store_task("a1", "p1", 1, 1);
        task.media.resource_type = ResourceType::Albums;
        assert!(store.store_media_item(&task, StoredRefs::default()).is_err());

        let mut task = store_task("t1", "v1", 1, 1);
        task.collection_type = ResourceType::Videos;
        assert!(store.store_media_item(&task, StoredRefs::default()).is_err());
        assert!(store.find_item(ResourceType::Tracks, "t1").unwrap().is_none());
    }

    #[test]
    fn test_same_resource_id_across_types() {
        let (_dir, store) = setup();
        let mut video = store_task("42", "42", 1, 2);
        video.media.resource_type = ResourceType::Videos;
        let mut in_playlist = store_task("42", "42", 1, 1);
        in_playlist.collection_type = ResourceType::Playlists;
        let mut playlist = album_task("42");
        playlist.collection.resource_type = ResourceType::Playlists;

        store
            .store_media_item(&store_task("42", "42", 1, 1), StoredRefs::default())
            .unwrap();
        store.store_media_item(&video, StoredRefs::default()).unwrap();
        store.store_collection(&album_task("42"), None).unwrap();
        store.store_collection(&playlist, None).unwrap();
        store
            .store_media_item(&in_playlist, StoredRefs::default())
            .unwrap();

        assert!(store.find_item(ResourceType::Tracks, "42").unwrap().is_some());
        assert!(store.find_item(ResourceType::Videos, "42").unwrap().is_some());
        assert!(store.get_collection(ResourceType::Albums, "42").unwrap().is_some());
        assert!(store
            .get_collection(ResourceType::Playlists, "42")
            .unwrap()
            .is_some());

        // Same slot number in an album and a playlist sharing an id.
        let album = store.get_collection_items(ResourceType::Albums, "42").unwrap();
        let playlist = store
            .get_collection_items(ResourceType::Playlists, "42")
            .unwrap();
        assert_eq!(album.len(), 2);
        assert_eq!(playlist.len(), 1);
        assert_eq!(playlist[0].item.id, "tracks:42");

        // Removing the album leaves the playlist and every member in place.
        store.delete_item("albums:42").unwrap();
        assert!(store
            .get_collection_items(ResourceType::Albums, "42")
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .get_collection_items(ResourceType::Playlists, "42")
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.get_media_items(ResourceType::Tracks).unwrap().len(), 1);
        assert_eq!(store.get_media_items(ResourceType::Videos).unwrap().len(), 1);
    }
}
