//! Database schema for offline.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};
use anyhow::Result;
use rusqlite::Connection;

pub const OFFLINE_ITEM_TABLE: &str = "offline_item";
pub const OFFLINE_ITEM_RELATIONSHIP_TABLE: &str = "offline_item_relationship";

const MEMBER_FK: ForeignKey = ForeignKey {
    foreign_table: OFFLINE_ITEM_TABLE,
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

// =============================================================================
// Version 1
// =============================================================================

const OFFLINE_ITEM_TABLE_V1: Table = Table {
    name: OFFLINE_ITEM_TABLE,
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("resource_type", &SqlType::Text, non_null = true),
        sqlite_column!("resource_id", &SqlType::Text, non_null = true),
        sqlite_column!("metadata", &SqlType::Text, non_null = true),
        sqlite_column!("media_ref", &SqlType::Blob),
        sqlite_column!("license_ref", &SqlType::Blob),
        sqlite_column!("artwork_ref", &SqlType::Blob),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_offline_item_type", "resource_type")],
    unique_constraints: &[&["resource_type", "resource_id"]],
};

// collection_id carries no foreign key: a member can be stored before the
// StoreCollection task for its collection has run.
const OFFLINE_ITEM_RELATIONSHIP_TABLE_V1: Table = Table {
    name: OFFLINE_ITEM_RELATIONSHIP_TABLE,
    columns: &[
        sqlite_column!("collection_id", &SqlType::Text, non_null = true),
        sqlite_column!(
            "member_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&MEMBER_FK)
        ),
        sqlite_column!("volume", &SqlType::Integer, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_relationship_collection", "collection_id")],
    unique_constraints: &[&["collection_id", "volume", "position"]],
};

// =============================================================================
// Version 2 - track item updates, index relationship members
// =============================================================================

const OFFLINE_ITEM_TABLE_V2: Table = Table {
    name: OFFLINE_ITEM_TABLE,
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("resource_type", &SqlType::Text, non_null = true),
        sqlite_column!("resource_id", &SqlType::Text, non_null = true),
        sqlite_column!("metadata", &SqlType::Text, non_null = true),
        sqlite_column!("media_ref", &SqlType::Blob),
        sqlite_column!("license_ref", &SqlType::Blob),
        sqlite_column!("artwork_ref", &SqlType::Blob),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("updated_at", &SqlType::Integer),
    ],
    indices: &[("idx_offline_item_type", "resource_type")],
    unique_constraints: &[&["resource_type", "resource_id"]],
};

const OFFLINE_ITEM_RELATIONSHIP_TABLE_V2: Table = Table {
    name: OFFLINE_ITEM_RELATIONSHIP_TABLE,
    columns: &[
        sqlite_column!("collection_id", &SqlType::Text, non_null = true),
        sqlite_column!(
            "member_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&MEMBER_FK)
        ),
        sqlite_column!("volume", &SqlType::Integer, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_relationship_collection", "collection_id"),
        ("idx_relationship_member", "member_id"),
    ],
    unique_constraints: &[&["collection_id", "volume", "position"]],
};

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN updated_at INTEGER", OFFLINE_ITEM_TABLE),
        [],
    )?;
    conn.execute(
        &format!(
            "CREATE INDEX idx_relationship_member ON {}(member_id)",
            OFFLINE_ITEM_RELATIONSHIP_TABLE
        ),
        [],
    )?;
    Ok(())
}

// =============================================================================
// Version 3 - ids qualified by resource type
// =============================================================================

// Layout is unchanged; ids move from `<resource_id>` to `<type>:<resource_id>`.
// Slots of collections that were never stored fall back to albums.
fn migrate_v2_to_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        r#"PRAGMA defer_foreign_keys = ON;
        UPDATE {rel} SET collection_id = COALESCE(
            (SELECT i.resource_type FROM {item} i
             WHERE i.id = {rel}.collection_id AND i.resource_type IN ('albums', 'playlists')),
            'albums'
        ) || ':' || collection_id;
        UPDATE {rel} SET member_id = (
            SELECT i.resource_type || ':' || i.id FROM {item} i WHERE i.id = {rel}.member_id
        );
        UPDATE {item} SET id = resource_type || ':' || resource_id;"#,
        rel = OFFLINE_ITEM_RELATIONSHIP_TABLE,
        item = OFFLINE_ITEM_TABLE
    ))?;
    Ok(())
}

pub const OFFLINE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[OFFLINE_ITEM_TABLE_V1, OFFLINE_ITEM_RELATIONSHIP_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[OFFLINE_ITEM_TABLE_V2, OFFLINE_ITEM_RELATIONSHIP_TABLE_V2],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[OFFLINE_ITEM_TABLE_V2, OFFLINE_ITEM_RELATIONSHIP_TABLE_V2],
        migration: Some(migrate_v2_to_v3),
    },
];
