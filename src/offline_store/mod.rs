//! Local persistence of offline content.
//!
//! Items (tracks, videos, albums, playlists) live in `offline_item`, ordered
//! collection membership in `offline_item_relationship`. Files are never
//! stored as plain paths; see [`crate::file_ref`].

mod models;
mod schema;
mod store;

pub use models::*;
pub use schema::OFFLINE_VERSIONED_SCHEMAS;
pub use store::{OfflineStore, SqliteOfflineStore};
