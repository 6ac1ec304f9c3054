//! Durable references to files under the offline content directory.
//!
//! A [`FileRef`] is an opaque token, not a path. It records where the file
//! was when the reference was made and where it sits relative to the offline
//! root. If the root moves (the app container path changes between runs),
//! the recorded absolute path goes stale but the relative one still resolves;
//! resolution then hands back a refreshed token for the caller to persist.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const BOOKMARK_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum FileRefError {
    #[error("Invalid file reference: {0}")]
    Invalid(String),

    #[error("Referenced file is missing: {0:?}")]
    Missing(PathBuf),

    #[error("Path {0:?} is outside the offline directory")]
    OutsideRoot(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque, relocation-tolerant file reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef(Vec<u8>);

impl FileRef {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        FileRef(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Bookmark {
    v: u8,
    relative: String,
    absolute: PathBuf,
}

/// Result of resolving a [`FileRef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    /// Set when the reference was stale; the replacement token to persist.
    pub refreshed: Option<FileRef>,
}

/// Kind of offline asset, which decides the subdirectory it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Media,
    License,
    Artwork,
}

impl FileKind {
    fn dir_name(&self) -> &'static str {
        match self {
            FileKind::Media => "media",
            FileKind::License => "licenses",
            FileKind::Artwork => "artwork",
        }
    }
}

/// Creates and resolves [`FileRef`]s for files under one root directory.
#[derive(Debug, Clone)]
pub struct FileReferenceStore {
    root: PathBuf,
}

impl FileReferenceStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pick a fresh destination for an asset belonging to `key`.
    ///
    /// Files for the same key share a content-addressed directory; every call
    /// returns a new file name so a replacement never overwrites the copy it
    /// supersedes.
    pub fn allocate(&self, kind: FileKind, key: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
        self.root
            .join(kind.dir_name())
            .join(&digest[..2])
            .join(format!("{}-{}", &digest[..16], uuid::Uuid::new_v4()))
    }

    /// Make a reference to an existing file under the root.
    pub fn create_ref(&self, path: &Path) -> Result<FileRef, FileRefError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| FileRefError::OutsideRoot(path.to_path_buf()))?;
        if !path.is_file() {
            return Err(FileRefError::Missing(path.to_path_buf()));
        }
        let relative = relative
            .to_str()
            .ok_or_else(|| FileRefError::Invalid(format!("non UTF-8 path {:?}", path)))?;

        let bookmark = Bookmark {
            v: BOOKMARK_VERSION,
            relative: relative.to_string(),
            absolute: path.to_path_buf(),
        };
        serde_json::to_vec(&bookmark)
            .map(FileRef)
            .map_err(|e| FileRefError::Invalid(e.to_string()))
    }

    /// Resolve a reference to the file's current path.
    pub fn resolve(&self, file_ref: &FileRef) -> Result<Resolved, FileRefError> {
        let bookmark: Bookmark = serde_json::from_slice(file_ref.as_bytes())
            .map_err(|e| FileRefError::Invalid(e.to_string()))?;
        if bookmark.v != BOOKMARK_VERSION {
            return Err(FileRefError::Invalid(format!(
                "unsupported bookmark version {}",
                bookmark.v
            )));
        }
        let relative = Path::new(&bookmark.relative);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(FileRefError::Invalid(format!(
                "relative path {:?} escapes the root",
                relative
            )));
        }

        if bookmark.absolute.starts_with(&self.root) && bookmark.absolute.is_file() {
            return Ok(Resolved {
                path: bookmark.absolute,
                refreshed: None,
            });
        }

        let relocated = self.root.join(relative);
        if relocated.is_file() {
            debug!(
                "Stale file reference {:?}, now at {:?}",
                bookmark.absolute, relocated
            );
            let refreshed = self.create_ref(&relocated)?;
            return Ok(Resolved {
                path: relocated,
                refreshed: Some(refreshed),
            });
        }

        Err(FileRefError::Missing(relocated))
    }

    /// Delete the referenced file. A file that is already gone is not an error.
    pub async fn delete(&self, file_ref: &FileRef) -> Result<(), FileRefError> {
        match self.resolve(file_ref) {
            Ok(resolved) => match tokio::fs::remove_file(&resolved.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Err(FileRefError::Missing(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
