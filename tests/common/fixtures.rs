//! Engine wiring for end-to-end tests.

use super::fakes::{FakeContent, FakeRemote};
use pezzottify_offliner::config::OfflinerSettings;
use pezzottify_offliner::file_ref::FileReferenceStore;
use pezzottify_offliner::offline_store::SqliteOfflineStore;
use pezzottify_offliner::remote::ContentFetchers;
use pezzottify_offliner::{NetworkCost, Offliner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestEngine {
    pub dir: TempDir,
    pub remote: Arc<FakeRemote>,
    pub content: Arc<FakeContent>,
    pub offliner: Offliner,
}

impl TestEngine {
    pub fn start(remote: FakeRemote, content: FakeContent, cost: NetworkCost) -> Self {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(remote);
        let content = Arc::new(content);
        let offliner = Self::open(dir.path(), &dir.path().join("offline"), &remote, &content, cost);
        Self {
            dir,
            remote,
            content,
            offliner,
        }
    }

    /// Open an engine over the database in `db_dir`, with files under
    /// `offline_dir`.
    pub fn open(
        db_dir: &Path,
        offline_dir: &Path,
        remote: &Arc<FakeRemote>,
        content: &Arc<FakeContent>,
        cost: NetworkCost,
    ) -> Offliner {
        let files = FileReferenceStore::new(offline_dir);
        let store =
            Arc::new(SqliteOfflineStore::new(db_dir.join("offline.db"), files.clone()).unwrap());
        Offliner::new(
            &OfflinerSettings::default(),
            store,
            files,
            ContentFetchers {
                media: content.clone(),
                artwork: content.clone(),
                license: Some(content.clone()),
            },
            remote.clone(),
            cost,
        )
    }

    pub fn offline_dir(&self) -> PathBuf {
        self.dir.path().join("offline")
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.offliner.wait_idle())
            .await
            .expect("engine did not settle");
    }

    pub fn files_on_disk(&self) -> usize {
        count_files(&self.offline_dir())
    }
}

fn count_files(path: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
