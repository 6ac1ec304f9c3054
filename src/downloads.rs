//! Live view of the StoreItem tasks that are pending or in progress.

use crate::tasks::{ResourceType, StoreItemTask};
use std::sync::Arc;
use tokio::sync::watch;

/// Progress below this step is not broadcast.
const PROGRESS_STEP: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    /// Id of the StoreItem task.
    pub id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub title: String,
    /// In `[0, 1]`.
    pub fraction_complete: f64,
}

impl Download {
    pub fn for_task(task: &StoreItemTask) -> Self {
        Self {
            id: task.id.clone(),
            resource_type: task.media.resource_type,
            resource_id: task.media.resource_id.clone(),
            title: task.media.title.clone(),
            fraction_complete: 0.0,
        }
    }
}

/// Publishes the current list of downloads over a watch channel, so a new
/// subscriber immediately sees the latest list.
#[derive(Clone)]
pub struct Downloads {
    sender: Arc<watch::Sender<Vec<Download>>>,
}

impl Default for Downloads {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloads {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Vec::new());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Download>> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Download> {
        self.sender.borrow().clone()
    }

    /// Add a record, replacing one with the same id.
    pub fn add(&self, download: Download) {
        self.sender.send_modify(|downloads| {
            downloads.retain(|d| d.id != download.id);
            downloads.push(download);
        });
    }

    pub fn update_progress(&self, id: &str, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.sender.send_if_modified(|downloads| {
            match downloads.iter_mut().find(|d| d.id == id) {
                Some(download)
                    if (fraction - download.fraction_complete).abs() >= PROGRESS_STEP
                        || (fraction >= 1.0 && download.fraction_complete < 1.0) =>
                {
                    download.fraction_complete = fraction;
                    true
                }
                _ => false,
            }
        });
    }

    pub fn remove(&self, id: &str) {
        self.sender.send_if_modified(|downloads| {
            let before = downloads.len();
            downloads.retain(|d| d.id != id);
            downloads.len() != before
        });
    }
}
