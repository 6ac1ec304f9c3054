//! The scheduler that moves offline tasks from the remote source through
//! the handlers.
//!
//! All scheduler state lives behind one mutex that is never held across an
//! await. A scheduling pass refills the backlog from the remote source and
//! dispatches up to `max_concurrent_tasks`. `run()` calls made while a pass
//! is active fold into a single follow-up pass.

use super::network::AdmissionGate;
use crate::config::OfflinerSettings;
use crate::downloads::Downloads;
use crate::error::OfflinerError;
use crate::handlers::{InternalTask, TaskHandlers, TaskOutcome};
use crate::remote::OfflineTaskSource;
use crate::tasks::OfflineTask;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct RunnerState {
    running: bool,
    needs_run: bool,
    pending: VecDeque<InternalTask>,
    in_progress: HashMap<String, InProgress>,
    /// Ids of every pending or in-progress task.
    known: HashSet<String>,
}

struct InProgress {
    cancel: CancellationToken,
    download_id: Option<String>,
}

pub struct TaskRunner {
    state: Mutex<RunnerState>,
    source: Arc<dyn OfflineTaskSource>,
    handlers: Arc<TaskHandlers>,
    gate: Arc<AdmissionGate>,
    downloads: Downloads,
    max_concurrent_tasks: usize,
    max_queue_size: usize,
    idle: Notify,
}

impl TaskRunner {
    pub fn new(
        settings: &OfflinerSettings,
        source: Arc<dyn OfflineTaskSource>,
        handlers: Arc<TaskHandlers>,
        gate: Arc<AdmissionGate>,
        downloads: Downloads,
    ) -> Self {
        Self {
            state: Mutex::new(RunnerState::default()),
            source,
            handlers,
            gate,
            downloads,
            max_concurrent_tasks: settings.max_concurrent_tasks,
            max_queue_size: settings.max_queue_size,
            idle: Notify::new(),
        }
    }

    /// Run scheduling passes until no more are requested.
    ///
    /// Returns immediately when a pass is already active; that pass runs once
    /// more before stopping. A failed refresh is returned to the caller after
    /// the tasks already queued have been dispatched; a run requested while
    /// that pass was active still gets a pass of its own.
    pub async fn run(self: &Arc<Self>) -> Result<(), OfflinerError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                state.needs_run = true;
                debug!("Scheduling pass already active, coalescing");
                return Ok(());
            }
            state.running = true;
        }

        loop {
            let should_refresh = {
                let mut state = self.state.lock().unwrap();
                state.needs_run = false;
                state.pending.len() < self.max_queue_size
            };

            let refreshed = if should_refresh {
                self.refresh().await
            } else {
                debug!("Backlog full, skipping refresh");
                Ok(0)
            };
            self.dispatch_ready();

            let mut state = self.state.lock().unwrap();
            match refreshed {
                Err(e) => {
                    let requested = state.needs_run;
                    state.running = false;
                    state.needs_run = false;
                    drop(state);
                    self.idle.notify_waiters();
                    warn!("Failed to refresh offline tasks: {}", e);
                    if requested {
                        debug!("Run requested during the failed pass, starting another");
                        self.trigger();
                    }
                    return Err(e);
                }
                Ok(_) if state.needs_run => continue,
                Ok(_) => {
                    state.running = false;
                    drop(state);
                    self.idle.notify_waiters();
                    return Ok(());
                }
            }
        }
    }

    /// Run a pass in the background.
    pub fn trigger(self: &Arc<Self>) {
        let runner = self.clone();
        tokio::spawn(async move {
            // Failures are already logged by run().
            let _ = runner.run().await;
        });
    }

    /// Pull new tasks from the remote source into the backlog.
    ///
    /// Pages are read from the start until the backlog is full or the source
    /// runs out. Tasks whose id is already pending or in progress are skipped.
    /// Nothing is queued unless every page was read successfully.
    pub async fn refresh(&self) -> Result<usize, OfflinerError> {
        let room = {
            let state = self.state.lock().unwrap();
            self.max_queue_size.saturating_sub(state.pending.len())
        };
        if room == 0 {
            return Ok(0);
        }

        let mut fresh: Vec<OfflineTask> = Vec::new();
        let mut fresh_ids: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.source.get_tasks(cursor.as_deref()).await?;
            {
                let state = self.state.lock().unwrap();
                for task in page.tasks {
                    if fresh.len() >= room {
                        break;
                    }
                    if state.known.contains(task.id()) || fresh_ids.contains(task.id()) {
                        continue;
                    }
                    fresh_ids.insert(task.id().to_string());
                    fresh.push(task);
                }
            }
            if fresh.len() >= room {
                break;
            }
            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        let mut state = self.state.lock().unwrap();
        let mut added = 0;
        for task in fresh {
            if state.known.insert(task.id().to_string()) {
                state.pending.push_back(self.handlers.handle(task));
                added += 1;
            }
        }
        if added > 0 {
            info!(
                "Queued {} offline tasks ({} pending, {} in progress)",
                added,
                state.pending.len(),
                state.in_progress.len()
            );
        }
        Ok(added)
    }

    /// Move tasks from the head of the backlog into flight.
    fn dispatch_ready(self: &Arc<Self>) {
        let mut ready = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            while state.in_progress.len() < self.max_concurrent_tasks {
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                let cancel = CancellationToken::new();
                state.in_progress.insert(
                    task.id().to_string(),
                    InProgress {
                        cancel: cancel.clone(),
                        download_id: task.download_id.clone(),
                    },
                );
                ready.push((task, cancel));
            }
        }
        for (task, cancel) in ready {
            debug!("Dispatching {} task {}", task.task.kind(), task.id());
            self.spawn_task(task, cancel);
        }
    }

    fn spawn_task(self: &Arc<Self>, task: InternalTask, cancel: CancellationToken) {
        let runner = self.clone();
        tokio::spawn(async move {
            let outcome = if runner.gate.admits() {
                Some(runner.handlers.run(&task, &cancel).await)
            } else {
                info!(
                    "Network is expensive, releasing task {} until the next pass",
                    task.id()
                );
                None
            };
            runner.release(task.id());

            // Rejected and cancelled tasks are still pending remotely, so a
            // refresh right away would fetch them straight back.
            match outcome {
                Some(TaskOutcome::Completed | TaskOutcome::Failed) => runner.trigger(),
                Some(TaskOutcome::Cancelled) => runner.dispatch_ready(),
                None => {}
            }
        });
    }

    /// Forget a task that left flight.
    fn release(&self, task_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(in_progress) = state.in_progress.remove(task_id) {
            if let Some(download_id) = in_progress.download_id {
                self.downloads.remove(&download_id);
            }
        }
        state.known.remove(task_id);
        drop(state);
        self.idle.notify_waiters();
    }

    /// Cancel one task. An in-progress task stops cooperatively; a pending one
    /// is dropped from the backlog. Returns false for an unknown id.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(in_progress) = state.in_progress.get(task_id) {
            info!("Cancelling in-progress task {}", task_id);
            in_progress.cancel.cancel();
            return true;
        }
        let Some(index) = state.pending.iter().position(|t| t.id() == task_id) else {
            return false;
        };
        if let Some(task) = state.pending.remove(index) {
            info!("Dropping pending task {}", task_id);
            state.known.remove(task_id);
            if let Some(download_id) = task.download_id {
                self.downloads.remove(&download_id);
            }
        }
        true
    }

    /// Cancel every in-progress task and drop the backlog. Returns how many
    /// tasks were cancelled or dropped.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        for in_progress in state.in_progress.values() {
            in_progress.cancel.cancel();
        }
        let dropped: Vec<InternalTask> = state.pending.drain(..).collect();
        for task in &dropped {
            state.known.remove(task.id());
            if let Some(download_id) = &task.download_id {
                self.downloads.remove(download_id);
            }
        }
        if !state.in_progress.is_empty() || !dropped.is_empty() {
            info!(
                "Cancelling {} in-progress tasks, dropping {} pending",
                state.in_progress.len(),
                dropped.len()
            );
        }
        state.in_progress.len() + dropped.len()
    }

    /// Allow or forbid running tasks on expensive networks. Allowing them
    /// starts a pass right away.
    pub fn set_allow_downloads_on_expensive_networks(self: &Arc<Self>, allow: bool) {
        if self.gate.set_allow_expensive(allow) {
            info!("Downloads on expensive networks allowed");
            self.trigger();
        }
    }

    /// Wait until no pass is running, nothing is in flight and the backlog is
    /// either empty or blocked by the admission gate.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock().unwrap();
                if !state.running
                    && state.in_progress.is_empty()
                    && (state.pending.is_empty() || !self.gate.admits())
                {
                    return;
                }
            }
            notified.await;
        }
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.pending.iter().map(|t| t.id().to_string()).collect()
    }

    pub fn in_progress_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.in_progress.keys().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn in_progress_count(&self) -> usize {
        self.state.lock().unwrap().in_progress.len()
    }
}
