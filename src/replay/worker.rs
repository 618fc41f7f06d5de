//! Background replay worker.
//!
//! The worker owns a [`ReplayCoordinator`] on its own thread. Targets are
//! posted to a single-slot mailbox: a request that has not been picked up
//! yet is replaced by the next one, so a consumer scrubbing through the log
//! only pays for the replay it ends up looking at. Results and progress come
//! back over a channel. A replay that has started always runs to completion.

use super::coordinator::{ReplayCoordinator, UpdateStatus};
use crate::cache::SnapshotCache;
use crate::error::Result;
use crate::state::StateTree;
use crate::types::LogIndex;
use crossbeam_channel::{unbounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a finished request.
#[derive(Clone, Debug)]
pub struct Materialized {
    pub status: UpdateStatus,
    /// Index of the state the worker now serves.
    pub index: Option<LogIndex>,
    /// The served state, when the request produced or kept one.
    pub tree: Option<StateTree>,
}

/// Events sent from the worker to its consumer.
#[derive(Debug)]
pub enum WorkerEvent {
    Progress {
        target: LogIndex,
        fraction: f64,
        phase: String,
    },
    Finished {
        target: LogIndex,
        result: Result<Materialized>,
    },
}

#[derive(Debug, Default)]
struct Mailbox {
    pending: Option<LogIndex>,
    shutdown: bool,
}

impl Mailbox {
    /// Store a request, returning the one it superseded.
    fn post(&mut self, target: LogIndex) -> Option<LogIndex> {
        self.pending.replace(target)
    }
}

#[derive(Default)]
struct Shared {
    mailbox: Mutex<Mailbox>,
    wakeup: Condvar,
}

/// Handle to a replay thread.
pub struct ReplayWorker {
    shared: Arc<Shared>,
    events: Receiver<WorkerEvent>,
    cache: Arc<SnapshotCache>,
    handle: Option<JoinHandle<()>>,
}

impl ReplayWorker {
    /// Move `coordinator` onto a new thread.
    pub fn spawn(coordinator: ReplayCoordinator) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let cache = Arc::clone(coordinator.cache());
        let (sender, events) = unbounded();

        let handle = thread::Builder::new()
            .name("agency-replay".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(coordinator, &shared, &sender)
            })?;
        info!("replay worker started");

        Ok(Self {
            shared,
            events,
            cache,
            handle: Some(handle),
        })
    }

    /// Ask for the state at `target`, replacing any request not yet started.
    pub fn request(&self, target: LogIndex) {
        let mut mailbox = self.shared.mailbox.lock();
        if let Some(previous) = mailbox.post(target) {
            debug!(%previous, next = %target, "request superseded");
        }
        self.shared.wakeup.notify_one();
    }

    /// The checkpoint cache the worker writes into. Safe to read while a
    /// replay runs.
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// The raw event receiver, for use with `crossbeam_channel::select!`.
    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<WorkerEvent, RecvError> {
        self.events.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<WorkerEvent, TryRecvError> {
        self.events.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<WorkerEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Stop the worker, waiting for an in-flight replay to finish. Requests
    /// that have not started are dropped.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.mailbox.lock().shutdown = true;
        self.shared.wakeup.notify_one();
        if handle.join().is_err() {
            warn!("replay worker panicked");
        }
    }
}

impl Drop for ReplayWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for the next request, or `None` on shutdown.
fn next_request(shared: &Shared) -> Option<LogIndex> {
    let mut mailbox = shared.mailbox.lock();
    loop {
        if mailbox.shutdown {
            return None;
        }
        if let Some(target) = mailbox.pending.take() {
            return Some(target);
        }
        shared.wakeup.wait(&mut mailbox);
    }
}

fn run(mut coordinator: ReplayCoordinator, shared: &Shared, sender: &Sender<WorkerEvent>) {
    while let Some(target) = next_request(shared) {
        debug!(index = %target, "replay request");

        let mut progress = |fraction: f64, phase: &str| {
            // A consumer that went away is noticed at shutdown.
            let _ = sender.send(WorkerEvent::Progress {
                target,
                fraction,
                phase: phase.to_string(),
            });
        };
        let result = coordinator
            .update_index_with_progress(target, &mut progress)
            .map(|status| {
                let served = matches!(status, UpdateStatus::Updated | UpdateStatus::Unchanged);
                Materialized {
                    status,
                    index: coordinator.current_index(),
                    tree: coordinator.current().filter(|_| served).cloned(),
                }
            });

        let _ = sender.send(WorkerEvent::Finished { target, result });
    }
    info!("replay worker stopped");
}
