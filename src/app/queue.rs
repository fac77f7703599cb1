//! Shared work queue
//!
//! A FIFO of entries that workers pull from independently. Once shutdown is
//! requested the queue stops handing out work; entries still queued are
//! reported back as never started.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::app::coordinator::signals::ShutdownToken;
use crate::app::models::DependencyEntry;

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries ever added
    pub total: usize,
    /// Entries handed to a worker
    pub dispatched: usize,
    /// Entries still waiting
    pub pending: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<DependencyEntry>,
    total: usize,
    dispatched: usize,
}

/// Thread-safe FIFO of entries to process
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    shutdown: ShutdownToken,
}

impl WorkQueue {
    /// Create an empty queue that stops dispatching when `shutdown` fires
    pub fn new(shutdown: ShutdownToken) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            shutdown,
        }
    }

    /// Create a queue holding `entries` in order
    pub fn with_entries(entries: Vec<DependencyEntry>, shutdown: ShutdownToken) -> Self {
        let total = entries.len();
        Self {
            state: Mutex::new(QueueState {
                pending: entries.into(),
                total,
                dispatched: 0,
            }),
            shutdown,
        }
    }

    /// Append entries to the back of the queue
    pub async fn add_work_bulk(&self, entries: impl IntoIterator<Item = DependencyEntry>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.extend(entries);
        let added = state.pending.len() - before;
        state.total += added;
        debug!("Queued {} entries", added);
        added
    }

    /// Take the next entry, or `None` when the queue is empty or shut down
    pub async fn get_next_work(&self) -> Option<DependencyEntry> {
        if self.shutdown.is_cancelled() {
            return None;
        }

        let mut state = self.state.lock().await;
        let entry = state.pending.pop_front()?;
        state.dispatched += 1;
        Some(entry)
    }

    /// Remove and return every entry not yet dispatched
    pub async fn drain_pending(&self) -> Vec<DependencyEntry> {
        let mut state = self.state.lock().await;
        state.pending.drain(..).collect()
    }

    /// Current counters
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            total: state.total,
            dispatched: state.dispatched,
            pending: state.pending.len(),
        }
    }

    /// Whether nothing is left to dispatch
    pub async fn is_finished(&self) -> bool {
        self.shutdown.is_cancelled() || self.state.lock().await.pending.is_empty()
    }
}
