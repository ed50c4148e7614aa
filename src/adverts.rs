//! Piece advertisement queue
//!
//! Every completed piece is queued as a "have" event for gossip to connected
//! peers. New entries go to the front, so a reader walking from the front can
//! stop at the first entry older than its last check; no per-peer cursor
//! state is needed. Stale entries are truncated from the back in one sweep.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::clock::SharedClock;

/// One locally observed "piece completed" event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaveEntry {
    /// Connection that completed the piece
    pub owner: u64,
    /// The completed piece
    pub index: usize,
    /// When the completion was recorded
    pub registered: Instant,
}

/// Time-ordered log of piece completions, newest first
pub struct AdvertQueue {
    entries: VecDeque<HaveEntry>,
    clock: SharedClock,
}

impl AdvertQueue {
    /// Create an empty queue reading time from `clock`
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: VecDeque::new(),
            clock,
        }
    }

    /// Record that `owner` completed `index`, stamped with the current instant
    pub fn push(&mut self, owner: u64, index: usize) {
        let entry = HaveEntry {
            owner,
            index,
            registered: self.clock.now(),
        };
        self.entries.push_front(entry);
    }

    /// Indices advertised after `since` by connections other than `my_owner`
    ///
    /// Walks newest-to-oldest and stops at the first entry at or before
    /// `since`; push-front keeps the log time-monotonic from the front, so
    /// everything behind that entry is older still.
    pub fn collect_since(&self, my_owner: u64, since: Instant) -> Vec<usize> {
        let mut indexes = Vec::new();
        for entry in &self.entries {
            if entry.registered <= since {
                break;
            }
            if entry.owner == my_owner {
                continue;
            }
            indexes.push(entry.index);
        }
        indexes
    }

    /// Drop every entry older than `max_age`
    pub fn expire(&mut self, max_age: Duration) {
        let now = self.clock.now();
        let first_stale = self
            .entries
            .iter()
            .position(|entry| now.duration_since(entry.registered) >= max_age);
        if let Some(at) = first_stale {
            let removed = self.entries.len() - at;
            self.entries.truncate(at);
            tracing::debug!("expired {} stale piece advertisements", removed);
        }
    }

    /// Number of queued advertisements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
