//! Session-scoped transcript feed.

use std::collections::VecDeque;
use voxdash_types::TranscriptEntry;

/// Append-only, ordered transcript of one call session.
///
/// The feed only accepts text while open. Closing it discards every entry;
/// reopening starts a fresh sequence at 1. When `capacity` entries are
/// held, appending evicts the oldest one.
#[derive(Debug, Clone)]
pub struct TranscriptFeed {
    entries: VecDeque<TranscriptEntry>,
    last_sequence: u64,
    capacity: usize,
    open: bool,
}

impl TranscriptFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            last_sequence: 0,
            capacity: capacity.max(1),
            open: false,
        }
    }

    /// Starts accepting text with an empty sequence.
    pub fn open(&mut self) {
        self.entries.clear();
        self.last_sequence = 0;
        self.open = true;
    }

    /// Stops accepting text and discards every entry.
    pub fn close(&mut self) {
        self.entries.clear();
        self.last_sequence = 0;
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Appends `text`. Returns `false` when the feed is closed.
    pub fn append(&mut self, text: impl Into<String>) -> bool {
        if !self.open {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.last_sequence += 1;
        self.entries.push_back(TranscriptEntry {
            sequence: self.last_sequence,
            text: text.into(),
        });
        true
    }

    /// Entries in arrival order.
    pub fn current(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
