//! # Pending-change journal
//!
//! A single tagged list replaces the original design's two intrusive linked
//! lists (one for inserts, one for removals) threaded through the same
//! nodes via back-pointers. The Writer drains the whole journal in one
//! `take()` per wake, so ordering between inserts and removals only matters
//! relative to each other, never within a single variant — a plain `Vec` is
//! sufficient and avoids the back-reference rollback dance entirely.

use super::agent::{AgentId, AgentRecord};

/// One pending change, queued by the dispatch stage and drained by the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Insert(AgentRecord),
    Remove(AgentId),
}

/// The pending-change journal itself.
///
/// Guarded by the same mutex as the keystore it describes (see
/// [`super::keystore::Keystore`]); appends happen from the dispatch stage
/// under that lock, and `take` happens from the writer stage also under that
/// lock, so there is no separate synchronization story to get wrong.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drain every pending entry for the writer to flush, in the order they
    /// were appended.
    pub fn take(&mut self) -> Vec<JournalEntry> {
        std::mem::take(&mut self.entries)
    }
}
