//! # Shared state
//!
//! The keystore and its pending-change journal share a single lock: every
//! mutation that becomes visible in the keystore must also be recorded in
//! the journal in the same critical section, or a concurrent writer flush
//! could observe one without the other. Grounded in
//! `lib_common/src/core/registry.rs`'s `Arc<Mutex<HashMap<...>>>` plus
//! `tokio::sync::Notify` as the async equivalent of the condition variable
//! the writer waits on.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use super::agent::{AgentEntry, AgentFlags, AgentId, AgentRecord};
use super::journal::{Journal, JournalEntry};
use super::keystore::{Keystore, KeystoreError};

struct Inner {
    keystore: Keystore,
    journal: Journal,
}

/// Shared handle to the keystore + journal pair, cloned into every stage
/// that needs it.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<Inner>>,
    /// Signalled every time the journal gains an entry; the writer stage
    /// waits on this instead of polling.
    pub journal_ready: Arc<Notify>,
}

impl SharedState {
    pub fn new(keystore: Keystore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { keystore, journal: Journal::new() })),
            journal_ready: Arc::new(Notify::new()),
        }
    }

    pub async fn lookup_by_name(&self, name: &str) -> Option<AgentEntry> {
        self.inner.lock().await.keystore.get_by_name(name).cloned()
    }

    pub async fn lookup_by_id(&self, id: &str) -> Option<AgentEntry> {
        self.inner.lock().await.keystore.get(id).cloned()
    }

    pub async fn allocate_id(&self) -> AgentId {
        self.inner.lock().await.keystore.allocate_id()
    }

    /// Stage and validate a fresh enrollment, making it visible to
    /// concurrent lookups (so a racing request sees the name as taken)
    /// without yet journaling it. The caller must follow up with either
    /// [`Self::commit_enroll`] or [`Self::rollback_enroll`] depending on
    /// whether the TLS response describing this grant was actually
    /// delivered — §5's ordering guarantee requires the journal append (and
    /// the writer wake-up) to happen only after that write succeeds.
    pub async fn stage_enroll(
        &self,
        id: AgentId,
        name: String,
        ip: String,
        raw_key: String,
        group: Option<String>,
    ) -> Result<AgentEntry, KeystoreError> {
        let mut guard = self.inner.lock().await;
        let candidate = AgentEntry {
            id,
            name,
            ip,
            raw_key,
            group,
            created_at: Utc::now(),
            flags: AgentFlags::default(),
        };
        let staged = guard.keystore.stage_insert(candidate)?;
        Ok(staged.commit())
    }

    /// Journal a previously staged entry and wake the writer. Call only
    /// after the TLS response granting it has been written successfully.
    pub async fn commit_enroll(&self, id: &str) {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.keystore.get(id).cloned() {
            guard.journal.push(JournalEntry::Insert(entry.to_record()));
        }
        drop(guard);
        self.journal_ready.notify_one();
    }

    /// Undo a staged entry that was never journaled because the TLS
    /// response describing it failed to write. The entry never reached a
    /// flush, so it is removed outright rather than soft-revoked.
    pub async fn rollback_enroll(&self, id: &str) {
        let mut guard = self.inner.lock().await;
        guard.keystore.remove_uncommitted(id);
    }

    /// Revoke an existing entry and journal its removal.
    pub async fn revoke(&self, id: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let revoked = guard.keystore.revoke(id);
        if revoked {
            guard.journal.push(JournalEntry::Remove(id.to_string()));
        }
        drop(guard);
        if revoked {
            self.journal_ready.notify_one();
        }
        revoked
    }

    /// Drain every pending journal entry for the writer to flush. The
    /// snapshot of live, non-revoked entries is taken in the same critical
    /// section so the flushed file and the drained journal always describe
    /// the same keystore generation.
    pub async fn drain_for_flush(&self) -> (Vec<JournalEntry>, Vec<AgentEntry>) {
        let mut guard = self.inner.lock().await;
        let entries = guard.journal.take();
        let snapshot: Vec<AgentEntry> = guard.keystore.iter().cloned().collect();
        (entries, snapshot)
    }

    pub async fn has_pending(&self) -> bool {
        !self.inner.lock().await.journal.is_empty()
    }
}
