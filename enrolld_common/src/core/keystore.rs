//! # Keystore + two-phase staged insert
//!
//! The in-memory mirror of the on-disk key file, keyed by agent id with a
//! secondary name index for the uniqueness check in §4.4. Mutation goes
//! through a stage/commit/rollback handle so the dispatch stage can validate
//! a candidate entry, decide whether to accept it, and only then make it
//! visible to concurrent lookups and the journal in one atomic step.

use std::collections::HashMap;

use super::agent::{AgentEntry, AgentFlags, AgentId};

/// Why a staged insert was rejected during validation, before it ever became
/// visible in the keystore.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeystoreError {
    #[error("name {0:?} already enrolled with a different key")]
    NameCollision(String),
    #[error("agent id {0:?} already present")]
    IdCollision(AgentId),
}

/// In-memory mirror of the canonical key file.
#[derive(Debug, Default)]
pub struct Keystore {
    by_id: HashMap<AgentId, AgentEntry>,
    name_index: HashMap<String, AgentId>,
    next_id: u32,
}

impl Keystore {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            name_index: HashMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild from entries read off disk at startup, preserving ids so the
    /// next freshly-allocated id never collides with one already on disk.
    pub fn load(entries: Vec<AgentEntry>) -> Self {
        let mut ks = Self::new();
        for entry in entries {
            if let Ok(n) = entry.id.parse::<u32>() {
                ks.next_id = ks.next_id.max(n + 1);
            }
            ks.name_index.insert(entry.name.clone(), entry.id.clone());
            ks.by_id.insert(entry.id.clone(), entry);
        }
        ks
    }

    pub fn get(&self, id: &str) -> Option<&AgentEntry> {
        self.by_id.get(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&AgentEntry> {
        self.name_index.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentEntry> {
        self.by_id.values()
    }

    /// Allocate the next free numeric id, formatted to match the three-digit
    /// style used throughout the wire protocol and the key file.
    pub fn allocate_id(&mut self) -> AgentId {
        let id = format!("{:03}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Begin a two-phase insert of `candidate`. Returns an error without
    /// mutating the keystore if `candidate`'s name collides with a live,
    /// non-revoked entry under a different key (§4.4 uniqueness invariant).
    /// A matching id is permitted here — that's the idempotent-replace case
    /// the dispatch stage resolves by key-hash before ever staging.
    pub fn stage_insert(&mut self, candidate: AgentEntry) -> Result<StagedInsert<'_>, KeystoreError> {
        if let Some(existing_id) = self.name_index.get(&candidate.name) {
            if existing_id != &candidate.id {
                if let Some(existing) = self.by_id.get(existing_id) {
                    if !existing.flags.revoked {
                        return Err(KeystoreError::NameCollision(candidate.name.clone()));
                    }
                }
            }
        }
        Ok(StagedInsert {
            keystore: self,
            candidate: Some(candidate),
        })
    }

    /// Fully remove a staged-but-never-journaled entry, undoing a
    /// `stage_insert` + commit whose subsequent step (the TLS response
    /// write) failed. Unlike `revoke`, this leaves no trace in the map —
    /// the entry was never journaled or flushed, so there is nothing for
    /// the writer to reconcile.
    pub fn remove_uncommitted(&mut self, id: &str) -> bool {
        if let Some(entry) = self.by_id.remove(id) {
            self.name_index.remove(&entry.name);
            true
        } else {
            false
        }
    }

    /// Mark an entry revoked in place (§4.6 remove), leaving it in the map
    /// until the writer's next flush physically drops it from the file.
    pub fn revoke(&mut self, id: &str) -> bool {
        if let Some(entry) = self.by_id.get_mut(id) {
            entry.flags.revoked = true;
            self.name_index.remove(&entry.name);
            true
        } else {
            false
        }
    }

    fn commit(&mut self, candidate: AgentEntry) {
        self.name_index.insert(candidate.name.clone(), candidate.id.clone());
        self.by_id.insert(candidate.id.clone(), candidate);
    }
}

/// A staged-but-not-yet-visible insert. Call [`StagedInsert::commit`] to make
/// it visible, or simply drop the handle to discard it — either way the
/// keystore is left in a consistent state, which is the two-phase
/// stage/commit/rollback pattern the original design's last-slot
/// back-reference rollback existed to express.
pub struct StagedInsert<'k> {
    keystore: &'k mut Keystore,
    candidate: Option<AgentEntry>,
}

impl<'k> StagedInsert<'k> {
    pub fn candidate(&self) -> &AgentEntry {
        self.candidate.as_ref().expect("candidate taken before commit/drop")
    }

    pub fn candidate_mut(&mut self) -> &mut AgentEntry {
        self.candidate.as_mut().expect("candidate taken before commit/drop")
    }

    /// Make the staged entry visible and set its flags to non-revoked,
    /// non-hidden defaults unless already overridden by the caller.
    pub fn commit(mut self) -> AgentEntry {
        let candidate = self.candidate.take().expect("commit called twice");
        self.keystore.commit(candidate.clone());
        candidate
    }

    /// Explicit no-op rollback; dropping the handle has the same effect, this
    /// just makes intent visible at call sites that branch on validation.
    pub fn rollback(mut self) {
        self.candidate = None;
    }
}
