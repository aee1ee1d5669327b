//! # Agent Entry
//!
//! The data-model row this whole daemon exists to manage: one enrolled agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque agent identifier. Numeric in practice (`"001"`, `"042"`, ...) but
/// treated as an opaque string everywhere outside allocation, matching the
/// wire protocol's textual `<id>` field.
pub type AgentId = String;

/// Per-agent mutable flags. `revoked` entries are logically dead but remain
/// in the keystore until the Writer observes their remove-journal entry and
/// the on-disk file is rewritten without them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentFlags {
    /// The entry has been superseded (force-replace) or administratively
    /// removed; excluded from uniqueness checks and from the next flush.
    pub revoked: bool,
    /// Excluded from ordinary listings; still a live, keyed entry.
    pub hidden: bool,
}

/// A single enrolled agent.
///
/// Invariant (enforced by [`super::keystore::Keystore`], not by this type):
/// `id` and `name` are each unique across all non-revoked entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: AgentId,
    pub name: String,
    /// Dotted-quad / literal IPv6 / `"any"` wildcard.
    pub ip: String,
    /// Raw shared secret, opaque bytes represented as a hex string on the wire
    /// and on disk.
    pub raw_key: String,
    pub group: Option<String>,
    pub created_at: DateTime<Utc>,
    pub flags: AgentFlags,
}

impl AgentEntry {
    /// The four fields the key file and the journal need; used both for the
    /// on-disk line format and for journal records so neither has to borrow
    /// from the live keystore entry.
    pub fn to_record(&self) -> AgentRecord {
        AgentRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            ip: self.ip.clone(),
            raw_key: self.raw_key.clone(),
            group: self.group.clone(),
        }
    }
}

/// A standalone copy of the fields the Writer needs, independent of the live
/// keystore entry's lifetime. This is what the insert-journal actually
/// carries (§3 "Pending-change journal": "Each node carries a full copy of
/// the agent fields needed by the Writer").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: String,
    pub ip: String,
    pub raw_key: String,
    pub group: Option<String>,
}
