//! # Writer stage
//!
//! Wakes whenever the journal gains an entry (or a periodic safety interval
//! elapses), flushes the full keystore snapshot to the canonical key file
//! and a companion per-agent timestamp file, then mirrors each drained
//! journal entry to the agents database. Grounded directly in §4.5; the
//! condition-wait loop is the async equivalent of the original design's
//! condition-variable wakeup, using `tokio::sync::Notify`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connections::agents_db::AgentsDb;
use crate::core::journal::JournalEntry;
use crate::core::state::SharedState;
use crate::keyfile;

/// Where the writer persists its two on-disk artifacts.
#[derive(Debug, Clone)]
pub struct WriterPaths {
    pub key_file: PathBuf,
    pub timestamp_dir: PathBuf,
}

/// How often the writer flushes even if no new journal entry arrived, as a
/// safety net against a missed notification.
const SAFETY_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Run the writer stage until `token` is cancelled. On cancellation, one
/// final flush is attempted so nothing enrolled right before shutdown is
/// lost (§4.7 "the writer performs a last flush before exiting").
pub async fn writer_loop(
    state: SharedState,
    agents_db: Arc<dyn AgentsDb>,
    paths: WriterPaths,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("writer stage shutting down, performing final flush");
                flush(&state, agents_db.as_ref(), &paths).await;
                return;
            }
            _ = state.journal_ready.notified() => {
                flush(&state, agents_db.as_ref(), &paths).await;
            }
            _ = tokio::time::sleep(SAFETY_FLUSH_INTERVAL) => {
                if state.has_pending().await {
                    flush(&state, agents_db.as_ref(), &paths).await;
                }
            }
        }
    }
}

async fn flush(state: &SharedState, agents_db: &dyn AgentsDb, paths: &WriterPaths) {
    let (entries, snapshot) = state.drain_for_flush().await;
    if entries.is_empty() {
        return;
    }

    let refs: Vec<&crate::core::agent::AgentEntry> = snapshot.iter().collect();
    let rendered = keyfile::render(&refs);
    if let Err(e) = keyfile::write_atomic(&paths.key_file, &rendered) {
        error!("failed to flush key file: {e}");
        // Open Question decision: the key file is authoritative. A failed
        // flush is logged and the drained journal entries are dropped
        // rather than requeued — retrying here would re-derive state that
        // didn't make it to disk anyway, and the next enrollment's flush
        // will include these entries again via the snapshot.
        return;
    }

    for entry in snapshot.iter().filter(|e| !e.flags.revoked) {
        if let Err(e) = write_timestamp_file(&paths.timestamp_dir, &entry.id) {
            warn!("failed to write timestamp file for agent {}: {e}", entry.id);
        }
    }

    for entry in &entries {
        let result = match entry {
            JournalEntry::Insert(record) => agents_db.upsert(record).await,
            JournalEntry::Remove(id) => agents_db.remove(id).await,
        };
        if let Err(e) = result {
            // Same drop-not-requeue decision: the keystore file already
            // reflects reality, the agents database is a best-effort mirror.
            warn!("agents database sync failed: {e}");
        }
    }
}

fn write_timestamp_file(dir: &std::path::Path, agent_id: &str) -> Result<(), keyfile::KeyFileError> {
    let path = dir.join(agent_id);
    let now = chrono::Utc::now().to_rfc3339();
    keyfile::write_atomic(&path, &now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::agents_db::NullAgentsDb;
    use crate::core::keystore::Keystore;

    #[tokio::test]
    async fn flush_writes_key_file_and_clears_journal() {
        let state = SharedState::new(Keystore::new());
        state
            .stage_enroll("001".into(), "web01".into(), "any".into(), "deadbeef".into(), None)
            .await
            .unwrap();
        state.commit_enroll("001").await;

        let dir = tempfile::tempdir().unwrap();
        let paths = WriterPaths {
            key_file: dir.path().join("client.keys"),
            timestamp_dir: dir.path().join("timestamps"),
        };
        std::fs::create_dir_all(&paths.timestamp_dir).unwrap();

        flush(&state, &NullAgentsDb, &paths).await;

        assert!(!state.has_pending().await);
        let contents = std::fs::read_to_string(&paths.key_file).unwrap();
        assert!(contents.contains("web01"));
        assert!(paths.timestamp_dir.join("001").exists());
    }

    #[tokio::test]
    async fn flush_is_a_no_op_when_journal_empty() {
        let state = SharedState::new(Keystore::new());
        let dir = tempfile::tempdir().unwrap();
        let paths = WriterPaths {
            key_file: dir.path().join("client.keys"),
            timestamp_dir: dir.path().join("timestamps"),
        };
        flush(&state, &NullAgentsDb, &paths).await;
        assert!(!paths.key_file.exists());
    }
}
