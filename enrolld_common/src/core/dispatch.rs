//! # Dispatch stage
//!
//! Pulls a pending connection off the client queue, completes the TLS
//! handshake, parses and validates the enrollment request, resolves it
//! either locally (master mode) or by forwarding to the cluster master
//! (worker mode), and writes back a granted key or an error line. Grounded
//! in `server_speak.rs::handle_client`'s per-connection async fn shape and
//! `server_dummy.rs`'s rustls handshake, generalized from HTTP/JSON to the
//! raw TLS/line protocol described in the wire format module.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::core::agent::{AgentId, AgentRecord};
use crate::core::client_queue::PendingConnection;
use crate::core::cluster::{ClusterMode, ClusterRpc};
use crate::core::state::SharedState;
use crate::protocol::{self, EnrollRequest, ProtocolError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),
    #[error("client did not send a request within the configured timeout")]
    Timeout,
    #[error("io error talking to client: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed request: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Enrollment-policy knobs the dispatch stage enforces (§4.3).
#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    /// When set, clients must present a request whose `P:` field hashes to
    /// this value (a shared enrollment password known in advance). Unrelated
    /// to `K:`, which is only ever compared for idempotent reenrollment.
    pub password_hash: Option<String>,
    /// How long dispatch waits for a client to send its request line after
    /// the TLS handshake completes.
    pub request_timeout: Duration,
    /// Length, in raw bytes, of freshly generated agent keys.
    pub key_len_bytes: usize,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            password_hash: None,
            request_timeout: Duration::from_secs(10),
            key_len_bytes: 32,
        }
    }
}

/// Handle one accepted connection end to end. Errors are logged and the
/// connection simply dropped — there is no retry at this layer, matching
/// the original design's "one request per connection, no pipelining".
pub async fn dispatch_connection(
    conn: PendingConnection,
    acceptor: TlsAcceptor,
    state: SharedState,
    mode: ClusterMode,
    cluster_rpc: Arc<dyn ClusterRpc>,
    settings: EnrollmentSettings,
) {
    let peer = conn.peer_addr;
    if let Err(e) = handle(conn, acceptor, state, mode, cluster_rpc, settings).await {
        warn!("dispatch failed for {peer}: {e}");
    }
}

async fn handle(
    conn: PendingConnection,
    acceptor: TlsAcceptor,
    state: SharedState,
    mode: ClusterMode,
    cluster_rpc: Arc<dyn ClusterRpc>,
    settings: EnrollmentSettings,
) -> Result<(), DispatchError> {
    let tls_stream = acceptor.accept(conn.stream).await.map_err(DispatchError::Handshake)?;
    let (read_half, mut write_half) = tokio::io::split(tls_stream);
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    timeout(settings.request_timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| DispatchError::Timeout)??;

    let request = protocol::parse_request(line.trim_end())?;

    let (response, action) = match resolve(&request, &state, mode, cluster_rpc.as_ref(), &settings).await {
        Ok((id, key, action)) => {
            info!("enrolled agent {id} ({})", request.name);
            (protocol::format_granted(&id, &request.name, &key), action)
        }
        Err(reason) => (protocol::format_error(&reason), CommitAction::None),
    };

    let write_result: Result<(), std::io::Error> = async {
        write_half.write_all(response.as_bytes()).await?;
        write_half.flush().await
    }
    .await;

    match (write_result, action) {
        (Ok(()), CommitAction::Local(id)) => {
            state.commit_enroll(&id).await;
            Ok(())
        }
        (Ok(()), CommitAction::Forwarded(_) | CommitAction::None) => Ok(()),
        (Err(e), CommitAction::Local(id)) => {
            // §8: the keystore must hold no entry attributable to a request
            // whose response was never delivered.
            state.rollback_enroll(&id).await;
            Err(e.into())
        }
        (Err(e), CommitAction::Forwarded(id)) => {
            if let Err(rpc_err) = cluster_rpc.remove(&id).await {
                warn!("failed to roll back clustered enrollment {id} after write failure: {rpc_err}");
            }
            Err(e.into())
        }
        (Err(e), CommitAction::None) => Err(e.into()),
    }
}

/// What `handle` must do to the keystore once it learns whether the TLS
/// response actually reached the client.
enum CommitAction {
    /// No keystore involvement either way (rejection, or an idempotent
    /// repeat that changed nothing).
    None,
    /// A fresh entry was staged locally under this id; commit it to the
    /// journal on write success, or remove it outright on write failure.
    Local(AgentId),
    /// The master already committed this id on our behalf; nothing to do
    /// on success, but a clustered removal is owed on write failure.
    Forwarded(AgentId),
}

/// Resolve a validated request to a granted `(id, key, action)` triple, or a
/// human-readable rejection reason. `action` tells the caller what to do to
/// the keystore once the TLS response's delivery outcome is known.
async fn resolve(
    request: &EnrollRequest,
    state: &SharedState,
    mode: ClusterMode,
    cluster_rpc: &dyn ClusterRpc,
    settings: &EnrollmentSettings,
) -> Result<(String, String, CommitAction), String> {
    if let Some(expected) = &settings.password_hash {
        match &request.password {
            Some(got) if &hash_hex(got) == expected => {}
            _ => return Err("invalid enrollment password".to_string()),
        }
    }

    if let Some(existing) = state.lookup_by_name(&request.name).await {
        let request_hash = hash_hex(request.key_hash.as_deref().unwrap_or(""));
        let existing_hash = hash_hex(&existing.raw_key);
        if request_hash == existing_hash {
            // Open Question decision: key-hash match wins over `force` —
            // an identical re-enrollment is always idempotent.
            return Ok((existing.id.clone(), existing.raw_key.clone(), CommitAction::None));
        }
        if !request.force {
            return Err(format!("name {:?} already enrolled", request.name));
        }
        state.revoke(&existing.id).await;
    }

    let raw_key = generate_key(settings.key_len_bytes);
    let ip = request.ip.clone().unwrap_or_else(|| "any".to_string());

    match mode {
        ClusterMode::Master => {
            let id = state.allocate_id().await;
            let entry = state
                .stage_enroll(id.clone(), request.name.clone(), ip, raw_key.clone(), request.group.clone())
                .await
                .map_err(|e| e.to_string())?;
            Ok((entry.id.clone(), entry.raw_key.clone(), CommitAction::Local(entry.id)))
        }
        ClusterMode::Worker => {
            let record = AgentRecord {
                id: String::new(),
                name: request.name.clone(),
                ip,
                raw_key,
                group: request.group.clone(),
            };
            let grant = cluster_rpc
                .forward_enroll(&record, request.force)
                .await
                .map_err(|e| e.to_string())?;
            let action = CommitAction::Forwarded(grant.id.clone());
            Ok((grant.id, grant.key, action))
        }
    }
}

pub(crate) fn hash_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_key(len_bytes: usize) -> String {
    let mut bytes = vec![0u8; len_bytes];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::NullClusterRpc;
    use crate::core::keystore::Keystore;

    fn settings() -> EnrollmentSettings {
        EnrollmentSettings::default()
    }

    fn base_request() -> EnrollRequest {
        EnrollRequest {
            name: "web01".into(),
            group: None,
            ip: Some("any".into()),
            key_hash: None,
            password: None,
            force: false,
        }
    }

    #[tokio::test]
    async fn fresh_enrollment_is_granted() {
        let state = SharedState::new(Keystore::new());
        let req = base_request();
        let rpc = NullClusterRpc;
        let (id, key, action) = resolve(&req, &state, ClusterMode::Master, &rpc, &settings()).await.unwrap();
        assert_eq!(id, "001");
        assert!(!key.is_empty());
        assert!(matches!(action, CommitAction::Local(_)));
    }

    #[tokio::test]
    async fn repeat_enrollment_with_same_key_is_idempotent() {
        let state = SharedState::new(Keystore::new());
        let rpc = NullClusterRpc;
        let req = base_request();
        let (id1, key1, _) = resolve(&req, &state, ClusterMode::Master, &rpc, &settings()).await.unwrap();

        let mut req2 = req.clone();
        req2.key_hash = Some(hash_hex(&key1));
        let (id2, key2, action2) = resolve(&req2, &state, ClusterMode::Master, &rpc, &settings()).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(key1, key2);
        assert!(matches!(action2, CommitAction::None));
    }

    #[tokio::test]
    async fn name_collision_without_force_is_rejected() {
        let state = SharedState::new(Keystore::new());
        let rpc = NullClusterRpc;
        let req = base_request();
        resolve(&req, &state, ClusterMode::Master, &rpc, &settings()).await.unwrap();

        let mut other = req.clone();
        other.key_hash = Some("not-the-real-hash".into());
        let err = resolve(&other, &state, ClusterMode::Master, &rpc, &settings()).await.unwrap_err();
        assert!(err.contains("already enrolled"));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let state = SharedState::new(Keystore::new());
        let rpc = NullClusterRpc;
        let mut settings = settings();
        settings.password_hash = Some(hash_hex("correct-horse"));
        let mut req = base_request();
        req.password = Some("wrong-password".into());
        let err = resolve(&req, &state, ClusterMode::Master, &rpc, &settings).await.unwrap_err();
        assert!(err.contains("invalid enrollment password"));
    }

    #[tokio::test]
    async fn correct_password_is_accepted_independent_of_key_hash() {
        let state = SharedState::new(Keystore::new());
        let rpc = NullClusterRpc;
        let mut settings = settings();
        settings.password_hash = Some(hash_hex("correct-horse"));
        let mut req = base_request();
        req.password = Some("correct-horse".into());
        let (_, _, action) = resolve(&req, &state, ClusterMode::Master, &rpc, &settings).await.unwrap();
        assert!(matches!(action, CommitAction::Local(_)));
    }
}
