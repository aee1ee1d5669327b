//! # Cluster mode
//!
//! An enrollment daemon runs either as the cluster's sole authority over the
//! keystore (`Master`) or as a thin front door that forwards every request
//! to the master over the cluster RPC channel (`Worker`), per §7 "Clustered
//! enrollment". The mode is a small `Copy` enum driving branch behavior in
//! the dispatch stage, the same shape as the teacher's operation-mode enum.

use async_trait::async_trait;
use thiserror::Error;

use super::agent::AgentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    Master,
    Worker,
}

#[derive(Debug, Error)]
pub enum ClusterRpcError {
    #[error("cluster peer unreachable: {0}")]
    Unreachable(String),
    #[error("cluster peer rejected request: {0}")]
    Rejected(String),
    #[error("malformed cluster RPC response: {0}")]
    Malformed(String),
}

/// A granted enrollment as relayed back from the master to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterGrant {
    pub id: String,
    pub key: String,
}

/// What a worker needs from the master to forward an enrollment request
/// without holding its own keystore lock (§7 "workers hold no keystore of
/// their own; every enrollment is proxied").
#[async_trait]
pub trait ClusterRpc: Send + Sync {
    async fn forward_enroll(&self, record: &AgentRecord, force: bool) -> Result<ClusterGrant, ClusterRpcError>;

    /// Ask the master to undo a previously granted enrollment (§4.3 step 7):
    /// a worker calls this when its own TLS write back to the client fails
    /// after the master already committed the grant.
    async fn remove(&self, id: &str) -> Result<(), ClusterRpcError>;
}

/// A no-op implementation for master-mode services, which never forward
/// anything, and for tests that don't exercise the cluster path.
pub struct NullClusterRpc;

#[async_trait]
impl ClusterRpc for NullClusterRpc {
    async fn forward_enroll(&self, _record: &AgentRecord, _force: bool) -> Result<ClusterGrant, ClusterRpcError> {
        Err(ClusterRpcError::Rejected("cluster RPC not configured in master mode".into()))
    }

    async fn remove(&self, _id: &str) -> Result<(), ClusterRpcError> {
        Ok(())
    }
}
