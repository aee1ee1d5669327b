//! # Cluster enrollment RPC client
//!
//! A worker-mode daemon forwards every enrollment request to the cluster's
//! master over a local Unix socket (§7), speaking the same line-oriented
//! ASCII style as [`crate::connections::agents_db`]:
//!
//! ```text
//! >> ENROLL name=web01 ip=any group=webservers key=deadbeef force=0
//! << GRANT id=001 key=deadbeef
//! ```
//! or
//! ```text
//! << DENY name-collision
//! ```
//!
//! and a rollback RPC for undoing a grant the worker couldn't deliver:
//!
//! ```text
//! >> REMOVE id=001
//! << OK
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::core::agent::AgentRecord;
use crate::core::cluster::{ClusterGrant, ClusterRpc, ClusterRpcError};

pub struct UnixSocketClusterRpc {
    socket_path: PathBuf,
}

impl UnixSocketClusterRpc {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }
}

#[async_trait]
impl ClusterRpc for UnixSocketClusterRpc {
    async fn forward_enroll(&self, record: &AgentRecord, force: bool) -> Result<ClusterGrant, ClusterRpcError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;
        let (read_half, mut write_half) = stream.into_split();

        let group = record.group.as_deref().unwrap_or("");
        let request = format!(
            "ENROLL name={} ip={} group={} key={} force={}\n",
            record.name,
            record.ip,
            group,
            record.raw_key,
            if force { 1 } else { 0 },
        );
        write_half
            .write_all(request.as_bytes())
            .await
            .map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;
        write_half.flush().await.map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix("GRANT ") {
            parse_grant(rest)
        } else if let Some(reason) = line.strip_prefix("DENY ") {
            Err(ClusterRpcError::Rejected(reason.to_string()))
        } else {
            Err(ClusterRpcError::Malformed(line.to_string()))
        }
    }

    async fn remove(&self, id: &str) -> Result<(), ClusterRpcError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;
        let (read_half, mut write_half) = stream.into_split();

        let request = format!("REMOVE id={id}\n");
        write_half
            .write_all(request.as_bytes())
            .await
            .map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;
        write_half.flush().await.map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| ClusterRpcError::Unreachable(e.to_string()))?;
        let line = line.trim_end();

        if line == "OK" {
            Ok(())
        } else if let Some(reason) = line.strip_prefix("DENY ") {
            Err(ClusterRpcError::Rejected(reason.to_string()))
        } else {
            Err(ClusterRpcError::Malformed(line.to_string()))
        }
    }
}

fn parse_grant(rest: &str) -> Result<ClusterGrant, ClusterRpcError> {
    let mut id = None;
    let mut key = None;
    for field in rest.split_whitespace() {
        if let Some(v) = field.strip_prefix("id=") {
            id = Some(v.to_string());
        } else if let Some(v) = field.strip_prefix("key=") {
            key = Some(v.to_string());
        }
    }
    match (id, key) {
        (Some(id), Some(key)) => Ok(ClusterGrant { id, key }),
        _ => Err(ClusterRpcError::Malformed(rest.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grant_line() {
        let grant = parse_grant("id=001 key=deadbeef").unwrap();
        assert_eq!(grant.id, "001");
        assert_eq!(grant.key, "deadbeef");
    }

    #[test]
    fn rejects_malformed_grant() {
        assert!(parse_grant("id=001").is_err());
    }
}
