//! # Agents database client
//!
//! The writer stage pushes each flushed enrollment/removal to the
//! platform's agents database over a local Unix socket, using a small
//! newline-terminated ASCII RPC (§6 "Agents-database RPC"):
//!
//! ```text
//! >> INSERT id=001 name=web01 ip=any group=webservers
//! << OK
//! ```
//!
//! Grounded in the teacher's `Database` wrapper shape (typed struct wrapping
//! a connection, `thiserror` error enum, async methods returning
//! domain-specific results) from `lib_common/src/connections/db_postgres.rs`,
//! adapted from SQL over TCP to line-oriented ASCII over a Unix socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::core::agent::AgentRecord;

#[derive(Debug, Error)]
pub enum AgentsDbError {
    #[error("could not connect to agents database socket at {0}: {1}")]
    Connect(String, std::io::Error),
    #[error("io error talking to agents database: {0}")]
    Io(#[from] std::io::Error),
    #[error("agents database rejected request: {0}")]
    Rejected(String),
    #[error("malformed response from agents database: {0}")]
    Malformed(String),
}

/// What the writer stage needs from the agents database; an inserted or
/// revoked agent, applied after the keystore file itself has already been
/// flushed (§4.5: the file is authoritative, the database mirrors it).
#[async_trait]
pub trait AgentsDb: Send + Sync {
    async fn upsert(&self, record: &AgentRecord) -> Result<(), AgentsDbError>;
    async fn remove(&self, id: &str) -> Result<(), AgentsDbError>;
}

/// Connects fresh for every call — the daemon's enrollment rate is low
/// enough (interactive, human-triggered registrations) that a pooled,
/// persistent connection would be unwarranted complexity.
pub struct UnixSocketAgentsDb {
    socket_path: PathBuf,
}

impl UnixSocketAgentsDb {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    async fn roundtrip(&self, request: &str) -> Result<String, AgentsDbError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| AgentsDbError::Connect(self.socket_path.display().to_string(), e))?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(request.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }
}

#[async_trait]
impl AgentsDb for UnixSocketAgentsDb {
    async fn upsert(&self, record: &AgentRecord) -> Result<(), AgentsDbError> {
        let group = record.group.as_deref().unwrap_or("");
        let request = format!(
            "INSERT id={} name={} ip={} group={}",
            record.id, record.name, record.ip, group
        );
        let response = self.roundtrip(&request).await?;
        if response == "OK" {
            Ok(())
        } else {
            Err(AgentsDbError::Rejected(response))
        }
    }

    async fn remove(&self, id: &str) -> Result<(), AgentsDbError> {
        let request = format!("REMOVE id={id}");
        let response = self.roundtrip(&request).await?;
        if response == "OK" {
            Ok(())
        } else {
            Err(AgentsDbError::Rejected(response))
        }
    }
}

/// Used in standalone/non-clustered configurations with no external agents
/// database and by unit tests that don't need a real socket peer.
pub struct NullAgentsDb;

#[async_trait]
impl AgentsDb for NullAgentsDb {
    async fn upsert(&self, _record: &AgentRecord) -> Result<(), AgentsDbError> {
        Ok(())
    }

    async fn remove(&self, _id: &str) -> Result<(), AgentsDbError> {
        Ok(())
    }
}
