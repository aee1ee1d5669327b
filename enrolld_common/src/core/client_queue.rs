//! # Client queue
//!
//! The accept stage hands freshly-accepted sockets to the dispatch stage
//! through a bounded queue so a burst of connections can't outrun the
//! single-threaded enrollment protocol (§4.2 "bounded FIFO of pending
//! connections"). A `tokio::sync::mpsc` channel is the async equivalent of
//! the bounded FIFO with a deadline-based pop the original design used.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;

/// One accepted connection awaiting dispatch.
pub struct PendingConnection {
    pub stream: TcpStream,
    pub peer_addr: std::net::SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("client queue is closed")]
    Closed,
    #[error("client queue is full")]
    Full,
}

pub struct ClientQueueSender {
    tx: mpsc::Sender<PendingConnection>,
}

pub struct ClientQueueReceiver {
    rx: mpsc::Receiver<PendingConnection>,
}

/// Build a bounded queue; `capacity` mirrors the original design's fixed-size
/// pending-connection FIFO.
pub fn channel(capacity: usize) -> (ClientQueueSender, ClientQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (ClientQueueSender { tx }, ClientQueueReceiver { rx })
}

impl ClientQueueSender {
    /// Non-blocking push (§4.2 `push(desc) -> ok|full`): returns
    /// immediately instead of backpressuring the accept loop when the
    /// queue is at capacity.
    pub fn push(&self, conn: PendingConnection) -> Result<(), QueueError> {
        self.tx.try_send(conn).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

impl Clone for ClientQueueSender {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl ClientQueueReceiver {
    /// Pop the next pending connection, waiting at most `deadline`. Returns
    /// `Ok(None)` on timeout so callers can distinguish "nothing arrived yet"
    /// from "queue closed".
    pub async fn pop_wait(&mut self, deadline: Duration) -> Result<Option<PendingConnection>, QueueError> {
        match timeout(deadline, self.rx.recv()).await {
            Ok(Some(conn)) => Ok(Some(conn)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pop_wait_times_out_when_empty() {
        let (_tx, mut rx) = channel(4);
        let popped = rx.pop_wait(Duration::from_millis(10)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn pop_wait_returns_closed_after_senders_drop() {
        let (tx, mut rx) = channel(4);
        drop(tx);
        let err = rx.pop_wait(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, QueueError::Closed);
    }

    #[tokio::test]
    async fn push_returns_full_without_blocking_once_at_capacity() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, _rx) = channel(1);
        let mut accepted = Vec::new();
        for _ in 0..2 {
            let client = TcpStream::connect(addr).await.unwrap();
            let (stream, peer_addr) = listener.accept().await.unwrap();
            accepted.push(client);
            if let Err(e) = tx.push(PendingConnection { stream, peer_addr }) {
                assert_eq!(e, QueueError::Full);
                return;
            }
        }
        panic!("expected the second push to report the queue as full");
    }
}
