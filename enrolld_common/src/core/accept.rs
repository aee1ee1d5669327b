//! # Accept stage
//!
//! Binds the enrollment port and feeds every accepted connection into the
//! bounded client queue for the dispatch stage to pick up. Grounded in
//! `server_speak.rs::tokio_main`'s `TcpListener::bind` + `select!` loop
//! against a cancellation signal.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::client_queue::{ClientQueueSender, PendingConnection, QueueError};

/// Accept connections on `listener` until `token` is cancelled, pushing each
/// one onto `queue`. Returns once the listener loop observes cancellation.
/// A full queue closes the (N+1)-th connection immediately rather than
/// backpressuring accept() — the bounded-FIFO boundary behavior §4.2/§8
/// call for.
pub async fn accept_loop(listener: Arc<TcpListener>, queue: ClientQueueSender, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("accept stage shutting down");
                return;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let conn = PendingConnection { stream, peer_addr };
                        match queue.push(conn) {
                            Ok(()) => {}
                            Err(QueueError::Full) => {
                                warn!("too many connections, closing {peer_addr}");
                            }
                            Err(QueueError::Closed) => {
                                warn!("client queue closed, dropping accepted connection from {peer_addr}");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("accept() failed: {e}");
                    }
                }
            }
        }
    }
}
