//! # Lifecycle
//!
//! Cooperative shutdown plumbing shared by every long-lived task: a
//! `CancellationToken` the accept/dispatch/writer loops `select!` against,
//! and a signal-handling task that listens for `SIGHUP`/`SIGINT`/`SIGTERM`
//! the way the teacher's gateway listens for ctrl-c and unix `terminate` —
//! all three clear `running` uniformly (§4.7), there is no in-place reload.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Listen for `SIGHUP`/`SIGINT`/`SIGTERM` and cancel `token` on whichever
/// fires first.
///
/// Mirrors `restream.rs::shutdown_signal`'s `tokio::select!` over multiple
/// signal futures, generalized to treat all three signals as the same
/// shutdown request rather than singling one out for special handling.
pub async fn signal_task(token: CancellationToken) {
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sighup.recv() => info!("received SIGHUP, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
    }

    token.cancel();
}
