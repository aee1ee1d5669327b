//! Core engine for `enrolld`: TLS-terminated agent enrollment, an in-memory
//! keystore with a pending-change journal, a background writer that
//! flushes both to a canonical key file and to the platform's agents
//! database, and the cluster master/worker split that lets a fleet of
//! enrollment daemons share one authoritative keystore.

pub mod config;
pub mod connections;
pub mod core;
pub mod keyfile;
pub mod logging;
pub mod protocol;
pub mod tls;

pub use config::AppConfig;
pub use core::Service;
