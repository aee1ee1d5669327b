//! Core engine: the data model (agent, keystore, journal) and the three
//! pipeline stages (accept, dispatch, writer) that move a TLS connection
//! through to a flushed key-file entry, plus the cluster and lifecycle glue
//! that ties them into one running [`service::Service`].

pub mod accept;
pub mod agent;
pub mod client_queue;
pub mod cluster;
pub mod dispatch;
pub mod journal;
pub mod keystore;
pub mod lifecycle;
pub mod service;
pub mod state;
pub mod writer;

pub use agent::{AgentEntry, AgentFlags, AgentId, AgentRecord};
pub use journal::{Journal, JournalEntry};
pub use keystore::{Keystore, KeystoreError, StagedInsert};
pub use service::Service;
pub use state::SharedState;
