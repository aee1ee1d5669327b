//! External collaborators the enrollment daemon talks to over local Unix
//! sockets: the platform's agents database and, in clustered deployments,
//! the sibling nodes' enrollment RPC. Both are modeled as traits so the
//! dispatch/writer stages depend only on an interface, with a concrete
//! `UnixStream`-backed implementation and a null test double per collaborator
//! — the same shape as the teacher's `Database`/`CacheHandler` wrappers.

pub mod agents_db;
pub mod cluster_rpc;

pub use agents_db::{AgentsDb, AgentsDbError, NullAgentsDb, UnixSocketAgentsDb};
pub use cluster_rpc::UnixSocketClusterRpc;
