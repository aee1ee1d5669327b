//! # Service
//!
//! Ties configuration, TLS context, keystore, cluster mode and lifecycle
//! together into one running daemon. Grounded in `restream.rs::main`'s
//! phased construction (aggregate state struct, one `tokio::spawn` per
//! long-lived task, graceful join at shutdown) generalized from the WSS
//! gateway's services to the enrollment daemon's accept/dispatch/writer
//! pipeline.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{AppConfig, ClusterModeConfig};
use crate::connections::agents_db::{AgentsDb, NullAgentsDb, UnixSocketAgentsDb};
use crate::connections::cluster_rpc::UnixSocketClusterRpc;
use crate::core::cluster::{ClusterMode, ClusterRpc, NullClusterRpc};
use crate::core::dispatch::{self, hash_hex, EnrollmentSettings};
use crate::core::keystore::Keystore;
use crate::core::lifecycle;
use crate::core::state::SharedState;
use crate::core::writer::{self, WriterPaths};
use crate::core::{accept, client_queue};
use crate::keyfile;
use crate::tls::{self, TlsSettings};

/// A fully constructed, ready-to-run enrollment daemon.
pub struct Service {
    config: AppConfig,
    state: SharedState,
    tls_config: Arc<tokio_rustls::rustls::ServerConfig>,
    cluster_mode: ClusterMode,
    cluster_rpc: Arc<dyn ClusterRpc>,
    agents_db: Arc<dyn AgentsDb>,
}

impl Service {
    /// Build a `Service` from configuration: loads the existing key file (if
    /// any) into the in-memory keystore, builds the TLS server context, and
    /// resolves the cluster mode's RPC collaborator.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let existing = if config.paths.key_file.exists() {
            let contents = std::fs::read_to_string(&config.paths.key_file)?;
            keyfile::parse(&contents)?
        } else {
            Vec::new()
        };
        info!("loaded {} existing agent entries from {}", existing.len(), config.paths.key_file.display());
        let keystore = Keystore::load(existing);
        let state = SharedState::new(keystore);

        let tls_config = tls::build_server_config(&TlsSettings {
            cert_path: config.tls.cert_path.clone(),
            key_path: config.tls.key_path.clone(),
            client_ca_path: config.tls.client_ca_path.clone(),
        })?;

        let cluster_mode = match config.cluster.mode {
            ClusterModeConfig::Standalone | ClusterModeConfig::Master => ClusterMode::Master,
            ClusterModeConfig::Worker => ClusterMode::Worker,
        };

        let cluster_rpc: Arc<dyn ClusterRpc> = match (cluster_mode, &config.cluster.master_socket) {
            (ClusterMode::Worker, Some(socket)) => Arc::new(UnixSocketClusterRpc::new(socket.clone())),
            (ClusterMode::Worker, None) => {
                anyhow::bail!("cluster.mode is \"worker\" but cluster.master_socket is not set");
            }
            (ClusterMode::Master, _) => Arc::new(NullClusterRpc),
        };

        let agents_db: Arc<dyn AgentsDb> = match &config.agents_db.socket_path {
            Some(socket) => Arc::new(UnixSocketAgentsDb::new(socket.clone())),
            None => Arc::new(NullAgentsDb),
        };

        Ok(Self {
            config,
            state,
            tls_config,
            cluster_mode,
            cluster_rpc,
            agents_db,
        })
    }

    /// Run the daemon until `SIGHUP`/`SIGINT`/`SIGTERM` is received (§4.7 —
    /// all three clear `running` uniformly; there is no in-place reload).
    pub async fn run(self) -> anyhow::Result<()> {
        let bind_addr = format!("{}:{}", self.config.network.bind_addr, self.config.network.port);
        let listener = Arc::new(TcpListener::bind(&bind_addr).await?);
        info!("enrollment daemon listening on {bind_addr}");

        let acceptor = TlsAcceptor::from(self.tls_config.clone());

        let token = CancellationToken::new();
        let (queue_tx, mut queue_rx) = client_queue::channel(self.config.network.queue_capacity);

        let accept_handle = tokio::spawn(accept::accept_loop(
            listener.clone(),
            queue_tx.clone(),
            token.clone(),
        ));

        let writer_paths = WriterPaths {
            key_file: self.config.paths.key_file.clone(),
            timestamp_dir: self.config.paths.timestamp_dir.clone(),
        };
        std::fs::create_dir_all(&writer_paths.timestamp_dir)?;
        let writer_handle = tokio::spawn(writer::writer_loop(
            self.state.clone(),
            self.agents_db.clone(),
            writer_paths,
            token.clone(),
        ));

        let dispatch_token = token.clone();
        let state = self.state.clone();
        let cluster_mode = self.cluster_mode;
        let cluster_rpc = self.cluster_rpc.clone();
        let acceptor = acceptor.clone();
        let settings = EnrollmentSettings {
            password_hash: self.config.enrollment.password.as_deref().map(hash_hex),
            request_timeout: self.config.network.request_timeout(),
            key_len_bytes: self.config.enrollment.key_len_bytes,
        };
        let dispatch_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = dispatch_token.cancelled() => return,
                    popped = queue_rx.pop_wait(std::time::Duration::from_secs(1)) => {
                        match popped {
                            Ok(Some(conn)) => {
                                tokio::spawn(dispatch::dispatch_connection(
                                    conn,
                                    acceptor.clone(),
                                    state.clone(),
                                    cluster_mode,
                                    cluster_rpc.clone(),
                                    settings.clone(),
                                ));
                            }
                            Ok(None) => continue,
                            Err(_) => return,
                        }
                    }
                }
            }
        });

        lifecycle::signal_task(token.clone()).await;

        token.cancel();
        let _ = accept_handle.await;
        dispatch_handle.abort();
        let _ = writer_handle.await;

        info!("enrollment daemon shut down");
        Ok(())
    }
}
