//! Shared fixtures for the end-to-end enrollment scenarios: a throwaway
//! self-signed TLS identity (via `rcgen`, test-only per the crate's
//! dependency graph) and a minimal TLS-terminating listener wired directly
//! to the dispatch stage, bypassing `Service` so each scenario can inspect
//! the keystore state around a single request.

use std::sync::Arc;
use std::time::Duration;

use enrolld_common::core::cluster::{ClusterMode, ClusterRpc, NullClusterRpc};
use enrolld_common::core::dispatch::{dispatch_connection, EnrollmentSettings};
use enrolld_common::core::state::SharedState;
use enrolld_common::core::{client_queue, Keystore};
use enrolld_common::tls::{self, TlsSettings};
use rustls_pki_types::{CertificateDer, ServerName};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub state: SharedState,
    client_root: CertificateDer<'static>,
}

/// Spin up a loopback TLS listener that dispatches every accepted
/// connection with `dispatch_connection`, using a freshly generated
/// self-signed certificate.
fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub async fn spawn_server(mode: ClusterMode, cluster_rpc: Arc<dyn ClusterRpc>, settings: EnrollmentSettings) -> TestServer {
    ensure_crypto_provider();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    let client_root = CertificateDer::from(certified.cert.der().to_vec());

    let tls_config = tls::build_server_config(&TlsSettings {
        cert_path,
        key_path,
        client_ca_path: None,
    })
    .unwrap();
    let acceptor = TlsAcceptor::from(tls_config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = SharedState::new(Keystore::new());
    let server_state = state.clone();

    tokio::spawn(async move {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let conn = client_queue::PendingConnection { stream, peer_addr };
            tokio::spawn(dispatch_connection(
                conn,
                acceptor.clone(),
                server_state.clone(),
                mode,
                cluster_rpc.clone(),
                settings.clone(),
            ));
        }
    });

    TestServer { addr, state, client_root }
}

pub async fn default_server() -> TestServer {
    spawn_server(ClusterMode::Master, Arc::new(NullClusterRpc), EnrollmentSettings::default()).await
}

/// Send a raw enrollment request line over a fresh TLS connection and
/// return the single response line (without its trailing newline).
pub async fn send_request(server: &TestServer, request_line: &str) -> String {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(server.client_root.clone()).unwrap();
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut stream = connector.connect(server_name, tcp).await.unwrap();

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request_line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    stream.flush().await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("response timed out")
        .unwrap();
    String::from_utf8_lossy(&buf[..n]).trim_end().to_string()
}
