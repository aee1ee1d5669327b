//! # TLS server context
//!
//! Builds the `rustls::ServerConfig` the dispatch stage terminates
//! connections with. Grounded in the certificate/key loading shape used for
//! the teacher's single-sided TLS servers, extended with optional mutual-TLS
//! client certificate verification against a CA bundle (§4.3 step 3: "the
//! daemon MAY require the connecting agent to present a certificate signed
//! by a configured CA").

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("io error loading TLS material from {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("rustls configuration error: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("client verifier construction failed: {0}")]
    Verifier(String),
}

fn io_err(path: &Path, source: std::io::Error) -> TlsError {
    TlsError::Io { path: path.display().to_string(), source }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io_err(path, e))
}

/// Load the server's private key, trying PKCS8 first and falling back to
/// PKCS1/RSA — the same fallback order the teacher's dummy server uses.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    if let Some(key) = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .next()
        .transpose()
        .map_err(|e| io_err(path, e))?
    {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = BufReader::new(file);
    if let Some(key) = rustls_pemfile::rsa_private_keys(&mut reader)
        .next()
        .transpose()
        .map_err(|e| io_err(path, e))?
    {
        return Ok(PrivateKeyDer::Pkcs1(key));
    }

    Err(TlsError::NoPrivateKey(path.display().to_string()))
}

/// Settings needed to construct the server TLS context. Mirrors the `tls`
/// section of [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
    /// When set, client certificates are required and verified against this
    /// CA bundle. When absent, the daemon accepts any client certificate (or
    /// none), relying on the password/key-hash check in the application
    /// protocol instead.
    pub client_ca_path: Option<std::path::PathBuf>,
}

/// Build the server-side TLS context described by `settings`.
pub fn build_server_config(settings: &TlsSettings) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(&settings.cert_path)?;
    let key = load_private_key(&settings.key_path)?;

    let config = match &settings.client_ca_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| TlsError::Verifier(e.to_string()))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| TlsError::Verifier(e.to_string()))?;
            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?,
    };

    Ok(Arc::new(config))
}
