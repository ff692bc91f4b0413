//! Certificate loading and rustls server config building.
//!
//! Provides:
//! - [`build_tls_config`]: build a `rustls::ServerConfig` that requires a
//!   client certificate chaining to the configured CA bundle
//! - [`build_acceptor`]: wrap that config in a `tokio_rustls::TlsAcceptor`
//! - [`load_certs`] / [`load_private_key`]: PEM file loading
//!
//! # File format
//!
//! All certificate and key files are expected in **PEM format**. The server
//! certificate and private key may share one file; certificates and keys are
//! picked out of it by block type.

use std::fs;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::config::MtlsConfig;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build a `rustls::ServerConfig` for mutual TLS.
///
/// Clients without a certificate signed by `config.ca_bundle` are rejected
/// during the handshake, before any HTTP bytes are read. Only TLS 1.3 is
/// offered.
///
/// # Errors
///
/// Returns an error if any certificate, key or CRL file cannot be read or
/// parsed, or if the rustls config cannot be built (e.g. mismatched cert/key pair).
pub fn build_tls_config(config: &MtlsConfig) -> Result<ServerConfig> {
    let server_certs = load_certs(&config.server_cert)?;
    let server_key = load_private_key(config.key_path())?;
    let ca_certs = load_certs(&config.ca_bundle)?;

    let mut root_store = rustls::RootCertStore::empty();
    for cert in &ca_certs {
        root_store
            .add(cert.clone())
            .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
    }

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let client_verifier = build_client_verifier(config, root_store, Arc::clone(&provider))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Tls(format!("Unsupported protocol versions: {e}")))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %config.server_cert,
        ca_bundle = %config.ca_bundle,
        ca_certs = ca_certs.len(),
        crl = config.crl_path.is_some(),
        "mTLS config built"
    );

    Ok(tls_cfg)
}

/// Build the acceptor used by [`TlsListener`](super::TlsListener).
pub fn build_acceptor(config: &MtlsConfig) -> Result<TlsAcceptor> {
    Ok(TlsAcceptor::from(Arc::new(build_tls_config(config)?)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    let key = rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Tls(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Tls(format!("No private key found in '{path}'")))?;

    Ok(key)
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("Cannot read '{path}': {e}")))
}

/// Build a `WebPkiClientVerifier` that always requires a client certificate.
fn build_client_verifier(
    config: &MtlsConfig,
    root_store: rustls::RootCertStore,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let builder = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider);

    let builder = if let Some(ref crl_path) = config.crl_path {
        builder.with_crls(load_crls(crl_path)?)
    } else {
        builder
    };

    builder
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build client verifier: {e}")))
}

/// Load CRL entries from a PEM file.
fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let pem_data = read_file(path)?;
    let crls: Vec<CertificateRevocationListDer<'static>> =
        rustls_pemfile::crls(&mut pem_data.as_slice())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Tls(format!("Failed to parse CRL from '{path}': {e}")))?;
    if crls.is_empty() {
        return Err(Error::Tls(format!("No CRL found in '{path}'")));
    }
    Ok(crls)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
