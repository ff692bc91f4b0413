//! Mutual TLS transport and certificate handling.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TLS 1.3 handshake  (rustls verifies client cert chain against the CA bundle)
//!   → PeerConnection { remote_addr, leaf certificate }
//!   → CertIdentity extracted per request
//!   → hostname matched against reverse DNS (crate::peer)
//! ```
//!
//! # Modules
//!
//! - [`cert_manager`]: PEM loading and rustls config building
//! - [`identity`]: X.509 certificate field extraction (`CertIdentity`)
//! - [`hostname`]: certificate-to-hostname matching rules
//! - [`transport`]: instrumented `TlsListener` for `axum::serve`

pub mod cert_manager;
pub mod hostname;
pub mod identity;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_certs;

pub use cert_manager::{build_acceptor, build_tls_config, load_certs, load_private_key};
pub use hostname::{HostnameMismatch, matches_hostname, verify_hostname};
pub use identity::CertIdentity;
pub use transport::{HandshakeError, PeerConnection, PeerStream, TlsListener};
