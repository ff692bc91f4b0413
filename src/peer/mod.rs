//! Peer identity verification.
//!
//! A certificate that chains to the trusted CA is necessary but not
//! sufficient: the peer must also connect from an address whose reverse DNS
//! name the certificate is valid for.
//!
//! 1. Take the leaf certificate recorded by the transport.
//! 2. Reverse-resolve the peer IP ([`HostResolver`]).
//! 3. Match the hostname against the certificate
//!    ([`verify_hostname`](crate::mtls::verify_hostname)).
//!
//! Verification runs on every `/token` request and its result is never
//! stored.

pub mod resolver;
pub mod verifier;

use std::net::IpAddr;

use serde::Serialize;

use crate::mtls::{CertIdentity, HostnameMismatch};

pub use resolver::{HostResolver, StaticResolver, SystemResolver};
pub use verifier::PeerVerifier;

/// Why a peer could not be bound to a hostname.
///
/// Every variant is reported to the peer as the same `403`.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The connection carries no client certificate.
    #[error("no client certificate presented")]
    NoCertificate,

    /// The client certificate could not be parsed.
    #[error("malformed client certificate: {0}")]
    MalformedCertificate(String),

    /// Reverse DNS gave no name for the peer address.
    #[error("no reverse DNS record for {ip}: {reason}")]
    NoReverseRecord {
        /// Peer address that was looked up.
        ip: IpAddr,
        /// Resolver detail.
        reason: String,
    },

    /// The certificate is not valid for the resolved hostname.
    #[error(transparent)]
    HostnameMismatch(#[from] HostnameMismatch),
}

impl VerifyError {
    /// Short machine-readable reason for audit events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoCertificate => "no_certificate",
            Self::MalformedCertificate(_) => "malformed_certificate",
            Self::NoReverseRecord { .. } => "no_reverse_record",
            Self::HostnameMismatch(_) => "hostname_mismatch",
        }
    }
}

/// A peer whose certificate is valid for its reverse DNS hostname.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPeer {
    /// Hostname the peer address resolved to.
    pub hostname: String,
    /// Peer IP address.
    pub ip: IpAddr,
    /// Identity fields of the presented certificate.
    pub identity: CertIdentity,
}
