//! Binds a TLS peer to its reverse DNS hostname.

use std::sync::Arc;

use tracing::debug;

use super::{HostResolver, VerifiedPeer, VerifyError};
use crate::mtls::{CertIdentity, PeerConnection, verify_hostname};

/// Verifies that a peer's certificate is valid for the hostname its address
/// resolves to.
#[derive(Clone)]
pub struct PeerVerifier {
    resolver: Arc<dyn HostResolver>,
}

impl PeerVerifier {
    /// Create a verifier using `resolver` for reverse lookups.
    #[must_use]
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    /// Verify one peer.
    ///
    /// # Errors
    ///
    /// Any failing step (missing or malformed certificate, no reverse record,
    /// hostname mismatch) yields a [`VerifyError`].
    pub async fn verify(&self, peer: &PeerConnection) -> Result<VerifiedPeer, VerifyError> {
        let der = peer.certificate_der().ok_or(VerifyError::NoCertificate)?;
        let identity = CertIdentity::from_der(der)
            .map_err(|e| VerifyError::MalformedCertificate(e.to_string()))?;

        // IPv4 peers on a dual-stack socket show up as ::ffff:a.b.c.d
        let ip = peer.remote_addr().ip().to_canonical();
        let hostname = self.resolver.resolve(ip).await?;

        debug!(
            %ip,
            hostname = %hostname,
            subject = %identity.subject,
            "Matching client certificate against hostname"
        );
        verify_hostname(&identity, &hostname)?;

        Ok(VerifiedPeer {
            hostname,
            ip,
            identity,
        })
    }
}
