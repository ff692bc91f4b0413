//! Audit trail for token issuance.
//!
//! Every event is emitted via `tracing::info!` with the serialized event in
//! the `audit` field, so log aggregators can index it.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `token.issued` | A verified peer received a token |
//! | `token.denied` | Peer verification failed |
//! | `token.mint_failed` | The peer was verified but minting failed |
//!
//! The token itself is never part of an event.

use std::net::IpAddr;

use serde::Serialize;

use crate::minter::{AccessToken, MintError, TokenRequest};
use crate::peer::{VerifiedPeer, VerifyError};

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Peer address.
    pub client_ip: IpAddr,
    /// Hostname the peer was bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Client certificate subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Service account the token was minted for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Expiry reported upstream (for `token.issued`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Machine-readable failure kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Human-readable failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Construct a `token.issued` event.
    #[must_use]
    pub fn issued(peer: &VerifiedPeer, request: &TokenRequest, token: &AccessToken) -> Self {
        Self {
            event: "token.issued",
            client_ip: peer.ip,
            hostname: Some(peer.hostname.clone()),
            subject: Some(peer.identity.subject.clone()),
            service_account: Some(request.service_account.clone()),
            expires_at: token.expires_at().map(str::to_owned),
            kind: None,
            reason: None,
        }
    }

    /// Construct a `token.denied` event.
    #[must_use]
    pub fn denied(client_ip: IpAddr, err: &VerifyError) -> Self {
        Self {
            event: "token.denied",
            client_ip,
            hostname: None,
            subject: None,
            service_account: None,
            expires_at: None,
            kind: Some(err.kind()),
            reason: Some(err.to_string()),
        }
    }

    /// Construct a `token.mint_failed` event.
    #[must_use]
    pub fn mint_failed(peer: &VerifiedPeer, request: &TokenRequest, err: &MintError) -> Self {
        Self {
            event: "token.mint_failed",
            client_ip: peer.ip,
            hostname: Some(peer.hostname.clone()),
            subject: Some(peer.identity.subject.clone()),
            service_account: Some(request.service_account.clone()),
            expires_at: None,
            kind: Some(err.kind()),
            reason: Some(err.to_string()),
        }
    }
}

/// Emit an audit event.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(json) => tracing::info!(audit = %json, event = event.event, "Audit"),
        Err(e) => tracing::warn!(error = %e, event = event.event, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtls::CertIdentity;
    use std::time::Duration;

    fn peer() -> VerifiedPeer {
        VerifiedPeer {
            hostname: "worker1.internal".into(),
            ip: "10.0.0.1".parse().unwrap(),
            identity: CertIdentity {
                subject: "CN=worker1".into(),
                ..CertIdentity::default()
            },
        }
    }

    fn request() -> TokenRequest {
        TokenRequest {
            service_account: "svc@project.iam".into(),
            scopes: vec!["https://www.googleapis.com/auth/cloud-platform".into()],
            lifetime: Duration::from_secs(600),
        }
    }

    #[test]
    fn issued_event_never_contains_the_token() {
        let token = AccessToken::new("ya29.top-secret", Some("2026-10-16T12:10:00Z".into()));
        let event = AuditEvent::issued(&peer(), &request(), &token);
        let json = serde_json::to_string(&event).unwrap();

        assert!(!json.contains("ya29"));
        assert!(json.contains("\"event\":\"token.issued\""));
        assert!(json.contains("\"hostname\":\"worker1.internal\""));
        assert!(json.contains("\"expires_at\":\"2026-10-16T12:10:00Z\""));
    }

    #[test]
    fn denied_event_carries_kind_and_skips_empty_fields() {
        let event = AuditEvent::denied("10.0.0.2".parse().unwrap(), &VerifyError::NoCertificate);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"kind\":\"no_certificate\""));
        assert!(json.contains("\"client_ip\":\"10.0.0.2\""));
        assert!(!json.contains("hostname"));
        assert!(!json.contains("service_account"));
    }

    #[test]
    fn mint_failed_event_names_the_failure() {
        let err = MintError::Timeout(Duration::from_secs(10));
        let event = AuditEvent::mint_failed(&peer(), &request(), &err);
        assert_eq!(event.event, "token.mint_failed");
        assert_eq!(event.kind, Some("timeout"));
        assert_eq!(event.service_account.as_deref(), Some("svc@project.iam"));
    }
}
