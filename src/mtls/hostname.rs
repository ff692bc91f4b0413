//! Certificate-to-hostname matching.
//!
//! Follows the usual TLS server identity rules (RFC 6125):
//!
//! - DNS SAN entries are compared case-insensitively, ignoring a trailing dot.
//! - A wildcard is accepted only as the complete left-most label
//!   (`*.example.com`) and matches exactly one label.
//! - The subject CN is consulted only when the certificate carries no DNS SAN.
//! - An IP-literal hostname is compared against SAN IP entries only.

use std::net::IpAddr;

use super::identity::CertIdentity;

/// Hostname did not match any identity in the certificate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hostname '{hostname}' does not match certificate names {presented:?}")]
pub struct HostnameMismatch {
    /// The hostname the peer was expected to prove.
    pub hostname: String,
    /// Names the certificate actually presented.
    pub presented: Vec<String>,
}

/// Check that `identity` is valid for `hostname`.
pub fn verify_hostname(identity: &CertIdentity, hostname: &str) -> Result<(), HostnameMismatch> {
    if matches_hostname(identity, hostname) {
        Ok(())
    } else {
        Err(HostnameMismatch {
            hostname: hostname.to_string(),
            presented: presented_names(identity),
        })
    }
}

/// Whether `identity` is valid for `hostname`.
#[must_use]
pub fn matches_hostname(identity: &CertIdentity, hostname: &str) -> bool {
    let host = normalize(hostname);
    if host.is_empty() {
        return false;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return identity.san_ips.contains(&ip);
    }

    if identity.san_dns_names.is_empty() {
        return identity
            .common_name
            .as_deref()
            .is_some_and(|cn| dns_name_matches(cn, &host));
    }

    identity
        .san_dns_names
        .iter()
        .any(|pattern| dns_name_matches(pattern, &host))
}

/// Match one certificate DNS identifier against a normalized hostname.
fn dns_name_matches(pattern: &str, host: &str) -> bool {
    let pattern = normalize(pattern);
    if pattern.is_empty() {
        return false;
    }

    let Some(suffix) = pattern.strip_prefix("*.") else {
        return !pattern.contains('*') && pattern == host;
    };

    if suffix.is_empty() || suffix.contains('*') {
        return false;
    }

    match host.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest == suffix,
        None => false,
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn presented_names(identity: &CertIdentity) -> Vec<String> {
    let mut names = identity.san_dns_names.clone();
    names.extend(identity.san_ips.iter().map(ToString::to_string));
    if names.is_empty() {
        names.extend(identity.common_name.iter().map(|cn| format!("CN={cn}")));
    }
    names
}
