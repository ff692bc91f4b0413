//! Certificate identity extraction.
//!
//! Parses an X.509 DER-encoded peer certificate and extracts the fields used
//! for hostname binding and audit logs: subject, issuer, validity window,
//! Common Name, SAN DNS names and SAN IP addresses.

use std::net::IpAddr;

use serde::Serialize;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Certificate identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity fields of a client certificate.
///
/// Never cached beyond the connection it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertIdentity {
    /// Subject DN in RFC 4514 form.
    pub subject: String,

    /// Issuer DN in RFC 4514 form.
    pub issuer: String,

    /// Serial number, colon-separated hex.
    pub serial: String,

    /// Start of the validity window (Unix seconds).
    pub not_before: i64,

    /// End of the validity window (Unix seconds).
    pub not_after: i64,

    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// Subject Alternative Name DNS entries.
    pub san_dns_names: Vec<String>,

    /// Subject Alternative Name IP address entries.
    pub san_ips: Vec<IpAddr>,

    /// Pre-computed human-readable label for logs/audit events.
    pub display_name: String,
}

impl CertIdentity {
    /// Parse a DER-encoded certificate and extract its identity fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Tls(format!("Failed to parse client certificate: {e}")))?;

        let common_name = extract_cn(&cert);
        let (san_dns_names, san_ips) = extract_sans(&cert);
        let display_name = build_display_name(common_name.as_ref(), &san_dns_names);
        let validity = cert.validity();

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            common_name,
            san_dns_names,
            san_ips,
            display_name,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Extract the CN attribute from the subject DN.
fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// Extract SAN DNS and SAN IP entries from the certificate extensions.
fn extract_sans(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<IpAddr>) {
    let mut dns_names = Vec::new();
    let mut ips = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                GeneralName::IPAddress(raw) => {
                    if let Some(ip) = ip_from_octets(raw) {
                        ips.push(ip);
                    }
                }
                _ => {}
            }
        }
    }

    (dns_names, ips)
}

fn ip_from_octets(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(raw).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Prefers the CN, then the first DNS SAN, then `"<unknown>"`.
fn build_display_name(cn: Option<&String>, san_dns: &[String]) -> String {
    cn.or_else(|| san_dns.first())
        .map_or("<unknown>", String::as_str)
        .to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
