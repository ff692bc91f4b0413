//! Token Broker Library
//!
//! Issues short-lived cloud access tokens to workloads that prove their
//! identity with a client certificate over mutual TLS.
//!
//! # Flow
//!
//! - **Transport**: TLS 1.3 listener that requires a client certificate
//!   chaining to the configured CA ([`mtls`])
//! - **Peer verification**: the certificate must be valid for the hostname
//!   the peer's address reverse-resolves to ([`peer`])
//! - **Minting**: a token for one fixed service account, scope set and
//!   lifetime, fetched from the IAM Credentials API ([`minter`])
//! - **HTTP**: `GET /token` returns the token as `text/plain` ([`gateway`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod minter;
pub mod mtls;
pub mod peer;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG`, when set, overrides `level`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Cannot install tracing subscriber: {e}")))
}
