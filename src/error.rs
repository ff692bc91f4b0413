//! Error types for the token broker
//!
//! [`Error`] covers startup and I/O failures. Per-request failures have their
//! own types ([`crate::peer::VerifyError`], [`crate::minter::MintError`]) and
//! are mapped to HTTP statuses by [`crate::gateway::BrokerError`].

use std::io;

use thiserror::Error;

/// Result type alias for the token broker
pub type Result<T> = std::result::Result<T, Error>;

/// Token broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing or invalid startup parameter)
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded or the rustls config is invalid
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error happened while preparing the listener.
    ///
    /// Such errors terminate the process before any connection is accepted.
    #[must_use]
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Tls(_) | Self::Http(_))
    }
}
