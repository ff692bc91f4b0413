//! Credential minting. Exchanges the broker's ambient credentials for a
//! short-lived token of the configured service account.
//!
//! The request is fixed at startup from [`TokenConfig`]; nothing a peer sends
//! influences the identity, scope or lifetime. No retries are made: a failed
//! mint surfaces once and the caller decides whether to try again.

pub mod credentials;
pub mod iam;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TokenConfig;

pub use credentials::CredentialSource;
pub use iam::IamCredentialsMinter;

/// The token to mint: identity, scopes and lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// Service account identifier, used verbatim in the upstream path.
    pub service_account: String,
    /// Fully-qualified OAuth scopes.
    pub scopes: Vec<String>,
    /// Requested lifetime.
    pub lifetime: Duration,
}

impl TokenRequest {
    /// Build the fixed request from configuration.
    #[must_use]
    pub fn from_config(config: &TokenConfig) -> Self {
        Self {
            service_account: config.service_account.clone(),
            scopes: config.normalized_scopes(),
            lifetime: config.lifetime(),
        }
    }

    /// Lifetime in the upstream wire format (`"600s"`).
    #[must_use]
    pub fn lifetime_param(&self) -> String {
        format!("{}s", self.lifetime.as_secs())
    }
}

/// An opaque bearer token returned by the identity API.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<String>,
}

impl AccessToken {
    /// Wrap a token string and the expiry reported upstream.
    #[must_use]
    pub fn new(secret: impl Into<String>, expires_at: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Expiry timestamp (RFC 3339) as reported upstream.
    #[must_use]
    pub fn expires_at(&self) -> Option<&str> {
        self.expires_at.as_deref()
    }

    /// Consume the token, returning the bearer string.
    #[must_use]
    pub fn into_secret(self) -> String {
        self.secret
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Minting failures. All of them map to HTTP 500.
#[derive(Debug, thiserror::Error)]
pub enum MintError {
    /// The broker's own credentials could not be obtained.
    #[error("ambient credentials unavailable: {0}")]
    Credentials(String),

    /// The identity API could not be reached.
    #[error("identity API unreachable: {0}")]
    Transport(String),

    /// The mint did not finish in time.
    #[error("identity API call timed out after {0:?}")]
    Timeout(Duration),

    /// The identity API refused the request.
    #[error("identity API rejected the request with status {status}: {body}")]
    Rejected {
        /// HTTP status returned upstream.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The identity API answered with something that is not a token.
    #[error("malformed identity API response: {0}")]
    MalformedResponse(String),
}

impl MintError {
    /// Short machine-readable reason for audit events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Credentials(_) => "credentials",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Mints tokens for the configured service account.
#[async_trait]
pub trait TokenMinter: Send + Sync {
    /// Mint one token.
    async fn mint(&self, request: &TokenRequest) -> Result<AccessToken, MintError>;
}
