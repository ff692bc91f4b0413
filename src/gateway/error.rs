//! Handler-boundary errors and their HTTP translation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::minter::MintError;
use crate::peer::VerifyError;

/// Every way a request can fail once it reaches the router.
///
/// Peers only ever see the status and its canonical reason phrase; the
/// detail stays in the server logs.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The peer could not be bound to its hostname.
    #[error("certificate validation failed: {0}")]
    Verification(#[from] VerifyError),

    /// The peer was verified but no token could be minted.
    #[error("token minting failed: {0}")]
    Mint(#[from] MintError),

    /// No route for this method and path.
    #[error("not found")]
    NotFound,
}

impl BrokerError {
    /// HTTP status for this failure.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Verification(_) => StatusCode::FORBIDDEN,
            Self::Mint(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = status.canonical_reason().unwrap_or("Error");
        (status, body).into_response()
    }
}
