//! IAM Service Account Credentials API client.
//!
//! ```text
//! POST {endpoint}/v1/projects/-/serviceAccounts/{account}:generateAccessToken
//! Authorization: Bearer <ambient token>
//! {"scope": ["https://www.googleapis.com/auth/cloud-platform"], "lifetime": "600s"}
//!
//! 200 {"accessToken": "ya29...", "expireTime": "2026-10-16T12:10:00Z"}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AccessToken, CredentialSource, MintError, TokenMinter, TokenRequest};
use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// Upper bound on upstream error bodies kept for logs.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Serialize)]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [String],
    lifetime: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    #[serde(default)]
    expire_time: Option<String>,
}

/// [`TokenMinter`] backed by `iamcredentials.googleapis.com`.
pub struct IamCredentialsMinter {
    http: reqwest::Client,
    endpoint: String,
    source: CredentialSource,
    timeout: Duration,
}

impl IamCredentialsMinter {
    /// Create a minter from its parts.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        source: CredentialSource,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            source,
            timeout,
        }
    }

    /// Build the HTTP client and credential source from configuration.
    ///
    /// The upstream CA bundle, if any, is added to the platform roots. It is
    /// independent of the bundle that validates client certificates.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout());

        if let Some(ref path) = config.ca_bundle {
            let pem = std::fs::read(path)
                .map_err(|e| Error::Config(format!("Cannot read upstream CA bundle '{path}': {e}")))?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|e| Error::Config(format!("Invalid upstream CA bundle '{path}': {e}")))?;
            debug!(path = %path, certs = certs.len(), "Loaded upstream CA bundle");
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(Self::new(
            builder.build()?,
            config.iam_endpoint.clone(),
            CredentialSource::from_config(config),
            config.timeout(),
        ))
    }

    fn url(&self, service_account: &str) -> String {
        format!(
            "{}/v1/projects/-/serviceAccounts/{service_account}:generateAccessToken",
            self.endpoint
        )
    }

    async fn generate(&self, request: &TokenRequest) -> std::result::Result<AccessToken, MintError> {
        let ambient = self.source.access_token(&self.http).await?;

        let body = GenerateAccessTokenRequest {
            scope: &request.scopes,
            lifetime: request.lifetime_param(),
        };

        debug!(
            service_account = %request.service_account,
            lifetime = %body.lifetime,
            "Generating token"
        );

        let response = self
            .http
            .post(self.url(&request.service_account))
            .bearer_auth(ambient)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MintError::Rejected {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e))?;
        let parsed: GenerateAccessTokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| MintError::MalformedResponse(e.to_string()))?;

        if parsed.access_token.is_empty() {
            return Err(MintError::MalformedResponse("empty accessToken".to_string()));
        }

        Ok(AccessToken::new(parsed.access_token, parsed.expire_time))
    }

    fn transport_error(&self, e: &reqwest::Error) -> MintError {
        if e.is_timeout() {
            MintError::Timeout(self.timeout)
        } else {
            MintError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl TokenMinter for IamCredentialsMinter {
    async fn mint(&self, request: &TokenRequest) -> std::result::Result<AccessToken, MintError> {
        match tokio::time::timeout(self.timeout, self.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(MintError::Timeout(self.timeout)),
        }
    }
}
