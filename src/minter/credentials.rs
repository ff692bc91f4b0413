//! Ambient credentials: the broker's own identity, never the peer's.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::MintError;
use crate::config::{CredentialsKind, UpstreamConfig};

/// Environment variable read by [`CredentialSource::Environment`].
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Token endpoint used when a key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scope requested for the broker's own token.
const BROKER_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Lifetime of a self-signed service account assertion.
const ASSERTION_LIFETIME_SECS: u64 = 3600;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Where the broker gets the bearer token it presents to the identity API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Compute Engine metadata server; `base_url` ends in `/computeMetadata/v1`.
    MetadataServer {
        /// Metadata server base URL
        base_url: String,
    },
    /// An environment variable, read on every call.
    Environment {
        /// Variable name
        var: String,
    },
    /// A JSON key file, as named by `GOOGLE_APPLICATION_CREDENTIALS`.
    ///
    /// Service account keys are exchanged through a signed JWT assertion,
    /// user credentials through their refresh token.
    KeyFile {
        /// Path to the key file
        path: String,
    },
}

impl CredentialSource {
    /// Select the source named in the configuration.
    #[must_use]
    pub fn from_config(config: &UpstreamConfig) -> Self {
        match config.credentials {
            CredentialsKind::Metadata => Self::MetadataServer {
                base_url: config.metadata_endpoint.trim_end_matches('/').to_string(),
            },
            CredentialsKind::Env => Self::Environment {
                var: ACCESS_TOKEN_ENV.to_string(),
            },
            CredentialsKind::File => Self::KeyFile {
                path: config.credentials_file_path().unwrap_or_default(),
            },
        }
    }

    /// Fetch a bearer token for the broker's own identity.
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String, MintError> {
        match self {
            Self::MetadataServer { base_url } => metadata_token(http, base_url).await,
            Self::Environment { var } => std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| MintError::Credentials(format!("{var} is not set"))),
            Self::KeyFile { path } => key_file_token(http, path).await,
        }
    }
}

/// OAuth token response, shared by the metadata server and the token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthToken {
    access_token: String,
}

async fn metadata_token(http: &reqwest::Client, base_url: &str) -> Result<String, MintError> {
    let url = format!("{base_url}/instance/service-accounts/default/token");
    let response = http
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| MintError::Credentials(format!("metadata server unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MintError::Credentials(format!(
            "metadata server returned {status}"
        )));
    }

    let token: OAuthToken = response
        .json()
        .await
        .map_err(|e| MintError::Credentials(format!("invalid metadata token response: {e}")))?;

    if token.access_token.is_empty() {
        return Err(MintError::Credentials(
            "metadata server returned an empty token".to_string(),
        ));
    }
    Ok(token.access_token)
}

/// The two key file shapes `gcloud` and the console produce.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        private_key_id: Option<String>,
        #[serde(default)]
        token_uri: Option<String>,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
}

/// Claims of the self-signed assertion sent to the token endpoint.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

async fn key_file_token(http: &reqwest::Client, path: &str) -> Result<String, MintError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| MintError::Credentials(format!("cannot read key file '{path}': {e}")))?;
    let key: CredentialsFile = serde_json::from_slice(&raw)
        .map_err(|e| MintError::Credentials(format!("invalid key file '{path}': {e}")))?;

    match key {
        CredentialsFile::ServiceAccount {
            client_email,
            private_key,
            private_key_id,
            token_uri,
        } => {
            let token_uri = token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());
            let assertion =
                sign_assertion(&client_email, &private_key, private_key_id, &token_uri)?;
            let params = [
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ];
            exchange(http, &token_uri, &params).await
        }
        CredentialsFile::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
            token_uri,
        } => {
            let token_uri = token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());
            let params = [
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ];
            exchange(http, &token_uri, &params).await
        }
    }
}

fn sign_assertion(
    client_email: &str,
    private_key_pem: &str,
    key_id: Option<String>,
    token_uri: &str,
) -> Result<String, MintError> {
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| MintError::Credentials(format!("invalid service account key: {e}")))?;

    let iat = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| MintError::Credentials(format!("system clock before epoch: {e}")))?
        .as_secs();
    let claims = AssertionClaims {
        iss: client_email,
        scope: BROKER_SCOPE,
        aud: token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key_id;
    jsonwebtoken::encode(&header, &claims, &key)
        .map_err(|e| MintError::Credentials(format!("cannot sign assertion: {e}")))
}

async fn exchange(
    http: &reqwest::Client,
    token_uri: &str,
    params: &[(&str, &str)],
) -> Result<String, MintError> {
    let response = http
        .post(token_uri)
        .form(params)
        .send()
        .await
        .map_err(|e| MintError::Credentials(format!("token endpoint unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MintError::Credentials(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let token: OAuthToken = response
        .json()
        .await
        .map_err(|e| MintError::Credentials(format!("invalid token endpoint response: {e}")))?;

    if token.access_token.is_empty() {
        return Err(MintError::Credentials(
            "token endpoint returned an empty token".to_string(),
        ));
    }
    Ok(token.access_token)
}
