//! Configuration management
//!
//! The broker is configured once at startup and never mutated afterwards.
//! Sources are merged in increasing priority:
//!
//! 1. built-in defaults
//! 2. optional YAML file (`--config`)
//! 3. `TOKEN_BROKER_` environment variables (`__` separates sections)
//! 4. command-line arguments
//!
//! Any missing or invalid field is a [`Error::Config`] and stops the process
//! before a socket is bound.

use std::{
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};

use clap::ValueEnum;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::cli::Cli;
use crate::{Error, Result};

/// Default token lifetime (10 minutes)
pub const DEFAULT_LIFETIME_SECS: u64 = 600;

/// Upper bound accepted by the IAM credentials API (1 hour)
pub const MAX_LIFETIME_SECS: u64 = 3600;

/// Scope requested when none is configured
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Prefix applied to bare scope names such as `cloud-platform`
pub const SCOPE_URL_PREFIX: &str = "https://www.googleapis.com/auth/";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Listener configuration
    pub server: ServerConfig,
    /// TLS material for the listener
    pub mtls: MtlsConfig,
    /// The fixed token every verified peer receives
    pub token: TokenConfig,
    /// Outbound identity API configuration
    pub upstream: UpstreamConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Maximum time a peer may spend in the TLS handshake
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4443,
            handshake_timeout_secs: 10,
        }
    }
}

/// Server certificate and client trust configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MtlsConfig {
    /// PEM file holding the server certificate chain.
    ///
    /// The private key may live in the same file.
    pub server_cert: String,

    /// PEM file holding the server private key, when not bundled in `server_cert`.
    pub server_key: Option<String>,

    /// PEM bundle of CAs that sign acceptable client certificates.
    pub ca_bundle: String,

    /// Optional PEM-encoded certificate revocation list for client certificates.
    pub crl_path: Option<String>,
}

impl MtlsConfig {
    /// Path the private key is read from.
    #[must_use]
    pub fn key_path(&self) -> &str {
        self.server_key.as_deref().unwrap_or(&self.server_cert)
    }
}

/// The token minted for every verified peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Service account the token is minted for (e.g. `svc@project.iam.gserviceaccount.com`)
    pub service_account: String,
    /// OAuth scopes; bare names are expanded with [`SCOPE_URL_PREFIX`]
    pub scopes: Vec<String>,
    /// Token lifetime in seconds
    pub lifetime_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            service_account: String::new(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
            lifetime_secs: DEFAULT_LIFETIME_SECS,
        }
    }
}

impl TokenConfig {
    /// Scopes as sent upstream.
    #[must_use]
    pub fn normalized_scopes(&self) -> Vec<String> {
        self.scopes
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.contains("://") {
                    s.to_string()
                } else {
                    format!("{SCOPE_URL_PREFIX}{s}")
                }
            })
            .collect()
    }

    /// Token lifetime
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }
}

/// Where the broker's own (ambient) credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsKind {
    /// Compute Engine metadata server (service account attached to the VM)
    #[default]
    Metadata,
    /// `GOOGLE_OAUTH_ACCESS_TOKEN` environment variable, read on every mint
    Env,
    /// JSON key file (`credentials_file` or `GOOGLE_APPLICATION_CREDENTIALS`)
    File,
}

/// Key file location used when `credentials_file` is not configured
pub const APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Outbound identity API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the IAM credentials API
    pub iam_endpoint: String,
    /// Base URL of the metadata server
    pub metadata_endpoint: String,
    /// Ambient credential source
    pub credentials: CredentialsKind,
    /// Key file for [`CredentialsKind::File`]
    pub credentials_file: Option<String>,
    /// Extra CA bundle trusted for outbound calls, on top of the platform roots
    pub ca_bundle: Option<String>,
    /// Overall bound for one mint (credential fetch + token request)
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            iam_endpoint: "https://iamcredentials.googleapis.com".to_string(),
            metadata_endpoint: default_metadata_endpoint(),
            credentials: CredentialsKind::Metadata,
            credentials_file: None,
            ca_bundle: None,
            timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    /// Mint timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Key file path, falling back to `GOOGLE_APPLICATION_CREDENTIALS`.
    #[must_use]
    pub fn credentials_file_path(&self) -> Option<String> {
        self.credentials_file
            .clone()
            .or_else(|| std::env::var(APPLICATION_CREDENTIALS_ENV).ok())
            .filter(|p| !p.trim().is_empty())
    }
}

/// Metadata server URL, honouring `GCE_METADATA_HOST` like the Google client libraries.
fn default_metadata_endpoint() -> String {
    let host = std::env::var("GCE_METADATA_HOST")
        .unwrap_or_else(|_| "metadata.google.internal".to_string());
    format!("http://{host}/computeMetadata/v1")
}

impl BrokerConfig {
    /// Load configuration from defaults, optional YAML file, environment and CLI.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = cli.config.as_deref() {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::prefixed("TOKEN_BROKER_").split("__"))
            .merge(Serialized::defaults(cli_overrides(cli)));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every field needed to start the listener.
    pub fn validate(&self) -> Result<()> {
        self.server
            .host
            .parse::<IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid listen address '{}': {e}", self.server.host)))?;

        if self.server.handshake_timeout_secs == 0 {
            return Err(Error::Config("handshake timeout must be positive".into()));
        }

        require_file("server certificate", &self.mtls.server_cert)?;
        require_file("server key", self.mtls.key_path())?;
        require_file("CA bundle", &self.mtls.ca_bundle)?;
        if let Some(ref crl) = self.mtls.crl_path {
            require_file("CRL", crl)?;
        }
        if let Some(ref bundle) = self.upstream.ca_bundle {
            require_file("upstream CA bundle", bundle)?;
        }
        if self.upstream.credentials == CredentialsKind::File {
            let path = self.upstream.credentials_file_path().ok_or_else(|| {
                Error::Config(format!(
                    "credentials file is required (set upstream.credentials_file or {APPLICATION_CREDENTIALS_ENV})"
                ))
            })?;
            require_file("credentials file", &path)?;
        }

        validate_service_account(&self.token.service_account)?;

        if self.token.normalized_scopes().is_empty() {
            return Err(Error::Config("at least one scope is required".into()));
        }

        if self.token.lifetime_secs == 0 || self.token.lifetime_secs > MAX_LIFETIME_SECS {
            return Err(Error::Config(format!(
                "token lifetime must be between 1 and {MAX_LIFETIME_SECS} seconds, got {}",
                self.token.lifetime_secs
            )));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(Error::Config("mint timeout must be positive".into()));
        }

        Ok(())
    }

    /// Address the listener binds to. Only valid after [`validate`](Self::validate).
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host: {e}")))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Handshake timeout
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.server.handshake_timeout_secs)
    }
}

fn require_file(what: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::Config(format!("{what} path is required")));
    }
    if !Path::new(path).is_file() {
        return Err(Error::Config(format!("{what} not found: {path}")));
    }
    Ok(())
}

/// The service account is spliced into the upstream URL path, so it must be
/// a single path segment.
fn validate_service_account(account: &str) -> Result<()> {
    if account.is_empty() {
        return Err(Error::Config("service account is required".into()));
    }
    if account
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '?' | '#' | '%'))
    {
        return Err(Error::Config(format!(
            "service account '{account}' is not a valid identifier"
        )));
    }
    Ok(())
}

/// Values given on the command line, shaped like [`BrokerConfig`].
///
/// Only flags the operator actually passed are present, so lower-priority
/// sources keep their values otherwise.
fn cli_overrides(cli: &Cli) -> Value {
    let mut server = Map::new();
    server.insert("host".into(), json!(cli.host));
    server.insert("port".into(), json!(cli.port));
    if let Some(secs) = cli.handshake_timeout_secs {
        server.insert("handshake_timeout_secs".into(), json!(secs));
    }

    let mut mtls = Map::new();
    mtls.insert("server_cert".into(), json!(cli.server_cert));
    mtls.insert("ca_bundle".into(), json!(cli.ca_bundle));
    if let Some(ref key) = cli.server_key {
        mtls.insert("server_key".into(), json!(key));
    }
    if let Some(ref crl) = cli.crl {
        mtls.insert("crl_path".into(), json!(crl));
    }

    let mut token = Map::new();
    token.insert("service_account".into(), json!(cli.service_account));
    if !cli.scopes.is_empty() {
        token.insert("scopes".into(), json!(cli.scopes));
    }
    if let Some(secs) = cli.lifetime_secs {
        token.insert("lifetime_secs".into(), json!(secs));
    }

    let mut upstream = Map::new();
    if let Some(ref url) = cli.iam_endpoint {
        upstream.insert("iam_endpoint".into(), json!(url));
    }
    if let Some(kind) = cli.credentials {
        upstream.insert("credentials".into(), json!(kind));
    }
    if let Some(ref file) = cli.credentials_file {
        upstream.insert("credentials_file".into(), json!(file));
    }
    if let Some(ref bundle) = cli.upstream_ca_bundle {
        upstream.insert("ca_bundle".into(), json!(bundle));
    }
    if let Some(secs) = cli.mint_timeout_secs {
        upstream.insert("timeout_secs".into(), json!(secs));
    }

    json!({
        "server": server,
        "mtls": mtls,
        "token": token,
        "upstream": upstream,
    })
}
