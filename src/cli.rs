//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

use crate::config::CredentialsKind;

/// mTLS access token broker
///
/// Hands out short-lived access tokens for one service account to peers whose
/// client certificate matches their reverse-DNS hostname.
#[derive(Parser, Debug)]
#[command(name = "token-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// IP address to listen on
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// PEM file with the server certificate and its private key
    pub server_cert: PathBuf,

    /// Service account tokens are minted for
    pub service_account: String,

    /// PEM bundle of CAs trusted to sign client certificates
    pub ca_bundle: PathBuf,

    /// Separate PEM file for the server private key
    #[arg(long)]
    pub server_key: Option<PathBuf>,

    /// Certificate revocation list for client certificates (PEM)
    #[arg(long)]
    pub crl: Option<PathBuf>,

    /// OAuth scope to request (repeatable; bare names get the googleapis prefix)
    #[arg(long = "scope", value_name = "SCOPE")]
    pub scopes: Vec<String>,

    /// Token lifetime in seconds (1-3600)
    #[arg(long)]
    pub lifetime_secs: Option<u64>,

    /// Maximum TLS handshake duration in seconds
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,

    /// Maximum duration of one upstream mint in seconds
    #[arg(long)]
    pub mint_timeout_secs: Option<u64>,

    /// Source of the broker's own credentials
    #[arg(long, value_enum)]
    pub credentials: Option<CredentialsKind>,

    /// JSON key file for `--credentials file` (default: `GOOGLE_APPLICATION_CREDENTIALS`)
    #[arg(long)]
    pub credentials_file: Option<PathBuf>,

    /// Base URL of the IAM credentials API
    #[arg(long)]
    pub iam_endpoint: Option<String>,

    /// Extra CA bundle trusted for outbound API calls
    #[arg(long, env = "TOKEN_BROKER_UPSTREAM_CA_BUNDLE")]
    pub upstream_ca_bundle: Option<PathBuf>,

    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOKEN_BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TOKEN_BROKER_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOKEN_BROKER_LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arguments_are_order_sensitive() {
        let cli = Cli::parse_from([
            "token-broker",
            "0.0.0.0",
            "4443",
            "/etc/broker/server.pem",
            "svc@project.iam",
            "/etc/broker/ca.pem",
        ]);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 4443);
        assert_eq!(cli.server_cert, PathBuf::from("/etc/broker/server.pem"));
        assert_eq!(cli.service_account, "svc@project.iam");
        assert_eq!(cli.ca_bundle, PathBuf::from("/etc/broker/ca.pem"));
        assert!(cli.scopes.is_empty());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn missing_positional_argument_is_an_error() {
        let result = Cli::try_parse_from(["token-broker", "0.0.0.0", "4443"]);
        assert!(result.is_err());
    }

    #[test]
    fn non_numeric_port_is_an_error() {
        let result = Cli::try_parse_from([
            "token-broker",
            "0.0.0.0",
            "https",
            "server.pem",
            "svc@project.iam",
            "ca.pem",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn optional_flags_parse() {
        let cli = Cli::parse_from([
            "token-broker",
            "127.0.0.1",
            "4443",
            "server.pem",
            "svc@project.iam",
            "ca.pem",
            "--scope",
            "cloud-platform",
            "--scope",
            "devstorage.read_write",
            "--lifetime-secs",
            "300",
            "--credentials",
            "env",
        ]);
        assert_eq!(cli.scopes, vec!["cloud-platform", "devstorage.read_write"]);
        assert_eq!(cli.lifetime_secs, Some(300));
        assert_eq!(cli.credentials, Some(CredentialsKind::Env));
    }
}
