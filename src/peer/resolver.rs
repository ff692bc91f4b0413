//! Reverse address resolution.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use super::VerifyError;

/// Maps a peer address to its canonical hostname.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `ip` to a hostname.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::NoReverseRecord`] when no name exists.
    async fn resolve(&self, ip: IpAddr) -> Result<String, VerifyError>;
}

/// Resolver backed by the operating system (`getnameinfo` with `NI_NAMEREQD`).
///
/// Honours `/etc/hosts` and the system's DNS configuration. The blocking call
/// runs on tokio's blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<String, VerifyError> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip))
            .await
            .map_err(|e| VerifyError::NoReverseRecord {
                ip,
                reason: format!("lookup task failed: {e}"),
            })?;

        let name = lookup.map_err(|e| VerifyError::NoReverseRecord {
            ip,
            reason: e.to_string(),
        })?;

        // A numeric answer means there was no PTR record.
        if name.is_empty() || name.parse::<IpAddr>().is_ok() {
            return Err(VerifyError::NoReverseRecord {
                ip,
                reason: "resolver returned no name".to_string(),
            });
        }

        debug!(%ip, hostname = %name, "Reverse lookup");
        Ok(name)
    }
}

/// Resolver answering from a fixed address table.
///
/// Used where the host table is known up front (tests, static deployments).
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<IpAddr, String>,
}

impl StaticResolver {
    /// Empty table: every lookup fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `ip → hostname` entry.
    #[must_use]
    pub fn with_host(mut self, ip: IpAddr, hostname: impl Into<String>) -> Self {
        self.hosts.insert(ip, hostname.into());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<String, VerifyError> {
        self.hosts
            .get(&ip)
            .cloned()
            .ok_or_else(|| VerifyError::NoReverseRecord {
                ip,
                reason: "address not in host table".to_string(),
            })
    }
}
