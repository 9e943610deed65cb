// # IP Source Trait
//
// Defines the interface for acquiring the host's current address.
//
// ## Implementations
//
// - HTTP "what is my IP" services: `ddns-ip-http` crate
// - Local shell command: `ddns-ip-command` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::IpSource;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* IpSource implementation */;
//     let current_ip = source.current().await?;
//     println!("current address: {current_ip}");
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP version (v4 or v6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// DNS record type carrying this family
    pub fn record_type(&self) -> &'static str {
        match self {
            IpVersion::V4 => "A",
            IpVersion::V6 => "AAAA",
        }
    }

    /// Whether `ip` belongs to this family
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            IpVersion::V4 => ip.is_ipv4(),
            IpVersion::V6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => f.write_str("IPv4"),
            IpVersion::V6 => f.write_str("IPv6"),
        }
    }
}

/// Trait for IP source implementations
///
/// An IP source answers one question: what is the host's address for its
/// family right now. It is polled once per reconciliation cycle by the
/// orchestrator; it must not cache, retry or schedule on its own.
///
/// Errors are not fatal. The orchestrator treats any error as an unresolved
/// address for this cycle and counts it towards the resolution-failure alert.
#[async_trait]
pub trait IpSource: Send + Sync {
    /// Get the current IP address
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: The current IP address, of the source's family
    /// - `Err(Error)`: If unable to determine the current IP
    async fn current(&self) -> Result<IpAddr, crate::Error>;

    /// Get the IP version this source resolves
    fn version(&self) -> IpVersion;
}

/// Helper trait for constructing IP sources from configuration
pub trait IpSourceFactory: Send + Sync {
    /// Create an IpSource instance for one address family
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this IP source type
    /// - `version`: The family the source must resolve
    fn create(
        &self,
        config: &crate::config::IpSourceConfig,
        version: IpVersion,
    ) -> Result<Box<dyn IpSource>, crate::Error>;
}

/// Find the first address of `version` in free-form text (HTTP bodies, command output)
pub fn find_address(text: &str, version: IpVersion) -> Option<IpAddr> {
    text.split(|c: char| !(c.is_ascii_hexdigit() || c == '.' || c == ':'))
        .map(|token| token.trim_matches(|c| c == '.' || c == ':'))
        .filter(|token| !token.is_empty())
        .find_map(|token| match version {
            IpVersion::V4 => token.parse::<Ipv4Addr>().ok().map(IpAddr::V4),
            IpVersion::V6 => token.parse::<Ipv6Addr>().ok().map(IpAddr::V6),
        })
}
