// # Network-Interface IP Source
//
// This crate provides an IP source that reads the address assigned to a
// local network interface, for hosts that hold their public address directly
// (PPPoE links, routers, servers with a routed IPv6 prefix).
//
// ## Address Selection
//
// Among the interface's addresses of the source's family:
//
// 1. Loopback, unspecified, multicast and link-local addresses are never used
// 2. A globally routable address wins over a private / unique-local one
// 3. Ties keep the order the system lists the addresses in
//
// The interface table is read once per cycle, so address changes are picked
// up at the next tick without subscribing to kernel events.

use ddns_core::ProviderRegistry;
use ddns_core::config::IpSourceConfig;
use ddns_core::traits::{IpSource, IpSourceFactory, IpVersion};
use ddns_core::{Error, Result};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Interface-based IP source
#[derive(Debug, Clone)]
pub struct InterfaceIpSource {
    name: String,
    version: IpVersion,
}

impl InterfaceIpSource {
    pub fn new(name: impl Into<String>, version: IpVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait::async_trait]
impl IpSource for InterfaceIpSource {
    async fn current(&self) -> Result<IpAddr> {
        let interfaces = tokio::task::spawn_blocking(local_ip_address::list_afinet_netifas)
            .await
            .map_err(|e| Error::ip_source(format!("Interface listing task failed: {}", e)))?
            .map_err(|e| Error::ip_source(format!("Failed to list network interfaces: {}", e)))?;

        let assigned: Vec<IpAddr> = interfaces
            .into_iter()
            .filter(|(name, _)| *name == self.name)
            .map(|(_, ip)| ip)
            .collect();
        if assigned.is_empty() {
            return Err(Error::ip_source(format!(
                "Network interface {:?} not found or has no addresses",
                self.name
            )));
        }

        pick_address(&assigned, self.version).ok_or_else(|| {
            tracing::debug!("Interface {} addresses: {:?}", self.name, assigned);
            Error::ip_source(format!(
                "Network interface {:?} has no usable {} address",
                self.name, self.version
            ))
        })
    }

    fn version(&self) -> IpVersion {
        self.version
    }
}

/// Best address of `version` among `addresses`, global ones first
pub fn pick_address(addresses: &[IpAddr], version: IpVersion) -> Option<IpAddr> {
    let mut usable = addresses
        .iter()
        .copied()
        .filter(|ip| version.matches(ip) && is_usable(ip));
    let first = usable.next()?;
    if is_global(&first) {
        return Some(first);
    }
    Some(usable.find(is_global).unwrap_or(first))
}

fn is_usable(ip: &IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => !v4.is_link_local() && !v4.is_broadcast(),
        IpAddr::V6(v6) => !is_v6_link_local(v6),
    }
}

fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_private() && !is_shared_v4(v4),
        IpAddr::V6(v6) => !is_v6_unique_local(v6),
    }
}

/// 100.64.0.0/10, carrier-grade NAT
fn is_shared_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 100 && (b & 0b1100_0000) == 0b0100_0000
}

/// fe80::/10
fn is_v6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// fc00::/7
fn is_v6_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// Factory for creating interface IP sources
pub struct InterfaceFactory;

impl IpSourceFactory for InterfaceFactory {
    fn create(&self, config: &IpSourceConfig, version: IpVersion) -> Result<Box<dyn IpSource>> {
        match config {
            IpSourceConfig::Interface { name } if !name.trim().is_empty() => {
                Ok(Box::new(InterfaceIpSource::new(name.trim(), version)))
            }
            IpSourceConfig::Interface { .. } => Err(Error::config("Network interface name cannot be empty")),
            _ => Err(Error::config("Invalid config for interface IP source")),
        }
    }
}

/// Register the interface IP source with a registry
pub fn register(registry: &mut ProviderRegistry) {
    registry.register_ip_source("interface", Box::new(InterfaceFactory));
}
