//! Provider and IP source registration table
//!
//! The registry maps provider codes and acquisition types to factories, so
//! bindings select their implementations by name instead of through
//! hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ddns_core::registry::ProviderRegistry;
//!
//! let mut registry = ProviderRegistry::new();
//! ddns_provider_cloudflare::register(&mut registry);
//! ddns_ip_http::register(&mut registry);
//!
//! let service = registry.create_service(config)?;
//! ```
//!
//! ## Registration
//!
//! Implementations expose a `register` function and are wired up once at startup:
//!
//! ```rust,ignore
//! // In ddns-provider-cloudflare crate
//! pub fn register(registry: &mut ProviderRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```
//!
//! The table is filled before any service is created and only read afterwards,
//! so it needs no interior locking; share it behind an `Arc` once built.

use std::collections::HashMap;
use tracing::debug;

use crate::config::{DdnsConfig, IpSourceConfig};
use crate::domain_set::IpSources;
use crate::engine::DdnsService;
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsProviderFactory, IpSource, IpSourceFactory, IpVersion};

/// Registration table for DNS providers and IP sources
#[derive(Default)]
pub struct ProviderRegistry {
    /// DNS provider factories by provider code
    providers: HashMap<String, Box<dyn DnsProviderFactory>>,

    /// IP source factories by acquisition type
    ip_sources: HashMap<String, Box<dyn IpSourceFactory>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory
    ///
    /// Registering the same code twice replaces the earlier factory.
    pub fn register_provider(
        &mut self,
        name: impl Into<String>,
        factory: Box<dyn DnsProviderFactory>,
    ) {
        let name = name.into();
        debug!("Registered DNS provider: {}", name);
        self.providers.insert(name, factory);
    }

    /// Register an IP source factory
    pub fn register_ip_source(&mut self, name: impl Into<String>, factory: Box<dyn IpSourceFactory>) {
        let name = name.into();
        debug!("Registered IP source: {}", name);
        self.ip_sources.insert(name, factory);
    }

    /// Create the DNS provider of a binding
    pub fn create_provider(&self, config: &DdnsConfig) -> Result<Box<dyn DnsProvider>> {
        let provider_type = config.dns.type_name();
        let factory = self
            .providers
            .get(provider_type)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?;

        factory.create(config)
    }

    /// Create an IP source for one family
    pub fn create_ip_source(
        &self,
        config: &IpSourceConfig,
        version: IpVersion,
    ) -> Result<Box<dyn IpSource>> {
        let source_type = config.type_name();
        let factory = self
            .ip_sources
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown IP source type: {}", source_type)))?;

        factory.create(config, version)
    }

    /// Assemble a ready-to-start service for a binding
    ///
    /// Validates the binding, then creates its provider and one IP source per
    /// enabled family.
    pub fn create_service(&self, config: DdnsConfig) -> Result<DdnsService> {
        config.validate()?;

        let provider = self.create_provider(&config)?;
        let ipv4 = self.family_source(&config, IpVersion::V4)?;
        let ipv6 = self.family_source(&config, IpVersion::V6)?;

        Ok(DdnsService::new(config, provider, IpSources::new(ipv4, ipv6)))
    }

    fn family_source(
        &self,
        config: &DdnsConfig,
        version: IpVersion,
    ) -> Result<Option<Box<dyn IpSource>>> {
        let family = match version {
            IpVersion::V4 => &config.ipv4,
            IpVersion::V6 => &config.ipv6,
        };
        if !family.enable {
            return Ok(None);
        }
        match &family.source {
            Some(source) => self.create_ip_source(source, version).map(Some),
            None => Err(Error::config(format!(
                "Binding {}: {} is enabled but has no source",
                config.name, version
            ))),
        }
    }

    /// List all registered provider codes
    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all registered IP source types
    pub fn list_ip_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ip_sources.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider code is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Check if an IP source type is registered
    pub fn has_ip_source(&self, name: &str) -> bool {
        self.ip_sources.contains_key(name)
    }
}
