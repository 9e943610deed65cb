//! Per-cycle domain set
//!
//! A [`DomainSet`] is rebuilt every cycle from the binding configuration. It
//! carries, per family, the resolved address, the parsed target domains and
//! that family's [`IpCache`]. The caches are moved in for the cycle and handed
//! back to the orchestrator afterwards with [`DomainSet::into_caches`], so they
//! persist across cycles while everything else is discarded.

use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::cache::IpCache;
use crate::config::DdnsConfig;
use crate::domain::{Domain, UpdateStatus, parse_domains};
use crate::traits::{IpSource, IpVersion};

/// Consecutive resolution failures after which the first domain is marked failed.
///
/// The mark fires when the counter is exactly this value, so one outage
/// produces one alert instead of one per tick.
pub const RESOLUTION_FAILURE_ALERT: u32 = 3;

/// Address, domains and cache of one family
#[derive(Debug, Clone)]
pub struct FamilyDomains {
    /// Address resolved this cycle, `None` if resolution failed or the family is off
    pub addr: Option<IpAddr>,
    /// Target domains in configuration order
    pub domains: Vec<Domain>,
    cache: IpCache,
}

impl FamilyDomains {
    fn new(cache: IpCache) -> Self {
        Self {
            addr: None,
            domains: Vec::new(),
            cache,
        }
    }

    pub fn cache(&self) -> &IpCache {
        &self.cache
    }

    /// Aggregate outcome of this family
    pub fn status(&self) -> UpdateStatus {
        UpdateStatus::aggregate(self.domains.iter().map(|d| &d.update_status))
    }

    /// Comma-joined rendering of the domains
    pub fn domains_string(&self) -> String {
        self.domains
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The address sources of one binding
#[derive(Default)]
pub struct IpSources {
    pub ipv4: Option<Box<dyn IpSource>>,
    pub ipv6: Option<Box<dyn IpSource>>,
}

impl IpSources {
    pub fn new(ipv4: Option<Box<dyn IpSource>>, ipv6: Option<Box<dyn IpSource>>) -> Self {
        Self { ipv4, ipv6 }
    }

    pub fn get(&self, version: IpVersion) -> Option<&dyn IpSource> {
        match version {
            IpVersion::V4 => self.ipv4.as_deref(),
            IpVersion::V6 => self.ipv6.as_deref(),
        }
    }
}

/// Resolved addresses and target domains for one reconciliation cycle
#[derive(Debug, Clone)]
pub struct DomainSet {
    pub ipv4: FamilyDomains,
    pub ipv6: FamilyDomains,
}

impl DomainSet {
    /// An empty set holding the given caches
    pub fn new(ipv4_cache: IpCache, ipv6_cache: IpCache) -> Self {
        Self {
            ipv4: FamilyDomains::new(ipv4_cache),
            ipv6: FamilyDomains::new(ipv6_cache),
        }
    }

    /// Parse the configured domains and acquire the addresses of the enabled
    /// families
    pub async fn resolve(
        config: &DdnsConfig,
        sources: &IpSources,
        ipv4_cache: IpCache,
        ipv6_cache: IpCache,
    ) -> Self {
        let mut set = Self::new(ipv4_cache, ipv6_cache);

        for version in [IpVersion::V4, IpVersion::V6] {
            let family_config = match version {
                IpVersion::V4 => &config.ipv4,
                IpVersion::V6 => &config.ipv6,
            };
            // domains of a disabled family still render in notifications
            set.family_mut(version).domains = parse_domains(&family_config.domains);
            if !family_config.enable || set.family(version).domains.is_empty() {
                continue;
            }

            let addr = match sources.get(version) {
                Some(source) => acquire(source, version, &config.name).await,
                None => {
                    warn!("[{}] No {} source configured", config.name, version);
                    None
                }
            };
            set.record_resolution(version, addr);
        }

        set
    }

    pub fn family(&self, version: IpVersion) -> &FamilyDomains {
        match version {
            IpVersion::V4 => &self.ipv4,
            IpVersion::V6 => &self.ipv6,
        }
    }

    pub fn family_mut(&mut self, version: IpVersion) -> &mut FamilyDomains {
        match version {
            IpVersion::V4 => &mut self.ipv4,
            IpVersion::V6 => &mut self.ipv6,
        }
    }

    /// Apply the outcome of one address resolution.
    ///
    /// A resolved address resets the failure counter. An unresolved one
    /// increments it, and when it reaches exactly [`RESOLUTION_FAILURE_ALERT`]
    /// the first domain of the family is marked `Failure`.
    pub fn record_resolution(&mut self, version: IpVersion, addr: Option<IpAddr>) {
        let family = self.family_mut(version);
        match addr {
            Some(ip) => {
                family.addr = Some(ip);
                family.cache.reset_failed_times();
            }
            None => {
                family.addr = None;
                let failed = family.cache.increase_failed_times();
                if failed == RESOLUTION_FAILURE_ALERT
                    && let Some(first) = family.domains.first_mut()
                {
                    first.update_status = UpdateStatus::Failure;
                }
                info!("Failed to obtain {} address ({} in a row), will not update", version, failed);
            }
        }
    }

    /// Address to apply and the domains to apply it to.
    ///
    /// Runs the family's debounce check; the address is `None` when there is
    /// nothing to apply, in which case the adapter must skip the family.
    pub fn new_ip_result(&mut self, version: IpVersion) -> (Option<IpAddr>, &mut [Domain]) {
        let family = self.family_mut(version);
        if family.cache.check(family.addr) {
            (family.addr, &mut family.domains)
        } else {
            info!(
                "{} has not changed, will wait {} times before comparing with DNS service provider",
                version,
                family.cache.times_remaining()
            );
            (None, &mut family.domains)
        }
    }

    /// Aggregate outcome of one family
    pub fn status(&self, version: IpVersion) -> UpdateStatus {
        self.family(version).status()
    }

    /// Hand the caches back to their owner
    pub fn into_caches(self) -> (IpCache, IpCache) {
        (self.ipv4.cache, self.ipv6.cache)
    }
}

async fn acquire(source: &dyn IpSource, version: IpVersion, binding: &str) -> Option<IpAddr> {
    match source.current().await {
        Ok(ip) if version.matches(&ip) => Some(ip),
        Ok(ip) => {
            warn!("[{}] {} source returned {} of the wrong family", binding, version, ip);
            None
        }
        Err(e) => {
            debug!("[{}] Failed to get {} address: {}", binding, version, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IpFamilyConfig, IpSourceConfig, ProviderConfig};
    use std::sync::Mutex;

    struct Scripted {
        version: IpVersion,
        answers: Mutex<Vec<Option<IpAddr>>>,
    }

    impl Scripted {
        fn new(version: IpVersion, answers: &[Option<&str>]) -> Box<Self> {
            let mut answers: Vec<Option<IpAddr>> =
                answers.iter().map(|a| a.map(|s| s.parse().unwrap())).collect();
            answers.reverse();
            Box::new(Self {
                version,
                answers: Mutex::new(answers),
            })
        }
    }

    #[async_trait::async_trait]
    impl IpSource for Scripted {
        async fn current(&self) -> crate::Result<IpAddr> {
            self.answers
                .lock()
                .unwrap()
                .pop()
                .flatten()
                .ok_or_else(|| crate::Error::ip_source("no address"))
        }

        fn version(&self) -> IpVersion {
            self.version
        }
    }

    fn config() -> DdnsConfig {
        let mut config = DdnsConfig::new("test", ProviderConfig::new("fake", "", ""));
        config.ipv4 = IpFamilyConfig::enabled(
            IpSourceConfig::Http { url: "http://ip.test".into() },
            vec!["a.example.com".into(), "b.example.com".into()],
        );
        config
    }

    fn caches() -> (IpCache, IpCache) {
        (IpCache::with_threshold(5), IpCache::with_threshold(5))
    }

    #[tokio::test]
    async fn resolves_enabled_families_only() {
        let sources = IpSources::new(
            Some(Scripted::new(IpVersion::V4, &[Some("1.2.3.4")])),
            Some(Scripted::new(IpVersion::V6, &[Some("2001:db8::1")])),
        );
        let (v4, v6) = caches();
        let set = DomainSet::resolve(&config(), &sources, v4, v6).await;

        assert_eq!(set.ipv4.addr, Some("1.2.3.4".parse().unwrap()));
        assert_eq!(set.ipv4.domains_string(), "a.example.com,b.example.com");
        assert_eq!(set.ipv6.addr, None);
        assert!(set.ipv6.domains.is_empty());
    }

    #[tokio::test]
    async fn disabled_family_keeps_its_domains_without_resolving() {
        let mut config = config();
        config.ipv6.domains = vec!["v6.example.com".into()];
        assert!(!config.ipv6.enable);

        let source = Scripted::new(IpVersion::V6, &[Some("2001:db8::1")]);
        let sources = IpSources::new(None, Some(source));
        let (v4, v6) = caches();
        let mut set = DomainSet::resolve(&config, &sources, v4, v6).await;

        assert_eq!(set.ipv6.domains_string(), "v6.example.com");
        assert_eq!(set.ipv6.addr, None);
        assert_eq!(set.ipv6.cache().failed_times(), 0);
        assert_eq!(set.status(IpVersion::V6), UpdateStatus::Unchanged);
        let (addr, domains) = set.new_ip_result(IpVersion::V6);
        assert!(addr.is_none());
        assert_eq!(domains.len(), 1);
    }

    #[tokio::test]
    async fn wrong_family_counts_as_failure() {
        let sources = IpSources::new(Some(Scripted::new(IpVersion::V4, &[Some("::1")])), None);
        let (v4, v6) = caches();
        let set = DomainSet::resolve(&config(), &sources, v4, v6).await;
        assert_eq!(set.ipv4.addr, None);
        assert_eq!(set.ipv4.cache().failed_times(), 1);
    }

    #[tokio::test]
    async fn failure_alert_fires_exactly_once_at_the_third_failure() {
        let sources = IpSources::new(Some(Scripted::new(IpVersion::V4, &[None; 6])), None);
        let (mut v4, mut v6) = caches();

        for attempt in 1..=6u32 {
            let set = DomainSet::resolve(&config(), &sources, v4, v6).await;
            let expected = if attempt == 3 {
                UpdateStatus::Failure
            } else {
                UpdateStatus::Unchanged
            };
            assert_eq!(set.ipv4.domains[0].update_status, expected, "attempt {attempt}");
            assert_eq!(set.ipv4.domains[1].update_status, UpdateStatus::Unchanged);
            assert_eq!(set.ipv4.cache().failed_times(), attempt);
            (v4, v6) = set.into_caches();
        }
    }

    #[tokio::test]
    async fn successful_resolution_resets_the_counter() {
        let sources = IpSources::new(
            Some(Scripted::new(IpVersion::V4, &[None, None, Some("1.2.3.4"), None])),
            None,
        );
        let (mut v4, mut v6) = caches();
        for _ in 0..4 {
            let set = DomainSet::resolve(&config(), &sources, v4, v6).await;
            assert_eq!(set.ipv4.domains[0].update_status, UpdateStatus::Unchanged);
            (v4, v6) = set.into_caches();
        }
        assert_eq!(v4.failed_times(), 1);
    }

    #[test]
    fn new_ip_result_applies_the_debounce() {
        let (v4, v6) = caches();
        let mut set = DomainSet::new(v4, v6);
        set.ipv4.domains = parse_domains(&["www.example.com"]);
        set.record_resolution(IpVersion::V4, Some("1.2.3.4".parse().unwrap()));

        let (addr, domains) = set.new_ip_result(IpVersion::V4);
        assert!(addr.is_some());
        assert_eq!(domains.len(), 1);

        let (addr, domains) = set.new_ip_result(IpVersion::V4);
        assert!(addr.is_none());
        assert_eq!(domains.len(), 1);

        // never-resolved family: nothing to apply
        let (addr, domains) = set.new_ip_result(IpVersion::V6);
        assert!(addr.is_none());
        assert!(domains.is_empty());
    }
}
