//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal test doubles that verify architectural
//! constraints without talking to real IP services or DNS providers.

#![allow(dead_code)]

use ddns_core::config::{DdnsConfig, IpFamilyConfig, IpSourceConfig, ProviderConfig};
use ddns_core::error::{Error, Result};
use ddns_core::net::Reachability;
use ddns_core::traits::{DnsProvider, IpSource, IpVersion};
use ddns_core::{DdnsService, DomainSet, IpSources, UpdateStatus};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An IP source replaying a fixed script of answers
///
/// `None` entries fail the resolution. Once the script is exhausted the last
/// answer repeats.
pub struct ScriptedIpSource {
    version: IpVersion,
    script: Vec<Option<IpAddr>>,
    /// Call counter for current()
    call_count: Arc<AtomicUsize>,
}

impl ScriptedIpSource {
    pub fn new(version: IpVersion, script: &[Option<&str>]) -> Self {
        Self {
            version,
            script: script
                .iter()
                .map(|answer| answer.map(|ip| ip.parse().unwrap()))
                .collect(),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// IPv4 source answering with the given addresses in order
    pub fn v4(addresses: &[&str]) -> Self {
        let script: Vec<Option<&str>> = addresses.iter().copied().map(Some).collect();
        Self::new(IpVersion::V4, &script)
    }

    /// Get the number of times current() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Create a new ScriptedIpSource that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            version: other.version,
            script: other.script.clone(),
            call_count: Arc::clone(&other.call_count),
        }
    }
}

#[async_trait::async_trait]
impl IpSource for ScriptedIpSource {
    async fn current(&self) -> Result<IpAddr> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.script.len().saturating_sub(1));
        self.script
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| Error::ip_source("scripted failure"))
    }

    fn version(&self) -> IpVersion {
        self.version
    }
}

/// A network-gate check replaying a fixed script of answers
///
/// Once the script is exhausted the last answer repeats.
pub struct ScriptedReachability {
    script: Vec<std::result::Result<(), String>>,
    /// When each check ran
    checked_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
}

impl ScriptedReachability {
    pub fn new(script: &[std::result::Result<(), &str>]) -> Self {
        Self {
            script: script
                .iter()
                .map(|answer| answer.map_err(str::to_string))
                .collect(),
            checked_at: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Instants at which the gate ran a check, in order
    pub fn checked_at(&self) -> Vec<tokio::time::Instant> {
        self.checked_at.lock().unwrap().clone()
    }

    /// Create a new ScriptedReachability that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            script: other.script.clone(),
            checked_at: Arc::clone(&other.checked_at),
        }
    }
}

#[async_trait::async_trait]
impl Reachability for ScriptedReachability {
    async fn check(&self, _endpoint: &str) -> std::result::Result<(), String> {
        let call = {
            let mut checked_at = self.checked_at.lock().unwrap();
            checked_at.push(tokio::time::Instant::now());
            checked_at.len() - 1
        };
        let index = call.min(self.script.len().saturating_sub(1));
        self.script.get(index).cloned().unwrap_or(Ok(()))
    }
}

/// A provider that records every address it was asked to apply
pub struct RecordingProvider {
    /// Call counter for init()
    init_count: Arc<AtomicUsize>,
    /// Call counter for reconcile()
    reconcile_count: Arc<AtomicUsize>,
    /// Addresses actually applied (non-skipped families)
    applied: Arc<Mutex<Vec<(IpVersion, IpAddr)>>>,
    /// When set, every attempted domain is marked Failure
    fail: Arc<AtomicBool>,
    endpoint: String,
    /// Time each reconcile() takes
    delay: Duration,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            init_count: Arc::new(AtomicUsize::new(0)),
            reconcile_count: Arc::new(AtomicUsize::new(0)),
            applied: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
            endpoint: String::new(),
            delay: Duration::ZERO,
        }
    }

    /// A provider whose network gate checks `endpoint`
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// A provider whose reconcile() takes `delay` to finish
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Get the number of times init() was called
    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    /// Get the number of times reconcile() was called
    pub fn reconcile_count(&self) -> usize {
        self.reconcile_count.load(Ordering::SeqCst)
    }

    /// Addresses the provider was asked to apply, in order
    pub fn applied(&self) -> Vec<IpAddr> {
        self.applied.lock().unwrap().iter().map(|(_, ip)| *ip).collect()
    }

    /// Make subsequent attempts fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Create a new RecordingProvider that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            init_count: Arc::clone(&other.init_count),
            reconcile_count: Arc::clone(&other.reconcile_count),
            applied: Arc::clone(&other.applied),
            fail: Arc::clone(&other.fail),
            endpoint: other.endpoint.clone(),
            delay: other.delay,
        }
    }
}

#[async_trait::async_trait]
impl DnsProvider for RecordingProvider {
    fn provider_name(&self) -> &'static str {
        "recording"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn init(&mut self, _config: &DdnsConfig) {
        self.init_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn reconcile(&mut self, domains: &mut DomainSet) {
        self.reconcile_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let status = if self.fail.load(Ordering::SeqCst) {
            UpdateStatus::Failure
        } else {
            UpdateStatus::Success
        };

        for version in [IpVersion::V4, IpVersion::V6] {
            let (addr, targets) = domains.new_ip_result(version);
            let Some(addr) = addr else {
                continue;
            };
            self.applied.lock().unwrap().push((version, addr));
            for domain in targets.iter_mut() {
                domain.update_status = status;
            }
        }
    }
}

/// Helper to create a minimal IPv4 binding for testing
pub fn minimal_config(name: &str, delay_secs: u64) -> DdnsConfig {
    let mut config = DdnsConfig::new(name, ProviderConfig::new("recording", "id", "secret"));
    config.delay_secs = delay_secs;
    config.ipv4 = IpFamilyConfig::enabled(
        IpSourceConfig::Http {
            url: "https://ip.test".to_string(),
        },
        vec!["www.example.com".to_string()],
    );
    config
}

/// Build a service around a scripted source and a recording provider
pub fn service_with(
    config: DdnsConfig,
    source: ScriptedIpSource,
    provider: RecordingProvider,
    threshold: u32,
) -> DdnsService {
    DdnsService::new(
        config,
        Box::new(provider),
        IpSources::new(Some(Box::new(source)), None),
    )
    .with_cache_threshold(threshold)
}
