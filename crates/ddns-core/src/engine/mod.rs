//! DDNS update orchestrator
//!
//! A [`DdnsService`] drives one binding: it waits for the provider to become
//! reachable, then runs one reconciliation cycle per tick until it is stopped
//! or closed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   address    ┌──────────────┐   DomainSet   ┌─────────────┐
//! │  IpSource   │─────────────▶│  DdnsService │──────────────▶│ DnsProvider │
//! │ (v4 / v6)   │              │  (per tick)  │◀──────────────│ (reconcile) │
//! └─────────────┘              └──────────────┘   statuses    └─────────────┘
//!                                     │
//!                                     ▼
//!                              ┌──────────────┐
//!                              │   Webhook    │
//!                              └──────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! Ready ──start──▶ Running ◀──pause/resume──▶ Stopped
//!                     │                          │
//!                     └────────close─────────────┴──▶ Closed
//! ```
//!
//! [`DdnsService::stop`] is a rendezvous: it returns only after the run loop
//! has acknowledged the signal, so no cycle is in flight afterwards.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::IpCache;
use crate::config::DdnsConfig;
use crate::domain::UpdateStatus;
use crate::domain_set::{DomainSet, IpSources};
use crate::error::{Error, Result};
use crate::net;
use crate::traits::{DnsProvider, IpVersion};
use crate::webhook::WebhookNotifier;

/// Pause between reachability checks
pub const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`DdnsService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceStatus {
    /// Created, not started yet
    Ready = 0,
    /// Ticking and reconciling
    Running = 1,
    /// Ticking without reconciling
    Stopped = 2,
    /// Terminal; the loop exits at its next tick
    Closed = 3,
}

impl ServiceStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServiceStatus::Ready,
            1 => ServiceStatus::Running,
            2 => ServiceStatus::Stopped,
            _ => ServiceStatus::Closed,
        }
    }
}

/// Outcome of one reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub ipv4: UpdateStatus,
    pub ipv6: UpdateStatus,
    pub finished_at: DateTime<Utc>,
}

/// State owned by whoever is running a cycle
struct Worker {
    provider: Box<dyn DnsProvider>,
    sources: IpSources,
    ipv4_cache: IpCache,
    ipv6_cache: IpCache,
    first_run: bool,
    webhook: Option<WebhookNotifier>,
}

enum GateOutcome {
    Connected,
    Stopped(Option<oneshot::Sender<()>>),
}

type StopSignal = oneshot::Sender<()>;

/// Orchestrator for one binding
///
/// Shared behind an `Arc`: the run loop borrows it for its whole lifetime
/// while control calls ([`stop`](Self::stop), [`pause`](Self::pause), ...)
/// come from other tasks.
pub struct DdnsService {
    name: String,
    provider_name: &'static str,
    endpoint: String,
    hash: String,
    config: DdnsConfig,

    status: AtomicU8,
    started: AtomicBool,
    worker: Mutex<Worker>,

    /// Stop rendezvous; the payload is the acknowledgement channel
    stop_tx: mpsc::Sender<StopSignal>,
    /// Parked until the run loop takes it
    stop_rx: Mutex<Option<mpsc::Receiver<StopSignal>>>,

    last_cycle_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    reachability: Box<dyn net::Reachability>,
}

impl DdnsService {
    /// Create a service for one binding
    ///
    /// The debounce threshold of both caches comes from the environment; see
    /// [`with_cache_threshold`](Self::with_cache_threshold) to set it explicitly.
    pub fn new(config: DdnsConfig, provider: Box<dyn DnsProvider>, sources: IpSources) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let webhook = config
            .webhook
            .as_ref()
            .filter(|hook| !hook.url.trim().is_empty())
            .cloned()
            .map(WebhookNotifier::new);

        Self {
            name: config.name.clone(),
            provider_name: provider.provider_name(),
            endpoint: provider.endpoint().to_string(),
            hash: config.content_hash(),
            status: AtomicU8::new(ServiceStatus::Ready as u8),
            started: AtomicBool::new(false),
            worker: Mutex::new(Worker {
                provider,
                sources,
                ipv4_cache: IpCache::new(),
                ipv6_cache: IpCache::new(),
                first_run: true,
                webhook,
            }),
            stop_tx,
            stop_rx: Mutex::new(Some(stop_rx)),
            last_cycle_at: std::sync::Mutex::new(None),
            reachability: Box::new(net::HttpReachability::default()),
            config,
        }
    }

    /// Override the debounce threshold of both caches
    pub fn with_cache_threshold(mut self, threshold: u32) -> Self {
        let worker = self.worker.get_mut();
        worker.ipv4_cache = IpCache::with_threshold(threshold);
        worker.ipv6_cache = IpCache::with_threshold(threshold);
        self
    }

    /// Replace the check used by the network gate
    pub fn with_reachability(mut self, reachability: Box<dyn net::Reachability>) -> Self {
        self.reachability = reachability;
        self
    }

    /// Binding name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider code of the adapter
    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    /// Reachability endpoint of the adapter, empty when the gate is disabled
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Content hash of the binding configuration
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn config(&self) -> &DdnsConfig {
        &self.config
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// When the last reconciliation cycle finished
    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        self.last_cycle_at.lock().map(|at| *at).unwrap_or(None)
    }

    fn set_status(&self, status: ServiceStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: ServiceStatus, to: ServiceStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Run the service until it is stopped or closed.
    ///
    /// Waits for the provider endpoint to be reachable, then ticks every
    /// `delay`. Can be called once per service.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted(self.name.clone()));
        }
        if self.status() == ServiceStatus::Closed {
            return Err(Error::Closed(self.name.clone()));
        }

        let Some(mut stop_rx) = self.stop_rx.lock().await.take() else {
            // stopped before the loop ever ran
            debug!("[{}] Stopped before start, not running", self.name);
            return Ok(());
        };

        self.transition(ServiceStatus::Ready, ServiceStatus::Running);
        info!(
            "[{}] Starting {} DDNS service (every {}s)",
            self.name, self.provider_name, self.config.delay_secs
        );

        if !self.endpoint.is_empty()
            && let GateOutcome::Stopped(ack) = self.wait_for_network(&mut stop_rx).await
        {
            acknowledge(ack);
            info!("[{}] DDNS service stopped while waiting for network", self.name);
            return Ok(());
        }

        let delay = self.config.delay();
        let mut ticker = tokio::time::interval_at(Instant::now() + delay, delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                ack = stop_rx.recv() => {
                    acknowledge(ack);
                    info!("[{}] DDNS service has been stopped", self.name);
                    return Ok(());
                }

                _ = ticker.tick() => match self.status() {
                    ServiceStatus::Running => {
                        debug!("[{}] DDNS service is running", self.name);
                        self.run_once().await;
                    }
                    ServiceStatus::Stopped => {
                        debug!("[{}] DDNS service is paused", self.name);
                    }
                    ServiceStatus::Closed => {
                        info!("[{}] DDNS service is closed", self.name);
                        return Ok(());
                    }
                    ServiceStatus::Ready => {}
                }
            }
        }
    }

    /// Stop the run loop and wait for it to acknowledge.
    ///
    /// Returns immediately if the loop never started or has already exited.
    pub async fn stop(&self) {
        let _ = self
            .status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != ServiceStatus::Closed as u8).then_some(ServiceStatus::Stopped as u8)
            });

        {
            let mut parked = self.stop_rx.lock().await;
            if parked.take().is_some() {
                debug!("[{}] Stopped before the run loop started", self.name);
                return;
            }
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).await.is_err() {
            // loop already gone
            return;
        }
        // An Err here means the loop exited without reading the signal
        let _ = ack_rx.await;
    }

    /// Keep ticking without reconciling
    pub fn pause(&self) -> bool {
        let paused = self.transition(ServiceStatus::Running, ServiceStatus::Stopped);
        if paused {
            info!("[{}] DDNS service paused", self.name);
        }
        paused
    }

    /// Reconcile again after a [`pause`](Self::pause)
    pub fn resume(&self) -> bool {
        let resumed = self.transition(ServiceStatus::Stopped, ServiceStatus::Running);
        if resumed {
            info!("[{}] DDNS service resumed", self.name);
        }
        resumed
    }

    /// Mark the service closed; the run loop exits at its next tick
    pub fn close(&self) {
        self.set_status(ServiceStatus::Closed);
        info!("[{}] DDNS service closed", self.name);
    }

    /// Run one reconciliation cycle
    pub async fn run_once(&self) -> CycleReport {
        let mut guard = self.worker.lock().await;
        let worker = &mut *guard;

        let (fresh_ipv4, fresh_ipv6) = (worker.ipv4_cache.fresh(), worker.ipv6_cache.fresh());
        let (ipv4_cache, ipv6_cache) = if worker.first_run {
            // a restart always reaches the provider at least once
            (fresh_ipv4, fresh_ipv6)
        } else {
            (
                std::mem::replace(&mut worker.ipv4_cache, fresh_ipv4),
                std::mem::replace(&mut worker.ipv6_cache, fresh_ipv6),
            )
        };
        let mut set = DomainSet::resolve(&self.config, &worker.sources, ipv4_cache, ipv6_cache).await;

        worker.provider.init(&self.config);
        worker.provider.reconcile(&mut set).await;

        let ipv4 = set.status(IpVersion::V4);
        let ipv6 = set.status(IpVersion::V6);

        if let Some(webhook) = &worker.webhook
            && let Err(e) = webhook.notify(&set).await
        {
            warn!("[{}] {}", self.name, e);
        }

        let (mut ipv4_cache, mut ipv6_cache) = set.into_caches();
        // a failed family is retried on the next tick instead of being debounced
        if ipv4 == UpdateStatus::Failure {
            ipv4_cache = ipv4_cache.fresh();
        }
        if ipv6 == UpdateStatus::Failure {
            ipv6_cache = ipv6_cache.fresh();
        }
        worker.ipv4_cache = ipv4_cache;
        worker.ipv6_cache = ipv6_cache;
        worker.first_run = false;

        let finished_at = Utc::now();
        if let Ok(mut at) = self.last_cycle_at.lock() {
            *at = Some(finished_at);
        }

        debug!("[{}] Cycle finished: IPv4 {}, IPv6 {}", self.name, ipv4, ipv6);
        CycleReport {
            ipv4,
            ipv6,
            finished_at,
        }
    }

    /// Check the provider endpoint until it answers or a stop arrives
    async fn wait_for_network(&self, stop_rx: &mut mpsc::Receiver<StopSignal>) -> GateOutcome {
        let mut override_tried = false;
        loop {
            let checked = tokio::select! {
                biased;
                ack = stop_rx.recv() => return GateOutcome::Stopped(ack),
                checked = self.reachability.check(&self.endpoint) => checked,
            };

            match checked {
                Ok(()) => {
                    debug!("[{}] Network is connected: {}", self.name, self.endpoint);
                    return GateOutcome::Connected;
                }
                Err(message) if !override_tried && net::is_loopback_resolver_error(&message) => {
                    override_tried = true;
                    if net::set_dns_server_override(net::FALLBACK_DNS_SERVER) {
                        debug!(
                            "[{}] Resolving via {} failed, using {} as DNS server (set {} to choose another)",
                            self.name,
                            net::LOOPBACK_NAMESERVER,
                            net::FALLBACK_DNS_SERVER,
                            net::DNS_SERVER_ENV
                        );
                    }
                    continue;
                }
                Err(message) => {
                    debug!(
                        "[{}] Waiting for network connection: {}. Retrying in {:?}",
                        self.name, message, NETWORK_RETRY_DELAY
                    );
                }
            }

            tokio::select! {
                biased;
                ack = stop_rx.recv() => return GateOutcome::Stopped(ack),
                _ = tokio::time::sleep(NETWORK_RETRY_DELAY) => {}
            }
        }
    }
}

impl std::fmt::Debug for DdnsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdnsService")
            .field("name", &self.name)
            .field("provider", &self.provider_name)
            .field("status", &self.status())
            .field("hash", &self.hash)
            .finish()
    }
}

fn acknowledge(ack: Option<StopSignal>) {
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    struct Noop;

    #[async_trait::async_trait]
    impl DnsProvider for Noop {
        fn provider_name(&self) -> &'static str {
            "noop"
        }

        fn init(&mut self, _config: &DdnsConfig) {}

        async fn reconcile(&mut self, _domains: &mut DomainSet) {}
    }

    fn service() -> DdnsService {
        let config = DdnsConfig::new("home", ProviderConfig::new("noop", "", ""));
        DdnsService::new(config, Box::new(Noop), IpSources::default())
    }

    #[test]
    fn status_round_trips_through_u8() {
        for status in [
            ServiceStatus::Ready,
            ServiceStatus::Running,
            ServiceStatus::Stopped,
            ServiceStatus::Closed,
        ] {
            assert_eq!(ServiceStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn pause_and_resume_only_move_between_running_and_stopped() {
        let service = service();
        assert_eq!(service.status(), ServiceStatus::Ready);
        assert!(!service.pause());
        assert!(!service.resume());

        service.set_status(ServiceStatus::Running);
        assert!(service.pause());
        assert_eq!(service.status(), ServiceStatus::Stopped);
        assert!(service.resume());
        assert_eq!(service.status(), ServiceStatus::Running);

        service.close();
        assert!(!service.pause());
        assert!(!service.resume());
        assert_eq!(service.status(), ServiceStatus::Closed);
    }

    #[tokio::test]
    async fn stop_before_start_prevents_the_loop() {
        let service = service();
        service.stop().await;
        assert_eq!(service.status(), ServiceStatus::Stopped);
        service.start().await.unwrap();
        assert!(matches!(service.start().await, Err(Error::AlreadyStarted(_))));
    }

    #[tokio::test]
    async fn closed_service_refuses_to_start() {
        let service = service();
        service.close();
        assert!(matches!(service.start().await, Err(Error::Closed(_))));
        // stop after close keeps the terminal state
        service.stop().await;
        assert_eq!(service.status(), ServiceStatus::Closed);
    }

    #[tokio::test]
    async fn run_once_records_the_cycle() {
        let service = service();
        assert!(service.last_cycle_at().is_none());
        let report = service.run_once().await;
        assert_eq!(report.ipv4, UpdateStatus::Unchanged);
        assert_eq!(report.ipv6, UpdateStatus::Unchanged);
        assert_eq!(service.last_cycle_at(), Some(report.finished_at));
    }

    #[test]
    fn hash_follows_the_configuration() {
        let a = service();
        let b = service();
        assert_eq!(a.hash(), b.hash());

        let mut config = a.config().clone();
        config.delay_secs = 60;
        let c = DdnsService::new(config, Box::new(Noop), IpSources::default());
        assert_ne!(a.hash(), c.hash());
    }
}
