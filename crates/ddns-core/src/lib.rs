// # ddns-core
//
// Core library for the DDNS update orchestrator.
//
// ## Architecture Overview
//
// This library provides the core functionality for dynamic DNS updates:
// - **IpSource**: Trait for acquiring the host's current address per family
// - **DnsProvider**: Trait for reconciling records via a provider API
// - **IpCache**: Per-family debounce and resolution-failure state
// - **DomainSet**: The domains and addresses of one reconciliation cycle
// - **DdnsService**: Orchestrator that ticks one binding through its lifecycle
// - **WebhookNotifier**: Post-cycle outcome notifications
// - **ProviderRegistry**: Registration table from codes to factories
// - **Overwatch**: Keyed set of running services, restarted on config change
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Orchestration is separate from adapters
// 2. **Polling with Debounce**: Unchanged addresses reach the provider only every N ticks
// 3. **Plugin-Based**: Providers are registered by code, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Deterministic Shutdown**: Stopping a service waits for its loop to acknowledge

pub mod cache;
pub mod config;
pub mod domain;
pub mod domain_set;
pub mod engine;
pub mod error;
pub mod net;
pub mod overwatch;
pub mod registry;
pub mod traits;
pub mod webhook;

// Re-export core types for convenience
pub use cache::IpCache;
pub use config::{DdnsConfig, IpFamilyConfig, IpSourceConfig, ProviderConfig, WebhookConfig};
pub use domain::{CustomParams, Domain, UpdateStatus, parse_domain, parse_domains};
pub use domain_set::{DomainSet, FamilyDomains, IpSources};
pub use engine::{CycleReport, DdnsService, ServiceStatus};
pub use error::{Error, Result};
pub use overwatch::{Overwatch, ServiceCallback};
pub use registry::ProviderRegistry;
pub use traits::{DnsProvider, DnsProviderFactory, IpSource, IpSourceFactory, IpVersion};
pub use webhook::{WebhookNotifier, WebhookRequest};
