// # DNS Provider Trait
//
// Defines the contract every provider adapter satisfies.
//
// ## Implementations
//
// - Cloudflare: `ddns-provider-cloudflare` crate
// - Generic HTTP callback: `ddns-provider-callback` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::{DnsProvider, DomainSet};
//
// async fn cycle(provider: &mut dyn DnsProvider, config: &DdnsConfig, set: &mut DomainSet) {
//     provider.init(config);
//     provider.reconcile(set).await;
//     // every attempted domain now carries Success or Failure
// }
// ```

use async_trait::async_trait;

use crate::config::DdnsConfig;
use crate::domain_set::DomainSet;

/// Trait for DNS provider implementations
///
/// The orchestrator is agnostic to the concrete adapter: any type satisfying
/// this contract can be registered and driven.
///
/// # Contract
///
/// - [`init`](DnsProvider::init) is called at the start of every cycle. It must
///   be cheap and idempotent; adapters must not assume one-time setup.
/// - [`reconcile`](DnsProvider::reconcile) obtains `(address, domains)` per
///   family through [`DomainSet::new_ip_result`], which applies the debounce
///   check. When the returned address is `None` the adapter makes **no**
///   network calls for that family.
/// - Only domains actually attempted get `Success` or `Failure`; every other
///   domain keeps `Unchanged`.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Parse provider-specific responses
/// - ✅ Record per-domain outcomes on the `DomainSet`
///
/// ## Forbidden Capabilities
/// - ❌ Spawn tasks or threads (violates shutdown determinism)
/// - ❌ Implement retry logic or backoff (the next tick is the retry)
/// - ❌ Touch the caches other than through `DomainSet::new_ip_result`
/// - ❌ Make scheduling decisions (owned by `DdnsService`)
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Get the provider name (for logging/debugging)
    ///
    /// # Returns
    ///
    /// A static string identifying the provider (e.g., "cloudflare", "callback")
    fn provider_name(&self) -> &'static str;

    /// URL checked by the network gate before ticking starts.
    ///
    /// An empty string disables the gate for this provider.
    fn endpoint(&self) -> &str {
        ""
    }

    /// Refresh credentials, TTL and other per-binding settings
    fn init(&mut self, config: &DdnsConfig);

    /// Create or update the records of both families
    async fn reconcile(&mut self, domains: &mut DomainSet);
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from a binding configuration
    ///
    /// Factories validate credentials here so that a misconfigured binding is
    /// rejected before its service starts.
    ///
    /// # Returns
    ///
    /// A boxed DnsProvider trait object
    fn create(&self, config: &DdnsConfig) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
