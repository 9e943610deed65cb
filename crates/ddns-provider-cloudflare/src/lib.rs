// # Cloudflare DNS Provider
//
// This crate provides the Cloudflare adapter for the DDNS orchestrator.
//
// ## Behavior
//
// For every family whose address survives the debounce check, each target
// domain is reconciled on its own:
//
// 1. Look up the zone by the domain's registrable name (must match exactly one active zone)
// 2. List the records of the family's type under the full name
// 3. Create the record if none exists, otherwise update every record whose
//    content differs; matching records are left alone
//
// The `proxied` custom parameter (`www.example.com?proxied=true`) sets the
// proxy flag on create, and on update only when present.
//
// ## Architectural Constraints
//
// ### Trust Level: Untrusted (DNS Provider)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP/HTTPS API calls to the Cloudflare API only
// - ✅ Parse provider-specific responses
// - ✅ Record per-domain outcomes on the `DomainSet`
//
// **Forbidden Capabilities** (enforced by code review):
// - ❌ Spawn tasks or threads (violates shutdown determinism)
// - ❌ Implement retry logic (the next tick is the retry)
// - ❌ Touch the caches other than through `DomainSet::new_ip_result`
//
// ## Security Requirements
//
// - API token NEVER appears in logs
// - Factory MUST fail fast if the token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...&status=active`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=...&name=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use ddns_core::config::DdnsConfig;
use ddns_core::net::{DEFAULT_HTTP_TIMEOUT, error_chain, http_client};
use ddns_core::traits::{DnsProvider, DnsProviderFactory, IpVersion};
use ddns_core::{Domain, DomainSet, Error, ProviderRegistry, Result, UpdateStatus};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;
use url::Url;

/// Provider code
pub const PROVIDER: &str = "cloudflare";

/// Cloudflare zones endpoint; also checked by the network gate
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4/zones";

/// TTL 1 means "automatic" to Cloudflare
const DEFAULT_TTL: u32 = 1;

/// Page size for zone and record listings
const PER_PAGE: &str = "50";

/// Response envelope shared by every Cloudflare API call
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<Value>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

/// A DNS record as listed and written by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DnsRecord {
    #[serde(default, skip_serializing)]
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    #[serde(default)]
    proxied: bool,
    #[serde(default)]
    ttl: u32,
}

/// Cloudflare DNS provider
///
/// # Trust Level: Untrusted
///
/// Stateless across cycles apart from the settings refreshed by `init`.
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Record TTL applied on create and update
    ttl: u32,

    /// Zones endpoint, overridable for tests
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("ttl", &self.ttl)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    ///
    /// # Security
    ///
    /// The API token will NEVER be logged or displayed in error messages.
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        Ok(Self {
            api_token,
            ttl: DEFAULT_TTL,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            client: http_client(DEFAULT_HTTP_TIMEOUT),
        })
    }

    /// Point the provider at another zones endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Reconcile one domain and report its outcome
    async fn sync_domain(&self, domain: &Domain, version: IpVersion, addr: IpAddr) -> Result<UpdateStatus> {
        let zone_id = self.zone_id(&domain.domain_name).await?;
        let records = self
            .list_records(&zone_id, version.record_type(), &domain.to_string())
            .await?;

        if records.is_empty() {
            self.create(&zone_id, domain, version, addr).await?;
            tracing::info!("Created DNS record {} -> {}", domain, addr);
            return Ok(UpdateStatus::Success);
        }

        let content = addr.to_string();
        let mut status = UpdateStatus::Unchanged;
        for record in records {
            if record.content == content {
                tracing::info!("Your IP {} has not changed, domain {}", addr, domain);
                continue;
            }
            self.modify(&zone_id, record, domain, &content).await?;
            tracing::info!("Updated DNS record {} -> {}", domain, addr);
            status = UpdateStatus::Success;
        }
        Ok(status)
    }

    /// Find the single active zone named `zone_name`
    async fn zone_id(&self, zone_name: &str) -> Result<String> {
        let url = self.url(&[], &[("name", zone_name), ("status", "active"), ("per_page", PER_PAGE)])?;
        let zones: Vec<Zone> = self.request(Method::GET, url, None).await?;

        match zones.as_slice() {
            [zone] => Ok(zone.id.clone()),
            [] => Err(Error::not_found(format!("Zone not found: {}", zone_name))),
            _ => Err(Error::provider(
                PROVIDER,
                format!("Zone {} is ambiguous ({} matches)", zone_name, zones.len()),
            )),
        }
    }

    async fn list_records(&self, zone_id: &str, record_type: &str, name: &str) -> Result<Vec<DnsRecord>> {
        let url = self.url(
            &[zone_id, "dns_records"],
            &[("type", record_type), ("name", name), ("per_page", PER_PAGE)],
        )?;
        self.request(Method::GET, url, None).await
    }

    async fn create(&self, zone_id: &str, domain: &Domain, version: IpVersion, addr: IpAddr) -> Result<()> {
        let record = DnsRecord {
            id: String::new(),
            name: domain.to_string(),
            record_type: version.record_type().to_string(),
            content: addr.to_string(),
            proxied: domain.custom_params.get("proxied") == Some("true"),
            ttl: self.ttl,
        };
        let url = self.url(&[zone_id, "dns_records"], &[])?;
        let _: Value = self.request(Method::POST, url, Some(&record)).await?;
        Ok(())
    }

    async fn modify(&self, zone_id: &str, mut record: DnsRecord, domain: &Domain, content: &str) -> Result<()> {
        record.content = content.to_string();
        record.ttl = self.ttl;
        if let Some(proxied) = domain.custom_params.get("proxied") {
            record.proxied = proxied == "true";
        }
        let url = self.url(&[zone_id, "dns_records", &record.id], &[])?;
        let _: Value = self.request(Method::PUT, url, Some(&record)).await?;
        Ok(())
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("Invalid Cloudflare API URL: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::config("Cloudflare API URL cannot be a base"))?;
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Issue one API call and unwrap the response envelope
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&DnsRecord>,
    ) -> Result<T> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            Error::provider(PROVIDER, format!("HTTP request failed: {}", error_chain(&e)))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), &error_text));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to parse response: {}", e)))?;

        if !envelope.success {
            return Err(Error::provider(
                PROVIDER,
                format!("API call unsuccessful: {}", Value::from(envelope.errors)),
            ));
        }
        envelope
            .result
            .ok_or_else(|| Error::provider(PROVIDER, "Invalid response format: missing result"))
    }
}

/// Map an HTTP error status to a descriptive error
fn status_error(status: u16, error_text: &str) -> Error {
    match status {
        401 | 403 => Error::provider(
            PROVIDER,
            format!("Authentication failed: Invalid API token or insufficient permissions. Status: {}", status),
        ),
        404 => Error::not_found(format!("Cloudflare resource not found: {}", error_text)),
        409 => Error::provider(
            PROVIDER,
            format!("Conflict: Record is being updated by another process. Status: {}", status),
        ),
        429 => Error::provider(
            PROVIDER,
            format!("Rate limit exceeded. Please retry later. Status: {}", status),
        ),
        500..=599 => Error::provider(
            PROVIDER,
            format!("Cloudflare server error (transient): {} - {}", status, error_text),
        ),
        _ => Error::provider(PROVIDER, format!("Request failed: {} - {}", status, error_text)),
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn init(&mut self, config: &DdnsConfig) {
        if !config.dns.secret.is_empty() {
            self.api_token = config.dns.secret.clone();
        }
        self.ttl = config.ttl.unwrap_or(DEFAULT_TTL);
    }

    /// Create or update the records of both families
    ///
    /// Failures are recorded per domain; the remaining domains are still
    /// attempted.
    async fn reconcile(&mut self, domains: &mut DomainSet) {
        for version in [IpVersion::V4, IpVersion::V6] {
            let (addr, targets) = domains.new_ip_result(version);
            let Some(addr) = addr else {
                continue;
            };

            for domain in targets.iter_mut() {
                domain.update_status = match self.sync_domain(domain, version, addr).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!("Failed to sync {} record {}: {}", version.record_type(), domain, e);
                        UpdateStatus::Failure
                    }
                };
            }
        }
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &DdnsConfig) -> Result<Box<dyn DnsProvider>> {
        if config.dns.secret.is_empty() {
            return Err(Error::config("Cloudflare API token is required"));
        }
        let mut provider = CloudflareProvider::new(config.dns.secret.clone())?;
        provider.init(config);
        Ok(Box::new(provider))
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use ddns_core::ProviderRegistry;
///
/// let mut registry = ProviderRegistry::new();
/// ddns_provider_cloudflare::register(&mut registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &mut ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(CloudflareFactory));
}
