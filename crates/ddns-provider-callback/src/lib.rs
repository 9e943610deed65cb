// # Callback DNS Provider
//
// This crate provides a generic HTTP callback adapter for the DDNS orchestrator.
// It does not manage records itself; it tells some other service about the new
// address, once per target domain.
//
// ## Configuration
//
// - `dns.id`: request URL template
// - `dns.secret`: request body template; a non-empty body turns the GET into a POST
// - `ttl`: substituted for `#{ttl}` (default 600)
//
// Both templates accept `#{ip}`, `#{domain}`, `#{recordType}`, `#{ttl}` and
// every custom parameter of the domain as `#{key}`:
//
// ```text
// https://hook.example.net/update?host=#{domain}&ip=#{ip}&zone=#{zone}
// www.example.com?zone=home
// ```
//
// ## Behavior
//
// A family is only called back when its address differs from the last one
// seen by its cache, so the debounce re-check of an unchanged address does not
// fire the callback again.
//
// ## Architectural Constraints
//
// ### Trust Level: Untrusted (DNS Provider)
//
// - ✅ Perform HTTP/HTTPS calls to the configured URL only
// - ❌ Spawn tasks or threads
// - ❌ Implement retry logic (the next tick is the retry)

use async_trait::async_trait;
use ddns_core::config::DdnsConfig;
use ddns_core::net::{DEFAULT_HTTP_TIMEOUT, error_chain, http_client};
use ddns_core::traits::{DnsProvider, DnsProviderFactory, IpVersion};
use ddns_core::{Domain, DomainSet, Error, ProviderRegistry, Result, UpdateStatus};
use reqwest::Method;
use std::net::IpAddr;
use url::Url;

/// Provider code
pub const PROVIDER: &str = "callback";

/// TTL substituted when the binding has none
const DEFAULT_TTL: u32 = 600;

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// A rendered callback for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    pub method: Method,
    pub url: Url,
    pub body: String,
    pub content_type: &'static str,
}

/// Generic HTTP callback provider
pub struct CallbackProvider {
    /// URL template
    url: String,

    /// Body template, may embed credentials
    /// ⚠️ NEVER log this value
    body: String,

    ttl: u32,

    client: reqwest::Client,
}

impl std::fmt::Debug for CallbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackProvider")
            .field("body", &"<REDACTED>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CallbackProvider {
    /// Create a callback provider from its URL and body templates
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::config("Callback URL cannot be empty"));
        }

        Ok(Self {
            url,
            body: body.into(),
            ttl: DEFAULT_TTL,
            client: http_client(DEFAULT_HTTP_TIMEOUT),
        })
    }

    /// Render the callback for one domain
    pub fn prepare(&self, domain: &Domain, version: IpVersion, addr: IpAddr) -> Result<CallbackRequest> {
        let mut method = Method::GET;
        let mut body = String::new();
        let mut content_type = CONTENT_TYPE_FORM;
        if !self.body.is_empty() {
            method = Method::POST;
            body = self.render(&self.body, domain, version, addr);
            if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
                content_type = CONTENT_TYPE_JSON;
            }
        }

        let rendered_url = self.render(&self.url, domain, version, addr);
        let url = Url::parse(&rendered_url)
            .map_err(|e| Error::config(format!("Invalid callback URL: {}", e)))?;

        Ok(CallbackRequest {
            method,
            url,
            body,
            content_type,
        })
    }

    fn render(&self, template: &str, domain: &Domain, version: IpVersion, addr: IpAddr) -> String {
        let mut rendered = template
            .replace("#{ip}", &addr.to_string())
            .replace("#{domain}", &domain.to_string())
            .replace("#{recordType}", version.record_type())
            .replace("#{ttl}", &self.ttl.to_string());

        for (key, value) in domain.custom_params.iter() {
            rendered = rendered.replace(&format!("#{{{key}}}"), value);
        }
        rendered
    }

    async fn call(&self, domain: &Domain, version: IpVersion, addr: IpAddr) -> Result<String> {
        let request = self.prepare(domain, version, addr)?;

        let response = self
            .client
            .request(request.method, request.url)
            .header(reqwest::header::CONTENT_TYPE, request.content_type)
            .body(request.body)
            .send()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("HTTP request failed: {}", error_chain(&e))))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::provider(
                PROVIDER,
                format!("Callback returned {}: {}", status, text),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl DnsProvider for CallbackProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn init(&mut self, config: &DdnsConfig) {
        self.url = config.dns.id.clone();
        self.body = config.dns.secret.clone();
        self.ttl = config.ttl.unwrap_or(DEFAULT_TTL);
    }

    async fn reconcile(&mut self, domains: &mut DomainSet) {
        for version in [IpVersion::V4, IpVersion::V6] {
            let last_seen = domains.family(version).cache().addr();
            let (addr, targets) = domains.new_ip_result(version);
            let Some(addr) = addr else {
                continue;
            };

            if last_seen == Some(addr) {
                tracing::info!("Your {} address {} has not changed, callback not triggered", version, addr);
                continue;
            }

            for domain in targets.iter_mut() {
                domain.update_status = match self.call(domain, version, addr).await {
                    Ok(reply) => {
                        tracing::info!("Callback succeeded, domain: {}, IP: {}, reply: {}", domain, addr, reply);
                        UpdateStatus::Success
                    }
                    Err(e) => {
                        tracing::warn!("Callback failed for {}: {}", domain, e);
                        UpdateStatus::Failure
                    }
                };
            }
        }
    }
}

/// Factory for creating callback providers
pub struct CallbackFactory;

impl DnsProviderFactory for CallbackFactory {
    fn create(&self, config: &DdnsConfig) -> Result<Box<dyn DnsProvider>> {
        let mut provider = CallbackProvider::new(config.dns.id.clone(), config.dns.secret.clone())?;
        provider.init(config);
        Ok(Box::new(provider))
    }
}

/// Register the callback provider with a registry
pub fn register(registry: &mut ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(CallbackFactory));
}
