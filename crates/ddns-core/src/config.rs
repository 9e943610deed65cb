//! Configuration types for the DDNS system
//!
//! A [`DdnsConfig`] is one binding: a named set of domains kept in sync with
//! the host's addresses at one DNS provider. Loading and reloading these
//! structures is the caller's job; the engine only consumes them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Environment variable overriding the debounce threshold of [`crate::IpCache`]
pub const IP_CACHE_TIMES_ENV: &str = "DDNS_IP_CACHE_TIMES";

/// Default debounce threshold
pub const DEFAULT_IP_CACHE_TIMES: u32 = 5;

/// Binding configuration for one orchestrated service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdnsConfig {
    /// Binding name, unique within a registry
    pub name: String,

    /// Interval between reconciliation cycles (in seconds)
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,

    /// IPv4 settings
    #[serde(default)]
    pub ipv4: IpFamilyConfig,

    /// IPv6 settings
    #[serde(default)]
    pub ipv6: IpFamilyConfig,

    /// DNS provider selection and credentials
    pub dns: ProviderConfig,

    /// Record TTL; providers fall back to their own default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    /// Optional webhook fired after each cycle with a non-trivial outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

impl DdnsConfig {
    /// Create a binding with defaults and no enabled families
    pub fn new(name: impl Into<String>, dns: ProviderConfig) -> Self {
        Self {
            name: name.into(),
            delay_secs: default_delay_secs(),
            ipv4: IpFamilyConfig::default(),
            ipv6: IpFamilyConfig::default(),
            dns,
            ttl: None,
            webhook: None,
        }
    }

    /// Tick interval as a [`std::time::Duration`]
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.delay_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Binding name cannot be empty"));
        }
        if self.delay_secs == 0 {
            return Err(crate::Error::config(format!(
                "Binding {}: delay must be > 0",
                self.name
            )));
        }
        if self.dns.provider.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Binding {}: DNS provider cannot be empty",
                self.name
            )));
        }

        self.ipv4.validate(&self.name, "IPv4")?;
        self.ipv6.validate(&self.name, "IPv6")?;

        if let Some(webhook) = &self.webhook {
            webhook.validate(&self.name)?;
        }

        Ok(())
    }

    /// Content hash of this binding (hex SHA-256 of its JSON form).
    ///
    /// Two bindings with equal hashes are the same service; the overwatch uses
    /// this to skip restarts on unrelated configuration writes.
    pub fn content_hash(&self) -> String {
        // Serializing plain structs of strings and integers cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Per-family settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpFamilyConfig {
    /// Whether this family is synchronized
    #[serde(default)]
    pub enable: bool,

    /// Where the address comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<IpSourceConfig>,

    /// Domain strings, parsed every cycle
    #[serde(default)]
    pub domains: Vec<String>,
}

impl IpFamilyConfig {
    /// An enabled family with the given source and domains
    pub fn enabled(source: IpSourceConfig, domains: Vec<String>) -> Self {
        Self {
            enable: true,
            source: Some(source),
            domains,
        }
    }

    fn validate(&self, binding: &str, family: &str) -> Result<(), crate::Error> {
        if !self.enable {
            return Ok(());
        }
        if self.domains.iter().all(|d| d.trim().is_empty()) {
            return Err(crate::Error::config(format!(
                "Binding {binding}: {family} is enabled but has no domains"
            )));
        }
        match &self.source {
            Some(source) => source.validate(),
            None => Err(crate::Error::config(format!(
                "Binding {binding}: {family} is enabled but has no address source"
            ))),
        }
    }
}

/// Address acquisition method and its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpSourceConfig {
    /// Fetch from one or more comma-separated "what is my IP" URLs
    Http {
        /// URL list, tried in order
        url: String,
    },

    /// Run a local shell command and extract the address from its output
    Command {
        /// Command line
        cmd: String,
    },

    /// Read the address assigned to a local network interface
    Interface {
        /// Interface name (e.g. "eth0", "pppoe-wan")
        name: String,
    },

    /// Custom IP source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl IpSourceConfig {
    /// Validate the IP source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            IpSourceConfig::Http { url } => {
                if url.trim().is_empty() {
                    return Err(crate::Error::config("HTTP IP source URL cannot be empty"));
                }
                Ok(())
            }
            IpSourceConfig::Command { cmd } => {
                if cmd.trim().is_empty() {
                    return Err(crate::Error::config("IP source command cannot be empty"));
                }
                Ok(())
            }
            IpSourceConfig::Interface { name } => {
                if name.trim().is_empty() {
                    return Err(crate::Error::config("Network interface name cannot be empty"));
                }
                Ok(())
            }
            IpSourceConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom IP source factory cannot be empty",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Registry key for this source type
    pub fn type_name(&self) -> &str {
        match self {
            IpSourceConfig::Http { .. } => "http",
            IpSourceConfig::Command { .. } => "command",
            IpSourceConfig::Interface { .. } => "interface",
            IpSourceConfig::Custom { factory, .. } => factory,
        }
    }
}

/// DNS provider selection and its credential pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider code (e.g. "cloudflare", "callback")
    pub provider: String,

    /// First credential (access key ID, account, callback URL...)
    #[serde(default)]
    pub id: String,

    /// Second credential (secret, API token, callback body...)
    #[serde(default)]
    pub secret: String,
}

impl ProviderConfig {
    /// Create a provider configuration
    pub fn new(
        provider: impl Into<String>,
        id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
            secret: secret.into(),
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        &self.provider
    }
}

// Credentials never reach the logs
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("id", &"<REDACTED>")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// Webhook notification settings
///
/// `url` and `request_body` accept the tokens `#{ipv4Addr}`, `#{ipv4Result}`,
/// `#{ipv4Domains}`, `#{ipv6Addr}`, `#{ipv6Result}` and `#{ipv6Domains}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL template
    pub url: String,

    /// Body template; a non-empty body turns the request into a POST
    #[serde(default)]
    pub request_body: String,

    /// CRLF-separated `Key: Value` lines
    #[serde(default)]
    pub headers: String,
}

impl WebhookConfig {
    fn validate(&self, binding: &str) -> Result<(), crate::Error> {
        if self.url.trim().is_empty() && !self.request_body.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Binding {binding}: webhook body is set but the URL is empty"
            )));
        }
        Ok(())
    }
}

fn default_delay_secs() -> u64 {
    300
}

/// Debounce threshold from [`IP_CACHE_TIMES_ENV`], falling back to the default
pub fn ip_cache_times_from_env() -> u32 {
    std::env::var(IP_CACHE_TIMES_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_IP_CACHE_TIMES)
}
