//! Domain model and parser
//!
//! Configured domain strings come in three shapes:
//!
//! - `sub.example.com` — the registrable root is detected automatically
//! - `sub:example.com` — explicit host record and root
//! - `example.com?proxied=true` — either of the above with a query suffix
//!   whose pairs are forwarded verbatim to the provider adapter
//!
//! Parsing happens once per cycle. Malformed entries are skipped with a
//! warning; they never abort the cycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{Error, Result};

/// Two-label public suffixes under which the registrable root has three labels
const STATIC_MAIN_DOMAINS: &[&str] = &["com.cn", "org.cn", "net.cn", "ac.cn", "eu.org"];

/// Per-domain outcome of one reconciliation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// Not attempted, or the record already held the address
    #[default]
    Unchanged,
    /// The provider accepted the create/update
    Success,
    /// The provider call failed (or the address could not be resolved)
    Failure,
}

impl UpdateStatus {
    /// Aggregate a family's statuses: any failure wins, then any success
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a UpdateStatus>) -> UpdateStatus {
        let mut success = false;
        for status in statuses {
            match status {
                UpdateStatus::Failure => return UpdateStatus::Failure,
                UpdateStatus::Success => success = true,
                UpdateStatus::Unchanged => {}
            }
        }
        if success {
            UpdateStatus::Success
        } else {
            UpdateStatus::Unchanged
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, UpdateStatus::Unchanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Unchanged => "Unchanged",
            UpdateStatus::Success => "Success",
            UpdateStatus::Failure => "Failure",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque per-domain parameters from the query suffix of a domain string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomParams(Vec<(String, String)>);

impl CustomParams {
    /// Parse an `application/x-www-form-urlencoded` query string
    pub fn parse(query: &str) -> Self {
        Self(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    /// First value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for CustomParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish();
        f.write_str(&encoded)
    }
}

/// A parsed target domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Domain {
    /// Registrable root, e.g. `example.com`
    pub domain_name: String,
    /// Host record; empty means the apex
    pub sub_domain: String,
    /// Provider overrides from the query suffix
    pub custom_params: CustomParams,
    /// Set by the provider adapter, at most once per cycle
    pub update_status: UpdateStatus,
}

impl Domain {
    /// Host record, `@` for the apex
    pub fn sub_domain_or_apex(&self) -> &str {
        if self.sub_domain.is_empty() {
            "@"
        } else {
            &self.sub_domain
        }
    }

    /// Fully qualified name with `@` standing in for the apex
    pub fn full_domain(&self) -> String {
        format!("{}.{}", self.sub_domain_or_apex(), self.domain_name)
    }

    /// Whether this domain is the zone apex
    pub fn is_apex(&self) -> bool {
        self.sub_domain.is_empty()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sub_domain.is_empty() {
            f.write_str(&self.domain_name)
        } else {
            write!(f, "{}.{}", self.sub_domain, self.domain_name)
        }
    }
}

impl std::str::FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_domain(s)
    }
}

/// Parse one configured domain string
pub fn parse_domain(raw: &str) -> Result<Domain> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split(':').collect();

    let (sub_domain, domain_name) = match parts.as_slice() {
        [single] => split_registrable(single)?,
        [host, root] => {
            if root.split('.').count() <= 1 {
                return Err(Error::invalid_input(format!("Incorrect domain name: {raw}")));
            }
            (host.to_string(), root.to_string())
        }
        _ => return Err(Error::invalid_input(format!("Incorrect domain name: {raw}"))),
    };

    let mut domain = Domain {
        domain_name,
        sub_domain,
        ..Domain::default()
    };

    if domain.domain_name.contains('?') {
        let parsed = url::Url::parse(&format!("http://{}", domain.domain_name)).map_err(|e| {
            Error::invalid_input(format!("Domain name resolution failed for {raw}: {e}"))
        })?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid_input(format!("Domain without host: {raw}")))?;
        domain.domain_name = host.to_string();
        domain.custom_params = CustomParams::parse(parsed.query().unwrap_or_default());
    }

    Ok(domain)
}

/// Split `sub.example.com` into (`sub`, `example.com`), honouring the static suffix list
fn split_registrable(raw: &str) -> Result<(String, String)> {
    let labels: Vec<&str> = raw.split('.').collect();
    let n = labels.len();
    if n <= 1 {
        return Err(Error::invalid_input(format!("Incorrect domain name: {raw}")));
    }

    let mut domain_name = format!("{}.{}", labels[n - 2], labels[n - 1]);
    // A query suffix on the last label must not hide a static suffix match.
    let bare = domain_name.split('?').next().unwrap_or_default();
    if n >= 3 && STATIC_MAIN_DOMAINS.contains(&bare) {
        domain_name = format!("{}.{}", labels[n - 3], domain_name);
    }

    let sub_len = raw.len() - domain_name.len();
    let sub_domain = if sub_len > 0 {
        raw[..sub_len - 1].to_string()
    } else {
        String::new()
    };

    Ok((sub_domain, domain_name))
}

/// Parse a list of configured domain strings, preserving input order.
///
/// Blank entries are ignored; malformed entries are logged and skipped.
pub fn parse_domains<S: AsRef<str>>(raws: &[S]) -> Vec<Domain> {
    raws.iter()
        .map(|raw| raw.as_ref().trim())
        .filter(|raw| !raw.is_empty())
        .filter_map(|raw| match parse_domain(raw) {
            Ok(domain) => Some(domain),
            Err(e) => {
                warn!("Skipping domain {:?}: {}", raw, e);
                None
            }
        })
        .collect()
}
