//! Post-cycle webhook notifications
//!
//! After every cycle the orchestrator hands the [`DomainSet`] to a
//! [`WebhookNotifier`]. A request is sent only when the URL is configured and
//! at least one family has a non-`Unchanged` outcome, so quiet cycles stay
//! quiet. Delivery failures are logged and never affect the service.

use reqwest::Method;
use tracing::{info, warn};
use url::Url;

use crate::config::WebhookConfig;
use crate::domain_set::DomainSet;
use crate::error::{Error, Result};
use crate::net::{DEFAULT_HTTP_TIMEOUT, error_chain, http_client};
use crate::traits::IpVersion;

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// A fully rendered webhook call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub method: Method,
    pub url: Url,
    pub body: String,
    pub content_type: &'static str,
    /// Extra headers in configuration order
    pub headers: Vec<(String, String)>,
}

/// Renders and delivers webhook notifications for one binding
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: http_client(DEFAULT_HTTP_TIMEOUT),
        }
    }

    /// Render the request for this cycle's outcome.
    ///
    /// Returns `Ok(None)` when nothing should be sent.
    pub fn prepare(&self, set: &DomainSet) -> Result<Option<WebhookRequest>> {
        if self.config.url.trim().is_empty() {
            return Ok(None);
        }

        let ipv4_status = set.status(IpVersion::V4);
        let ipv6_status = set.status(IpVersion::V6);
        if ipv4_status.is_unchanged() && ipv6_status.is_unchanged() {
            return Ok(None);
        }

        let mut method = Method::GET;
        let mut body = String::new();
        let mut content_type = CONTENT_TYPE_FORM;
        if !self.config.request_body.is_empty() {
            method = Method::POST;
            body = render(&self.config.request_body, set);
            if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
                content_type = CONTENT_TYPE_JSON;
            } else if body.starts_with('{') || body.starts_with('[') {
                warn!("Webhook request body looks like JSON but does not parse, sending as form data");
            }
        }

        let rendered_url = render(&self.config.url, set);
        let url = Url::parse(&rendered_url)
            .map_err(|e| Error::webhook(format!("Invalid webhook URL {rendered_url}: {e}")))?;

        Ok(Some(WebhookRequest {
            method,
            url,
            body,
            content_type,
            headers: parse_headers(&self.config.headers),
        }))
    }

    /// Send the notification for this cycle, if any.
    ///
    /// Returns whether a request was delivered with a success status.
    pub async fn notify(&self, set: &DomainSet) -> Result<bool> {
        let Some(request) = self.prepare(set)? else {
            return Ok(false);
        };
        self.dispatch(request).await?;
        Ok(true)
    }

    /// Deliver a prepared request
    pub async fn dispatch(&self, request: WebhookRequest) -> Result<()> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .header(reqwest::header::CONTENT_TYPE, request.content_type);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::webhook(format!("Webhook call failed: {}", error_chain(&e))))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Error::webhook(format!(
                "Webhook returned HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        info!("Webhook delivered, response: {:?}", text);
        Ok(())
    }
}

/// Substitute the outcome tokens into a template
fn render(template: &str, set: &DomainSet) -> String {
    let mut rendered = template.to_string();
    for (version, prefix) in [(IpVersion::V4, "ipv4"), (IpVersion::V6, "ipv6")] {
        let family = set.family(version);
        let addr = family.addr.map(|ip| ip.to_string()).unwrap_or_default();
        rendered = rendered
            .replace(&format!("#{{{prefix}Addr}}"), &addr)
            .replace(&format!("#{{{prefix}Result}}"), family.status().as_str())
            .replace(&format!("#{{{prefix}Domains}}"), &family.domains_string());
    }
    rendered
}

/// Parse CRLF-separated `Key: Value` lines.
///
/// A line that does not split into exactly two parts on `:` is skipped.
pub fn parse_headers(raw: &str) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    for line in raw.split("\r\n") {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() != 2 {
            warn!("Ignoring malformed webhook header: {}", line);
            continue;
        }
        headers.push((parts[0].trim().to_string(), parts[1].trim().to_string()));
    }
    headers
}
