// # HTTP IP Source
//
// This crate provides an HTTP-based IP source for the DDNS system.
//
// ## Architecture
//
// Fetches the current public address from "what is my IP" services
// (e.g., api.ipify.org, ifconfig.me) once per reconciliation cycle.
//
// - The configured URL may list several services separated by commas; they
//   are tried in order until one answers with an address
// - The socket is bound to the unspecified address of the source's family, so
//   an IPv6 source never reports the IPv4 address (and vice versa)
// - The first address of the family found in the body wins, so HTML or JSON
//   answers work as well as plain text

use ddns_core::ProviderRegistry;
use ddns_core::config::IpSourceConfig;
use ddns_core::net::{error_chain, http_client_builder};
use ddns_core::traits::{IpSource, IpSourceFactory, IpVersion, find_address};
use ddns_core::{Error, Result};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP-based IP source
pub struct HttpIpSource {
    /// Services to ask, in order
    urls: Vec<String>,

    /// IP version to resolve
    version: IpVersion,

    /// HTTP client bound to the family's unspecified address
    client: reqwest::Client,
}

impl HttpIpSource {
    /// Create a new HTTP IP source
    ///
    /// # Parameters
    ///
    /// - `urls`: comma-separated service URLs (e.g., "https://api.ipify.org, https://ifconfig.me/ip")
    /// - `version`: the family to resolve
    pub fn new(urls: &str, version: IpVersion) -> Self {
        let local_address = match version {
            IpVersion::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpVersion::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        Self {
            urls: split_urls(urls),
            version,
            client: http_client_builder(REQUEST_TIMEOUT)
                .local_address(local_address)
                .no_proxy()
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Ask one service
    async fn fetch_ip(&self, url: &str) -> Result<IpAddr> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::ip_source(format!("Request to {} failed: {}", url, error_chain(&e))))?;

        if !response.status().is_success() {
            return Err(Error::ip_source(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::ip_source(format!("Failed to read response from {}: {}", url, e)))?;

        find_address(&body, self.version).ok_or_else(|| {
            Error::ip_source(format!(
                "No {} address in response from {}: {}",
                self.version,
                url,
                body.trim()
            ))
        })
    }
}

#[async_trait::async_trait]
impl IpSource for HttpIpSource {
    async fn current(&self) -> Result<IpAddr> {
        for url in &self.urls {
            match self.fetch_ip(url).await {
                Ok(ip) => return Ok(ip),
                Err(e) => tracing::debug!("{}", e),
            }
        }

        Err(Error::ip_source(format!(
            "Failed to get {} address from {}",
            self.version,
            self.urls.join(", ")
        )))
    }

    fn version(&self) -> IpVersion {
        self.version
    }
}

fn split_urls(urls: &str) -> Vec<String> {
    urls.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(String::from)
        .collect()
}

/// Factory for creating HTTP IP sources
pub struct HttpFactory;

impl IpSourceFactory for HttpFactory {
    fn create(&self, config: &IpSourceConfig, version: IpVersion) -> Result<Box<dyn IpSource>> {
        match config {
            IpSourceConfig::Http { url } => {
                let source = HttpIpSource::new(url, version);
                if source.urls.is_empty() {
                    return Err(Error::config("HTTP IP source URL cannot be empty"));
                }
                Ok(Box::new(source))
            }
            _ => Err(Error::config("Invalid config for HTTP IP source")),
        }
    }
}

/// Register the HTTP IP source with a registry
pub fn register(registry: &mut ProviderRegistry) {
    registry.register_ip_source("http", Box::new(HttpFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `body` to every request
    async fn ip_service(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ip", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        url
    }

    /// A URL nothing listens on
    async fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ip", listener.local_addr().unwrap());
        drop(listener);
        url
    }

    #[tokio::test]
    async fn reads_a_plain_text_answer() {
        let url = ip_service("HTTP/1.1 200 OK", "203.0.113.7\n").await;
        let source = HttpIpSource::new(&url, IpVersion::V4);

        assert_eq!(source.current().await.unwrap(), "203.0.113.7".parse::<IpAddr>().unwrap());
        assert_eq!(source.version(), IpVersion::V4);
    }

    #[tokio::test]
    async fn extracts_the_address_from_noise() {
        let url = ip_service("HTTP/1.1 200 OK", r#"{"ip":"198.51.100.23","country":"NL"}"#).await;
        let source = HttpIpSource::new(&url, IpVersion::V4);

        assert_eq!(source.current().await.unwrap(), "198.51.100.23".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn falls_through_to_the_next_service() {
        let dead = dead_url().await;
        let broken = ip_service("HTTP/1.1 502 Bad Gateway", "upstream down").await;
        let good = ip_service("HTTP/1.1 200 OK", "192.0.2.44").await;
        let source = HttpIpSource::new(&format!("{dead}, {broken} ,{good}"), IpVersion::V4);

        assert_eq!(source.urls().len(), 3);
        assert_eq!(source.current().await.unwrap(), "192.0.2.44".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn no_address_is_an_error() {
        let url = ip_service("HTTP/1.1 200 OK", "rate limited, try later").await;
        let source = HttpIpSource::new(&url, IpVersion::V4);

        assert!(matches!(source.current().await, Err(Error::IpSource(_))));
    }

    #[test]
    fn splits_url_lists() {
        assert_eq!(
            split_urls(" https://api.ipify.org ,, https://ifconfig.me/ip "),
            vec!["https://api.ipify.org", "https://ifconfig.me/ip"]
        );
    }

    #[test]
    fn test_factory_creation() {
        let factory = HttpFactory;

        let config = IpSourceConfig::Http {
            url: "https://api.ipify.org".to_string(),
        };
        let source = factory.create(&config, IpVersion::V6).unwrap();
        assert_eq!(source.version(), IpVersion::V6);

        let blank = IpSourceConfig::Http { url: " , ".to_string() };
        assert!(factory.create(&blank, IpVersion::V4).is_err());

        let wrong = IpSourceConfig::Command {
            cmd: "echo 1.2.3.4".to_string(),
        };
        assert!(factory.create(&wrong, IpVersion::V4).is_err());
    }
}
