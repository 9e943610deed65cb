//! Shared network helpers
//!
//! HTTP client construction, error-chain rendering, the reachability check
//! and the process-wide DNS-server override used by the network gate.
//!
//! Every HTTP client built here resolves hostnames through
//! [`OverrideResolver`]: the system resolver until an override is installed,
//! the override server afterwards. Clients pick the override up without
//! being rebuilt.

use hickory_resolver::TokioResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Environment variable carrying a DNS server (`host:port`) to use instead of
/// the system resolver
pub const DNS_SERVER_ENV: &str = "DDNS_DNS_SERVER";

/// Nameserver that shows up in resolver errors when the host has no DNS configured
pub const LOOPBACK_NAMESERVER: &str = "[::1]:53";

/// Server installed as the override when the loopback nameserver fails
pub const FALLBACK_DNS_SERVER: &str = "1.1.1.1:53";

/// Default timeout for outbound HTTP requests
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static DNS_SERVER_OVERRIDE: OnceLock<String> = OnceLock::new();

/// The DNS server override, if one has been installed
pub fn dns_server_override() -> Option<&'static str> {
    DNS_SERVER_OVERRIDE.get().map(String::as_str)
}

/// Install the process-wide DNS server override.
///
/// The override can be set only once; returns `false` when one was already present.
pub fn set_dns_server_override(server: impl Into<String>) -> bool {
    DNS_SERVER_OVERRIDE.set(server.into()).is_ok()
}

/// Seed the override from [`DNS_SERVER_ENV`], if present and non-empty
pub fn init_dns_server_from_env() -> Option<&'static str> {
    if let Ok(server) = std::env::var(DNS_SERVER_ENV) {
        let server = server.trim();
        if !server.is_empty() {
            set_dns_server_override(server);
        }
    }
    dns_server_override()
}

/// Parse a DNS server given as `ip:port` or a bare `ip` (port 53)
pub fn parse_dns_server(server: &str) -> Option<SocketAddr> {
    let server = server.trim();
    server
        .parse::<SocketAddr>()
        .ok()
        .or_else(|| server.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, 53)))
}

/// Resolve `host` by asking `server` directly
pub async fn lookup_via(server: SocketAddr, host: &str) -> std::result::Result<Vec<IpAddr>, BoxError> {
    let config = ResolverConfig::from_parts(
        None,
        vec![],
        NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true),
    );
    let resolver = TokioResolver::builder_with_config(config, TokioConnectionProvider::default()).build();
    let lookup = resolver.lookup_ip(host).await?;
    Ok(lookup.iter().collect())
}

/// reqwest resolver that honours the DNS server override
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideResolver;

impl OverrideResolver {
    async fn lookup(host: String) -> std::result::Result<Addrs, BoxError> {
        let server = dns_server_override().and_then(|server| {
            let parsed = parse_dns_server(server);
            if parsed.is_none() {
                warn!("Ignoring unparsable DNS server override {:?}", server);
            }
            parsed
        });

        // reqwest replaces the port
        let addrs: Vec<SocketAddr> = match server {
            Some(server) => {
                debug!("Resolving {} via {}", host, server);
                lookup_via(server, &host)
                    .await?
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect()
            }
            None => tokio::net::lookup_host((host.as_str(), 0)).await?.collect(),
        };
        Ok(Box::new(addrs.into_iter()))
    }
}

impl Resolve for OverrideResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(Self::lookup(name.as_str().to_string()))
    }
}

/// Client builder with the timeout and the override-aware resolver installed
pub fn http_client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .dns_resolver(Arc::new(OverrideResolver))
}

/// Build an HTTP client with the given timeout
pub fn http_client(timeout: Duration) -> reqwest::Client {
    http_client_builder(timeout).build().unwrap_or_else(|e| {
        warn!("Failed to build HTTP client, using defaults: {}", e);
        reqwest::Client::new()
    })
}

/// Render an error together with all of its sources.
///
/// reqwest hides resolver details in the source chain, so the gate and the
/// error conversions use the full chain.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

/// Whether a network error was a resolver failure against the IPv6 loopback nameserver
pub fn is_loopback_resolver_error(message: &str) -> bool {
    message.contains(LOOPBACK_NAMESERVER)
}

/// Reachability check run by the network gate.
///
/// The error is the rendered cause chain, so resolver failures stay visible.
#[async_trait::async_trait]
pub trait Reachability: Send + Sync {
    async fn check(&self, endpoint: &str) -> std::result::Result<(), String>;
}

/// Lightweight GET against the endpoint; any HTTP answer counts as reachable
#[derive(Debug, Clone)]
pub struct HttpReachability {
    client: reqwest::Client,
}

impl HttpReachability {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }
}

impl Default for HttpReachability {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl Reachability for HttpReachability {
    async fn check(&self, endpoint: &str) -> std::result::Result<(), String> {
        match self.client.get(endpoint).send().await {
            Ok(_response) => Ok(()),
            Err(e) => Err(error_chain(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_resolver::proto::op::{Message, MessageType};
    use hickory_resolver::proto::rr::rdata::A;
    use hickory_resolver::proto::rr::{RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UdpSocket};

    #[derive(Debug)]
    struct Leaf;

    impl std::fmt::Display for Leaf {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "lookup api.example.com on [::1]:53: connection refused")
        }
    }

    impl std::error::Error for Leaf {}

    #[derive(Debug)]
    struct Outer(Leaf);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "error sending request")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_includes_sources() {
        let rendered = error_chain(&Outer(Leaf));
        assert!(rendered.starts_with("error sending request: "));
        assert!(is_loopback_resolver_error(&rendered));
    }

    #[test]
    fn dns_server_forms() {
        assert_eq!(parse_dns_server("1.1.1.1:53"), Some("1.1.1.1:53".parse().unwrap()));
        assert_eq!(parse_dns_server(" 9.9.9.9 "), Some("9.9.9.9:53".parse().unwrap()));
        assert_eq!(parse_dns_server("[::1]:5353"), Some("[::1]:5353".parse().unwrap()));
        assert_eq!(parse_dns_server("2606:4700::1111"), Some("[2606:4700::1111]:53".parse().unwrap()));
        assert_eq!(parse_dns_server("dns.example.com"), None);
    }

    /// Answer every A query with `addr`, everything else with no records
    async fn answer_queries(socket: UdpSocket, addr: Ipv4Addr) {
        let mut buf = [0u8; 512];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let query = Message::from_vec(&buf[..len]).unwrap();
            let mut reply = Message::new();
            reply.set_id(query.id());
            reply.set_message_type(MessageType::Response);
            reply.set_op_code(query.op_code());
            reply.set_recursion_desired(query.recursion_desired());
            reply.set_recursion_available(true);
            for question in query.queries() {
                reply.add_query(question.clone());
                if question.query_type() == RecordType::A {
                    reply.add_answer(Record::from_rdata(question.name().clone(), 60, RData::A(A(addr))));
                }
            }
            socket.send_to(&reply.to_vec().unwrap(), peer).await.unwrap();
        }
    }

    #[tokio::test]
    async fn lookup_via_asks_the_given_server() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = socket.local_addr().unwrap();
        tokio::spawn(answer_queries(socket, Ipv4Addr::new(203, 0, 113, 7)));

        let ips = lookup_via(server, "api.ddns.test").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))]);
    }

    #[tokio::test]
    async fn resolver_falls_back_to_the_system_without_override() {
        let addrs: Vec<SocketAddr> = OverrideResolver::lookup("localhost".to_string()).await.unwrap().collect();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|addr| addr.ip().is_loopback()));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_the_cause_chain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = HttpReachability::new(Duration::from_secs(5))
            .check(&format!("http://127.0.0.1:{port}/"))
            .await
            .unwrap_err();
        assert!(err.contains(&format!("127.0.0.1:{port}")), "{err}");
    }

    #[tokio::test]
    async fn clients_resolve_hostnames_through_the_resolver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });

        let reachability = HttpReachability::new(Duration::from_secs(5));
        assert_eq!(reachability.check(&format!("http://127.0.0.1:{port}/")).await, Ok(()));
        let mut local = tokio::net::lookup_host(("localhost", port)).await.unwrap();
        if local.any(|addr| addr.is_ipv4()) {
            assert_eq!(reachability.check(&format!("http://localhost:{port}/")).await, Ok(()));
        }
    }

    #[test]
    fn ordinary_errors_are_not_loopback_failures() {
        assert!(!is_loopback_resolver_error("connection timed out"));
        assert!(!is_loopback_resolver_error("lookup on 127.0.0.53:53 failed"));
    }
}
