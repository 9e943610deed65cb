//! Core traits for the DDNS system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`IpSource`]: Acquire the host's current address for one family
//! - [`DnsProvider`]: Reconcile a `DomainSet` against one DNS service

pub mod ip_source;
pub mod dns_provider;

pub use ip_source::{IpSource, IpSourceFactory, IpVersion, find_address};
pub use dns_provider::{DnsProvider, DnsProviderFactory};
