//! Per-family debounce state
//!
//! An [`IpCache`] decides whether the provider needs to be contacted for an
//! address. An unchanged address is only re-sent after `threshold` skipped
//! cycles, which bounds silent provider-side drift without calling the
//! provider every tick.

use std::net::IpAddr;

use crate::config::ip_cache_times_from_env;

/// Debounce and resolution-failure state for one address family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpCache {
    addr: Option<IpAddr>,
    times_remaining: u32,
    failed_times: u32,
    threshold: u32,
}

impl IpCache {
    /// Create an empty cache using the threshold from the environment
    pub fn new() -> Self {
        Self::with_threshold(ip_cache_times_from_env())
    }

    /// Create an empty cache with an explicit threshold
    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            addr: None,
            times_remaining: 0,
            failed_times: 0,
            threshold,
        }
    }

    /// Whether the provider should be asked to apply `new_addr`.
    ///
    /// `None` always returns `true` and leaves the state untouched: there is
    /// nothing to cache and the caller has nothing to apply.
    pub fn check(&mut self, new_addr: Option<IpAddr>) -> bool {
        let Some(new_addr) = new_addr else {
            return true;
        };

        if self.addr != Some(new_addr) || self.times_remaining <= 1 {
            self.addr = Some(new_addr);
            self.times_remaining = self.threshold.saturating_add(1);
            return true;
        }

        self.addr = Some(new_addr);
        self.times_remaining -= 1;
        false
    }

    /// Record one failed address resolution and return the new count
    pub fn increase_failed_times(&mut self) -> u32 {
        self.failed_times += 1;
        self.failed_times
    }

    pub fn reset_failed_times(&mut self) {
        self.failed_times = 0;
    }

    pub fn failed_times(&self) -> u32 {
        self.failed_times
    }

    /// Skips left before an unchanged address is re-sent
    pub fn times_remaining(&self) -> u32 {
        self.times_remaining
    }

    /// Last address handed to the provider
    pub fn addr(&self) -> Option<IpAddr> {
        self.addr
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// A fresh, empty cache with the same threshold
    pub fn fresh(&self) -> Self {
        Self::with_threshold(self.threshold)
    }
}

impl Default for IpCache {
    fn default() -> Self {
        Self::new()
    }
}
