//! Kernel link and address caches.
//!
//! The caches mirror what the kernel reports over the route protocol. They
//! are refilled on demand from a [`RouteSource`] and consumed through
//! pull-style iterators filtered by interface index; iteration follows the
//! order the source returned the entries in.

#[cfg(target_os = "linux")]
pub mod netlink;

use netcf_common::HardwareAddress;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::trace;

#[cfg(target_os = "linux")]
pub use netlink::NetlinkRouteSocket;

/// Failure talking to the kernel.
#[derive(Debug, Error)]
pub enum NetlinkError {
    #[error("socket error during {operation}: {source}")]
    Socket {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("kernel returned error code {0}")]
    Kernel(i32),

    #[error("route protocol not available: {0}")]
    Unavailable(String),
}

/// One entry of the link cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub index: u32,
    pub name: String,
    pub address: Option<HardwareAddress>,
}

impl LinkEntry {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: HardwareAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// The hardware address, unless it is missing or all zero.
    pub fn hardware_address(&self) -> Option<&HardwareAddress> {
        self.address.as_ref().filter(|a| !a.is_zero())
    }
}

/// Address family of an address-cache entry, carrying the local address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    /// Any other family; skipped by consumers.
    Other,
}

impl From<IpAddr> for AddrFamily {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => AddrFamily::Ipv4(v4),
            IpAddr::V6(v6) => AddrFamily::Ipv6(v6),
        }
    }
}

/// One entry of the address cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrEntry {
    pub index: u32,
    pub family: AddrFamily,
    pub prefix_len: u8,
}

impl AddrEntry {
    pub fn new(index: u32, address: IpAddr, prefix_len: u8) -> Self {
        Self {
            index,
            family: address.into(),
            prefix_len,
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self.family {
            AddrFamily::Ipv4(v4) => Some(IpAddr::V4(v4)),
            AddrFamily::Ipv6(v6) => Some(IpAddr::V6(v6)),
            AddrFamily::Other => None,
        }
    }
}

/// Where cache contents come from: the kernel in production, canned data
/// in tests.
pub trait RouteSource {
    /// Dumps every link the kernel knows about.
    fn dump_links(&mut self) -> Result<Vec<LinkEntry>, NetlinkError>;

    /// Dumps every address the kernel knows about.
    fn dump_addresses(&mut self) -> Result<Vec<AddrEntry>, NetlinkError>;
}

#[derive(Debug, Default)]
pub struct LinkCache {
    entries: Vec<LinkEntry>,
}

impl LinkCache {
    /// Replaces the contents with a fresh dump; on failure the previous
    /// contents are kept.
    pub fn refill(&mut self, source: &mut dyn RouteSource) -> Result<(), NetlinkError> {
        self.entries = source.dump_links()?;
        trace!(count = self.entries.len(), "link cache refilled");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kernel index of the link called `name`.
    pub fn name_to_index(&self, name: &str) -> Option<u32> {
        self.entries.iter().find(|l| l.name == name).map(|l| l.index)
    }

    pub fn filter_index(&self, index: u32) -> impl Iterator<Item = &LinkEntry> {
        self.entries.iter().filter(move |l| l.index == index)
    }
}

#[derive(Debug, Default)]
pub struct AddrCache {
    entries: Vec<AddrEntry>,
}

impl AddrCache {
    /// Replaces the contents with a fresh dump; on failure the previous
    /// contents are kept.
    pub fn refill(&mut self, source: &mut dyn RouteSource) -> Result<(), NetlinkError> {
        self.entries = source.dump_addresses()?;
        trace!(count = self.entries.len(), "address cache refilled");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn filter_index(&self, index: u32) -> impl Iterator<Item = &AddrEntry> {
        self.entries.iter().filter(move |a| a.index == index)
    }
}

/// Opens the platform's route source.
pub fn default_route_source() -> Result<Box<dyn RouteSource>, NetlinkError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(NetlinkRouteSocket::new()?))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(NetlinkError::Unavailable(
            "route netlink is only available on Linux".into(),
        ))
    }
}

/// The driver's view of kernel state: a source plus both caches.
pub struct KernelState {
    source: Box<dyn RouteSource>,
    pub links: LinkCache,
    pub addrs: AddrCache,
}

impl KernelState {
    pub fn new(source: Box<dyn RouteSource>) -> Self {
        Self {
            source,
            links: LinkCache::default(),
            addrs: AddrCache::default(),
        }
    }

    pub fn refill_links(&mut self) -> Result<(), NetlinkError> {
        self.links.refill(self.source.as_mut())
    }

    pub fn refill_addrs(&mut self) -> Result<(), NetlinkError> {
        self.addrs.refill(self.source.as_mut())
    }
}

impl std::fmt::Debug for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelState")
            .field("links", &self.links.len())
            .field("addrs", &self.addrs.len())
            .finish()
    }
}
