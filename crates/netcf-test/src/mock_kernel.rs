//! Canned route source standing in for the kernel's link and address dumps.

use netcf_common::HardwareAddress;
use netcf_driver::kernel::{AddrEntry, LinkEntry, NetlinkError, RouteSource};
use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;

/// The usual reason a dump is cut short.
const ENOBUFS: i32 = 105;

#[derive(Debug, Default)]
struct Shared {
    links: Vec<LinkEntry>,
    addrs: Vec<AddrEntry>,
    fail_links: bool,
    fail_addrs: bool,
    link_dumps: usize,
    addr_dumps: usize,
}

/// Clones share state, so a test can change what the "kernel" reports
/// after handing a boxed clone to a context.
#[derive(Debug, Clone, Default)]
pub struct CannedRoutes {
    shared: Rc<RefCell<Shared>>,
}

impl CannedRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// `lo` (index 1) plus `eth0` (index 2) with hardware address
    /// aa:bb:cc:dd:ee:ff, 192.0.2.5/24 and 2001:db8::1/64.
    pub fn with_eth0() -> Self {
        let routes = Self::new();
        routes.add_link(1, "lo", None);
        routes.add_link(2, "eth0", Some([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
        routes.add_addr(1, "127.0.0.1", 8);
        routes.add_addr(1, "::1", 128);
        routes.add_addr(2, "192.0.2.5", 24);
        routes.add_addr(2, "2001:db8::1", 64);
        routes
    }

    pub fn source(&self) -> Box<dyn RouteSource> {
        Box::new(self.clone())
    }

    pub fn add_link(&self, index: u32, name: &str, mac: Option<[u8; 6]>) {
        let mut link = LinkEntry::new(index, name);
        if let Some(mac) = mac {
            link = link.with_address(HardwareAddress::from(mac));
        }
        self.shared.borrow_mut().links.push(link);
    }

    /// Panics on a malformed address; fixtures are static.
    pub fn add_addr(&self, index: u32, address: &str, prefix_len: u8) {
        let ip: IpAddr = address
            .parse()
            .unwrap_or_else(|_| panic!("bad fixture address {address}"));
        self.shared
            .borrow_mut()
            .addrs
            .push(AddrEntry::new(index, ip, prefix_len));
    }

    pub fn remove_link(&self, name: &str) {
        self.shared.borrow_mut().links.retain(|l| l.name != name);
    }

    pub fn set_fail_links(&self, fail: bool) {
        self.shared.borrow_mut().fail_links = fail;
    }

    pub fn set_fail_addrs(&self, fail: bool) {
        self.shared.borrow_mut().fail_addrs = fail;
    }

    pub fn link_dumps(&self) -> usize {
        self.shared.borrow().link_dumps
    }

    pub fn addr_dumps(&self) -> usize {
        self.shared.borrow().addr_dumps
    }
}

impl RouteSource for CannedRoutes {
    fn dump_links(&mut self) -> Result<Vec<LinkEntry>, NetlinkError> {
        let mut shared = self.shared.borrow_mut();
        shared.link_dumps += 1;
        if shared.fail_links {
            return Err(NetlinkError::Kernel(-ENOBUFS));
        }
        Ok(shared.links.clone())
    }

    fn dump_addresses(&mut self) -> Result<Vec<AddrEntry>, NetlinkError> {
        let mut shared = self.shared.borrow_mut();
        shared.addr_dumps += 1;
        if shared.fail_addrs {
            return Err(NetlinkError::Kernel(-ENOBUFS));
        }
        Ok(shared.addrs.clone())
    }
}
