//! Route-protocol socket used to refill the link and address caches.
//!
//! Each refill sends one RTM_GETLINK or RTM_GETADDR dump request and reads
//! multipart replies until the kernel signals the end of the dump. The
//! socket is blocking and has no timeout.

use super::{AddrEntry, AddrFamily, LinkEntry, NetlinkError, RouteSource};
use netcf_common::HardwareAddress;
use netlink_packet_core::{
    NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tracing::{debug, instrument, trace};

/// NETLINK_ROUTE socket issuing dump requests.
pub struct NetlinkRouteSocket {
    socket: Socket,
    sequence: u32,
}

impl NetlinkRouteSocket {
    /// Opens and connects a route-protocol socket.
    #[instrument]
    pub fn new() -> Result<Self, NetlinkError> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(|source| NetlinkError::Socket {
            operation: "create",
            source,
        })?;
        socket.bind_auto().map_err(|source| NetlinkError::Socket {
            operation: "bind",
            source,
        })?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|source| NetlinkError::Socket {
                operation: "connect",
                source,
            })?;

        debug!("route netlink socket connected");
        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    /// Sends a dump request and collects the replies until NLMSG_DONE.
    fn dump(&mut self, request: RouteNetlinkMessage) -> Result<Vec<RouteNetlinkMessage>, NetlinkError> {
        self.sequence = self.sequence.wrapping_add(1);

        let mut header = NetlinkHeader::default();
        header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        header.sequence_number = self.sequence;

        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(request));
        packet.finalize();
        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);

        self.socket
            .send(&buf, 0)
            .map_err(|source| NetlinkError::Socket {
                operation: "send",
                source,
            })?;

        let mut replies = Vec::new();
        loop {
            let (data, _) = self
                .socket
                .recv_from_full()
                .map_err(|source| NetlinkError::Socket {
                    operation: "recv",
                    source,
                })?;

            let mut offset = 0;
            while offset < data.len() {
                let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&data[offset..])
                    .map_err(|e| NetlinkError::Parse(e.to_string()))?;

                let len = msg.header.length as usize;
                if len == 0 {
                    return Err(NetlinkError::Parse("zero-length message".into()));
                }
                offset += len;
                // Align to 4 bytes (netlink alignment requirement)
                offset = (offset + 3) & !3;

                match msg.payload {
                    NetlinkPayload::Done(_) => {
                        trace!(count = replies.len(), "dump complete");
                        return Ok(replies);
                    }
                    NetlinkPayload::Error(err) => {
                        if let Some(code) = err.code {
                            return Err(NetlinkError::Kernel(code.get()));
                        }
                    }
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    _ => {}
                }
            }
        }
    }
}

impl RouteSource for NetlinkRouteSocket {
    #[instrument(skip(self))]
    fn dump_links(&mut self) -> Result<Vec<LinkEntry>, NetlinkError> {
        let replies = self.dump(RouteNetlinkMessage::GetLink(LinkMessage::default()))?;
        Ok(replies
            .into_iter()
            .filter_map(|msg| match msg {
                RouteNetlinkMessage::NewLink(link) => Some(link_entry(link)),
                _ => None,
            })
            .collect())
    }

    #[instrument(skip(self))]
    fn dump_addresses(&mut self) -> Result<Vec<AddrEntry>, NetlinkError> {
        let replies = self.dump(RouteNetlinkMessage::GetAddress(AddressMessage::default()))?;
        Ok(replies
            .into_iter()
            .filter_map(|msg| match msg {
                RouteNetlinkMessage::NewAddress(addr) => Some(addr_entry(&addr)),
                _ => None,
            })
            .collect())
    }
}

fn link_entry(link: LinkMessage) -> LinkEntry {
    let mut entry = LinkEntry::new(link.header.index, String::new());
    for attr in link.attributes {
        match attr {
            LinkAttribute::IfName(name) => entry.name = name,
            LinkAttribute::Address(bytes) => entry.address = Some(HardwareAddress::new(bytes)),
            _ => {}
        }
    }
    entry
}

/// The local address wins over the peer address, as `ip addr` shows it.
fn addr_entry(addr: &AddressMessage) -> AddrEntry {
    let mut local = None;
    let mut peer = None;
    for attr in &addr.attributes {
        match attr {
            AddressAttribute::Local(ip) => local = Some(*ip),
            AddressAttribute::Address(ip) => peer = Some(*ip),
            _ => {}
        }
    }

    AddrEntry {
        index: addr.header.index,
        family: local
            .or(peer)
            .map(AddrFamily::from)
            .unwrap_or(AddrFamily::Other),
        prefix_len: addr.header.prefix_len,
    }
}
