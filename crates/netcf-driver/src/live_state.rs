//! Enriches an `<interface>` description with what the kernel currently
//! reports for it: the hardware address and the configured addresses.

use crate::kernel::{AddrFamily, KernelState};
use crate::xml::{Document, Element};
use netcf_common::{ErrorContext, ErrorKind, NetcfResult};
use tracing::{debug, instrument, trace};

const FAMILY_IPV4: &str = "ipv4";
const FAMILY_IPV6: &str = "ipv6";

/// Adds `<mac>` and `<protocol><ip/></protocol>` children for `name` to the
/// root of `doc`.
///
/// Both kernel caches are refreshed first; nothing is touched if that or
/// the name lookup fails. Addresses are appended without de-duplication,
/// so callers pass a description that carries no live state yet.
#[instrument(skip_all, fields(interface = %name))]
pub fn add_state(
    doc: &mut Document,
    name: &str,
    kernel: &mut KernelState,
    errors: &ErrorContext,
) -> NetcfResult<()> {
    if doc.root().name() != "interface" {
        return Err(errors.report(
            ErrorKind::InternalInvariant,
            Some("root document is not an interface".into()),
        ));
    }

    kernel.refill_links().map_err(|e| {
        debug!(error = %e, "link cache refill failed");
        errors.report(
            ErrorKind::NetlinkFailure,
            Some("failed to refill interface index cache".into()),
        )
    })?;
    kernel.refill_addrs().map_err(|e| {
        debug!(error = %e, "address cache refill failed");
        errors.report(
            ErrorKind::NetlinkFailure,
            Some("failed to refill interface address cache".into()),
        )
    })?;

    let index = kernel.links.name_to_index(name).ok_or_else(|| {
        errors.report_fmt(
            ErrorKind::NetlinkFailure,
            format_args!("Could not find ifindex for interface `{}`", name),
        )
    })?;

    let root = doc.root_mut();
    add_mac(root, kernel, index);
    add_addresses(root, kernel, index);
    Ok(())
}

fn add_mac(root: &mut Element, kernel: &KernelState, index: u32) {
    let Some(mac) = kernel
        .links
        .filter_index(index)
        .find_map(|link| link.hardware_address())
    else {
        return;
    };

    let address = mac.to_string();
    trace!(index, mac = %address, "adding hardware address");
    match root.child_mut("mac") {
        Some(existing) => existing.set_attr("address", address),
        None => {
            root.append_child(Element::new("mac").with_attr("address", address));
        }
    }
}

fn add_addresses(root: &mut Element, kernel: &KernelState, index: u32) {
    // Positions of the protocol elements used in this pass.
    let mut ipv4: Option<usize> = None;
    let mut ipv6: Option<usize> = None;

    for entry in kernel.addrs.filter_index(index) {
        let (family, address, cached) = match entry.family {
            AddrFamily::Ipv4(ip) => (FAMILY_IPV4, ip.to_string(), &mut ipv4),
            AddrFamily::Ipv6(ip) => (FAMILY_IPV6, ip.to_string(), &mut ipv6),
            AddrFamily::Other => continue,
        };

        let pos = *cached.get_or_insert_with(|| protocol_position(root, family));
        let Some(protocol) = root.element_at_mut(pos) else {
            continue;
        };
        trace!(index, %address, prefix = entry.prefix_len, "adding address");
        protocol.append_child(
            Element::new("ip")
                .with_attr("address", address)
                .with_attr("prefix", entry.prefix_len.to_string()),
        );
    }
}

/// Position of the first `<protocol family="..">` child, appending one if
/// there is none.
fn protocol_position(root: &mut Element, family: &str) -> usize {
    root.find_child_position(|e| e.name() == "protocol" && e.attr("family") == Some(family))
        .unwrap_or_else(|| root.append_child(Element::new("protocol").with_attr("family", family)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{AddrEntry, LinkEntry, NetlinkError, RouteSource};
    use netcf_common::HardwareAddress;
    use pretty_assertions::assert_eq;

    #[derive(Clone, Default)]
    struct Canned {
        links: Vec<LinkEntry>,
        addrs: Vec<AddrEntry>,
        fail_addrs: bool,
    }

    impl RouteSource for Canned {
        fn dump_links(&mut self) -> Result<Vec<LinkEntry>, NetlinkError> {
            Ok(self.links.clone())
        }

        fn dump_addresses(&mut self) -> Result<Vec<AddrEntry>, NetlinkError> {
            if self.fail_addrs {
                return Err(NetlinkError::Kernel(-105));
            }
            Ok(self.addrs.clone())
        }
    }

    fn eth0() -> Canned {
        Canned {
            links: vec![
                LinkEntry::new(1, "lo"),
                LinkEntry::new(3, "eth0")
                    .with_address(HardwareAddress::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])),
            ],
            addrs: vec![
                AddrEntry::new(1, "127.0.0.1".parse().unwrap(), 8),
                AddrEntry::new(3, "192.0.2.5".parse().unwrap(), 24),
                AddrEntry::new(3, "2001:db8::1".parse().unwrap(), 64),
            ],
            fail_addrs: false,
        }
    }

    fn enrich(xml: &str, source: Canned) -> (Document, NetcfResult<()>) {
        let mut doc = Document::parse(xml).unwrap();
        let mut kernel = KernelState::new(Box::new(source));
        let errors = ErrorContext::default();
        let result = add_state(&mut doc, "eth0", &mut kernel, &errors);
        (doc, result)
    }

    #[test]
    fn test_enrich_empty_interface() {
        let (doc, result) = enrich("<interface/>", eth0());
        result.unwrap();

        let root = doc.root();
        let macs: Vec<&Element> = root.child_elements().filter(|e| e.name() == "mac").collect();
        assert_eq!(macs.len(), 1);
        assert_eq!(macs[0].attr("address"), Some("aa:bb:cc:dd:ee:ff"));

        let protocols: Vec<&Element> = root
            .child_elements()
            .filter(|e| e.name() == "protocol")
            .collect();
        assert_eq!(protocols.len(), 2);
        assert_eq!(protocols[0].attr("family"), Some("ipv4"));
        assert_eq!(protocols[1].attr("family"), Some("ipv6"));

        let v4: Vec<&Element> = protocols[0].child_elements().collect();
        assert_eq!(v4.len(), 1);
        assert_eq!(v4[0].attr("address"), Some("192.0.2.5"));
        assert_eq!(v4[0].attr("prefix"), Some("24"));

        let v6: Vec<&Element> = protocols[1].child_elements().collect();
        assert_eq!(v6.len(), 1);
        assert_eq!(v6[0].attr("address"), Some("2001:db8::1"));
        assert_eq!(v6[0].attr("prefix"), Some("64"));
    }

    #[test]
    fn test_existing_nodes_are_reused() {
        let xml = r#"<interface type="ethernet" name="eth0">
  <mac address="00:00:00:00:00:01"/>
  <protocol family="ipv4"><dhcp/></protocol>
</interface>"#;
        let (doc, result) = enrich(xml, eth0());
        result.unwrap();

        let root = doc.root();
        assert_eq!(root.child_elements().filter(|e| e.name() == "mac").count(), 1);
        assert_eq!(
            root.child("mac").and_then(|m| m.attr("address")),
            Some("aa:bb:cc:dd:ee:ff")
        );
        let v4 = root.child("protocol").unwrap();
        assert_eq!(v4.attr("family"), Some("ipv4"));
        let names: Vec<&str> = v4.child_elements().map(Element::name).collect();
        assert_eq!(names, vec!["dhcp", "ip"]);
    }

    #[test]
    fn test_one_protocol_node_per_family() {
        let mut source = eth0();
        source
            .addrs
            .push(AddrEntry::new(3, "198.51.100.7".parse().unwrap(), 25));
        let (doc, result) = enrich("<interface/>", source);
        result.unwrap();

        let v4: Vec<&Element> = doc
            .root()
            .child_elements()
            .filter(|e| e.attr("family") == Some("ipv4"))
            .collect();
        assert_eq!(v4.len(), 1);
        assert_eq!(v4[0].child_elements().count(), 2);
    }

    #[test]
    fn test_repeated_enrichment_accumulates_addresses() {
        let mut doc = Document::parse("<interface/>").unwrap();
        let mut kernel = KernelState::new(Box::new(eth0()));
        let errors = ErrorContext::default();
        add_state(&mut doc, "eth0", &mut kernel, &errors).unwrap();
        add_state(&mut doc, "eth0", &mut kernel, &errors).unwrap();

        let v4 = doc.root().child("protocol").unwrap();
        assert_eq!(v4.child_elements().count(), 2);
        assert_eq!(doc.root().child_elements().filter(|e| e.name() == "mac").count(), 1);
    }

    #[test]
    fn test_first_hardware_address_wins() {
        let mut source = eth0();
        source.links.push(
            LinkEntry::new(3, "eth0").with_address(HardwareAddress::from([2, 0, 0, 0, 0, 9])),
        );
        let (doc, result) = enrich("<interface/>", source);
        result.unwrap();
        assert_eq!(
            doc.root().child("mac").and_then(|m| m.attr("address")),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn test_zero_address_adds_no_mac() {
        let source = Canned {
            links: vec![LinkEntry::new(3, "eth0").with_address(HardwareAddress::new(vec![0; 6]))],
            ..Default::default()
        };
        let (doc, result) = enrich("<interface/>", source);
        result.unwrap();
        assert!(doc.root().child("mac").is_none());
    }

    #[test]
    fn test_unknown_interface() {
        let source = Canned {
            links: vec![LinkEntry::new(1, "lo")],
            ..Default::default()
        };
        let (doc, result) = enrich("<interface/>", source);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetlinkFailure);
        assert_eq!(err.details(), Some("Could not find ifindex for interface `eth0`"));
        assert_eq!(doc.root().children().len(), 0);
    }

    #[test]
    fn test_refill_failure_leaves_document_untouched() {
        let mut source = eth0();
        source.fail_addrs = true;
        let (doc, result) = enrich("<interface/>", source);
        let err = result.unwrap_err();
        assert_eq!(err.details(), Some("failed to refill interface address cache"));
        assert_eq!(doc.root().children().len(), 0);
    }

    #[test]
    fn test_non_interface_root() {
        let (_, result) = enrich("<bridge/>", eth0());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InternalInvariant);
    }
}
