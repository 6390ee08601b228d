//! Scripted transform engine.
//!
//! Stylesheet and schema files hold a single directive instead of XSLT or
//! RELAX NG:
//!
//! ```text
//! netcf-mock-stylesheet: get            interface description -> ifcfg forest
//! netcf-mock-stylesheet: put            ifcfg forest -> interface description
//! netcf-mock-stylesheet: identity       copies the input
//! netcf-mock-stylesheet: stop           stops without reporting
//! netcf-mock-stylesheet: fail <message> reports <message> through the error callback
//! netcf-mock-schema: <root> <attr>...   root element name and required attributes
//! ```
//!
//! `get` and `put` compute netmasks, prefixes, bonding options and escaped
//! file names through the context's extension functions, the way the real
//! stylesheets do.

use netcf_driver::transform::{
    Schema, Stylesheet, TransformContext, TransformEngine, ValueStack, XPathValue, BOND_NS,
    IPCALC_NS, PATHCOMPONENT_NS,
};
use netcf_driver::xml::{Document, Element};
use std::path::Path;

pub const STYLESHEET_DIRECTIVE: &str = "netcf-mock-stylesheet:";
pub const SCHEMA_DIRECTIVE: &str = "netcf-mock-schema:";

/// Directory the `get` script places ifcfg files in.
pub const IFCFG_DIR: &str = "/files/etc/sysconfig/network-scripts";

#[derive(Debug, Clone, Copy, Default)]
pub struct MockEngine;

fn directive<'a>(source: &'a str, prefix: &str) -> Option<&'a str> {
    source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?
        .strip_prefix(prefix)
        .map(str::trim)
}

impl TransformEngine for MockEngine {
    fn compile_stylesheet(
        &self,
        path: &Path,
        source: &str,
    ) -> Result<Box<dyn Stylesheet>, String> {
        let body = directive(source, STYLESHEET_DIRECTIVE)
            .ok_or_else(|| format!("{}: not a stylesheet", path.display()))?;
        let (verb, rest) = body.split_once(' ').unwrap_or((body, ""));
        let script = match verb {
            "get" => Script::Get,
            "put" => Script::Put,
            "identity" => Script::Identity,
            "stop" => Script::Stop,
            "fail" => Script::Fail(rest.trim().to_string()),
            other => return Err(format!("unknown script '{}'", other)),
        };
        Ok(Box::new(ScriptedStylesheet { script }))
    }

    fn compile_schema(
        &self,
        path: &Path,
        source: &str,
        report: &mut dyn FnMut(&str),
    ) -> Option<Box<dyn Schema>> {
        let Some(body) = directive(source, SCHEMA_DIRECTIVE) else {
            report(&format!("{}: not a schema", path.display()));
            return None;
        };
        let mut words = body.split_whitespace();
        let Some(root) = words.next() else {
            report(&format!("{}: schema names no root element", path.display()));
            return None;
        };
        Some(Box::new(MockSchema {
            root: root.to_string(),
            required: words.map(str::to_string).collect(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Script {
    Get,
    Put,
    Identity,
    Stop,
    Fail(String),
}

#[derive(Debug)]
struct ScriptedStylesheet {
    script: Script,
}

impl Stylesheet for ScriptedStylesheet {
    fn apply(&self, input: &Document, ctx: &mut TransformContext<'_>) -> Option<Document> {
        match &self.script {
            Script::Get => get(input, ctx),
            Script::Put => put(input, ctx),
            Script::Identity => Some(input.clone()),
            Script::Stop => {
                ctx.stop();
                Some(input.clone())
            }
            Script::Fail(message) => {
                ctx.error(format_args!("{}", message));
                None
            }
        }
    }
}

fn call(ctx: &mut TransformContext<'_>, ns: &str, name: &str, args: Vec<XPathValue>) -> Option<String> {
    let mut stack = ValueStack::new();
    let nargs = args.len();
    for arg in args {
        stack.push(arg);
    }
    ctx.call_extension(ns, name, &mut stack, nargs).ok()?;
    stack.pop_string()
}

fn node(label: &str, value: impl Into<String>) -> Element {
    Element::new("node")
        .with_attr("label", label)
        .with_attr("value", value)
}

fn node_value<'a>(tree: &'a Element, label: &str) -> Option<&'a str> {
    tree.child_elements()
        .find(|n| n.name() == "node" && n.attr("label") == Some(label))
        .and_then(|n| n.attr("value"))
}

fn get(input: &Document, ctx: &mut TransformContext<'_>) -> Option<Document> {
    let iface = input.root();
    if iface.name() != "interface" {
        ctx.error(format_args!("get: unexpected root element <{}>", iface.name()));
        return None;
    }

    let name = iface.attr("name").unwrap_or("");
    let file = call(ctx, PATHCOMPONENT_NS, "escape", vec![name.into()])?;
    let mut tree =
        Element::new("tree").with_attr("path", format!("{}/ifcfg-{}", IFCFG_DIR, file));
    tree.append_child(node("DEVICE", name));

    if let Some(mode) = iface.child("start").and_then(|s| s.attr("mode")) {
        tree.append_child(node("ONBOOT", if mode == "onboot" { "yes" } else { "no" }));
    }
    if let Some(mac) = iface.child("mac").and_then(|m| m.attr("address")) {
        tree.append_child(node("HWADDR", mac));
    }

    let ipv4 = iface
        .child_elements()
        .find(|e| e.name() == "protocol" && e.attr("family") == Some("ipv4"));
    if let Some(proto) = ipv4 {
        if proto.child("dhcp").is_some() {
            tree.append_child(node("BOOTPROTO", "dhcp"));
        } else if let Some(ip) = proto.child("ip") {
            tree.append_child(node("BOOTPROTO", "none"));
            tree.append_child(node("IPADDR", ip.attr("address").unwrap_or("")));
            if let Some(prefix) = ip.attr("prefix") {
                let mask = call(ctx, IPCALC_NS, "netmask", vec![prefix.into()])?;
                tree.append_child(node("NETMASK", mask));
            }
        }
    }

    if let Some(bond) = iface.child("bond") {
        let opts: Vec<String> = ["mode", "miimon"]
            .iter()
            .filter_map(|key| bond.attr(key).map(|v| format!("{}={}", key, v)))
            .collect();
        tree.append_child(node("BONDING_OPTS", format!("'{}'", opts.join(" "))));
    }

    let mut forest = Element::new("forest");
    forest.append_child(tree);
    Some(Document::new(forest))
}

fn put(input: &Document, ctx: &mut TransformContext<'_>) -> Option<Document> {
    let Some(tree) = input.root().child("tree") else {
        ctx.error(format_args!("put: no tree in <{}>", input.root().name()));
        return None;
    };

    let bonding = node_value(tree, "BONDING_OPTS");
    let kind = if bonding.is_some() { "bond" } else { "ethernet" };
    let mut iface = Element::new("interface")
        .with_attr("type", kind)
        .with_attr("name", node_value(tree, "DEVICE").unwrap_or(""));

    if let Some(onboot) = node_value(tree, "ONBOOT") {
        let mode = if onboot == "yes" { "onboot" } else { "none" };
        iface.append_child(Element::new("start").with_attr("mode", mode));
    }
    if let Some(mac) = node_value(tree, "HWADDR") {
        iface.append_child(Element::new("mac").with_attr("address", mac));
    }

    match (node_value(tree, "BOOTPROTO"), node_value(tree, "IPADDR")) {
        (Some("dhcp"), _) => {
            let mut proto = Element::new("protocol").with_attr("family", "ipv4");
            proto.append_child(Element::new("dhcp"));
            iface.append_child(proto);
        }
        (_, Some(address)) => {
            let netmask = node_value(tree, "NETMASK").unwrap_or("");
            let prefix = call(ctx, IPCALC_NS, "prefix", vec![netmask.into()])?;
            let mut ip = Element::new("ip").with_attr("address", address);
            if !prefix.is_empty() {
                ip.set_attr("prefix", prefix);
            }
            let mut proto = Element::new("protocol").with_attr("family", "ipv4");
            proto.append_child(ip);
            iface.append_child(proto);
        }
        _ => {}
    }

    if let Some(opts) = bonding {
        let mut bond = Element::new("bond");
        for key in ["mode", "miimon"] {
            let value = call(ctx, BOND_NS, "option", vec![opts.into(), key.into()])?;
            if !value.is_empty() {
                bond.set_attr(key, value);
            }
        }
        iface.append_child(bond);
    }

    Some(Document::new(iface))
}

#[derive(Debug)]
struct MockSchema {
    root: String,
    required: Vec<String>,
}

impl Schema for MockSchema {
    fn validate(&self, doc: &Document, report: &mut dyn FnMut(&str)) -> bool {
        let root = doc.root();
        if root.name() != self.root {
            report(&format!(
                "Expecting element {}, got {}",
                self.root,
                root.name()
            ));
            return false;
        }
        let mut valid = true;
        for attr in &self.required {
            if root.attr(attr).is_none() {
                report(&format!(
                    "Element {} failed to validate attributes: missing {}",
                    self.root, attr
                ));
                valid = false;
            }
        }
        valid
    }
}
