//! Extension functions bound into the stylesheets.
//!
//! Functions follow the engine's stack convention: a call with `nargs`
//! arguments pops them (last argument first) and pushes exactly one result.
//! A failing call pushes nothing.

use crate::store::StoreBackend;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

pub const IPCALC_NS: &str = "http://redhat.com/xslt/netcf/ipcalc/1.0";
pub const BOND_NS: &str = "http://redhat.com/xslt/netcf/bond/1.0";
pub const PATHCOMPONENT_NS: &str = "http://redhat.com/xslt/netcf/pathcomponent/1.0";

/// Characters ending a bonding option value.
const OPTION_VALUE_END: &str = " \t'\"";

/// An XPath 1.0 value as it travels on the engine's stack.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathValue {
    Number(f64),
    String(String),
    Boolean(bool),
}

impl XPathValue {
    /// `number()` coercion.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => string_to_number(s),
            XPathValue::Boolean(b) => f64::from(u8::from(*b)),
        }
    }

    /// `string()` coercion.
    pub fn into_string(self) -> String {
        match self {
            XPathValue::Number(n) => number_to_string(n),
            XPathValue::String(s) => s,
            XPathValue::Boolean(b) => b.to_string(),
        }
    }
}

impl From<&str> for XPathValue {
    fn from(s: &str) -> Self {
        XPathValue::String(s.to_string())
    }
}

impl From<String> for XPathValue {
    fn from(s: String) -> Self {
        XPathValue::String(s)
    }
}

impl From<f64> for XPathValue {
    fn from(n: f64) -> Self {
        XPathValue::Number(n)
    }
}

impl fmt::Display for XPathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clone().into_string())
    }
}

fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    let body = t.strip_prefix('-').unwrap_or(t);
    let well_formed = !body.is_empty()
        && body != "."
        && body.matches('.').count() <= 1
        && body.chars().all(|c| c.is_ascii_digit() || c == '.');
    if well_formed {
        t.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

/// Argument stack shared between the engine and extension functions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueStack {
    values: Vec<XPathValue>,
}

impl ValueStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<XPathValue>) {
        self.values.push(value.into());
    }

    pub fn pop(&mut self) -> Option<XPathValue> {
        self.values.pop()
    }

    pub fn pop_number(&mut self) -> Option<f64> {
        self.pop().map(|v| v.to_number())
    }

    pub fn pop_string(&mut self) -> Option<String> {
        self.pop().map(XPathValue::into_string)
    }

    pub fn peek(&self) -> Option<&XPathValue> {
        self.values.last()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Failure inside an extension function. The message is what the
/// transform's error callback receives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("{function}: expected {expected} argument(s), got {given}")]
    Arity {
        function: &'static str,
        expected: usize,
        given: usize,
    },

    #[error("{function}: {message}")]
    Failed {
        function: &'static str,
        message: String,
    },

    #[error("no extension function {name} in namespace {namespace}")]
    Unknown { namespace: String, name: String },
}

impl ExtensionError {
    fn failed(function: &'static str, message: impl Into<String>) -> Self {
        ExtensionError::Failed {
            function,
            message: message.into(),
        }
    }
}

pub type ExtensionFn =
    fn(&dyn StoreBackend, &mut ValueStack, usize) -> Result<(), ExtensionError>;

#[derive(Clone, Copy)]
struct Binding {
    namespace: &'static str,
    name: &'static str,
    function: ExtensionFn,
}

/// Extension functions keyed by namespace and local name.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    bindings: Vec<Binding>,
}

impl ExtensionRegistry {
    /// The registry every transform runs with.
    pub fn netcf() -> Self {
        let mut registry = Self::default();
        registry.register(IPCALC_NS, "netmask", ipcalc_netmask);
        registry.register(IPCALC_NS, "prefix", ipcalc_prefix);
        registry.register(BOND_NS, "option", bond_option);
        registry.register(PATHCOMPONENT_NS, "escape", pathcomponent_escape);
        registry
    }

    /// Binds `function`, replacing an earlier binding of the same name.
    pub fn register(&mut self, namespace: &'static str, name: &'static str, function: ExtensionFn) {
        self.bindings
            .retain(|b| !(b.namespace == namespace && b.name == name));
        self.bindings.push(Binding {
            namespace,
            name,
            function,
        });
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<ExtensionFn> {
        self.bindings
            .iter()
            .find(|b| b.namespace == namespace && b.name == name)
            .map(|b| b.function)
    }

    /// `(namespace, name)` of every binding.
    pub fn names(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.bindings.iter().map(|b| (b.namespace, b.name))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.bindings.iter().map(|b| format!("{{{}}}{}", b.namespace, b.name)))
            .finish()
    }
}

fn check_arity(function: &'static str, given: usize, expected: usize) -> Result<(), ExtensionError> {
    if given == expected {
        Ok(())
    } else {
        Err(ExtensionError::Arity {
            function,
            expected,
            given,
        })
    }
}

/// `ipcalc:netmask(24)` is `"255.255.255.0"`.
pub fn ipcalc_netmask(
    _store: &dyn StoreBackend,
    stack: &mut ValueStack,
    nargs: usize,
) -> Result<(), ExtensionError> {
    const NAME: &str = "ipcalc:netmask";
    check_arity(NAME, nargs, 1)?;

    let raw = stack
        .pop_number()
        .ok_or_else(|| ExtensionError::failed(NAME, "failed to get prefix as number"))?;
    let prefix = raw as u64;
    if prefix as f64 != raw {
        return Err(ExtensionError::failed(NAME, "failed to convert prefix to int"));
    }
    if prefix == 0 || prefix > 32 {
        return Err(ExtensionError::failed(
            NAME,
            format!("prefix {} not in the range 1 to 32", prefix),
        ));
    }

    let mask = if prefix == 32 {
        u32::MAX
    } else {
        !(u32::MAX >> prefix)
    };
    stack.push(Ipv4Addr::from(mask).to_string());
    Ok(())
}

/// `ipcalc:prefix("255.255.0.0")` is `"16"`; the empty string maps to itself.
///
/// Only contiguous masks give a meaningful result.
pub fn ipcalc_prefix(
    _store: &dyn StoreBackend,
    stack: &mut ValueStack,
    nargs: usize,
) -> Result<(), ExtensionError> {
    const NAME: &str = "ipcalc:prefix";
    check_arity(NAME, nargs, 1)?;

    let netmask = stack
        .pop_string()
        .ok_or_else(|| ExtensionError::failed(NAME, "failed to get netmask as string"))?;
    if netmask.is_empty() {
        stack.push("");
        return Ok(());
    }

    let addr: Ipv4Addr = netmask
        .parse()
        .map_err(|_| ExtensionError::failed(NAME, format!("illegal netmask '{}'", netmask)))?;
    let host = u64::from(u32::from(addr));

    let mut prefix = 32u32;
    for i in 0..32 {
        if host & ((2u64 << i) - 1) == 0 {
            prefix -= 1;
        }
    }
    stack.push(prefix.to_string());
    Ok(())
}

/// `bond:option("mode=active-backup miimon=100", "mode")` is
/// `"active-backup"`.
///
/// Matches the first occurrence of the name anywhere in the options, so a
/// name that ends another option's name (`up` in `downdelay=5 updelay=5`)
/// can pick the wrong one.
pub fn bond_option(
    _store: &dyn StoreBackend,
    stack: &mut ValueStack,
    nargs: usize,
) -> Result<(), ExtensionError> {
    const NAME: &str = "bond:option";
    check_arity(NAME, nargs, 2)?;

    let name = stack
        .pop_string()
        .ok_or_else(|| ExtensionError::failed(NAME, "missing option name"))?;
    let opts = stack
        .pop_string()
        .ok_or_else(|| ExtensionError::failed(NAME, "missing options"))?;

    let value = opts
        .find(&name)
        .and_then(|at| opts[at + name.len()..].strip_prefix('='))
        .map(|rest| {
            let end = rest
                .find(|c: char| OPTION_VALUE_END.contains(c))
                .unwrap_or(rest.len());
            &rest[..end]
        })
        .unwrap_or("");
    stack.push(value);
    Ok(())
}

/// `pathcomponent:escape(s)` escapes `s` for use as one store path
/// component.
pub fn pathcomponent_escape(
    store: &dyn StoreBackend,
    stack: &mut ValueStack,
    nargs: usize,
) -> Result<(), ExtensionError> {
    const NAME: &str = "pathcomponent:escape";
    check_arity(NAME, nargs, 1)?;

    let original = stack
        .pop_string()
        .ok_or_else(|| ExtensionError::failed(NAME, "missing argument"))?;
    if original.is_empty() {
        stack.push("");
        return Ok(());
    }

    match store.escape_name(&original) {
        Ok(Some(escaped)) => stack.push(escaped),
        Ok(None) => stack.push(original),
        Err(e) => {
            return Err(ExtensionError::failed(
                NAME,
                format!("failed to escape '{}': {}", original, e),
            ))
        }
    }
    Ok(())
}
