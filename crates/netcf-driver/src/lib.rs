//! Driver-support layer for netcf.
//!
//! This crate holds what a netcf backend needs between the public API and
//! the system:
//!
//! - [`session`]: the lazily connected configuration-tree session and the
//!   transform-table registry that seeds it
//! - [`transform`]: stylesheet and schema plumbing between the interface
//!   description and the store projection, plus the extension functions
//!   the stylesheets call
//! - [`live_state`]: enrichment of an interface description from the
//!   kernel's link and address caches ([`kernel`])
//! - [`probe`]: interface type and up/down probes outside the store
//! - [`xml`]: the transient documents passed between the stages
//! - [`exec`]: running the external programs that bring interfaces up
//!   and down
//! - [`context`]: the [`Context`] tying these together per driver instance
//!
//! The store, the stylesheet engine and the schema engine are external
//! collaborators reached through [`store::StoreBackend`] and
//! [`transform::TransformEngine`].
//!
//! # Architecture
//!
//! ```text
//! interface XML --parse--> Document --validate--> get.xsl --> store projection
//! store projection --parse--> Document --> put.xsl --> interface XML
//! interface XML + kernel caches --add_state--> enriched interface XML
//! ```

pub mod config;
pub mod context;
pub mod exec;
pub mod kernel;
pub mod live_state;
pub mod probe;
pub mod session;
pub mod store;
pub mod transform;
pub mod xml;

pub use config::{ConfigError, NetcfConfig, ProbeConfig};
pub use context::{Backends, Context, InterfaceHandle, StoreGuard};
pub use exec::ExecResult;
pub use kernel::{default_route_source, AddrEntry, AddrFamily, LinkEntry, NetlinkError, RouteSource};
pub use probe::{InterfaceType, ProbeError};
pub use session::{PathValue, SessionState, TransformTable};
pub use store::{ConnectOptions, StoreBackend, StoreError, TreeStore};
pub use transform::{Schema, Stylesheet, TransformContext, TransformEngine, TransformState};
pub use xml::{Document, Element, Node, XmlError};

pub use netcf_common::{ErrorContext, ErrorKind, NetcfError, NetcfResult, Ref};
