//! Configuration-tree store collaborator.
//!
//! The store (an Augeas-style tree of paths mapped onto native config
//! files) lives outside this crate. [`StoreBackend`] opens connections and
//! exposes the store's name-escaping primitive; [`TreeStore`] is one open
//! connection.

use std::path::PathBuf;
use thiserror::Error;

/// Path under which the store keeps its file-filter (load) settings.
pub const LOAD_FILTERS: &str = "/augeas/load/*";

/// Path expression matching every error marker left by a load.
pub const ERROR_MARKERS: &str = "/augeas//error";

/// Variables a previous load may have left defined.
pub const STALE_VARIABLES: [&str; 4] = ["iptables", "fw", "fw_custom", "ipt_filter"];

/// Failure reported by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("{operation} failed on '{path}': {message}")]
    Operation {
        operation: &'static str,
        path: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn operation(
        operation: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Operation {
            operation,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Parameters of a new store connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Filesystem root the store reads and writes under (`None` = `/`).
    pub root: Option<PathBuf>,
    /// Directory holding the store's file grammars.
    pub lens_dir: PathBuf,
    /// Load only the grammars named by the seeded filters.
    pub no_module_autoload: bool,
}

/// Factory for store connections.
pub trait StoreBackend {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn TreeStore>, StoreError>;

    /// Escapes `name` for use as one path component. `Ok(None)` means the
    /// name needed no escaping.
    fn escape_name(&self, name: &str) -> Result<Option<String>, StoreError>;
}

/// One open connection to the store.
pub trait TreeStore {
    /// Removes every node matching `path`; returns how many were removed.
    fn remove(&mut self, path: &str) -> Result<usize, StoreError>;

    fn set(&mut self, path: &str, value: Option<&str>) -> Result<(), StoreError>;

    /// Defines (or with `None`, undefines) a path variable.
    fn define_variable(&mut self, name: &str, expr: Option<&str>) -> Result<usize, StoreError>;

    /// Defines a variable bound to a single node, creating the node with
    /// `value` when nothing matches. Returns whether a node was created.
    fn define_node(
        &mut self,
        name: &str,
        expr: &str,
        value: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Loads the native files selected by the current filters.
    fn load(&mut self) -> Result<(), StoreError>;

    fn matches(&self, path: &str) -> Result<Vec<String>, StoreError>;

    fn count_matches(&self, path: &str) -> Result<usize, StoreError> {
        self.matches(path).map(|m| m.len())
    }

    /// Renders the subtree at `path` as text, for diagnostics.
    fn dump(&self, path: &str) -> Result<String, StoreError>;
}
