//! In-memory configuration store.
//!
//! [`MemoryStore`] is both the backend handed to a context and the test's
//! window into it: clones share one tree and one operation log, so a test
//! keeps a clone, boxes another into `Backends`, and inspects what the
//! session did afterwards.

use netcf_driver::store::{ConnectOptions, StoreBackend, StoreError, TreeStore, LOAD_FILTERS};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Characters the store does not accept unescaped in a path component.
const SPECIAL: &[char] = &['/', '\\', '*', '[', ']', '(', ')', '|', '=', '!', ' '];

/// One call the session made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Connect(ConnectOptions),
    Remove(String),
    Set(String, Option<String>),
    DefineVariable(String, Option<String>),
    DefineNode {
        name: String,
        expr: String,
        value: Option<String>,
    },
    Load,
    Match(String),
}

#[derive(Debug, Default)]
struct Shared {
    ops: Vec<StoreOp>,
    tree: BTreeMap<String, Option<String>>,
    variables: BTreeMap<String, String>,
    connects: usize,
    loads: usize,
    fail_connect: bool,
    fail_load: bool,
    fail_set: Option<String>,
    error_markers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Rc<RefCell<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A boxed clone for `Backends`.
    pub fn backend(&self) -> Box<dyn StoreBackend> {
        Box::new(self.clone())
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.shared.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.shared.borrow_mut().ops.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.shared.borrow().connects
    }

    pub fn load_count(&self) -> usize {
        self.shared.borrow().loads
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.borrow_mut().fail_connect = fail;
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.shared.borrow_mut().fail_load = fail;
    }

    /// Makes `set` fail for exactly this path.
    pub fn set_fail_set(&self, path: Option<&str>) {
        self.shared.borrow_mut().fail_set = path.map(str::to_string);
    }

    /// Files that fail to parse on every later load; each leaves an
    /// error marker under `/augeas/files/<file>/error`.
    pub fn set_broken_files(&self, files: &[&str]) {
        self.shared.borrow_mut().error_markers = files
            .iter()
            .map(|f| format!("/augeas/files{}/error", f))
            .collect();
    }

    pub fn insert(&self, path: &str, value: &str) {
        self.shared.borrow_mut().insert_node(path, Some(value));
    }

    pub fn value(&self, path: &str) -> Option<String> {
        self.shared.borrow().tree.get(path).cloned().flatten()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.shared.borrow().tree.contains_key(path)
    }

    /// Paths `set` since the last load-filter reset, in call order.
    pub fn seeded_paths(&self) -> Vec<String> {
        let shared = self.shared.borrow();
        let start = shared
            .ops
            .iter()
            .rposition(|op| matches!(op, StoreOp::Remove(p) if p == LOAD_FILTERS))
            .map_or(0, |i| i + 1);
        shared.ops[start..]
            .iter()
            .filter_map(|op| match op {
                StoreOp::Set(path, _) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

impl StoreBackend for MemoryStore {
    fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn TreeStore>, StoreError> {
        let mut shared = self.shared.borrow_mut();
        shared.ops.push(StoreOp::Connect(options.clone()));
        if shared.fail_connect {
            return Err(StoreError::Connect("connection refused".into()));
        }
        shared.connects += 1;
        Ok(Box::new(MemoryConnection {
            shared: Rc::clone(&self.shared),
        }))
    }

    fn escape_name(&self, name: &str) -> Result<Option<String>, StoreError> {
        if !name.contains(SPECIAL) {
            return Ok(None);
        }
        let mut escaped = String::with_capacity(name.len() + 4);
        for c in name.chars() {
            if SPECIAL.contains(&c) {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        Ok(Some(escaped))
    }
}

struct MemoryConnection {
    shared: Rc<RefCell<Shared>>,
}

/// Whether `key` is selected by `pattern`: an exact path, `parent/*` for
/// direct children, or `a//b` for any `b` below `a`.
fn path_matches(pattern: &str, key: &str) -> bool {
    if let Some((above, below)) = pattern.split_once("//") {
        return key.starts_with(&format!("{}/", above)) && key.ends_with(&format!("/{}", below));
    }
    if let Some(parent) = pattern.strip_suffix("/*") {
        return key
            .strip_prefix(parent)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
    }
    key == pattern
}

fn is_at_or_below(root: &str, key: &str) -> bool {
    key == root || key.starts_with(&format!("{}/", root))
}

impl Shared {
    fn matching(&self, pattern: &str) -> Vec<String> {
        self.tree
            .keys()
            .filter(|k| path_matches(pattern, k))
            .cloned()
            .collect()
    }

    /// Sets `path`, creating any missing ancestors without a value, the
    /// way the real tree grows.
    fn insert_node(&mut self, path: &str, value: Option<&str>) {
        for (end, _) in path.match_indices('/').filter(|&(i, _)| i > 0) {
            self.tree.entry(path[..end].to_string()).or_insert(None);
        }
        self.tree.insert(path.to_string(), value.map(str::to_string));
    }
}

impl TreeStore for MemoryConnection {
    fn remove(&mut self, path: &str) -> Result<usize, StoreError> {
        let mut shared = self.shared.borrow_mut();
        shared.ops.push(StoreOp::Remove(path.to_string()));
        let roots = shared.matching(path);
        let before = shared.tree.len();
        shared
            .tree
            .retain(|k, _| !roots.iter().any(|r| is_at_or_below(r, k)));
        Ok(before - shared.tree.len())
    }

    fn set(&mut self, path: &str, value: Option<&str>) -> Result<(), StoreError> {
        let mut shared = self.shared.borrow_mut();
        shared
            .ops
            .push(StoreOp::Set(path.to_string(), value.map(str::to_string)));
        if shared.fail_set.as_deref() == Some(path) {
            return Err(StoreError::operation("set", path, "read-only node"));
        }
        shared.insert_node(path, value);
        Ok(())
    }

    fn define_variable(&mut self, name: &str, expr: Option<&str>) -> Result<usize, StoreError> {
        let mut shared = self.shared.borrow_mut();
        shared.ops.push(StoreOp::DefineVariable(
            name.to_string(),
            expr.map(str::to_string),
        ));
        match expr {
            Some(expr) => {
                let count = shared.matching(expr).len();
                shared.variables.insert(name.to_string(), expr.to_string());
                Ok(count)
            }
            None => {
                shared.variables.remove(name);
                Ok(0)
            }
        }
    }

    fn define_node(
        &mut self,
        name: &str,
        expr: &str,
        value: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut shared = self.shared.borrow_mut();
        shared.ops.push(StoreOp::DefineNode {
            name: name.to_string(),
            expr: expr.to_string(),
            value: value.map(str::to_string),
        });
        let matched = shared.matching(expr);
        if matched.len() > 1 {
            return Err(StoreError::operation(
                "defnode",
                expr,
                format!("expression matches {} nodes", matched.len()),
            ));
        }
        shared.variables.insert(name.to_string(), expr.to_string());
        if matched.is_empty() {
            if expr.contains('*') || expr.contains("//") {
                return Err(StoreError::operation("defnode", expr, "cannot create node"));
            }
            shared.insert_node(expr, value);
            return Ok(true);
        }
        Ok(false)
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let mut shared = self.shared.borrow_mut();
        shared.ops.push(StoreOp::Load);
        if shared.fail_load {
            return Err(StoreError::operation("load", "/", "lens compilation failed"));
        }
        shared.loads += 1;
        shared.tree.retain(|k, _| !path_matches("/augeas//error", k));
        let markers = shared.error_markers.clone();
        for marker in markers {
            shared.insert_node(&marker, Some("parse_failed"));
        }
        Ok(())
    }

    fn matches(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let mut shared = self.shared.borrow_mut();
        shared.ops.push(StoreOp::Match(path.to_string()));
        Ok(shared.matching(path))
    }

    fn dump(&self, path: &str) -> Result<String, StoreError> {
        let shared = self.shared.borrow();
        let mut out = String::new();
        for key in shared.matching(path) {
            match shared.tree.get(&key).cloned().flatten() {
                Some(value) => out.push_str(&format!("{} = {}\n", key, value)),
                None => out.push_str(&format!("{}\n", key)),
            }
        }
        Ok(out)
    }
}
