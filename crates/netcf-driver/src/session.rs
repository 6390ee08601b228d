//! Configuration-tree session.
//!
//! The session connects to the store lazily and keeps it ready for use:
//! every registration or removal of a [`TransformTable`] marks the session
//! dirty, and the next acquisition reseeds the store's load filters from
//! all registered tables and reloads the native files.
//!
//! ```text
//! Closed --connect--> TablesDirty --reseed--> LoadPending --load--> Ready
//!   ^                     ^                                           |
//!   |                     +------------ register / unregister --------+
//!   +---- any failure while connecting, reseeding or loading
//! ```
//!
//! A failure tears the connection down and is reported once; the next
//! acquisition starts again from `Closed`.

use crate::store::{
    ConnectOptions, StoreBackend, TreeStore, ERROR_MARKERS, LOAD_FILTERS, STALE_VARIABLES,
};
use netcf_common::{ErrorContext, ErrorKind, NetcfResult, Ref};
use std::fmt;
use tracing::{debug, info, instrument, trace, warn};

/// A path/value pair written into the store before every reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValue {
    pub path: String,
    pub value: String,
}

/// Named, fixed list of path/value pairs contributed by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformTable {
    name: String,
    entries: Box<[PathValue]>,
}

impl TransformTable {
    pub fn new<I, P, V>(name: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            entries: entries
                .into_iter()
                .map(|(p, v)| PathValue {
                    path: p.into(),
                    value: v.into(),
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[PathValue] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct Registered {
    sequence: u64,
    table: Ref<TransformTable>,
}

/// Sparse, growable registry of transform tables.
///
/// A freed slot is reused by the next registration, but enumeration always
/// follows registration order so that later tables override earlier ones
/// when both set the same path.
#[derive(Debug, Default)]
pub struct TableRegistry {
    slots: Vec<Option<Registered>>,
    next_sequence: u64,
}

impl TableRegistry {
    /// Stores `table` in the first free slot, growing by one slot if none
    /// is free. Returns the slot used.
    pub fn register(&mut self, table: Ref<TransformTable>) -> usize {
        let entry = Registered {
            sequence: self.next_sequence,
            table,
        };
        self.next_sequence += 1;

        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    /// Clears the slot holding `table` (compared by identity). Returns the
    /// slot, or `None` when the table was not registered.
    pub fn unregister(&mut self, table: &Ref<TransformTable>) -> Option<usize> {
        let slot = self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|r| Ref::ptr_eq(&r.table, table))
        })?;
        self.slots[slot] = None;
        Some(slot)
    }

    /// Number of slots, occupied or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, slot: usize) -> Option<&Ref<TransformTable>> {
        self.slots.get(slot)?.as_ref().map(|r| &r.table)
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered tables in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TransformTable> + '_ {
        let mut live: Vec<&Registered> = self.slots.iter().flatten().collect();
        live.sort_by_key(|r| r.sequence);
        live.into_iter().map(|r| &*r.table)
    }
}

/// Observable state of a [`StoreSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection.
    Closed,
    /// Tables changed since the last reseed.
    TablesDirty,
    /// Reseeded, native files not loaded yet.
    LoadPending,
    /// Connected, seeded and loaded.
    Ready,
}

/// Lazily connected, dirty-tracking store session.
pub struct StoreSession {
    backend: Box<dyn StoreBackend>,
    options: ConnectOptions,
    debug: bool,
    store: Option<Box<dyn TreeStore>>,
    tables: TableRegistry,
    tables_dirty: bool,
    load_pending: bool,
}

impl StoreSession {
    pub fn new(backend: Box<dyn StoreBackend>, options: ConnectOptions, debug: bool) -> Self {
        Self {
            backend,
            options,
            debug,
            store: None,
            tables: TableRegistry::default(),
            tables_dirty: true,
            load_pending: false,
        }
    }

    pub fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn tables(&self) -> &TableRegistry {
        &self.tables
    }

    pub fn state(&self) -> SessionState {
        if self.store.is_none() {
            SessionState::Closed
        } else if self.tables_dirty {
            SessionState::TablesDirty
        } else if self.load_pending {
            SessionState::LoadPending
        } else {
            SessionState::Ready
        }
    }

    pub fn register(&mut self, table: Ref<TransformTable>) -> usize {
        let name = table.name().to_string();
        let slot = self.tables.register(table);
        self.tables_dirty = true;
        debug!(table = %name, slot, "registered transform table");
        slot
    }

    /// Unregistering a table that is not registered is not an error.
    pub fn unregister(&mut self, table: &Ref<TransformTable>) -> bool {
        match self.tables.unregister(table) {
            Some(slot) => {
                self.tables_dirty = true;
                debug!(table = %table.name(), slot, "unregistered transform table");
                true
            }
            None => false,
        }
    }

    /// Drops the connection; the next acquisition reconnects.
    pub fn close(&mut self) {
        if self.store.take().is_some() {
            info!("configuration store connection closed");
        }
        self.load_pending = false;
    }

    /// Returns the connection, connecting, reseeding and reloading first as
    /// the session state requires.
    #[instrument(skip_all, fields(state = ?self.state()))]
    pub fn acquire(
        &mut self,
        errors: &ErrorContext,
    ) -> NetcfResult<&mut (dyn TreeStore + 'static)> {
        if self.store.is_none() {
            let store = self.backend.connect(&self.options).map_err(|e| {
                errors.report_fmt(
                    ErrorKind::StoreFailure,
                    format_args!("failed to open configuration store: {}", e),
                )
            })?;
            info!(lens_dir = %self.options.lens_dir.display(), "configuration store connected");
            self.store = Some(store);
            self.tables_dirty = true;
        }

        if self.tables_dirty {
            if let Err(err) = self.reseed(errors) {
                self.close();
                return Err(err);
            }
            self.tables_dirty = false;
            self.load_pending = true;
        }

        if self.load_pending {
            if let Err(err) = self.reload(errors) {
                self.close();
                return Err(err);
            }
            self.load_pending = false;
        }

        self.store.as_deref_mut().ok_or_else(|| {
            errors.report(
                ErrorKind::InternalInvariant,
                Some("configuration store is not open".into()),
            )
        })
    }

    /// The connection if the session is ready, without connecting.
    pub fn connection_mut(&mut self) -> Option<&mut (dyn TreeStore + 'static)> {
        if self.state() == SessionState::Ready {
            self.store.as_deref_mut()
        } else {
            None
        }
    }

    fn reseed(&mut self, errors: &ErrorContext) -> NetcfResult<()> {
        let Some(store) = self.store.as_deref_mut() else {
            return Err(errors.report(
                ErrorKind::InternalInvariant,
                Some("configuration store is not open".into()),
            ));
        };

        store.remove(LOAD_FILTERS).map_err(|e| {
            errors.report_fmt(
                ErrorKind::StoreFailure,
                format_args!("failed to clear load filters: {}", e),
            )
        })?;

        for table in self.tables.iter() {
            trace!(table = %table.name(), entries = table.len(), "seeding table");
            for pv in table.entries() {
                store.set(&pv.path, Some(&pv.value)).map_err(|e| {
                    errors.report_fmt(
                        ErrorKind::StoreFailure,
                        format_args!("transform setup failed to set {}: {}", pv.path, e),
                    )
                })?;
            }
        }
        debug!(tables = self.tables.len(), "load filters reseeded");
        Ok(())
    }

    fn reload(&mut self, errors: &ErrorContext) -> NetcfResult<()> {
        let Some(store) = self.store.as_deref_mut() else {
            return Err(errors.report(
                ErrorKind::InternalInvariant,
                Some("configuration store is not open".into()),
            ));
        };

        for name in STALE_VARIABLES {
            if let Err(e) = store.define_variable(name, None) {
                trace!(variable = name, error = %e, "could not clear variable");
            }
        }

        store.load().map_err(|e| {
            errors.report_fmt(
                ErrorKind::StoreFailure,
                format_args!("failed to load config files: {}", e),
            )
        })?;

        let markers = store.count_matches(ERROR_MARKERS).map_err(|e| {
            errors.report_fmt(
                ErrorKind::StoreFailure,
                format_args!("failed to inspect load errors: {}", e),
            )
        })?;

        if markers > 0 {
            if self.debug {
                let dump = store
                    .dump(ERROR_MARKERS)
                    .unwrap_or_else(|e| format!("(error markers unavailable: {})", e));
                eprintln!("warning: configuration store initialization had errors");
                eprintln!("please file a bug with the following lines in the bug report:");
                eprintln!("{}", dump);
                warn!(markers, details = %dump, "configuration store load reported errors");
            }
            return Err(errors.report_fmt(
                ErrorKind::StoreFailure,
                format_args!("errors in loading some config files ({} markers)", markers),
            ));
        }

        info!("configuration files loaded");
        Ok(())
    }
}

impl fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSession")
            .field("state", &self.state())
            .field("options", &self.options)
            .field("tables", &self.tables)
            .finish()
    }
}
