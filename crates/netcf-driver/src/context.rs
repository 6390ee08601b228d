//! The library context and interface handles.
//!
//! A [`Context`] owns everything one driver instance needs: the error slot,
//! the lazily connected store session, the compiled transform resources,
//! the kernel caches and the flag socket. Nothing is shared between
//! contexts, and a context is used from one thread at a time.
//!
//! Every public operation starts by clearing the error slot, so the error
//! a caller sees is the first one its own call reported.

use crate::config::{NetcfConfig, ProbeConfig};
use crate::exec;
use crate::kernel::{KernelState, RouteSource};
use crate::live_state;
use crate::probe::{probe_interface_type, FlagSocket, InterfaceType};
use crate::session::{SessionState, StoreSession, TransformTable};
use crate::store::{ConnectOptions, StoreBackend, TreeStore};
use crate::transform::{parse_document, Pipeline, TransformEngine};
use crate::xml::Document;
use netcf_common::{ErrorContext, ErrorKind, NetcfError, NetcfResult, Ref};
use std::cell::{RefCell, RefMut};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Exclusive access to the ready store connection.
pub type StoreGuard<'a> = RefMut<'a, dyn TreeStore + 'static>;

/// The external collaborators a context is built on.
pub struct Backends {
    pub store: Box<dyn StoreBackend>,
    pub engine: Box<dyn TransformEngine>,
    pub routes: Box<dyn RouteSource>,
}

impl Backends {
    pub fn new(
        store: Box<dyn StoreBackend>,
        engine: Box<dyn TransformEngine>,
        routes: Box<dyn RouteSource>,
    ) -> Self {
        Self {
            store,
            engine,
            routes,
        }
    }
}

pub struct Context {
    config: NetcfConfig,
    errors: ErrorContext,
    session: RefCell<StoreSession>,
    pipeline: Pipeline,
    kernel: RefCell<KernelState>,
    flag_socket: RefCell<Option<FlagSocket>>,
}

impl Context {
    /// Builds a context, compiling both stylesheets and the schema. The
    /// store connection and the flag socket are opened on first use.
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub fn open(config: NetcfConfig, backends: Backends) -> NetcfResult<Ref<Context>> {
        config.validate().map_err(|e| {
            NetcfError::with_details(ErrorKind::InternalInvariant, e.to_string())
        })?;

        let errors = ErrorContext::default();
        let pipeline = Pipeline::load(backends.engine.as_ref(), &config.data_dir, &errors)?;

        let options = ConnectOptions {
            root: config.root.clone(),
            lens_dir: config.lens_dir(),
            no_module_autoload: true,
        };
        let session = StoreSession::new(backends.store, options, config.debug);

        info!(debug = config.debug, "netcf context opened");
        Ok(Ref::make(Context {
            config,
            errors,
            session: RefCell::new(session),
            pipeline,
            kernel: RefCell::new(KernelState::new(backends.routes)),
            flag_socket: RefCell::new(None),
        }))
    }

    /// Makes the context live for the rest of the process.
    pub fn pin(this: &Ref<Context>) {
        Ref::pin(this);
    }

    /// A handle for the interface called `name`. The handle keeps the
    /// context alive.
    pub fn lookup(this: &Ref<Context>, name: &str) -> Ref<InterfaceHandle> {
        Ref::make(InterfaceHandle {
            name: name.to_string(),
            ctx: Ref::share(this),
        })
    }

    pub fn config(&self) -> &NetcfConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn probe_config(&self) -> &ProbeConfig {
        &self.config.probe
    }

    pub fn errors(&self) -> &ErrorContext {
        &self.errors
    }

    /// The first error reported by the last operation.
    pub fn error(&self) -> Option<NetcfError> {
        self.errors.error()
    }

    pub fn clear_error(&self) {
        self.errors.clear();
    }

    fn entry(&self) {
        self.errors.clear();
    }

    fn session(&self) -> NetcfResult<RefMut<'_, StoreSession>> {
        self.session.try_borrow_mut().map_err(|_| self.busy())
    }

    fn busy(&self) -> NetcfError {
        self.errors.report(
            ErrorKind::InternalInvariant,
            Some("configuration store session is in use".into()),
        )
    }

    /// Adds a transform table; the next store access reseeds and reloads.
    pub fn register_table(&self, table: &Ref<TransformTable>) -> NetcfResult<usize> {
        self.entry();
        Ok(self.session()?.register(Ref::share(table)))
    }

    /// Removes a transform table. Removing an unknown table is not an
    /// error.
    pub fn unregister_table(&self, table: &Ref<TransformTable>) -> NetcfResult<bool> {
        self.entry();
        Ok(self.session()?.unregister(table))
    }

    /// The store session's state. While a [`StoreGuard`] from
    /// [`Context::store`] is alive the session cannot be inspected; a guard
    /// only exists for a ready session, so this reports
    /// [`SessionState::Ready`] then. Operations that need the session
    /// during that time fail with an internal error.
    pub fn session_state(&self) -> SessionState {
        self.session
            .try_borrow()
            .map(|s| s.state())
            .unwrap_or(SessionState::Ready)
    }

    /// The ready store connection, connecting and loading as needed.
    pub fn store(&self) -> NetcfResult<StoreGuard<'_>> {
        self.entry();
        self.acquire_store()
    }

    fn acquire_store(&self) -> NetcfResult<StoreGuard<'_>> {
        let mut session = self.session()?;
        session.acquire(&self.errors)?;
        RefMut::filter_map(session, |s| s.connection_mut()).map_err(|_| {
            self.errors.report(
                ErrorKind::InternalInvariant,
                Some("configuration store is not open".into()),
            )
        })
    }

    /// Drops the store connection; the next access reconnects.
    pub fn close_store(&self) -> NetcfResult<()> {
        self.entry();
        self.session()?.close();
        Ok(())
    }

    /// Binds the store variable `name` to the single node matched by the
    /// formatted path, creating it with `value` if absent. Returns whether
    /// the node was created.
    pub fn define_node(
        &self,
        name: &str,
        value: Option<&str>,
        path: fmt::Arguments<'_>,
    ) -> NetcfResult<bool> {
        self.entry();
        let expr = fmt::format(path);
        let mut store = self.acquire_store()?;
        let created = store.define_node(name, &expr, value);
        created.map_err(|e| {
            debug!(variable = %name, path = %expr, error = %e, "define node failed");
            self.errors.report_fmt(
                ErrorKind::StoreFailure,
                format_args!("failed to define node {}", name),
            )
        })
    }

    /// Store paths matching the formatted path expression.
    pub fn match_paths(&self, path: fmt::Arguments<'_>) -> NetcfResult<Vec<String>> {
        self.entry();
        let expr = fmt::format(path);
        let store = self.acquire_store()?;
        let paths = store.matches(&expr);
        paths.map_err(|e| {
            debug!(path = %expr, error = %e, "match failed");
            self.errors
                .report_fmt(ErrorKind::StoreFailure, format_args!("failed to match {}", expr))
        })
    }

    pub fn parse_xml(&self, text: &str) -> NetcfResult<Document> {
        self.entry();
        parse_document(text, &self.errors)
    }

    /// Validates an interface description and renders its store
    /// projection.
    pub fn export_to_store(&self, description: &str) -> NetcfResult<String> {
        self.entry();
        let session = self.session.try_borrow().map_err(|_| self.busy())?;
        self.pipeline
            .export_to_store(description, session.backend(), &self.errors)
    }

    /// Renders the interface description of a store projection.
    pub fn import_from_store(&self, projection: &str) -> NetcfResult<String> {
        self.entry();
        let session = self.session.try_borrow().map_err(|_| self.busy())?;
        self.pipeline
            .import_from_store(projection, session.backend(), &self.errors)
    }

    /// Runs `argv[0]` with the remaining arguments and returns its
    /// standard output. A program that cannot be started or exits
    /// unsuccessfully is reported as [`ErrorKind::ExecFailure`].
    pub fn run_program(&self, argv: &[&str]) -> NetcfResult<String> {
        self.entry();
        if argv.is_empty() {
            return Err(self.errors.report(
                ErrorKind::InternalInvariant,
                Some("no program to run".into()),
            ));
        }
        let command = exec::command_line(argv);
        let result = exec::run_program(argv).map_err(|e| {
            self.errors.report_fmt(
                ErrorKind::ExecFailure,
                format_args!("failed to run command '{}': {}", command, e),
            )
        })?;
        if !result.success() {
            return Err(self.errors.report_fmt(
                ErrorKind::ExecFailure,
                format_args!(
                    "Running '{}' program failed, exit status {}, output: '{}'",
                    command,
                    result.exit_code,
                    result.combined_output()
                ),
            ));
        }
        Ok(result.stdout)
    }

    /// Runs `prog` with the single argument `arg`, as done for the
    /// interface up and down commands.
    pub fn run1(&self, prog: &str, arg: &str) -> NetcfResult<String> {
        self.run_program(&[prog, arg])
    }

    fn add_state(&self, name: &str, doc: &mut Document) -> NetcfResult<()> {
        self.entry();
        let mut kernel = self.kernel.try_borrow_mut().map_err(|_| {
            self.errors.report(
                ErrorKind::InternalInvariant,
                Some("kernel caches are in use".into()),
            )
        })?;
        live_state::add_state(doc, name, &mut kernel, &self.errors)
    }

    fn is_up(&self, name: &str) -> NetcfResult<bool> {
        self.entry();
        let mut slot = self.flag_socket.borrow_mut();
        if slot.is_none() {
            let socket = FlagSocket::open().map_err(|e| {
                debug!(error = %e, "flag socket unavailable");
                self.errors.report(
                    ErrorKind::InternalInvariant,
                    Some("failed to open socket for interface ioctl".into()),
                )
            })?;
            *slot = Some(socket);
        }
        Ok(slot.as_ref().is_some_and(|s| s.is_up(name)))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("error", &self.errors.error())
            .field("session", &self.session_state())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// One named interface of a context.
#[derive(Debug)]
pub struct InterfaceHandle {
    name: String,
    ctx: Ref<Context>,
}

impl InterfaceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Ref<Context> {
        &self.ctx
    }

    /// Adds the interface's live hardware address and IP addresses to
    /// `doc`, whose root must be `<interface>`.
    pub fn add_state(&self, doc: &mut Document) -> NetcfResult<()> {
        self.ctx.add_state(&self.name, doc)
    }

    /// Whether the interface is administratively up.
    pub fn is_active(&self) -> NetcfResult<bool> {
        self.ctx.is_up(&self.name)
    }

    pub fn interface_type(&self) -> InterfaceType {
        probe_interface_type(self.ctx.probe_config(), &self.name)
    }
}
