//! Transform pipeline between the abstract interface description and the
//! store projection.
//!
//! Stylesheet and schema engines are collaborators behind
//! [`TransformEngine`]; this module resolves their resources, binds the
//! extension functions into every run and routes engine diagnostics into
//! the caller's [`ErrorContext`].

pub mod ext;

pub use ext::{
    ExtensionError, ExtensionFn, ExtensionRegistry, ValueStack, XPathValue, BOND_NS, IPCALC_NS,
    PATHCOMPONENT_NS,
};

use crate::store::StoreBackend;
use crate::xml::Document;
use netcf_common::{ErrorContext, ErrorKind, NetcfResult};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, trace};

/// Stylesheet producing the store projection from an interface description.
pub const GET_STYLESHEET: &str = "get.xsl";

/// Stylesheet producing an interface description from the store projection.
pub const PUT_STYLESHEET: &str = "put.xsl";

/// Schema every interface description must satisfy.
pub const INTERFACE_SCHEMA: &str = "interface.rng";

/// `<data_dir>/xml/<name>`.
pub fn resource_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join("xml").join(name)
}

/// Compiles stylesheets and schemas.
///
/// No engine ships with this crate. The embedding program supplies one,
/// normally a binding to libxslt and libxml2's RelaxNG validator, the same
/// way it supplies the configuration store through
/// [`StoreBackend`]. A compiled [`Stylesheet`] resolves the stylesheets'
/// extension calls (`ipcalc:netmask`, `ipcalc:prefix`, `bond:option` and
/// `pathcomponent:escape`) through [`TransformContext::call_extension`],
/// so the engine's XPath layer registers one forwarding function per
/// entry of [`ExtensionRegistry::names`].
pub trait TransformEngine {
    /// Compiles stylesheet source read from `path`; `Err` carries the
    /// engine's reason.
    fn compile_stylesheet(&self, path: &Path, source: &str)
        -> Result<Box<dyn Stylesheet>, String>;

    /// Compiles a schema, passing each problem found to `report`.
    fn compile_schema(
        &self,
        path: &Path,
        source: &str,
        report: &mut dyn FnMut(&str),
    ) -> Option<Box<dyn Schema>>;
}

pub trait Stylesheet {
    /// Runs the stylesheet over `input`. The result is discarded unless
    /// `ctx` is still running when this returns.
    fn apply(&self, input: &Document, ctx: &mut TransformContext<'_>) -> Option<Document>;

    /// Renders a result document with the stylesheet's output settings.
    fn serialize(&self, output: &Document) -> Option<String> {
        Some(output.to_xml_string())
    }
}

pub trait Schema {
    /// Whether `doc` is valid; each violation goes to `report`.
    fn validate(&self, doc: &Document, report: &mut dyn FnMut(&str)) -> bool;
}

/// Run state of one transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformState {
    Running,
    Error,
    Stopped,
}

/// Per-run context handed to a [`Stylesheet`].
pub struct TransformContext<'a> {
    extensions: &'a ExtensionRegistry,
    store: &'a dyn StoreBackend,
    errors: &'a ErrorContext,
    state: TransformState,
}

impl<'a> TransformContext<'a> {
    pub fn new(
        extensions: &'a ExtensionRegistry,
        store: &'a dyn StoreBackend,
        errors: &'a ErrorContext,
    ) -> Self {
        Self {
            extensions,
            store,
            errors,
            state: TransformState::Running,
        }
    }

    pub fn state(&self) -> TransformState {
        self.state
    }

    /// Calls the extension function `{namespace}name` with the top `nargs`
    /// values of `stack`. A failure is reported and ends the run.
    pub fn call_extension(
        &mut self,
        namespace: &str,
        name: &str,
        stack: &mut ValueStack,
        nargs: usize,
    ) -> Result<(), ExtensionError> {
        let result = match self.extensions.lookup(namespace, name) {
            Some(function) => function(self.store, stack, nargs),
            None => Err(ExtensionError::Unknown {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        };
        if let Err(e) = &result {
            self.error(format_args!("{}", e));
        }
        result
    }

    /// Error callback: records a transform failure and ends the run.
    pub fn error(&mut self, args: fmt::Arguments<'_>) {
        self.errors.report_fmt(ErrorKind::TransformFailure, args);
        self.state = TransformState::Error;
    }

    /// Ends the run without reporting anything.
    pub fn stop(&mut self) {
        if self.state == TransformState::Running {
            self.state = TransformState::Stopped;
        }
    }
}

impl fmt::Debug for TransformContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformContext")
            .field("extensions", self.extensions)
            .field("state", &self.state)
            .finish()
    }
}

fn read_resource(path: &Path) -> std::io::Result<String> {
    fs::read_to_string(path)
}

/// Reads and compiles `<data_dir>/xml/<name>`.
pub fn load_stylesheet(
    engine: &dyn TransformEngine,
    data_dir: &Path,
    name: &str,
    errors: &ErrorContext,
) -> NetcfResult<Box<dyn Stylesheet>> {
    let path = resource_path(data_dir, name);
    let source = read_resource(&path).map_err(|e| {
        debug!(path = %path.display(), error = %e, "stylesheet unreadable");
        errors.report_fmt(
            ErrorKind::FileError,
            format_args!("Stylesheet {} does not exist or is not readable", path.display()),
        )
    })?;

    let stylesheet = engine.compile_stylesheet(&path, &source).map_err(|reason| {
        errors.report_fmt(
            ErrorKind::TransformFailure,
            format_args!("Could not parse stylesheet {}: {}", path.display(), reason),
        )
    })?;
    debug!(path = %path.display(), "stylesheet loaded");
    Ok(stylesheet)
}

/// Reads and compiles the schema at `<data_dir>/xml/<name>`.
pub fn load_schema(
    engine: &dyn TransformEngine,
    data_dir: &Path,
    name: &str,
    errors: &ErrorContext,
) -> NetcfResult<Box<dyn Schema>> {
    let path = resource_path(data_dir, name);
    let source = read_resource(&path).map_err(|e| {
        debug!(path = %path.display(), error = %e, "schema unreadable");
        errors.report_fmt(
            ErrorKind::FileError,
            format_args!("File {} does not exist or is not readable", path.display()),
        )
    })?;

    let mut report = |msg: &str| {
        errors.report(ErrorKind::XmlSchemaInvalid, Some(msg.to_string()));
    };
    match engine.compile_schema(&path, &source, &mut report) {
        Some(schema) => {
            debug!(path = %path.display(), "schema loaded");
            Ok(schema)
        }
        None => Err(errors.report_fmt(
            ErrorKind::XmlSchemaInvalid,
            format_args!("Could not parse schema {}", path.display()),
        )),
    }
}

/// Validates `doc`; engine messages are recorded before the generic one.
pub fn validate(schema: &dyn Schema, doc: &Document, errors: &ErrorContext) -> NetcfResult<()> {
    let mut report = |msg: &str| {
        errors.report(ErrorKind::XmlSchemaInvalid, Some(msg.to_string()));
    };
    if schema.validate(doc, &mut report) {
        Ok(())
    } else {
        Err(errors.report(
            ErrorKind::XmlSchemaInvalid,
            Some("Interface definition fails to validate".into()),
        ))
    }
}

/// Runs `stylesheet` over `input` with the extension functions bound.
///
/// A run that ends in error or stopped state yields no document, and the
/// generic transform failure is recorded unless the run already reported
/// something.
pub fn apply_stylesheet(
    stylesheet: &dyn Stylesheet,
    input: &Document,
    extensions: &ExtensionRegistry,
    store: &dyn StoreBackend,
    errors: &ErrorContext,
) -> NetcfResult<Document> {
    let mut ctx = TransformContext::new(extensions, store, errors);
    let output = stylesheet.apply(input, &mut ctx);
    match (ctx.state(), output) {
        (TransformState::Running, Some(doc)) => Ok(doc),
        (state, _) => {
            debug!(?state, "transform did not complete");
            Err(errors.report(ErrorKind::TransformFailure, None))
        }
    }
}

/// [`apply_stylesheet`] followed by serialization of the result.
pub fn apply_stylesheet_to_text(
    stylesheet: &dyn Stylesheet,
    input: &Document,
    extensions: &ExtensionRegistry,
    store: &dyn StoreBackend,
    errors: &ErrorContext,
) -> NetcfResult<String> {
    let output = apply_stylesheet(stylesheet, input, extensions, store, errors)?;
    stylesheet.serialize(&output).ok_or_else(|| {
        errors.report(
            ErrorKind::OutOfMemory,
            Some("failed to serialize transform result".into()),
        )
    })
}

/// Parses `text`, recording the parser's message before the generic one.
pub fn parse_document(text: &str, errors: &ErrorContext) -> NetcfResult<Document> {
    Document::parse(text).map_err(|e| {
        errors.report(ErrorKind::XmlParseFailure, Some(e.to_string()));
        errors.report(
            ErrorKind::XmlParseFailure,
            Some("failed to parse xml document".into()),
        )
    })
}

/// The compiled resources of one driver.
pub struct Pipeline {
    get: Box<dyn Stylesheet>,
    put: Box<dyn Stylesheet>,
    schema: Box<dyn Schema>,
    extensions: ExtensionRegistry,
}

impl Pipeline {
    /// Loads both stylesheets and the schema from `<data_dir>/xml`.
    #[instrument(skip_all, fields(data_dir = %data_dir.display()))]
    pub fn load(
        engine: &dyn TransformEngine,
        data_dir: &Path,
        errors: &ErrorContext,
    ) -> NetcfResult<Self> {
        let get = load_stylesheet(engine, data_dir, GET_STYLESHEET, errors)?;
        let put = load_stylesheet(engine, data_dir, PUT_STYLESHEET, errors)?;
        let schema = load_schema(engine, data_dir, INTERFACE_SCHEMA, errors)?;
        Ok(Self {
            get,
            put,
            schema,
            extensions: ExtensionRegistry::netcf(),
        })
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Validates the interface description `text` and renders its store
    /// projection.
    #[instrument(skip_all)]
    pub fn export_to_store(
        &self,
        text: &str,
        store: &dyn StoreBackend,
        errors: &ErrorContext,
    ) -> NetcfResult<String> {
        let doc = parse_document(text, errors)?;
        validate(self.schema.as_ref(), &doc, errors)?;
        let projection =
            apply_stylesheet_to_text(self.get.as_ref(), &doc, &self.extensions, store, errors)?;
        trace!(bytes = projection.len(), "exported interface description");
        Ok(projection)
    }

    /// Renders the interface description of the store projection `text`.
    #[instrument(skip_all)]
    pub fn import_from_store(
        &self,
        text: &str,
        store: &dyn StoreBackend,
        errors: &ErrorContext,
    ) -> NetcfResult<String> {
        let doc = parse_document(text, errors)?;
        let description =
            apply_stylesheet_to_text(self.put.as_ref(), &doc, &self.extensions, store, errors)?;
        trace!(bytes = description.len(), "imported store projection");
        Ok(description)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConnectOptions, StoreError, TreeStore};
    use crate::xml::Element;
    use pretty_assertions::assert_eq;

    struct NoStore;

    impl StoreBackend for NoStore {
        fn connect(&self, _: &ConnectOptions) -> Result<Box<dyn TreeStore>, StoreError> {
            Err(StoreError::Connect("no store".into()))
        }

        fn escape_name(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
    }

    /// Wraps the input root in `<wrapped>` and appends a netmask computed
    /// from the root's `prefix` attribute.
    struct Wrap;

    impl Stylesheet for Wrap {
        fn apply(&self, input: &Document, ctx: &mut TransformContext<'_>) -> Option<Document> {
            let mut stack = ValueStack::new();
            stack.push(input.root().attr("prefix").unwrap_or(""));
            ctx.call_extension(IPCALC_NS, "netmask", &mut stack, 1).ok()?;
            let mut root = Element::new("wrapped");
            root.append_child(Element::new("mask").with_attr("value", stack.pop_string()?));
            root.append_child(input.root().clone());
            Some(Document::new(root))
        }
    }

    struct Silent;

    impl Stylesheet for Silent {
        fn apply(&self, input: &Document, ctx: &mut TransformContext<'_>) -> Option<Document> {
            ctx.stop();
            Some(input.clone())
        }
    }

    struct Unserializable;

    impl Stylesheet for Unserializable {
        fn apply(&self, input: &Document, _: &mut TransformContext<'_>) -> Option<Document> {
            Some(input.clone())
        }

        fn serialize(&self, _: &Document) -> Option<String> {
            None
        }
    }

    struct NeedsName;

    impl Schema for NeedsName {
        fn validate(&self, doc: &Document, report: &mut dyn FnMut(&str)) -> bool {
            if doc.root().attr("name").is_none() {
                report("element interface: missing attribute name");
                return false;
            }
            true
        }
    }

    fn doc(xml: &str) -> Document {
        Document::parse(xml).unwrap()
    }

    #[test]
    fn test_apply_binds_extensions() {
        let errors = ErrorContext::default();
        let out = apply_stylesheet(
            &Wrap,
            &doc("<interface prefix='24'/>"),
            &ExtensionRegistry::netcf(),
            &NoStore,
            &errors,
        )
        .unwrap();
        assert_eq!(
            out.root().child("mask").and_then(|m| m.attr("value")),
            Some("255.255.255.0")
        );
        assert!(!errors.is_set());
    }

    #[test]
    fn test_extension_failure_is_first_error() {
        let errors = ErrorContext::default();
        let err = apply_stylesheet(
            &Wrap,
            &doc("<interface prefix='40'/>"),
            &ExtensionRegistry::netcf(),
            &NoStore,
            &errors,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformFailure);
        assert_eq!(
            err.details(),
            Some("ipcalc:netmask: prefix 40 not in the range 1 to 32")
        );
    }

    #[test]
    fn test_silent_stop_reports_generic_failure() {
        let errors = ErrorContext::default();
        let err = apply_stylesheet(
            &Silent,
            &doc("<interface/>"),
            &ExtensionRegistry::netcf(),
            &NoStore,
            &errors,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformFailure);
        assert_eq!(err.details(), None);
        assert_eq!(errors.kind(), Some(ErrorKind::TransformFailure));
    }

    #[test]
    fn test_unknown_extension_fails_run() {
        let errors = ErrorContext::default();
        let registry = ExtensionRegistry::default();
        let err = apply_stylesheet(&Wrap, &doc("<interface prefix='8'/>"), &registry, &NoStore, &errors)
            .unwrap_err();
        assert!(err.to_string().contains("no extension function netmask"), "{err}");
    }

    #[test]
    fn test_serialization_failure_is_out_of_memory() {
        let errors = ErrorContext::default();
        let err = apply_stylesheet_to_text(
            &Unserializable,
            &doc("<interface/>"),
            &ExtensionRegistry::netcf(),
            &NoStore,
            &errors,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_validate_keeps_engine_message() {
        let errors = ErrorContext::default();
        let err = validate(&NeedsName, &doc("<interface/>"), &errors).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::XmlSchemaInvalid);
        assert_eq!(err.details(), Some("element interface: missing attribute name"));
        assert!(validate(&NeedsName, &doc("<interface name='eth0'/>"), &ErrorContext::default()).is_ok());
    }

    #[test]
    fn test_parse_document_reports_line() {
        let errors = ErrorContext::default();
        let err = parse_document("<interface>\n<mac>\n</interface>", &errors).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::XmlParseFailure);
        assert!(err.details().unwrap_or("").starts_with("at line "), "{err}");
    }

    #[test]
    fn test_missing_stylesheet_is_file_error() {
        struct Never;
        impl TransformEngine for Never {
            fn compile_stylesheet(&self, _: &Path, _: &str) -> Result<Box<dyn Stylesheet>, String> {
                Err("unreachable".into())
            }
            fn compile_schema(
                &self,
                _: &Path,
                _: &str,
                _: &mut dyn FnMut(&str),
            ) -> Option<Box<dyn Schema>> {
                None
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let errors = ErrorContext::default();
        let err = load_stylesheet(&Never, dir.path(), GET_STYLESHEET, &errors)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::FileError);
        assert!(err.to_string().contains("get.xsl does not exist"), "{err}");
    }

    #[test]
    fn test_loaded_pipeline_binds_extension_namespaces() {
        struct Fixed;
        impl TransformEngine for Fixed {
            fn compile_stylesheet(&self, _: &Path, _: &str) -> Result<Box<dyn Stylesheet>, String> {
                Ok(Box::new(Wrap))
            }
            fn compile_schema(
                &self,
                _: &Path,
                _: &str,
                _: &mut dyn FnMut(&str),
            ) -> Option<Box<dyn Schema>> {
                Some(Box::new(NeedsName))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("xml")).unwrap();
        for name in [GET_STYLESHEET, PUT_STYLESHEET, INTERFACE_SCHEMA] {
            fs::write(resource_path(dir.path(), name), "<x/>").unwrap();
        }
        let errors = ErrorContext::default();
        let pipeline = Pipeline::load(&Fixed, dir.path(), &errors).unwrap();

        let mut names: Vec<_> = pipeline.extensions().names().collect();
        names.sort();
        let mut expected = vec![
            (BOND_NS, "option"),
            (IPCALC_NS, "netmask"),
            (IPCALC_NS, "prefix"),
            (PATHCOMPONENT_NS, "escape"),
        ];
        expected.sort();
        assert_eq!(names, expected);

        // Every run sees the bindings.
        let out = pipeline
            .export_to_store(r#"<interface name="eth0" prefix="24"/>"#, &NoStore, &errors)
            .unwrap();
        assert!(out.contains("255.255.255.0"), "{out}");
    }

    #[test]
    fn test_resource_path() {
        assert_eq!(
            resource_path(Path::new("/usr/share/netcf"), INTERFACE_SCHEMA),
            PathBuf::from("/usr/share/netcf/xml/interface.rng")
        );
    }
}
