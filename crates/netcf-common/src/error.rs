//! Error taxonomy and the first-error slot.
//!
//! Each context owns one [`ErrorContext`]. A failing component reports into
//! it and unwinds; only the first report after the slot was last cleared is
//! kept, so errors raised while cleaning up never mask the original cause.
//! The error handed back to the caller through `Err` is always the one held
//! by the slot.

use std::cell::RefCell;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Result type alias for netcf operations.
pub type NetcfResult<T> = Result<T, NetcfError>;

/// Classes of failure a netcf operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No error has been recorded.
    NoError,
    /// An allocation or serialization buffer could not be obtained.
    OutOfMemory,
    /// The configuration-tree store failed to connect, seed or load.
    StoreFailure,
    /// A resource file is missing or unreadable.
    FileError,
    /// An XML document could not be parsed.
    XmlParseFailure,
    /// A document does not conform to the interface schema.
    XmlSchemaInvalid,
    /// A stylesheet failed to compile or to run.
    TransformFailure,
    /// An external program could not be run or exited unsuccessfully.
    ExecFailure,
    /// A kernel route-protocol query failed.
    NetlinkFailure,
    /// An internal invariant was violated (e.g. unexpected document root).
    InternalInvariant,
}

impl ErrorKind {
    /// Stable numeric code, matching the public netcf error numbering.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::NoError => 0,
            ErrorKind::InternalInvariant => 1,
            ErrorKind::StoreFailure => 2,
            ErrorKind::OutOfMemory => 3,
            ErrorKind::XmlParseFailure => 4,
            ErrorKind::XmlSchemaInvalid => 5,
            ErrorKind::ExecFailure => 7,
            ErrorKind::TransformFailure => 9,
            ErrorKind::FileError => 10,
            ErrorKind::NetlinkFailure => 12,
        }
    }

    /// Default human-readable message for the kind.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::NoError => "no error",
            ErrorKind::InternalInvariant => "internal error",
            ErrorKind::StoreFailure => "configuration store operation failed",
            ErrorKind::OutOfMemory => "allocation failed",
            ErrorKind::XmlParseFailure => "XML parser failed",
            ErrorKind::XmlSchemaInvalid => "XML invalid",
            ErrorKind::ExecFailure => "external program execution failed",
            ErrorKind::TransformFailure => "XSLT transformation failed",
            ErrorKind::FileError => "File operation failed",
            ErrorKind::NetlinkFailure => "NETLINK socket operation failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

fn details_suffix(details: &Option<String>) -> String {
    match details {
        Some(d) => format!(": {}", d),
        None => String::new(),
    }
}

/// A reported error: its kind plus an optional detailed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}{}", details_suffix(.details))]
pub struct NetcfError {
    kind: ErrorKind,
    details: Option<String>,
}

impl NetcfError {
    pub fn new(kind: ErrorKind, details: Option<String>) -> Self {
        Self { kind, details }
    }

    /// Creates an error with a detailed message.
    pub fn with_details(kind: ErrorKind, details: impl Into<String>) -> Self {
        Self::new(kind, Some(details.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }
}

impl From<ErrorKind> for NetcfError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, None)
    }
}

/// Single first-error slot shared by every operation of one context.
#[derive(Debug, Default)]
pub struct ErrorContext {
    slot: RefCell<Option<NetcfError>>,
}

impl ErrorContext {
    /// Records `err` unless an error is already held; returns the held error.
    pub fn record(&self, err: NetcfError) -> NetcfError {
        let mut slot = self.slot.borrow_mut();
        match slot.as_ref() {
            Some(first) => {
                trace!(suppressed = %err, first = %first, "error slot already set");
                first.clone()
            }
            None => {
                debug!(kind = ?err.kind(), error = %err, "recording error");
                *slot = Some(err.clone());
                err
            }
        }
    }

    /// Reports an error of `kind` with optional details.
    pub fn report(&self, kind: ErrorKind, details: Option<String>) -> NetcfError {
        self.record(NetcfError::new(kind, details))
    }

    /// Reports an error whose details are built from a format string.
    ///
    /// Nothing is formatted when the slot is already taken.
    pub fn report_fmt(&self, kind: ErrorKind, args: fmt::Arguments<'_>) -> NetcfError {
        if let Some(first) = self.error() {
            return first;
        }
        self.report(kind, Some(fmt::format(args)))
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The recorded error, if any.
    pub fn error(&self) -> Option<NetcfError> {
        self.slot.borrow().clone()
    }

    /// The recorded error's kind, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.slot.borrow().as_ref().map(NetcfError::kind)
    }

    /// Empties the slot so the next report is recorded.
    pub fn clear(&self) {
        self.slot.borrow_mut().take();
    }

    /// Empties the slot, returning what it held.
    pub fn take(&self) -> Option<NetcfError> {
        self.slot.borrow_mut().take()
    }
}
