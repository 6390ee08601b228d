//! Common infrastructure for the netcf driver layer.
//!
//! Every other netcf crate builds on the three pieces kept here:
//!
//! - [`refcount`]: the [`Ref`] handle with a saturating, pinnable count
//! - [`error`]: the error taxonomy and the first-error [`ErrorContext`]
//! - [`hwaddr`]: link-layer address parsing and formatting
//!
//! # Example
//!
//! ```
//! use netcf_common::{ErrorContext, ErrorKind, Ref};
//!
//! let errors = Ref::make(ErrorContext::default());
//! let first = errors.report(ErrorKind::XmlSchemaInvalid, Some("bad bond".into()));
//! errors.report(ErrorKind::InternalInvariant, None);
//! assert_eq!(errors.kind(), Some(ErrorKind::XmlSchemaInvalid));
//! assert_eq!(first.kind(), ErrorKind::XmlSchemaInvalid);
//! ```

pub mod error;
pub mod hwaddr;
pub mod refcount;

pub use error::{ErrorContext, ErrorKind, NetcfError, NetcfResult};
pub use hwaddr::HardwareAddress;
pub use refcount::{Ref, REF_MAX};
