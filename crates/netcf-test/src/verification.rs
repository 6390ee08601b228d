//! Verification helpers for testing driver output
//!
//! Provides assertion helpers over interface descriptions and store
//! projections produced by a context.

use netcf_driver::xml::{Document, Element, XmlError};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("XML error: {0}")]
    Parse(#[from] XmlError),

    #[error("Expected element '{path}' not found")]
    ElementNotFound { path: String },

    #[error("Attribute mismatch for {element}@{attribute}: expected '{expected}', got {actual:?}")]
    AttributeMismatch {
        element: String,
        attribute: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Expected {expected} <{name}> children, found {actual}")]
    CountMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Walks a document by element names.
pub struct DocumentVerifier<'a> {
    doc: &'a Document,
}

impl<'a> DocumentVerifier<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { doc }
    }

    /// Element reached by following `path` from the root; an empty path
    /// is the root itself. Each step takes the first child of that name.
    pub fn element(&self, path: &[&str]) -> VerifyResult<&'a Element> {
        let mut current = self.doc.root();
        for (depth, name) in path.iter().enumerate() {
            current = current
                .child(name)
                .ok_or_else(|| VerificationError::ElementNotFound {
                    path: path[..=depth].join("/"),
                })?;
        }
        Ok(current)
    }

    pub fn assert_attr(&self, path: &[&str], attribute: &str, expected: &str) -> VerifyResult<()> {
        let element = self.element(path)?;
        match element.attr(attribute) {
            Some(actual) if actual == expected => Ok(()),
            actual => Err(VerificationError::AttributeMismatch {
                element: element.name().to_string(),
                attribute: attribute.to_string(),
                expected: expected.to_string(),
                actual: actual.map(str::to_string),
            }),
        }
    }

    pub fn assert_child_count(&self, path: &[&str], name: &str, expected: usize) -> VerifyResult<()> {
        let actual = self
            .element(path)?
            .child_elements()
            .filter(|e| e.name() == name)
            .count();
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// `value` of the `<node label=...>` under the forest's first tree.
    pub fn node_value(&self, label: &str) -> VerifyResult<&'a str> {
        self.element(&["tree"])?
            .child_elements()
            .find(|n| n.name() == "node" && n.attr("label") == Some(label))
            .and_then(|n| n.attr("value"))
            .ok_or_else(|| VerificationError::ElementNotFound {
                path: format!("tree/node[@label='{}']", label),
            })
    }
}

/// Parses `text` and runs `check` against it.
pub fn verify_xml<F>(text: &str, check: F) -> VerifyResult<()>
where
    F: FnOnce(&DocumentVerifier<'_>) -> VerifyResult<()>,
{
    let doc = Document::parse(text)?;
    check(&DocumentVerifier::new(&doc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<interface name="eth0">
  <protocol family="ipv4"><ip address="10.0.0.1" prefix="8"/></protocol>
  <protocol family="ipv6"/>
</interface>"#;

    #[test]
    fn test_attr_and_counts() {
        verify_xml(DOC, |v| {
            v.assert_attr(&[], "name", "eth0")?;
            v.assert_attr(&["protocol", "ip"], "prefix", "8")?;
            v.assert_child_count(&[], "protocol", 2)
        })
        .unwrap();
    }

    #[test]
    fn test_missing_element_names_path() {
        let err = verify_xml(DOC, |v| v.element(&["protocol", "dhcp"]).map(|_| ())).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::ElementNotFound { ref path } if path == "protocol/dhcp"
        ));
    }

    #[test]
    fn test_attr_mismatch() {
        let err = verify_xml(DOC, |v| v.assert_attr(&[], "type", "bond")).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::AttributeMismatch { actual: None, .. }
        ));
    }
}
