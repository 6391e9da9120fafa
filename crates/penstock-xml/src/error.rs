//! XML codec errors.

use std::io;

/// Errors produced while reading or writing S3 XML documents.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// The XML could not be parsed.
    #[error("xml parse error: {0}")]
    Parse(String),

    /// A required element was absent.
    #[error("missing element: {0}")]
    MissingElement(String),

    /// The document structure did not match expectations.
    #[error("unexpected element: {0}")]
    UnexpectedElement(String),

    /// Writing the document failed.
    #[error("xml write error: {0}")]
    Write(#[from] io::Error),
}

impl From<quick_xml::Error> for XmlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
