use thiserror::Error;

use crate::parser::validate::SchemaReport;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The file could not be split into frontmatter and body.
    #[error("malformed document {path}: {reason}")]
    MalformedDocument { path: String, reason: String },

    /// The batch needs more columns than the store allows. Nothing was written.
    #[error(
        "column limit exceeded: {} columns > {} limit (base {}, frontmatter {}, sections {})",
        .0.total, .0.max, .0.base, .0.frontmatter, .0.sections
    )]
    SchemaLimitExceeded(SchemaReport),

    /// A row lacks the identity (`_id`/`_path`) needed to write it back out.
    #[error("record {id} has no {field}")]
    MissingPath { id: String, field: &'static str },

    /// A stored row whose bookkeeping columns cannot be decoded.
    #[error("malformed record {path}: {reason}")]
    MalformedRecord { path: String, reason: String },
}

impl Error {
    pub fn malformed(path: &str, reason: impl Into<String>) -> Self {
        Error::MalformedDocument {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
