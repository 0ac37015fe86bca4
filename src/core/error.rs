//! Error taxonomy for addressing, consistency, storage, and build failures.
//!
//! Addressing and consistency errors abort the triggering call. Build and
//! process failures are normally folded into run outcomes by the scheduler and
//! only surface here when a caller asks for a build directly.

use std::path::PathBuf;
use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("element not found: segment '{segment}' of path '{path}'")]
    ElementNotFound { path: String, segment: String },

    #[error("invalid path segment '{0}' (expected 'tag' or 'tag:attribute:value')")]
    InvalidSegment(String),

    #[error("field '{path}' is not numeric: '{value}'")]
    NotNumeric { path: String, value: String },

    #[error("variation id {id} is not valid for {location}")]
    ReservedVariation { location: String, id: i64 },

    #[error("unknown {level} id {id}")]
    UnknownEntity { level: String, id: i64 },

    #[error("malformed manifest token '{token}' in {}", .path.display())]
    Manifest { path: PathBuf, token: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("xml error in {}: {message}", .path.display())]
    Xml { path: PathBuf, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("build failed for custom code '{folder}' (see {})", .log.display())]
    BuildFailed { folder: String, log: PathBuf },

    #[error("aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_element_not_found_names_path_and_segment() {
        let e = Error::ElementNotFound {
            path: "cell_definitions/cell_definition:name:tumor/phenotype".into(),
            segment: "cell_definition:name:tumor".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("cell_definition:name:tumor/phenotype"));
        assert!(msg.contains("segment 'cell_definition:name:tumor'"));
    }

    #[test]
    fn test_error_io_display() {
        let e = Error::io(
            "/nope/file.xml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(e.to_string().starts_with("cannot access /nope/file.xml"));
    }

    #[test]
    fn test_error_reserved_variation_display() {
        let e = Error::ReservedVariation {
            location: "config".into(),
            id: -1,
        };
        assert_eq!(e.to_string(), "variation id -1 is not valid for config");
    }
}
