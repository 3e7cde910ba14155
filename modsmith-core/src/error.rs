//! Core error helpers
//!
//! Re-exports modsmith-error and adds the constructors that need
//! core-specific values (sizes, paths).

pub use modsmith_error::{Error, ErrorKind, ErrorStatus, Result};

use std::path::Path;

/// Create a FileTooLarge error
pub fn file_too_large(path: &Path, size: usize, limit: usize) -> Error {
    Error::new(
        ErrorKind::FileTooLarge,
        format!("{} bytes exceeds the {} byte limit", size, limit),
    )
    .with_context("path", path.display().to_string())
    .with_context("size", size.to_string())
    .with_context("limit", limit.to_string())
}

/// Wrap an io error with the path it happened on
pub fn io_failed(operation: &'static str, path: &Path, err: std::io::Error) -> Error {
    Error::from(err)
        .with_operation(operation)
        .with_context("path", path.display().to_string())
}
