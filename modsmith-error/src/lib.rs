//! # modsmith-error
//!
//! Unified error handling for modsmith, modelled on OpenDAL's error practices.
//!
//! ## Design
//!
//! - **ErrorKind**: what went wrong (e.g. `PathNotAllowed`, `InferenceFailed`)
//! - **ErrorStatus**: how to react (Permanent, Temporary, Persistent)
//! - **Context**: key/value pairs that help locate the cause
//! - **Source**: the wrapped underlying error, never leaked as a raw type
//!
//! ## Usage
//!
//! ```rust
//! use modsmith_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::PathNotAllowed, "outside approved directories")
//!         .with_operation("files::write")
//!         .with_context("path", "/etc/passwd.java"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All fallible functions return `Result<T, modsmith_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - An error is handled once; callers above only append context

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using the modsmith Error
pub type Result<T> = std::result::Result<T, Error>;
