//! Error kinds for modsmith operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide how to handle a failure, e.g. a
/// `ConsentDenied` is reported quietly while `PathNotAllowed` is logged as a
/// security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// The requested feature or operation is not supported
    Unsupported,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Configuration errors
    // =========================================================================
    /// Configuration failed validation or could not be parsed
    ConfigInvalid,

    /// A configuration key or section does not exist
    ConfigNotFound,

    // =========================================================================
    // Storage errors
    // =========================================================================
    /// Storage key not found
    StorageNotFound,

    /// Storage operation failed
    StorageFailed,

    /// Serialization/deserialization failed
    SerializationFailed,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Prompt too large for the model
    ContextTooLarge,

    /// No provider configured, or the provider is down
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    /// The provider rejected our credentials
    AuthenticationFailed,

    // =========================================================================
    // File errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied by the operating system
    PermissionDenied,

    /// Path rejected by the file guard
    PathNotAllowed,

    /// Content exceeds the configured size limit
    FileTooLarge,

    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,

    // =========================================================================
    // Workflow errors
    // =========================================================================
    /// Failed to parse input
    ParseFailed,

    /// The user declined a proposed action
    ConsentDenied,

    /// An engine task finished unsuccessfully
    TaskFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Config
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::ConfigNotFound => "ConfigNotFound",

            // Storage
            ErrorKind::StorageNotFound => "StorageNotFound",
            ErrorKind::StorageFailed => "StorageFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",

            // Inference
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::ContextTooLarge => "ContextTooLarge",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",

            // Files
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::PathNotAllowed => "PathNotAllowed",
            ErrorKind::FileTooLarge => "FileTooLarge",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",

            // Workflow
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::ConsentDenied => "ConsentDenied",
            ErrorKind::TaskFailed => "TaskFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ProviderUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::PathNotAllowed.to_string(), "PathNotAllowed");
        assert_eq!(ErrorKind::InferenceFailed.to_string(), "InferenceFailed");
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::NetworkFailed.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::AuthenticationFailed.is_retryable());
        assert!(!ErrorKind::ConsentDenied.is_retryable());
    }
}
