//! Error types for the vt-daemon.
//!
//! Defines the error codes and the error type used throughout the daemon.
//! Every failure a client can observe is reduced to one of these codes and
//! rendered into the `details` field of an `error` response.

use std::path::Path;

use thiserror::Error;

/// Error codes identifying the class of a failure.
///
/// The taxonomy follows where the failure happened: request validation,
/// resources (sources, formats, encoders), modules, and concurrency anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed request. Rejected before any registry or cache interaction.
    InvalidRequest,

    /// A source file is missing or cannot be read.
    SourceUnavailable,

    /// A source or target format cannot be handled.
    UnsupportedFormat,

    /// A stack item names a module that is not registered.
    UnknownModule,

    /// A module failed while processing its source.
    ModuleFailed,

    /// The external encoder exited with a failure status.
    EncoderFailed,

    /// The external encoder binary could not be started.
    EncoderMissing,

    /// Nested queries exceeded the configured depth bound.
    DepthExceeded,

    /// A worker exited without reporting a result.
    WorkerLost,

    /// Filesystem failure inside the cache.
    Io,

    /// Invalid daemon configuration.
    Config,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::SourceUnavailable => "SOURCE_UNAVAILABLE",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::UnknownModule => "UNKNOWN_MODULE",
            ErrorCode::ModuleFailed => "MODULE_FAILED",
            ErrorCode::EncoderFailed => "ENCODER_FAILED",
            ErrorCode::EncoderMissing => "ENCODER_MISSING",
            ErrorCode::DepthExceeded => "DEPTH_EXCEEDED",
            ErrorCode::WorkerLost => "WORKER_LOST",
            ErrorCode::Io => "IO",
            ErrorCode::Config => "CONFIG",
        }
    }

    /// Returns true for errors detected before a job is created.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidRequest | ErrorCode::SourceUnavailable | ErrorCode::UnsupportedFormat
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for daemon operations.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct DaemonError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DaemonError {
    /// Creates a new DaemonError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new DaemonError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an INVALID_REQUEST error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, reason)
    }

    /// Creates a SOURCE_UNAVAILABLE error for a path.
    pub fn source_unavailable(path: &Path) -> Self {
        Self::new(
            ErrorCode::SourceUnavailable,
            format!("File '{}' cannot be accessed", path.display()),
        )
    }

    /// Creates an UNSUPPORTED_FORMAT error.
    pub fn unsupported_format(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedFormat, reason)
    }

    /// Creates an UNKNOWN_MODULE error naming the stack position.
    pub fn unknown_module(name: &str, position: usize) -> Self {
        Self::new(
            ErrorCode::UnknownModule,
            format!("Unknown module '{}' at stack position {}", name, position),
        )
    }

    /// Creates a MODULE_FAILED error with module, position and source context.
    pub fn module_failed(name: &str, position: usize, source: &Path, reason: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ModuleFailed,
            format!(
                "Module '{}' (stack position {}) failed on '{}': {}",
                name,
                position,
                source.display(),
                reason
            ),
        )
    }

    /// Creates an ENCODER_FAILED error carrying the encoder's diagnostics.
    pub fn encoder_failed(status: impl std::fmt::Display, stderr: &str) -> Self {
        Self::new(
            ErrorCode::EncoderFailed,
            format!("Encoder exited with {}: {}", status, stderr.trim()),
        )
    }

    /// Creates an ENCODER_MISSING error.
    pub fn encoder_missing(program: &str, source: std::io::Error) -> Self {
        Self::with_source(
            ErrorCode::EncoderMissing,
            format!("Encoder '{}' could not be started", program),
            source,
        )
    }

    /// Creates a DEPTH_EXCEEDED error.
    pub fn depth_exceeded(max_depth: usize) -> Self {
        Self::new(
            ErrorCode::DepthExceeded,
            format!("Nested queries exceed the maximum depth of {}", max_depth),
        )
    }

    /// Creates a WORKER_LOST error.
    pub fn worker_lost(signature: &str) -> Self {
        Self::new(
            ErrorCode::WorkerLost,
            format!("Worker for job {} exited without reporting a result", signature),
        )
    }

    /// Creates an IO error with path context.
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::with_source(
            ErrorCode::Io,
            format!("Failed to {} '{}': {}", action, path.display(), source),
            source,
        )
    }

    /// Creates a CONFIG error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, reason)
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_as_str() {
        assert_eq!(ErrorCode::InvalidRequest.as_str(), "INVALID_REQUEST");
        assert_eq!(ErrorCode::SourceUnavailable.as_str(), "SOURCE_UNAVAILABLE");
        assert_eq!(ErrorCode::UnknownModule.as_str(), "UNKNOWN_MODULE");
        assert_eq!(ErrorCode::ModuleFailed.as_str(), "MODULE_FAILED");
        assert_eq!(ErrorCode::EncoderFailed.as_str(), "ENCODER_FAILED");
        assert_eq!(ErrorCode::DepthExceeded.as_str(), "DEPTH_EXCEEDED");
        assert_eq!(ErrorCode::WorkerLost.as_str(), "WORKER_LOST");
    }

    #[test]
    fn validation_codes() {
        assert!(ErrorCode::InvalidRequest.is_validation());
        assert!(ErrorCode::SourceUnavailable.is_validation());
        assert!(!ErrorCode::ModuleFailed.is_validation());
        assert!(!ErrorCode::WorkerLost.is_validation());
    }

    #[test]
    fn module_failed_names_context() {
        let err = DaemonError::module_failed("pad", 2, Path::new("/tmp/a.wav"), "bad 'before'");
        let text = err.to_string();
        assert!(text.contains("MODULE_FAILED"));
        assert!(text.contains("'pad'"));
        assert!(text.contains("position 2"));
        assert!(text.contains("/tmp/a.wav"));
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error as _;
        let err = DaemonError::io(
            "read",
            Path::new("/nope"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code, ErrorCode::Io);
        assert!(err.source().is_some());
    }
}
