//! Error types for image tool operations.
//!
//! The first group of variants forms the tool-level error category: they are
//! reported to the user as-is and never retried. Everything else is an
//! underlying failure that propagates unchanged to the same boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while locating, transferring or rotating images.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested checksum algorithm is not available.
    #[error("Verify not possible, algorithm {algorithm} unavailable")]
    UnsupportedChecksumAlgorithm {
        /// Algorithm name as requested, or `undetermined`.
        algorithm: String,
    },

    /// Computed digest disagrees with the expected one.
    #[error("Image verify failed for {subject}: expected {expected}, got {actual}")]
    VerifyMismatch {
        /// What was verified (file path or registry image id).
        subject: String,
        /// Expected checksum.
        expected: String,
        /// Actual checksum.
        actual: String,
    },

    /// Neither a local file nor a repository image is available.
    #[error("No source image: {reason}")]
    MissingSource {
        /// Why no source could be resolved.
        reason: String,
    },

    /// Retention count is absent or negative while rotation is requested.
    #[error("Invalid value for image rotation count: {value}")]
    InvalidRotationCount {
        /// The offending value, rendered for display.
        value: String,
    },

    /// A property string is not parseable as `key=value`.
    #[error("Cannot parse property '{input}', expected key=value")]
    MalformedKeyValue {
        /// The offending input.
        input: String,
    },

    /// Non-success response while fetching a manifest or image bytes.
    #[error("Failed to fetch {url}: HTTP {status}")]
    UpstreamFetchFailure {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The operation was interrupted by the user.
    #[error("Interrupted")]
    Interrupted,

    /// Location uses a scheme no source opener handles.
    #[error("Unsupported location scheme '{scheme}' in {location}")]
    UnsupportedScheme {
        /// URI scheme.
        scheme: String,
        /// Full location.
        location: String,
    },

    /// Invalid input provided.
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Reason the input is invalid.
        reason: String,
    },

    /// Invalid location URI.
    #[error("Invalid location '{location}': {reason}")]
    InvalidLocation {
        /// Location string.
        location: String,
        /// Parse failure.
        reason: String,
    },

    /// File I/O error.
    #[error("File I/O error at {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by a collaborator (registry client, HTTP source).
    #[error("{operation} failed: {source}")]
    Backend {
        /// Operation that failed.
        operation: String,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps a collaborator error.
    pub fn backend(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Returns true for errors in the tool-level category.
    #[must_use]
    pub const fn is_tool_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedChecksumAlgorithm { .. }
                | Self::VerifyMismatch { .. }
                | Self::MissingSource { .. }
                | Self::InvalidRotationCount { .. }
                | Self::MalformedKeyValue { .. }
                | Self::UpstreamFetchFailure { .. }
        )
    }

    /// Returns true if the operation was cancelled by the user.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
