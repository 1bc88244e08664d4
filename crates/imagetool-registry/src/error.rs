//! Error types for registry operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to Keystone, Glance or a repository.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to a service.
    #[error("Failed to connect to {url}: {source}")]
    ConnectionFailed {
        /// Service URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// The service catalog has no matching endpoint.
    #[error("No {service_type} endpoint with interface {interface}{} in service catalog", region.as_ref().map(|r| format!(" in region {r}")).unwrap_or_default())]
    EndpointNotFound {
        /// Service type, e.g. `image`.
        service_type: String,
        /// Endpoint interface.
        interface: String,
        /// Requested region.
        region: Option<String>,
    },

    /// Image not found in the registry.
    #[error("Image not found: {id}")]
    NotFound {
        /// Image id.
        id: String,
    },

    /// HTTP error from a service.
    #[error("HTTP error: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Response body could not be interpreted.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid URL.
    #[error("Invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// TLS material could not be loaded.
    #[error("Invalid TLS configuration: {message}")]
    TlsConfig {
        /// Error message.
        message: String,
    },

    /// File I/O error.
    #[error("File I/O error at {path}: {source}")]
    IoError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Wraps the error as a collaborator failure of `operation`.
    #[must_use]
    pub fn into_core(self, operation: &str) -> imagetool_core::Error {
        imagetool_core::Error::backend(operation, self)
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else if err.is_status() {
            let status = err.status().map_or(0, |s| s.as_u16());
            Self::HttpError {
                status,
                message: err.to_string(),
            }
        } else {
            Self::HttpError {
                status: 0,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: err.to_string(),
        }
    }
}
