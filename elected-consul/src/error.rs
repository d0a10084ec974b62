//! Error types for the Consul client

use thiserror::Error;

/// Errors returned by calls against the coordination service
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConsulError {
    /// The request never produced a response (connection refused, reset, DNS...)
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a status the call does not accept
    #[error("Unexpected status {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// A URL could not be built from the configured server and key
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl ConsulError {
    /// Returns true when the failure happened below HTTP, i.e. the service was unreachable
    pub fn is_transport(&self) -> bool {
        matches!(self, ConsulError::Transport { .. })
    }
}

/// Result type for Consul operations
pub type Result<T> = std::result::Result<T, ConsulError>;
