//! Error types for leader election

use elected_consul::ConsulError;
use std::io;

/// Errors that stop the election engine
#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// No session could be created, so this process cannot take part
    #[error("Failed to create session: {0}")]
    SessionCreation(#[source] ConsulError),

    /// An acquisition attempt failed below the protocol level
    #[error("Failed to acquire lock: {0}")]
    LockAcquisition(#[source] ConsulError),

    /// A watch request failed below the protocol level
    #[error("Failed to watch lock key: {0}")]
    Watch(#[source] ConsulError),

    /// The local hostname could not be read
    #[error("Failed to read hostname: {0}")]
    Hostname(#[source] io::Error),

    /// The restart trigger could not watch its path
    #[error("Failed to watch {path}: {message}")]
    RestartTrigger { path: String, message: String },

    /// The process supervisor is gone
    #[error("Process supervisor is not running")]
    SupervisorGone,
}

/// Result type for election operations
pub type Result<T> = std::result::Result<T, ElectionError>;
