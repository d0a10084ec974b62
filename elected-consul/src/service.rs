//! The lock service seam and the values that cross it

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a coordination session, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cursor returned with every watch response.
///
/// Passed back verbatim on the next watch so the service blocks until
/// something newer than this index happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchIndex(String);

impl WatchIndex {
    pub fn new(index: impl Into<String>) -> Self {
        Self(index.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value stored in the lock key on acquisition, for humans reading the KV store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPayload {
    pub hostname: String,
    pub pid: u32,
}

impl LockPayload {
    /// Payload describing the current process
    pub fn current(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            pid: std::process::id(),
        }
    }
}

/// What one watch call saw
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyObservation {
    /// Index header of the response, `None` when the service omitted it
    pub index: Option<WatchIndex>,
    /// Session currently holding the key, `None` when unheld or missing
    pub holder: Option<SessionId>,
}

/// Parameters of a long-poll watch
#[derive(Debug, Clone, Copy)]
pub struct WatchRequest<'a> {
    pub key: &'a str,
    /// Last index seen; without one the call returns immediately
    pub index: Option<&'a WatchIndex>,
    /// Server-side bound on the blocking query, e.g. `10m`
    pub wait: &'a str,
}

/// Calls the election engine makes against the coordination service.
///
/// Every call is a single request/response; implementations keep no state
/// that the engine relies on.
#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Creates a session with the given name and returns its identifier
    async fn create_session(&self, name: &str) -> Result<SessionId>;

    /// Destroys the session, returning the service's verdict
    async fn destroy_session(&self, session: &SessionId) -> Result<bool>;

    /// Acquires `key` for `session` if nobody holds it
    async fn acquire(&self, key: &str, session: &SessionId, payload: &LockPayload)
        -> Result<bool>;

    /// Releases `key` if `session` holds it
    async fn release(&self, key: &str, session: &SessionId) -> Result<bool>;

    /// Long-polls `key`, returning once it changes past `index` or `wait` elapses
    async fn watch(&self, request: WatchRequest<'_>) -> Result<KeyObservation>;
}
