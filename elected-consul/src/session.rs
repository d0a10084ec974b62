//! Lifetime of the one coordination session a process instance owns

use crate::error::Result;
use crate::service::{LockService, SessionId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A session created by [`SessionManager::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    name: String,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Creates and destroys the session tying this host to an election key
pub struct SessionManager<S: LockService> {
    service: Arc<S>,
    name: String,
}

impl<S: LockService> SessionManager<S> {
    /// Sessions are named `{hostname}-{key}` so operators can tell who holds what
    pub fn new(service: Arc<S>, hostname: &str, key: &str) -> Self {
        Self {
            service,
            name: session_name(hostname, key),
        }
    }

    /// Name every session created by this manager carries
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the session. Callers treat a failure as fatal.
    pub async fn create(&self) -> Result<Session> {
        let id = self.service.create_session(&self.name).await?;
        info!("Session ID is {}", id);
        Ok(Session {
            id,
            name: self.name.clone(),
        })
    }

    /// Destroys the session and reports whether the service confirmed it.
    ///
    /// Failures are only logged, shutdown continues either way.
    pub async fn destroy(&self, session: &Session) -> bool {
        match self.service.destroy_session(session.id()).await {
            Ok(true) => {
                debug!("Session {} destroyed", session.id());
                true
            }
            Ok(false) => {
                warn!("Service refused to destroy session {}", session.id());
                false
            }
            Err(e) => {
                warn!("Failed to destroy session {}: {}", session.id(), e);
                false
            }
        }
    }
}

/// Session name for `hostname` competing on `key`
pub fn session_name(hostname: &str, key: &str) -> String {
    format!("{}-{}", hostname, key)
}
