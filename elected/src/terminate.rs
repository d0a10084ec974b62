//! Orderly shutdown: stop the command, give up the lock, drop the session.

use crate::supervisor::SupervisorHandle;
use elected_consul::{LockService, Session, SessionManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the shutdown sequence managed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// A stop was delivered to the supervisor
    pub stop_requested: bool,
    /// `None` when we were not leader and nothing had to be released
    pub released: Option<bool>,
    pub session_destroyed: bool,
}

/// Runs the shutdown steps in order. Every step is best-effort.
pub struct TerminationSequencer<S: LockService> {
    service: Arc<S>,
    key: String,
    supervisor: SupervisorHandle,
    shutdown: CancellationToken,
}

impl<S: LockService> TerminationSequencer<S> {
    pub fn new(
        service: Arc<S>,
        key: impl Into<String>,
        supervisor: SupervisorHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            key: key.into(),
            supervisor,
            shutdown,
        }
    }

    /// Stops the command, releases the key if `is_leader`, then destroys the session.
    ///
    /// The command's exit is not awaited. Failures are logged and the sequence
    /// carries on, so this always completes.
    pub async fn run(
        &self,
        sessions: &SessionManager<S>,
        session: Option<&Session>,
        is_leader: bool,
    ) -> ShutdownReport {
        self.shutdown.cancel();
        let mut report = ShutdownReport::default();

        match self.supervisor.shutdown().await {
            Ok(()) => report.stop_requested = true,
            Err(e) => warn!("Could not stop command: {}", e),
        }

        let Some(session) = session else {
            debug!("No session to clean up");
            return report;
        };

        if is_leader {
            let released = match self.service.release(&self.key, session.id()).await {
                Ok(released) => {
                    debug!("Release leadership of {} returned {}", self.key, released);
                    released
                }
                Err(e) => {
                    warn!("Failed to release {}: {}", self.key, e);
                    false
                }
            };
            report.released = Some(released);
        }

        report.session_destroyed = sessions.destroy(session).await;
        info!("Shutdown complete");
        report
    }
}
