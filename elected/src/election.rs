//! The election watcher.
//!
//! One task long-polls the lock key and reacts to what it sees: an unheld key
//! triggers an acquisition attempt, a key held by our session keeps the
//! command running, a key held by anyone else stops it. Only one watch and at
//! most one acquisition are ever in flight because both are awaited inline.

use crate::error::{ElectionError, Result};
use crate::supervisor::SupervisorHandle;
use elected_consul::{
    KeyObservation, LockPayload, LockService, SessionId, WatchIndex, WatchRequest,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound of one blocking watch, in Consul duration syntax
pub const DEFAULT_WAIT: &str = "10m";

/// Pause before re-watching after the service answered a watch with an error
pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Where the election currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElectionState {
    /// No session yet
    #[default]
    Uninitialized,
    /// Watching the key, leadership not yet determined
    Watching,
    /// An acquisition attempt is in flight
    Acquiring,
    /// The key is ours; the supervisor keeps the command running whenever it can
    Leader,
    /// Someone else holds the key, or we lost the race for it
    Standby,
    /// Shutdown has begun
    Terminating,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElectionState::Uninitialized => "uninitialized",
            ElectionState::Watching => "watching",
            ElectionState::Acquiring => "acquiring",
            ElectionState::Leader => "leader",
            ElectionState::Standby => "standby",
            ElectionState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// What the watcher publishes after every step
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElectionStatus {
    pub state: ElectionState,
    pub is_leader: bool,
    pub session: Option<SessionId>,
    pub index: Option<WatchIndex>,
    /// Acquisition attempts made so far
    pub acquisitions: u64,
}

/// Parameters of one election
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Key whose holder is the leader
    pub key: String,
    /// Recorded in the key's value on acquisition
    pub hostname: String,
    /// Server-side bound of each blocking watch
    pub wait: String,
    /// Pause before re-watching after an error answer
    pub retry_delay: Duration,
}

impl ElectionConfig {
    pub fn new(key: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            hostname: hostname.into(),
            wait: DEFAULT_WAIT.to_string(),
            retry_delay: WATCH_RETRY_DELAY,
        }
    }

    pub fn with_wait(mut self, wait: impl Into<String>) -> Self {
        self.wait = wait.into();
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Watches the lock key for one session and drives the supervisor accordingly
pub struct ElectionEngine<S: LockService> {
    service: Arc<S>,
    config: ElectionConfig,
    session: SessionId,
    supervisor: SupervisorHandle,
    shutdown: CancellationToken,
    status: watch::Sender<ElectionStatus>,
    index: Option<WatchIndex>,
    is_leader: bool,
    acquisitions: u64,
}

impl<S: LockService> ElectionEngine<S> {
    pub fn new(
        service: Arc<S>,
        config: ElectionConfig,
        session: SessionId,
        supervisor: SupervisorHandle,
        shutdown: CancellationToken,
        status: watch::Sender<ElectionStatus>,
    ) -> Self {
        Self {
            service,
            config,
            session,
            supervisor,
            shutdown,
            status,
            index: None,
            is_leader: false,
            acquisitions: 0,
        }
    }

    /// Whether the last observation or acquisition made us leader
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Last index received from the service
    pub fn index(&self) -> Option<&WatchIndex> {
        self.index.as_ref()
    }

    /// Watches until shutdown.
    ///
    /// Returns an error when the service cannot be reached during a watch or an
    /// acquisition; leadership state is then unknown and the caller must shut down.
    /// Error answers from a reachable service are not fatal: a failed watch is
    /// retried with the stored index, a failed acquisition counts as lost.
    pub async fn run(&mut self) -> Result<()> {
        self.publish(ElectionState::Watching);
        let result = self.watch_loop().await;
        self.publish(ElectionState::Terminating);
        result
    }

    async fn watch_loop(&mut self) -> Result<()> {
        loop {
            let observation = {
                let request = WatchRequest {
                    key: &self.config.key,
                    index: self.index.as_ref(),
                    wait: &self.config.wait,
                };
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    result = self.service.watch(request) => result,
                }
            };
            if self.shutdown.is_cancelled() {
                break;
            }

            match observation {
                Ok(observation) => self.observe(observation).await?,
                Err(e) if e.is_transport() => return Err(ElectionError::Watch(e)),
                Err(e) => {
                    warn!("Watch of {} failed, retrying: {}", self.config.key, e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn observe(&mut self, observation: KeyObservation) -> Result<()> {
        let Some(index) = observation.index else {
            warn!("Watch response carried no index, polling again");
            return Ok(());
        };
        debug!("Last index is now {}", index);
        self.index = Some(index);

        match observation.holder {
            Some(holder) if holder == self.session => {
                debug!("Leader is Me. Polling again.");
                if !self.is_leader {
                    info!("Holding leadership of {}", self.config.key);
                }
                self.is_leader = true;
                self.supervisor.assert_leader()?;
            }
            Some(holder) => {
                debug!("Leader is {}. Polling again.", holder);
                if self.is_leader {
                    info!("Lost leadership of {} to session {}", self.config.key, holder);
                }
                self.is_leader = false;
                self.supervisor.stop()?;
            }
            None => self.attempt_acquire().await?,
        }

        self.publish(self.role());
        Ok(())
    }

    async fn attempt_acquire(&mut self) -> Result<()> {
        debug!("Attempting to acquire leadership");
        self.acquisitions += 1;
        self.publish(ElectionState::Acquiring);

        let payload = LockPayload::current(self.config.hostname.clone());
        // Not raced against shutdown: a lock granted mid-flight must be known so it gets released.
        let acquired = match self
            .service
            .acquire(&self.config.key, &self.session, &payload)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) if e.is_transport() => return Err(ElectionError::LockAcquisition(e)),
            Err(e) => {
                warn!("Acquire of {} failed, treating as not acquired: {}", self.config.key, e);
                false
            }
        };

        if self.shutdown.is_cancelled() {
            self.is_leader = acquired;
            return Ok(());
        }

        if acquired {
            info!("I am now the leader.");
            self.is_leader = true;
            self.supervisor.start()?;
        } else {
            info!("Did not get leader lock.");
            self.is_leader = false;
            self.supervisor.stop()?;
        }
        Ok(())
    }

    fn role(&self) -> ElectionState {
        if self.is_leader {
            ElectionState::Leader
        } else {
            ElectionState::Standby
        }
    }

    fn publish(&self, state: ElectionState) {
        let next = ElectionStatus {
            state,
            is_leader: self.is_leader,
            session: Some(self.session.clone()),
            index: self.index.clone(),
            acquisitions: self.acquisitions,
        };
        self.status.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            if status.state != next.state {
                debug!("Election state {} -> {}", status.state, next.state);
            }
            *status = next;
            true
        });
    }
}
