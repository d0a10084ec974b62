//! Wires the session, the election watcher, the supervisor and the restart
//! trigger together for one run of the daemon.

use crate::election::{ElectionConfig, ElectionEngine, ElectionStatus};
use crate::error::{ElectionError, Result};
use crate::supervisor::{CommandSpec, Supervisor, SupervisorHandle};
use crate::terminate::{ShutdownReport, TerminationSequencer};
use crate::trigger::{wait_for_path, RestartTrigger, PATH_POLL_INTERVAL};
use elected_consul::{LockService, SessionManager};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Everything one daemon run needs
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub election: ElectionConfig,
    pub command: CommandSpec,
    /// Startup waits for this path to exist
    pub watch: Option<PathBuf>,
    /// Restart the command when `watch` changes
    pub restart_on_change: bool,
}

/// One participant in the election
pub struct Daemon<S: LockService> {
    service: Arc<S>,
    config: DaemonConfig,
    shutdown: CancellationToken,
    supervisor: SupervisorHandle,
    status: watch::Sender<ElectionStatus>,
}

impl<S: LockService> Daemon<S> {
    /// Creates the daemon and its idle supervisor. Must be called inside a tokio runtime.
    pub fn new(service: Arc<S>, config: DaemonConfig, shutdown: CancellationToken) -> Self {
        let supervisor = Supervisor::spawn(config.command.clone());
        let (status, _) = watch::channel(ElectionStatus::default());
        Self {
            service,
            config,
            shutdown,
            supervisor,
            status,
        }
    }

    /// Receiver for the election watcher's status
    pub fn election_status(&self) -> watch::Receiver<ElectionStatus> {
        self.status.subscribe()
    }

    /// Handle to the supervisor of the managed command
    pub fn supervisor(&self) -> SupervisorHandle {
        self.supervisor.clone()
    }

    /// Runs until `shutdown` fires or the coordination service becomes unreachable.
    ///
    /// A session that cannot be created is returned as an error before anything
    /// else happens. Once a session exists, the shutdown sequence always runs,
    /// including after a fatal watch or acquisition error, which is returned
    /// after cleanup.
    pub async fn run(self) -> Result<ShutdownReport> {
        let Daemon {
            service,
            config,
            shutdown,
            supervisor,
            status,
        } = self;

        let sessions = SessionManager::new(
            service.clone(),
            &config.election.hostname,
            &config.election.key,
        );
        let sequencer = TerminationSequencer::new(
            service.clone(),
            config.election.key.clone(),
            supervisor.clone(),
            shutdown.clone(),
        );

        if let Some(path) = &config.watch {
            debug!("Setting a watch on {} before starting up.", path.display());
            if !wait_for_path(path, PATH_POLL_INTERVAL, &shutdown).await {
                return Ok(sequencer.run(&sessions, None, false).await);
            }
        }

        let _trigger = match (&config.watch, config.restart_on_change) {
            (Some(path), true) => Some(RestartTrigger::spawn(
                path.clone(),
                supervisor.clone(),
                shutdown.clone(),
            )?),
            _ => None,
        };

        let session = sessions
            .create()
            .await
            .map_err(ElectionError::SessionCreation)?;
        if shutdown.is_cancelled() {
            return Ok(sequencer.run(&sessions, Some(&session), false).await);
        }

        info!(
            "Competing for {} as {} with command: {}",
            config.election.key,
            sessions.name(),
            config.command.line()
        );
        let mut engine = ElectionEngine::new(
            service,
            config.election.clone(),
            session.id().clone(),
            supervisor,
            shutdown,
            status,
        );
        let outcome = engine.run().await;

        let report = sequencer
            .run(&sessions, Some(&session), engine.is_leader())
            .await;
        outcome.map(|()| report)
    }
}

/// Hostname of this machine, used to name the session and tag the lock
pub fn local_hostname() -> Result<String> {
    nix::unistd::gethostname()
        .map_err(|e| ElectionError::Hostname(io::Error::from(e)))?
        .into_string()
        .map_err(|_| {
            ElectionError::Hostname(io::Error::new(
                io::ErrorKind::InvalidData,
                "hostname is not valid UTF-8",
            ))
        })
}
