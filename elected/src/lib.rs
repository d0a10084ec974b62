//! Leader-election-gated process supervision.
//!
//! Every host in a fleet runs the same daemon with the same election key and
//! command. The coordination service decides which session holds the key;
//! the holder runs the command, everyone else stands by and takes over when
//! the key becomes free.
//!
//! # Overview
//!
//! - **Election watcher**: long-polls the key, acquires it when unheld
//! - **Supervisor**: starts, respawns and stops the command as leadership changes
//! - **Restart trigger**: optionally restarts the command when a file changes
//! - **Termination sequencer**: stops the command, releases the key, destroys the session
//!
//! # Example
//!
//! ```ignore
//! use elected::{CommandSpec, Daemon, DaemonConfig, ElectionConfig};
//! use elected_consul::ConsulClient;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = DaemonConfig {
//!     election: ElectionConfig::new("jobs/leader", elected::local_hostname()?),
//!     command: CommandSpec::parse("./run-scheduler --verbose").unwrap(),
//!     watch: None,
//!     restart_on_change: false,
//! };
//! let shutdown = CancellationToken::new();
//! let daemon = Daemon::new(Arc::new(ConsulClient::new("localhost:8500")), config, shutdown);
//! daemon.run().await?;
//! ```

mod daemon;
mod election;
mod error;
mod supervisor;
mod terminate;
mod trigger;

pub use daemon::{local_hostname, Daemon, DaemonConfig};
pub use election::{
    ElectionConfig, ElectionEngine, ElectionState, ElectionStatus, DEFAULT_WAIT, WATCH_RETRY_DELAY,
};
pub use error::{ElectionError, Result};
pub use supervisor::{CommandSpec, Supervisor, SupervisorHandle, SupervisorStatus};
pub use terminate::{ShutdownReport, TerminationSequencer};
pub use trigger::{
    wait_for_path, Debounce, RestartTrigger, MTIME_POLL_INTERVAL, PATH_POLL_INTERVAL,
    RESTART_DEBOUNCE,
};
