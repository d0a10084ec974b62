//! Restarting the command when a watched file changes, and deferring startup
//! until that file exists.

use crate::error::{ElectionError, Result};
use crate::supervisor::SupervisorHandle;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Restart requests closer together than this are dropped
pub const RESTART_DEBOUNCE: Duration = Duration::from_millis(1200);

/// How often the watched file's mtime is polled, in addition to notify events
pub const MTIME_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often startup checks whether the watched path exists yet
pub const PATH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Admits at most one event per window
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns true and starts a new window if `now` is outside the current one
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) <= self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Waits until `path` exists.
///
/// Returns false if `shutdown` fired first.
pub async fn wait_for_path(path: &Path, interval: Duration, shutdown: &CancellationToken) -> bool {
    let mut announced = false;
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!("Found {}. Starting up.", path.display());
            return true;
        }
        if !announced {
            info!("Waiting for {} before starting up.", path.display());
            announced = true;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Restarts the supervised command whenever the watched path changes.
///
/// Changes are picked up from filesystem notifications and, because editors
/// often replace files instead of writing them in place, from polling the
/// path's modification time.
pub struct RestartTrigger {
    handle: Option<JoinHandle<()>>,
}

impl RestartTrigger {
    /// Starts watching `path`. Stops when `shutdown` fires or the supervisor goes away.
    pub fn spawn(
        path: PathBuf,
        supervisor: SupervisorHandle,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        Self::spawn_with(path, supervisor, shutdown, RESTART_DEBOUNCE, MTIME_POLL_INTERVAL)
    }

    /// Like [`RestartTrigger::spawn`] with explicit debounce window and poll interval
    pub fn spawn_with(
        path: PathBuf,
        supervisor: SupervisorHandle,
        shutdown: CancellationToken,
        debounce: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<()>(16);
        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        // A full channel already holds a pending restart.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => warn!("File watch error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| ElectionError::RestartTrigger {
            path: path.display().to_string(),
            message: format!("Failed to create file watcher: {}", e),
        })?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ElectionError::RestartTrigger {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        info!("Watching {} for restarts", path.display());

        let handle = tokio::spawn(async move {
            // Keep the watcher alive for the duration of this task
            let _watcher = watcher;
            let mut debounce = Debounce::new(debounce);
            let mut ticker = tokio::time::interval(poll_interval);
            let mut last_modified = modified(&path).await;

            loop {
                let fired = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(()) => {
                            debug!("File watch fired for {}", path.display());
                            true
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        let current = modified(&path).await;
                        let changed = current.is_some() && last_modified.is_some() && current != last_modified;
                        if current.is_some() {
                            last_modified = current;
                        }
                        if changed {
                            debug!("Polling found change in {}.", path.display());
                        }
                        changed
                    }
                };

                if !fired {
                    continue;
                }
                let status = supervisor.status();
                if !status.running || status.stopping {
                    // Only a live run opens a debounce window.
                    debug!("No running command to restart for {}", path.display());
                    continue;
                }
                if debounce.admit(Instant::now()) {
                    info!("Triggering restart after watched file change.");
                    if supervisor.restart().is_err() {
                        break;
                    }
                }
            }
            debug!("Restart trigger for {} exiting", path.display());
        });

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Stops watching
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for RestartTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}
