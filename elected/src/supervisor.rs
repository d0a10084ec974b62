//! Supervision of the elected command.
//!
//! The [`Supervisor`] is an actor: one task owns the process record and reacts
//! to messages sent through a [`SupervisorHandle`] by the election engine, the
//! restart trigger and the termination sequencer. Exit notifications from the
//! spawned child arrive on the same channel, so every decision about the
//! record is made in one place, one message at a time.

use crate::error::{ElectionError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// The command line to supervise.
///
/// The first whitespace-delimited token is the program; the rest are passed as
/// arguments verbatim, without any shell interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    line: String,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Splits `line` into program and arguments. Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().map(str::to_string);
        let program = tokens.next()?;
        Some(Self {
            line: line.trim().to_string(),
            program,
            args: tokens.collect(),
            cwd: None,
        })
    }

    /// Runs the command from `cwd` instead of the daemon's working directory
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Snapshot of the supervisor, published after every message it handles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// A process record exists (spawned and not yet confirmed exited)
    pub running: bool,
    pub pid: Option<u32>,
    /// The current record is being stopped on purpose and will not respawn
    pub stopping: bool,
    /// Spawn attempts so far, including failed ones
    pub spawns: u64,
    /// SIGTERMs sent to stop the command (restarts are not counted)
    pub stop_signals: u64,
}

#[derive(Debug)]
enum ExitOutcome {
    Exited(ExitStatus),
    Failed(io::Error),
}

#[derive(Debug)]
enum Message {
    Start,
    Stop,
    AssertLeader,
    Restart,
    Shutdown(oneshot::Sender<()>),
    Exited {
        generation: u64,
        outcome: ExitOutcome,
    },
}

/// Cheap, cloneable access to a running [`Supervisor`]
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Message>,
    status: watch::Receiver<SupervisorStatus>,
}

impl SupervisorHandle {
    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| ElectionError::SupervisorGone)
    }

    /// Starts the command, replacing any current run
    pub fn start(&self) -> Result<()> {
        self.send(Message::Start)
    }

    /// Stops the command for good. A no-op when nothing runs.
    pub fn stop(&self) -> Result<()> {
        self.send(Message::Stop)
    }

    /// Tells the supervisor leadership is held: start if nothing runs, cancel a pending stop
    pub fn assert_leader(&self) -> Result<()> {
        self.send(Message::AssertLeader)
    }

    /// Terminates the current run so that it respawns
    pub fn restart(&self) -> Result<()> {
        self.send(Message::Restart)
    }

    /// Stops the command and refuses any further start.
    ///
    /// Resolves once the stop signal has been sent, not once the command exited.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Message::Shutdown(ack_tx))?;
        ack_rx.await.map_err(|_| ElectionError::SupervisorGone)
    }

    /// Latest published status
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }
}

#[derive(Debug)]
struct ManagedProcess {
    generation: u64,
    pid: Option<u32>,
    started: Instant,
    stopping: bool,
}

/// Owner of the managed process record
pub struct Supervisor {
    command: CommandSpec,
    current: Option<ManagedProcess>,
    generation: u64,
    shutting_down: bool,
    spawns: u64,
    stop_signals: u64,
    tx: mpsc::UnboundedSender<Message>,
    status: watch::Sender<SupervisorStatus>,
}

impl Supervisor {
    /// Spawns the supervisor task on the current runtime. Nothing runs until told to start.
    pub fn spawn(command: CommandSpec) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::default());

        let supervisor = Supervisor {
            command,
            current: None,
            generation: 0,
            shutting_down: false,
            spawns: 0,
            stop_signals: 0,
            tx: tx.clone(),
            status: status_tx,
        };
        tokio::spawn(supervisor.run(rx));

        SupervisorHandle {
            tx,
            status: status_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Start => self.start(),
                Message::Stop => self.stop(),
                Message::AssertLeader => self.assert_leader(),
                Message::Restart => self.restart(),
                Message::Shutdown(ack) => {
                    self.shutting_down = true;
                    self.stop();
                    let _ = ack.send(());
                }
                Message::Exited {
                    generation,
                    outcome,
                } => self.on_exit(generation, outcome),
            }
            self.publish();

            if self.shutting_down && self.current.is_none() {
                debug!("Supervisor finished");
                break;
            }
        }
    }

    /// The only spawn path. Every restart comes back here.
    fn start(&mut self) {
        debug!("Should start command: {}", self.command.line());
        if self.shutting_down {
            debug!("Ignoring start while shutting down");
            return;
        }

        if let Some(previous) = self.current.take() {
            // The replaced run's exit carries a stale generation and is ignored.
            debug!(
                "Command uptime was {} seconds.",
                previous.started.elapsed().as_secs()
            );
            if !previous.stopping {
                signal(previous.pid, Signal::SIGTERM);
            }
        }

        self.generation += 1;
        let generation = self.generation;
        self.spawns += 1;

        let pid = match self.command.build().spawn() {
            Ok(mut child) => {
                let pid = child.id();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let outcome = match child.wait().await {
                        Ok(status) => ExitOutcome::Exited(status),
                        Err(e) => ExitOutcome::Failed(e),
                    };
                    let _ = tx.send(Message::Exited {
                        generation,
                        outcome,
                    });
                });
                pid
            }
            Err(e) => {
                // Reported like any exit so the respawn decision stays in one place.
                let _ = self.tx.send(Message::Exited {
                    generation,
                    outcome: ExitOutcome::Failed(e),
                });
                None
            }
        };

        self.current = Some(ManagedProcess {
            generation,
            pid,
            started: Instant::now(),
            stopping: false,
        });
    }

    fn stop(&mut self) {
        let Some(process) = self.current.as_mut() else {
            debug!("Stop called with no process running");
            return;
        };
        if process.stopping {
            debug!("Stop called while the command is already stopping");
            return;
        }

        debug!("Should stop command: {}", self.command.line());
        process.stopping = true;
        if signal(process.pid, Signal::SIGTERM) {
            self.stop_signals += 1;
        }
    }

    fn assert_leader(&mut self) {
        match self.current.as_mut() {
            None => {
                info!("Leader without a running command, starting it");
                self.start();
            }
            Some(process) if process.stopping => {
                debug!("Resetting stopping state since leadership is held");
                process.stopping = false;
            }
            Some(_) => {}
        }
    }

    fn restart(&mut self) {
        if self.shutting_down {
            return;
        }
        match self.current.as_ref() {
            Some(process) if !process.stopping => {
                info!("Restarting command: {}", self.command.line());
                signal(process.pid, Signal::SIGTERM);
            }
            Some(_) => debug!("Ignoring restart of a command that is stopping"),
            None => debug!("Ignoring restart with no process running"),
        }
    }

    fn on_exit(&mut self, generation: u64, outcome: ExitOutcome) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|process| process.generation == generation);
        if !is_current {
            debug!("Ignoring exit of replaced command (generation {})", generation);
            return;
        }
        let Some(process) = self.current.take() else {
            return;
        };

        match &outcome {
            ExitOutcome::Exited(status) => {
                debug!("Command exited: {:?} || {:?}", status.code(), exit_signal(status))
            }
            ExitOutcome::Failed(e) => warn!("Command got error: {}", e),
        }

        if process.stopping {
            info!("Command is stopped.");
        } else {
            info!(
                "Command ended after {} seconds, restarting",
                process.started.elapsed().as_secs()
            );
            self.start();
        }
    }

    fn publish(&self) {
        let running = self.current.is_some();
        let pid = self.current.as_ref().and_then(|process| process.pid);
        let stopping = self.current.as_ref().is_some_and(|process| process.stopping);
        let next = SupervisorStatus {
            running,
            pid,
            stopping,
            spawns: self.spawns,
            stop_signals: self.stop_signals,
        };
        let command = self.command.line();

        self.status.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            if status.running != next.running {
                info!(
                    "elected ({})({})",
                    if running { "Running" } else { "Waiting" },
                    command
                );
            }
            *status = next;
            true
        });
    }
}

/// Sends `sig` to `pid`. Returns whether a signal was delivered.
fn signal(pid: Option<u32>, sig: Signal) -> bool {
    let Some(pid) = pid else {
        return false;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), sig) {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to send {} to {}: {}", sig, pid, e);
            false
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
