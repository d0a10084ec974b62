//! In-memory coordination service for driving the election engine in tests.
//!
//! Acquires are serialized by a mutex, which gives the same atomic
//! acquire-if-unheld semantics Consul provides. Blocking watches wait on a
//! `watch` channel carrying the current index, bounded by a short wait.

#![allow(dead_code)]

use async_trait::async_trait;
use elected::{
    CommandSpec, DaemonConfig, ElectionConfig, ElectionStatus, ShutdownReport, SupervisorHandle,
    SupervisorStatus,
};
use elected_consul::{
    ConsulError, KeyObservation, LockPayload, LockService, SessionId, WatchIndex, WatchRequest,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// One call received by the simulated service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSession(String),
    DestroySession(SessionId),
    Acquire(SessionId),
    Release(SessionId),
    Watch(Option<String>),
}

/// How a faulty call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    /// The service answers with an HTTP error
    ErrorAnswer,
    /// The service cannot be reached at all
    Unreachable,
}

/// Index passed to a watch call and index returned by it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchExchange {
    pub passed: Option<String>,
    pub returned: Option<String>,
}

#[derive(Default)]
struct SimState {
    index: u64,
    holder: Option<SessionId>,
    next_session: u64,
    calls: Vec<Call>,
    watches: Vec<WatchExchange>,
    deny_acquire: bool,
    fail_create: bool,
    fail_release: bool,
    watch_fault: Fault,
    acquire_fault: Fault,
    omit_index: usize,
}

pub struct SimulatedConsul {
    state: Mutex<SimState>,
    changes: watch::Sender<u64>,
    wait: Duration,
}

fn error_answer(message: &str) -> ConsulError {
    ConsulError::Status {
        url: "http://127.0.0.1:8500/v1/kv/jobs/leader".to_string(),
        status: 500,
        body: message.to_string(),
    }
}

/// A genuine connection failure: nothing listens on port 1 of the loopback
async fn unreachable() -> ConsulError {
    let url = "http://127.0.0.1:1/v1/kv/jobs/leader";
    match reqwest::Client::new().get(url).send().await {
        Err(source) => ConsulError::Transport {
            url: url.to_string(),
            source,
        },
        Ok(response) => panic!("unexpected answer from {url}: {}", response.status()),
    }
}

async fn fail(fault: Fault) -> Option<ConsulError> {
    match fault {
        Fault::None => None,
        Fault::ErrorAnswer => Some(error_answer("rpc error: No cluster leader")),
        Fault::Unreachable => Some(unreachable().await),
    }
}

impl SimulatedConsul {
    pub fn new() -> Arc<Self> {
        Self::with_wait(Duration::from_millis(200))
    }

    /// `wait` replaces the server-side bound of blocking watches
    pub fn with_wait(wait: Duration) -> Arc<Self> {
        let (changes, _) = watch::channel(1);
        Arc::new(Self {
            state: Mutex::new(SimState {
                index: 1,
                ..SimState::default()
            }),
            changes,
            wait,
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn bump(&self, state: &mut SimState) {
        state.index += 1;
        self.changes.send_replace(state.index);
    }

    pub fn holder(&self) -> Option<SessionId> {
        self.with_state(|s| s.holder.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn watches(&self) -> Vec<WatchExchange> {
        self.with_state(|s| s.watches.clone())
    }

    pub fn set_deny_acquire(&self, deny: bool) {
        self.with_state(|s| s.deny_acquire = deny);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.with_state(|s| s.fail_create = fail);
    }

    pub fn set_fail_release(&self, fail: bool) {
        self.with_state(|s| s.fail_release = fail);
    }

    pub fn set_watch_fault(&self, fault: Fault) {
        self.with_state(|s| s.watch_fault = fault);
    }

    pub fn set_acquire_fault(&self, fault: Fault) {
        self.with_state(|s| s.acquire_fault = fault);
    }

    /// The next `count` watch responses carry no index
    pub fn omit_index(&self, count: usize) {
        self.with_state(|s| s.omit_index = count);
    }

    /// Hands the key to a session this service never issued
    pub fn steal(&self, session: &str) {
        self.with_state(|s| {
            s.holder = Some(SessionId::new(session));
            self.bump(s);
        });
    }

    /// Advances the index without changing the holder
    pub fn touch(&self) {
        self.with_state(|s| self.bump(s));
    }
}

#[async_trait]
impl LockService for SimulatedConsul {
    async fn create_session(&self, name: &str) -> elected_consul::Result<SessionId> {
        self.with_state(|s| {
            s.calls.push(Call::CreateSession(name.to_string()));
            if s.fail_create {
                return Err(error_answer("session create failed"));
            }
            s.next_session += 1;
            Ok(SessionId::new(format!("session-{}", s.next_session)))
        })
    }

    async fn destroy_session(&self, session: &SessionId) -> elected_consul::Result<bool> {
        self.with_state(|s| {
            s.calls.push(Call::DestroySession(session.clone()));
            if s.holder.as_ref() == Some(session) {
                s.holder = None;
                self.bump(s);
            }
            Ok(true)
        })
    }

    async fn acquire(
        &self,
        _key: &str,
        session: &SessionId,
        _payload: &LockPayload,
    ) -> elected_consul::Result<bool> {
        let fault = self.with_state(|s| {
            s.calls.push(Call::Acquire(session.clone()));
            s.acquire_fault
        });
        if let Some(e) = fail(fault).await {
            return Err(e);
        }

        self.with_state(|s| {
            if s.deny_acquire {
                return Ok(false);
            }
            match &s.holder {
                None => {
                    s.holder = Some(session.clone());
                    self.bump(s);
                    Ok(true)
                }
                Some(holder) => Ok(holder == session),
            }
        })
    }

    async fn release(&self, _key: &str, session: &SessionId) -> elected_consul::Result<bool> {
        self.with_state(|s| {
            s.calls.push(Call::Release(session.clone()));
            if s.fail_release {
                return Err(error_answer("release failed"));
            }
            if s.holder.as_ref() == Some(session) {
                s.holder = None;
                self.bump(s);
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }

    async fn watch(&self, request: WatchRequest<'_>) -> elected_consul::Result<KeyObservation> {
        let passed = request.index.map(|index| index.as_str().to_string());
        let fault = self.with_state(|s| {
            s.calls.push(Call::Watch(passed.clone()));
            s.watch_fault
        });
        if let Some(e) = fail(fault).await {
            return Err(e);
        }

        if let Some(after) = passed.as_deref().and_then(|p| p.parse::<u64>().ok()) {
            let mut rx = self.changes.subscribe();
            let _ = timeout(self.wait, rx.wait_for(|index| *index > after)).await;
        }

        Ok(self.with_state(|s| {
            let index = if s.omit_index > 0 {
                s.omit_index -= 1;
                None
            } else {
                Some(WatchIndex::new(s.index.to_string()))
            };
            s.watches.push(WatchExchange {
                passed: passed.clone(),
                returned: index.as_ref().map(|i| i.as_str().to_string()),
            });
            KeyObservation {
                index,
                holder: s.holder.clone(),
            }
        }))
    }
}

/// A daemon running in the background against a shared simulated service
pub struct Participant {
    pub shutdown: CancellationToken,
    pub election: watch::Receiver<ElectionStatus>,
    pub supervisor: SupervisorHandle,
    pub task: JoinHandle<elected::Result<ShutdownReport>>,
}

pub fn config(hostname: &str, command: &str) -> DaemonConfig {
    DaemonConfig {
        election: ElectionConfig::new("jobs/leader", hostname)
            .with_retry_delay(Duration::from_millis(50)),
        command: CommandSpec::parse(command).unwrap(),
        watch: None,
        restart_on_change: false,
    }
}

pub fn spawn_participant(service: Arc<SimulatedConsul>, config: DaemonConfig) -> Participant {
    let shutdown = CancellationToken::new();
    let daemon = elected::Daemon::new(service, config, shutdown.clone());
    let election = daemon.election_status();
    let supervisor = daemon.supervisor();
    let task = tokio::spawn(daemon.run());
    Participant {
        shutdown,
        election,
        supervisor,
        task,
    }
}

impl Participant {
    pub async fn wait_election(
        &self,
        what: &str,
        predicate: impl FnMut(&ElectionStatus) -> bool,
    ) -> ElectionStatus {
        let mut rx = self.election.clone();
        let status = timeout(Duration::from_secs(10), rx.wait_for(predicate))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .expect("election status channel closed");
        status.clone()
    }

    pub async fn wait_supervisor(
        &self,
        what: &str,
        predicate: impl FnMut(&SupervisorStatus) -> bool,
    ) -> SupervisorStatus {
        let mut rx = self.supervisor.subscribe();
        let status = timeout(Duration::from_secs(10), rx.wait_for(predicate))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .expect("supervisor status channel closed");
        status.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.election.borrow().is_leader
    }

    /// Triggers shutdown and waits for the daemon to finish
    pub async fn stop(self) -> elected::Result<ShutdownReport> {
        self.shutdown.cancel();
        timeout(Duration::from_secs(10), self.task)
            .await
            .expect("daemon did not shut down")
            .expect("daemon task panicked")
    }
}
