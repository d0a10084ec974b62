//! Consul client for leader election.
//!
//! The election engine only needs five calls from the coordination service:
//! create and destroy a session, acquire and release a key for that session,
//! and long-poll the key. [`LockService`] is that contract; [`ConsulClient`]
//! speaks it over Consul's HTTP API.
//!
//! # Example
//!
//! ```ignore
//! use elected_consul::{ConsulClient, LockService, SessionManager};
//! use std::sync::Arc;
//!
//! let client = Arc::new(ConsulClient::new("localhost:8500"));
//! let sessions = SessionManager::new(client.clone(), "web-1", "jobs/leader");
//! let session = sessions.create().await?;
//! // ... watch and acquire "jobs/leader" with session.id() ...
//! sessions.destroy(&session).await;
//! ```

mod client;
mod error;
mod service;
mod session;

pub use client::{ConsulClient, INDEX_HEADER};
pub use error::{ConsulError, Result};
pub use service::{KeyObservation, LockPayload, LockService, SessionId, WatchIndex, WatchRequest};
pub use session::{session_name, Session, SessionManager};
