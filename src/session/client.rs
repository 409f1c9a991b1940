//! Coordination Service Client Interface
//!
//! The primitives a ZooKeeper-style service has to offer. Production code
//! plugs a real wire client in here; tests use
//! [`MemoryEnsemble`](super::memory::MemoryEnsemble).

use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::error::Result;

/// Connection-level transitions reported by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connected (or reconnected) with the session intact
    Connected,
    /// Connection lost; the session may still be alive
    Disconnected,
    /// Session invalidated; every ephemeral entry it owned is gone
    Expired,
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Connected => write!(f, "CONNECTED"),
            SessionEvent::Disconnected => write!(f, "DISCONNECTED"),
            SessionEvent::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// What made a watch fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Children of the watched path changed
    ChildrenChanged(String),
    /// The watched path was deleted
    Deleted(String),
    /// The watch was discarded (session closed or expired) without firing
    Discarded,
}

/// Single-fire notification for a watched path
#[derive(Debug)]
pub struct WatchHandle {
    path: String,
    rx: oneshot::Receiver<WatchEvent>,
}

impl WatchHandle {
    /// Wrap the receiving end of a one-shot watch registration
    pub fn new(path: impl Into<String>, rx: oneshot::Receiver<WatchEvent>) -> Self {
        Self { path: path.into(), rx }
    }

    /// Watched path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the watch to fire. Consumes the handle: a fired watch has to
    /// be armed again to see further changes.
    pub async fn fired(self) -> WatchEvent {
        self.rx.await.unwrap_or(WatchEvent::Discarded)
    }
}

/// Primitive operations against the coordination service
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Establish a session with one of `servers`
    async fn connect(&self, servers: &[String], timeout: Duration) -> Result<()>;

    /// Create an ephemeral sequential entry at `prefix` + sequence; returns its full path
    async fn create_ephemeral_sequential(&self, prefix: &str, data: &[u8]) -> Result<String>;

    /// Create `path` and any missing parents as persistent entries
    async fn ensure_path(&self, path: &str) -> Result<()>;

    /// Names of the children of `path`
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Arm a one-shot watch on the children of `path`
    async fn watch_children(&self, path: &str) -> Result<WatchHandle>;

    /// Delete the entry at `path`
    async fn delete(&self, path: &str) -> Result<()>;

    /// Close the session, releasing its ephemeral entries
    async fn close(&self) -> Result<()>;

    /// Subscribe to connection-level transitions
    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent>;
}
