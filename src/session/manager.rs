//! Session Manager
//!
//! Owns the connection to the coordination service: connects within a
//! deadline, tracks the session state, and retries transient failures of the
//! primitive calls. Session expiry is never retried here; the caller has to
//! re-register.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use super::client::{CoordinationClient, SessionEvent, WatchHandle};
use crate::backoff::{retry_with_backoff, Backoff};
use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Observed session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable connection
    Disconnected,
    /// Connected with a live session
    Connected,
    /// Session invalidated; entries must be re-registered
    Expired,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Connection owner for one coordinator
pub struct SessionManager {
    client: Arc<dyn CoordinationClient>,
    servers: Vec<String>,
    retry: RetryConfig,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    /// Create a session manager; does not connect
    pub fn new(client: Arc<dyn CoordinationClient>, servers: Vec<String>, retry: RetryConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            client,
            servers,
            retry,
            state_tx,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch session state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to raw connection events from the client
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.client.subscribe_events()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!("Session state {} -> {}", current, state);
                *current = state;
                true
            }
        });
    }

    /// Record a connection event observed by the caller
    pub fn observe(&self, event: SessionEvent) {
        self.set_state(match event {
            SessionEvent::Connected => SessionState::Connected,
            SessionEvent::Disconnected => SessionState::Disconnected,
            SessionEvent::Expired => SessionState::Expired,
        });
    }

    /// Connect, retrying with backoff until `deadline`.
    ///
    /// Returns the last connection error if the service stayed unreachable,
    /// or `ConnectionTimeout` if an attempt was still pending at the deadline.
    pub async fn connect(&self, deadline: Instant) -> Result<()> {
        let mut backoff = Backoff::from_config(&self.retry);
        let address = self.servers.join(",");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::ConnectionTimeout(address));
            }

            match tokio::time::timeout_at(deadline, self.client.connect(&self.servers, remaining)).await {
                Ok(Ok(())) => {
                    self.set_state(SessionState::Connected);
                    tracing::debug!("Connected to {}", address);
                    return Ok(());
                }
                Ok(Err(e)) if e.is_retryable() => {
                    let delay = backoff.next_delay();
                    if Instant::now() + delay >= deadline {
                        self.set_state(SessionState::Disconnected);
                        return Err(e);
                    }
                    tracing::debug!("Connect to {} failed: {}; retrying in {:?}", address, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(e)) => {
                    self.set_state(SessionState::Disconnected);
                    return Err(e);
                }
                Err(_) => {
                    self.set_state(SessionState::Disconnected);
                    return Err(Error::ConnectionTimeout(address));
                }
            }
        }
    }

    /// Connect with a fresh deadline `timeout` from now
    pub async fn connect_within(&self, timeout: Duration) -> Result<()> {
        self.connect(Instant::now() + timeout).await
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Err(Error::SessionExpired) => self.set_state(SessionState::Expired),
            Err(e) if e.is_retryable() => self.set_state(SessionState::Disconnected),
            _ => {}
        }
        result
    }

    /// Create an ephemeral sequential entry. Not retried: a create whose
    /// response was lost may already exist, and a retry would register twice.
    pub async fn create_ephemeral_sequential(&self, prefix: &str, data: &[u8]) -> Result<String> {
        let result = self.client.create_ephemeral_sequential(prefix, data).await;
        self.track(result)
    }

    /// Create `path` and its parents if missing
    pub async fn ensure_path(&self, path: &str) -> Result<()> {
        let result = retry_with_backoff("ensure_path", &self.retry, || self.client.ensure_path(path)).await;
        self.track(result)
    }

    /// List children of `path`
    pub async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let result = retry_with_backoff("get_children", &self.retry, || self.client.get_children(path)).await;
        self.track(result)
    }

    /// Arm a one-shot watch on the children of `path`
    pub async fn watch_children(&self, path: &str) -> Result<WatchHandle> {
        let result = retry_with_backoff("watch_children", &self.retry, || self.client.watch_children(path)).await;
        self.track(result)
    }

    /// Delete the entry at `path`
    pub async fn delete(&self, path: &str) -> Result<()> {
        let result = retry_with_backoff("delete", &self.retry, || self.client.delete(path)).await;
        self.track(result)
    }

    /// Close the session
    pub async fn close(&self) -> Result<()> {
        let result = self.client.close().await;
        self.set_state(SessionState::Disconnected);
        result
    }
}
