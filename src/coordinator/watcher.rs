//! Election Watch Loop
//!
//! Registration, refresh and the background task that keeps a coordinator's
//! view current. Each pass runs fire -> refresh -> compare -> broadcast if
//! changed -> re-arm. A pass that cannot re-arm or list schedules a retry,
//! so the loop never waits without either an armed watch or a pending retry.

use std::sync::Arc;
use std::time::Duration;
use futures::future::BoxFuture;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::lifecycle::Lifecycle;
use super::state::Shared;
use crate::backoff::Backoff;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::membership::Node;
use crate::session::{SessionEvent, SessionManager, WatchEvent, WatchHandle};

/// Armed watch, pinned so it survives across select iterations
type ArmedWatch = BoxFuture<'static, WatchEvent>;

/// Result of one refresh pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    /// Watch armed and snapshot current
    Fresh,
    /// Something failed; try again after backoff
    Retry,
    /// Session is gone; re-register
    Expired,
}

enum Step {
    Fired(WatchEvent),
    Session(std::result::Result<SessionEvent, RecvError>),
    Retry,
}

/// Registration and watch handling for one coordinator
#[derive(Clone)]
pub(crate) struct Election {
    shared: Arc<Shared>,
    session: Arc<SessionManager>,
    retry: RetryConfig,
    connect_timeout: Duration,
}

impl Election {
    pub(crate) fn new(
        shared: Arc<Shared>,
        session: Arc<SessionManager>,
        retry: RetryConfig,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            session,
            retry,
            connect_timeout,
        }
    }

    fn path(&self) -> &str {
        &self.shared.election_path
    }

    /// Create the own entry and take the first snapshot. Returns the watch
    /// armed before the children were listed.
    pub(crate) async fn register(&self) -> Result<WatchHandle> {
        // Never hold two entries at once
        self.release().await?;

        self.session.ensure_path(self.path()).await?;

        let prefix = Node::registration_prefix(self.path(), &self.shared.member_data);
        let full_path = self
            .session
            .create_ephemeral_sequential(&prefix, self.shared.member_data.as_bytes())
            .await
            .map_err(|e| Error::Registration {
                path: prefix.clone(),
                reason: e.to_string(),
            })?;
        let node = Node::parse(&full_path)?;
        tracing::info!("Registered {} under {}", node.name, self.path());
        self.shared.set_own(node).await;

        let watch = self.session.watch_children(self.path()).await?;
        let children = self.session.get_children(self.path()).await?;
        self.shared.apply(&children).await;

        Ok(watch)
    }

    /// Delete the own entry if there is one. An entry that is already gone
    /// counts as released.
    pub(crate) async fn release(&self) -> Result<()> {
        let Some(node) = self.shared.take_own().await else {
            return Ok(());
        };

        let path = format!("{}/{}", self.path(), node.name);
        match self.session.delete(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted {}", path);
                Ok(())
            }
            Err(Error::NoNode(_)) | Err(Error::SessionExpired) => {
                tracing::debug!("{} already gone", path);
                Ok(())
            }
            Err(e) => Err(Error::Deletion {
                path,
                reason: e.to_string(),
            }),
        }
    }

    /// Re-arm if needed, then list and apply children
    async fn refresh(&self, watch: &mut Option<ArmedWatch>) -> Refresh {
        if watch.is_none() {
            match self.session.watch_children(self.path()).await {
                Ok(handle) => *watch = Some(Box::pin(handle.fired())),
                Err(e) => return self.failed("arm watch", e).await,
            }
        }

        match self.session.get_children(self.path()).await {
            Ok(children) => {
                self.shared.apply(&children).await;
                self.shared.mark_active().await;
                Refresh::Fresh
            }
            Err(e) => self.failed("list children", e).await,
        }
    }

    async fn failed(&self, what: &str, e: Error) -> Refresh {
        if e.is_session_expired() {
            return Refresh::Expired;
        }
        tracing::warn!("Failed to {} for {}: {}", what, self.path(), e);
        self.shared.mark_reconnecting().await;
        Refresh::Retry
    }

    /// Reconnect and re-register after expiry, until it works or `cancel` fires
    async fn recover(&self, backoff: &mut Backoff, cancel: &CancellationToken) -> Option<WatchHandle> {
        tracing::warn!("Session expired; re-registering under {}", self.path());
        self.shared.expire_own().await;

        loop {
            let attempt = async {
                self.session.connect_within(self.connect_timeout).await?;
                self.register().await
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = attempt => result,
            };

            match result {
                Ok(watch) => {
                    self.shared.mark_active().await;
                    tracing::info!(
                        "Re-registered as {} under {}",
                        self.shared.id().await,
                        self.path()
                    );
                    return Some(watch);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!("Re-registration under {} failed: {}; retrying in {:?}", self.path(), e, delay);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Watch loop; runs until `cancel` fires
    pub(crate) async fn run(
        self,
        watch: WatchHandle,
        mut events: broadcast::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) {
        let mut watch: Option<ArmedWatch> = Some(Box::pin(watch.fired()));
        let mut backoff = Backoff::from_config(&self.retry);
        let mut retry_at: Option<Instant> = None;

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => Step::Session(event),
                fired = wait_fired(&mut watch) => Step::Fired(fired),
                _ = wait_until(retry_at) => Step::Retry,
            };

            let outcome = match step {
                Step::Fired(event) => {
                    tracing::debug!("Watch on {} fired: {:?}", self.path(), event);
                    watch = None;
                    self.refresh(&mut watch).await
                }
                Step::Retry => self.refresh(&mut watch).await,
                Step::Session(Ok(event)) => {
                    self.session.observe(event);
                    match event {
                        SessionEvent::Disconnected => {
                            self.shared.mark_reconnecting().await;
                            continue;
                        }
                        SessionEvent::Connected => {
                            if self.shared.lifecycle().await != Lifecycle::Reconnecting {
                                continue;
                            }
                            self.refresh(&mut watch).await
                        }
                        // Refresh first: an expiry notice can trail a recovery
                        // that already happened
                        SessionEvent::Expired => self.refresh(&mut watch).await,
                    }
                }
                Step::Session(Err(RecvError::Lagged(missed))) => {
                    tracing::warn!("Missed {} session events; refreshing {}", missed, self.path());
                    self.refresh(&mut watch).await
                }
                Step::Session(Err(RecvError::Closed)) => {
                    tracing::warn!("Session event stream closed; resubscribing");
                    events = self.session.events();
                    self.refresh(&mut watch).await
                }
            };

            match outcome {
                Refresh::Fresh => {
                    backoff.reset();
                    retry_at = None;
                }
                Refresh::Retry => {
                    retry_at = Some(Instant::now() + backoff.next_delay());
                }
                Refresh::Expired => {
                    watch = None;
                    retry_at = None;
                    match self.recover(&mut backoff, &cancel).await {
                        Some(handle) => {
                            watch = Some(Box::pin(handle.fired()));
                            backoff.reset();
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::debug!("Watch loop for {} exiting", self.path());
    }
}

async fn wait_fired(watch: &mut Option<ArmedWatch>) -> WatchEvent {
    match watch {
        Some(fired) => fired.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
