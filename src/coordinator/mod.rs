//! Coordinator
//!
//! The unit a consumer instantiates: registers this process under an election
//! path, keeps an ordered view of all registered members, derives leadership
//! from it, and notifies subscribers when the view changes.
//!
//! # Lifecycle
//!
//! A coordinator is constructed detached. [`Coordinator::start`] connects,
//! registers an ephemeral sequential entry, takes the first snapshot and
//! launches the watch task. [`Coordinator::stop`] cancels the task and
//! deletes the entry. A stopped coordinator can be started again and gets a
//! new identity.
//!
//! Calling `start` on a running coordinator is a no-op returning `Ok(())`;
//! calling `stop` on one that is not running is a no-op as well. `start` and
//! `stop` are serialised, so concurrent calls end in the state of whichever
//! ran last.
//!
//! # Staleness
//!
//! While disconnected or recovering from session expiry, [`leader`],
//! [`members`] and [`snapshot`] keep returning the last known view and
//! [`is_stale`] reports `true` until the next successful refresh. [`mode`]
//! drops to [`Mode::Follower`] as soon as expiry is seen, since the own entry
//! is gone at that point.
//!
//! [`leader`]: Coordinator::leader
//! [`members`]: Coordinator::members
//! [`snapshot`]: Coordinator::snapshot
//! [`is_stale`]: Coordinator::is_stale
//! [`mode`]: Coordinator::mode

mod lifecycle;
mod state;
mod watcher;

pub use lifecycle::Lifecycle;
pub use state::Snapshot;

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::membership::{Mode, Node, Update};
use crate::session::{CoordinationClient, SessionManager, SessionState};
use crate::subscription::{SubscriberId, SubscriptionHub};
use state::Shared;
use watcher::Election;

/// Running watch task
struct WatchTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Leader election and membership tracking for one process
pub struct Coordinator {
    config: CoordinatorConfig,
    session: Arc<SessionManager>,
    shared: Arc<Shared>,
    election: Election,
    /// Serialises start/stop and owns the watch task
    task: Mutex<Option<WatchTask>>,
}

impl Coordinator {
    /// Create a detached coordinator. `subscribers` receive every update
    /// from the first `start` on. Makes no network contact.
    pub async fn new(
        client: Arc<dyn CoordinationClient>,
        config: CoordinatorConfig,
        subscribers: Vec<mpsc::Sender<Update>>,
    ) -> Result<Self> {
        config.validate()?;

        let hub = SubscriptionHub::new(config.subscriber_backlog);
        for subscriber in subscribers {
            hub.add(subscriber).await;
        }

        let session = Arc::new(SessionManager::new(
            client,
            config.servers.clone(),
            config.retry.clone(),
        ));
        let shared = Arc::new(Shared::new(
            config.election_path.clone(),
            config.member_data.clone(),
            hub,
        ));
        let election = Election::new(
            Arc::clone(&shared),
            Arc::clone(&session),
            config.retry.clone(),
            config.connect_timeout(),
        );

        Ok(Self {
            config,
            session,
            shared,
            election,
            task: Mutex::new(None),
        })
    }

    /// Join the election. Blocks until the first membership snapshot is
    /// available or the configured timeout elapses.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        let previous = self.shared.lifecycle().await;
        if previous.is_running() {
            tracing::debug!("Coordinator for {} already started", self.config.election_path);
            return Ok(());
        }
        if !self.shared.begin_start().await {
            return Err(Error::Internal(format!("cannot start from {}", previous)));
        }

        let deadline = Instant::now() + self.config.connect_timeout();
        // Subscribe before connecting so no session event is missed
        let events = self.session.events();

        let result = async {
            self.session.connect(deadline).await?;
            match tokio::time::timeout_at(deadline, self.election.register()).await {
                Ok(result) => result,
                Err(_) => Err(Error::ElectionTimeout {
                    path: self.config.election_path.clone(),
                    timeout_ms: self.config.connect_timeout_ms,
                }),
            }
        }
        .await;

        match result {
            Ok(watch) => {
                self.shared.transition(Lifecycle::Active).await;

                let cancel = CancellationToken::new();
                let handle = tokio::spawn(self.election.clone().run(watch, events, cancel.clone()));
                *task = Some(WatchTask { cancel, handle });

                tracing::info!(
                    "Coordinator {} started under {} as {}",
                    self.shared.id().await,
                    self.config.election_path,
                    self.shared.mode().await
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to start coordinator under {}: {}", self.config.election_path, e);
                if let Err(release_err) = self.election.release().await {
                    tracing::debug!("Cleanup after failed start: {}", release_err);
                }
                if let Err(close_err) = self.session.close().await {
                    tracing::debug!("Closing session after failed start: {}", close_err);
                }
                self.shared.abort_start(previous).await;
                self.discard_pending().await;
                Err(e)
            }
        }
    }

    /// Leave the election: stop the watch task, drop updates still queued
    /// for subscribers, delete the own entry and close the session. No update
    /// from this run is in flight once this returns.
    pub async fn stop(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        if !self.shared.lifecycle().await.is_running() {
            return Ok(());
        }

        if let Some(WatchTask { cancel, handle }) = task.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!("Watch task for {} ended abnormally: {}", self.config.election_path, e);
            }
        }
        self.discard_pending().await;

        let id = self.shared.id().await;
        let result = self.election.release().await;
        if let Err(e) = self.session.close().await {
            tracing::warn!("Failed to close session: {}", e);
        }
        self.shared.finish_stop().await;

        match &result {
            Ok(()) => tracing::info!("Coordinator {} stopped", id),
            Err(e) => tracing::warn!("Coordinator {} stopped with error: {}", id, e),
        }
        result
    }

    /// Drop updates that no subscriber channel has taken yet
    async fn discard_pending(&self) {
        let discarded = self.shared.hub.discard_pending().await;
        if discarded > 0 {
            tracing::debug!(
                "Discarded {} undelivered updates for {}",
                discarded,
                self.config.election_path
            );
        }
    }

    /// Own entry name; empty when not registered
    pub async fn id(&self) -> String {
        self.shared.id().await
    }

    /// Cached leader
    pub async fn leader(&self) -> Option<Node> {
        self.shared.leader().await
    }

    /// Cached mode
    pub async fn mode(&self) -> Mode {
        self.shared.mode().await
    }

    /// Whether this coordinator currently leads
    pub async fn is_leader(&self) -> bool {
        self.mode().await == Mode::Leader
    }

    /// Cached members ordered by sequence key
    pub async fn members(&self) -> Result<Vec<Node>> {
        self.shared.members().await.ok_or(Error::NeverConnected)
    }

    /// Whether the cached view may be out of date
    pub async fn is_stale(&self) -> bool {
        self.shared.is_stale().await
    }

    /// Copy of the whole cached view
    pub async fn snapshot(&self) -> Snapshot {
        self.shared.snapshot().await
    }

    /// Lifecycle status
    pub async fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle().await
    }

    /// Session state as last observed
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Register another subscriber
    pub async fn subscribe(&self, sender: mpsc::Sender<Update>) -> SubscriberId {
        self.shared.hub.add(sender).await
    }

    /// Remove a subscriber. Nothing more is delivered to it once this
    /// returns; unknown channels are ignored.
    pub async fn unsubscribe(&self, sender: &mpsc::Sender<Update>) -> bool {
        self.shared.hub.remove(sender).await
    }

    /// Configuration this coordinator was built with
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // Dropped without stop: end the watch task; the entry goes with the session
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}
