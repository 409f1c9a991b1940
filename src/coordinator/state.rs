//! Coordinator State
//!
//! Cached election view shared between the public API and the watch task.
//! One lock guards all of it; readers get copies.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::lifecycle::Lifecycle;
use crate::membership::{MembershipTracker, Mode, Node};
use crate::subscription::SubscriptionHub;

/// Point-in-time copy of a coordinator's view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Lifecycle status
    pub lifecycle: Lifecycle,
    /// Own entry name, empty when not registered
    pub id: String,
    /// Own mode
    pub mode: Mode,
    /// Current leader
    pub leader: Option<Node>,
    /// Members ordered by sequence key
    pub members: Vec<Node>,
    /// True while the view may be out of date (disconnected or re-registering)
    pub stale: bool,
}

pub(crate) struct State {
    lifecycle: Lifecycle,
    own: Option<Node>,
    tracker: MembershipTracker,
    mode: Mode,
    ever_observed: bool,
    stale: bool,
}

/// State plus subscribers, shared with the watch task
pub(crate) struct Shared {
    pub(crate) election_path: String,
    pub(crate) member_data: String,
    state: RwLock<State>,
    pub(crate) hub: SubscriptionHub,
}

impl Shared {
    pub(crate) fn new(election_path: String, member_data: String, hub: SubscriptionHub) -> Self {
        Self {
            election_path,
            member_data,
            state: RwLock::new(State {
                lifecycle: Lifecycle::Created,
                own: None,
                tracker: MembershipTracker::new(),
                mode: Mode::Follower,
                ever_observed: false,
                stale: false,
            }),
            hub,
        }
    }

    /// Move to `next` if the transition is legal
    pub(crate) async fn transition(&self, next: Lifecycle) -> bool {
        let mut state = self.state.write().await;
        Self::transition_locked(&mut state, next)
    }

    fn transition_locked(state: &mut State, next: Lifecycle) -> bool {
        if state.lifecycle == next {
            return true;
        }
        if !state.lifecycle.can_transition_to(next) {
            tracing::warn!("Ignoring lifecycle transition {} -> {}", state.lifecycle, next);
            return false;
        }
        tracing::debug!("Lifecycle {} -> {}", state.lifecycle, next);
        state.lifecycle = next;
        true
    }

    pub(crate) async fn lifecycle(&self) -> Lifecycle {
        self.state.read().await.lifecycle
    }

    /// Enter Starting with a clean view so the first snapshot is broadcast
    pub(crate) async fn begin_start(&self) -> bool {
        let mut state = self.state.write().await;
        if !Self::transition_locked(&mut state, Lifecycle::Starting) {
            return false;
        }
        state.tracker.reset();
        state.mode = Mode::Follower;
        state.stale = false;
        true
    }

    /// Return to the resting state `previous` after a failed start
    pub(crate) async fn abort_start(&self, previous: Lifecycle) {
        let mut state = self.state.write().await;
        let resting = match previous {
            Lifecycle::Created => Lifecycle::Created,
            _ => Lifecycle::Stopped,
        };
        Self::transition_locked(&mut state, resting);
        state.own = None;
        state.tracker.reset();
        state.mode = Mode::Follower;
    }

    /// Clear the view after a stop
    pub(crate) async fn finish_stop(&self) {
        let mut state = self.state.write().await;
        Self::transition_locked(&mut state, Lifecycle::Stopped);
        state.own = None;
        state.tracker.reset();
        state.mode = Mode::Follower;
        state.stale = false;
    }

    pub(crate) async fn set_own(&self, node: Node) {
        self.state.write().await.own = Some(node);
    }

    pub(crate) async fn take_own(&self) -> Option<Node> {
        self.state.write().await.own.take()
    }

    /// Session expired: the own entry is gone. Leader and members are kept
    /// but flagged stale; mode drops to Follower.
    pub(crate) async fn expire_own(&self) {
        let mut state = self.state.write().await;
        state.own = None;
        state.mode = Mode::Follower;
        state.stale = true;
        if state.lifecycle == Lifecycle::Active {
            Self::transition_locked(&mut state, Lifecycle::Reconnecting);
        }
    }

    pub(crate) async fn mark_reconnecting(&self) {
        let mut state = self.state.write().await;
        if state.lifecycle == Lifecycle::Active {
            Self::transition_locked(&mut state, Lifecycle::Reconnecting);
        }
        if state.lifecycle.is_running() {
            state.stale = true;
        }
    }

    pub(crate) async fn mark_active(&self) {
        let mut state = self.state.write().await;
        if state.lifecycle == Lifecycle::Reconnecting {
            Self::transition_locked(&mut state, Lifecycle::Active);
        }
    }

    /// Feed freshly listed children. Broadcasts and returns true if the
    /// membership changed.
    pub(crate) async fn apply<S: AsRef<str>>(&self, children: &[S]) -> bool {
        let update = {
            let mut state = self.state.write().await;
            state.stale = false;
            state.ever_observed = true;

            let Some(update) = state.tracker.observe(children) else {
                tracing::debug!("Membership of {} unchanged", self.election_path);
                return false;
            };

            let mode = state.tracker.mode_of(state.own.as_ref());
            if mode != state.mode {
                tracing::info!(
                    "{} is now {} under {}",
                    state.own.as_ref().map(|n| n.name.as_str()).unwrap_or("<unregistered>"),
                    mode,
                    self.election_path
                );
            }
            state.mode = mode;

            tracing::debug!(
                "Membership of {} changed: {} members, leader {}",
                self.election_path,
                update.members.len(),
                update
                    .leader
                    .as_ref()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "<none>".to_string())
            );
            update
        };

        self.hub.broadcast(&update).await;
        true
    }

    pub(crate) async fn id(&self) -> String {
        self.state
            .read()
            .await
            .own
            .as_ref()
            .map(|n| n.name.clone())
            .unwrap_or_default()
    }

    pub(crate) async fn leader(&self) -> Option<Node> {
        self.state.read().await.tracker.leader()
    }

    pub(crate) async fn mode(&self) -> Mode {
        self.state.read().await.mode
    }

    pub(crate) async fn members(&self) -> Option<Vec<Node>> {
        let state = self.state.read().await;
        if state.ever_observed {
            Some(state.tracker.members().to_vec())
        } else {
            None
        }
    }

    pub(crate) async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }

    pub(crate) async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            lifecycle: state.lifecycle,
            id: state.own.as_ref().map(|n| n.name.clone()).unwrap_or_default(),
            mode: state.mode,
            leader: state.tracker.leader(),
            members: state.tracker.members().to_vec(),
            stale: state.stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn shared() -> Shared {
        Shared::new("/e".into(), "me".into(), SubscriptionHub::new(8))
    }

    #[tokio::test]
    async fn test_apply_sets_mode_and_broadcasts_on_change_only() {
        let shared = shared();
        let (tx, mut rx) = mpsc::channel(8);
        shared.hub.add(tx).await;

        assert!(shared.members().await.is_none());
        shared.set_own(Node::parse("me_0000000001").unwrap()).await;

        assert!(shared.apply(&["me_0000000001", "other_0000000002"]).await);
        assert_eq!(shared.mode().await, Mode::Leader);
        assert_eq!(shared.members().await.unwrap().len(), 2);
        assert!(rx.recv().await.is_some());

        assert!(!shared.apply(&["other_0000000002", "me_0000000001"]).await);

        assert!(shared.apply(&["zero_0000000000", "me_0000000001"]).await);
        assert_eq!(shared.mode().await, Mode::Follower);
        assert_eq!(shared.leader().await.unwrap().data, "zero");
    }

    #[tokio::test]
    async fn test_expire_own_keeps_view_but_marks_stale() {
        let shared = shared();
        assert!(shared.begin_start().await);
        assert!(shared.transition(Lifecycle::Active).await);
        shared.set_own(Node::parse("me_0000000001").unwrap()).await;
        shared.apply(&["me_0000000001"]).await;

        shared.expire_own().await;
        let snapshot = shared.snapshot().await;
        assert_eq!(snapshot.lifecycle, Lifecycle::Reconnecting);
        assert!(snapshot.stale);
        assert_eq!(snapshot.mode, Mode::Follower);
        assert_eq!(snapshot.id, "");
        assert_eq!(snapshot.members.len(), 1);
        assert!(snapshot.leader.is_some());

        shared.apply(&["me_0000000005"]).await;
        shared.mark_active().await;
        assert!(!shared.is_stale().await);
        assert_eq!(shared.lifecycle().await, Lifecycle::Active);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_ignored() {
        let shared = shared();
        assert!(!shared.transition(Lifecycle::Active).await);
        assert_eq!(shared.lifecycle().await, Lifecycle::Created);
    }
}
