//! Subscription Hub
//!
//! Observer registry for membership updates. Every subscriber gets its own
//! forwarding task and a bounded backlog, so a subscriber that never reads
//! cannot hold up the watch loop or anybody else. When a backlog is full the
//! oldest pending update is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::membership::Update;

/// Opaque handle for a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Pending deliveries for one subscriber
struct SlotState {
    queue: VecDeque<Update>,
    active: bool,
    dropped: u64,
}

/// Per-subscriber delivery state shared with its forwarding task
struct Slot {
    state: Mutex<SlotState>,
    notify: Notify,
    cancel: CancellationToken,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                queue: VecDeque::new(),
                active: true,
                dropped: 0,
            }),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Queue an update; returns false if the slot is no longer active
    async fn push(&self, update: Update, backlog: usize) -> bool {
        let mut state = self.state.lock().await;
        if !state.active {
            return false;
        }

        if state.queue.len() >= backlog {
            state.queue.pop_front();
            state.dropped += 1;
            tracing::warn!(
                "Subscriber backlog full ({} pending), dropped oldest update ({} dropped so far)",
                backlog,
                state.dropped
            );
        }
        state.queue.push_back(update);
        drop(state);

        self.notify.notify_one();
        true
    }

    /// Stop all further deliveries. Holding the state lock here orders this
    /// against the forwarder's check-and-send.
    async fn deactivate(&self) {
        let mut state = self.state.lock().await;
        state.active = false;
        state.queue.clear();
        self.cancel.cancel();
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Update>,
    slot: Arc<Slot>,
    task: JoinHandle<()>,
}

/// Fan-out of updates to subscriber channels
pub struct SubscriptionHub {
    subscribers: RwLock<Vec<Subscriber>>,
    backlog: usize,
    next_id: AtomicU64,
}

impl SubscriptionHub {
    /// Create an empty hub with the given per-subscriber backlog
    pub fn new(backlog: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            backlog: backlog.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber channel. Registering the same channel twice
    /// returns the existing handle.
    pub async fn add(&self, sender: mpsc::Sender<Update>) -> SubscriberId {
        let mut subscribers = self.subscribers.write().await;

        if let Some(existing) = subscribers.iter().find(|s| s.sender.same_channel(&sender)) {
            return existing.id;
        }

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot::new());
        let task = tokio::spawn(forward(Arc::clone(&slot), sender.clone()));

        subscribers.push(Subscriber { id, sender, slot, task });
        tracing::debug!("Added subscriber {:?} ({} total)", id, subscribers.len());
        id
    }

    /// Remove a subscriber channel. Once this returns nothing more is sent to
    /// it. Unknown channels are ignored.
    pub async fn remove(&self, sender: &mpsc::Sender<Update>) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.write().await;
            subscribers
                .iter()
                .position(|s| s.sender.same_channel(sender))
                .map(|idx| subscribers.remove(idx))
        };

        match removed {
            Some(subscriber) => {
                Self::retire(subscriber).await;
                true
            }
            None => false,
        }
    }

    /// Remove a subscriber by handle
    pub async fn remove_id(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.write().await;
            subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|idx| subscribers.remove(idx))
        };

        match removed {
            Some(subscriber) => {
                Self::retire(subscriber).await;
                true
            }
            None => false,
        }
    }

    async fn retire(subscriber: Subscriber) {
        subscriber.slot.deactivate().await;
        // The forwarder exits on cancellation; nothing left to wait for
        subscriber.task.abort();
        tracing::debug!("Removed subscriber {:?}", subscriber.id);
    }

    /// Queue `update` for every current subscriber. Returns how many
    /// subscribers it was queued for. Subscribers whose receiver is gone are pruned.
    pub async fn broadcast(&self, update: &Update) -> usize {
        let mut queued = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for subscriber in subscribers.iter() {
                if subscriber.sender.is_closed() {
                    closed.push(subscriber.id);
                    continue;
                }
                if subscriber.slot.push(update.clone(), self.backlog).await {
                    queued += 1;
                }
            }
        }

        for id in closed {
            tracing::debug!("Pruning subscriber {:?} with closed receiver", id);
            self.remove_id(id).await;
        }

        queued
    }

    /// Drop every queued update that has not reached its channel yet.
    /// Subscribers stay registered. Returns how many updates were dropped.
    pub async fn discard_pending(&self) -> usize {
        let subscribers = self.subscribers.read().await;
        let mut discarded = 0;
        for subscriber in subscribers.iter() {
            // Under the slot lock, so a forwarder holding a permit finds nothing to send
            let mut state = subscriber.slot.state.lock().await;
            discarded += state.queue.len();
            state.queue.clear();
        }
        discarded
    }

    /// Number of registered subscribers
    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Whether no subscribers are registered
    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }
}

impl Drop for SubscriptionHub {
    fn drop(&mut self) {
        for subscriber in self.subscribers.get_mut().drain(..) {
            subscriber.slot.cancel.cancel();
            subscriber.task.abort();
        }
    }
}

/// Forwarding loop for one subscriber: waits for backlog, reserves channel
/// capacity, then sends under the slot lock only if still active.
async fn forward(slot: Arc<Slot>, sender: mpsc::Sender<Update>) {
    loop {
        loop {
            let notified = slot.notify.notified();
            if !slot.state.lock().await.queue.is_empty() {
                break;
            }
            tokio::select! {
                _ = notified => {}
                _ = slot.cancel.cancelled() => return,
            }
        }

        let permit = tokio::select! {
            permit = sender.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    // Receiver dropped; broadcast prunes the entry
                    slot.cancel.cancel();
                    return;
                }
            },
            _ = slot.cancel.cancelled() => return,
        };

        let mut state = slot.state.lock().await;
        if !state.active {
            return;
        }
        if let Some(update) = state.queue.pop_front() {
            permit.send(update);
        }
    }
}
