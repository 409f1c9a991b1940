//! In-Memory Ensemble
//!
//! A single-process stand-in for a ZooKeeper-style service: persistent and
//! ephemeral sequential entries, sessions, one-shot child watches, plus
//! fault injection (unavailability and session expiry). Every
//! [`MemoryClient`] created from the same ensemble sees the same tree.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Mutex};
use uuid::Uuid;

use super::client::{CoordinationClient, SessionEvent, WatchEvent, WatchHandle};
use crate::error::{Error, Result};

const EVENT_BUFFER: usize = 64;

type SessionId = Uuid;

/// One entry in the tree
#[derive(Debug)]
struct Entry {
    data: Vec<u8>,
    /// Owning session for ephemeral entries
    owner: Option<SessionId>,
    /// Next sequence number handed to a sequential child
    next_sequence: u64,
}

impl Entry {
    fn persistent() -> Self {
        Self {
            data: Vec::new(),
            owner: None,
            next_sequence: 0,
        }
    }
}

struct ChildWatch {
    session: SessionId,
    tx: oneshot::Sender<WatchEvent>,
}

struct EnsembleState {
    entries: BTreeMap<String, Entry>,
    sessions: HashMap<SessionId, broadcast::Sender<SessionEvent>>,
    watches: HashMap<String, Vec<ChildWatch>>,
    available: bool,
}

impl EnsembleState {
    fn fire_children_changed(&mut self, path: &str) {
        if let Some(watches) = self.watches.remove(path) {
            for watch in watches {
                let _ = watch.tx.send(WatchEvent::ChildrenChanged(path.to_string()));
            }
        }
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.entries
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter(|(p, _)| p.len() > prefix.len() && !p[prefix.len()..].contains('/'))
            .map(|(p, _)| p[prefix.len()..].to_string())
            .collect()
    }

    fn remove_entry(&mut self, path: &str) {
        if self.entries.remove(path).is_some() {
            if let Some(watches) = self.watches.remove(path) {
                for watch in watches {
                    let _ = watch.tx.send(WatchEvent::Deleted(path.to_string()));
                }
            }
            self.fire_children_changed(parent_of(path));
        }
    }

    /// Drop a session: its ephemerals go away and its watches are discarded
    fn end_session(&mut self, session: SessionId) -> Option<broadcast::Sender<SessionEvent>> {
        let events = self.sessions.remove(&session)?;

        let owned: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owner == Some(session))
            .map(|(p, _)| p.clone())
            .collect();
        for path in owned {
            self.remove_entry(&path);
        }

        // Dropping the senders resolves the handles as discarded
        for watches in self.watches.values_mut() {
            watches.retain(|w| w.session != session);
        }

        Some(events)
    }

    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(Error::ConnectionFailed {
                address: "memory".into(),
                reason: "ensemble unavailable".into(),
            })
        }
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Shared in-memory coordination service
#[derive(Clone)]
pub struct MemoryEnsemble {
    state: Arc<Mutex<EnsembleState>>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    /// Create an empty ensemble containing only the root
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), Entry::persistent());

        Self {
            state: Arc::new(Mutex::new(EnsembleState {
                entries,
                sessions: HashMap::new(),
                watches: HashMap::new(),
                available: true,
            })),
        }
    }

    /// Create a client bound to this ensemble
    pub fn client(&self) -> Arc<MemoryClient> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(MemoryClient {
            ensemble: self.clone(),
            session: Mutex::new(None),
            events,
        })
    }

    /// Make the ensemble reachable or unreachable. Live sessions see
    /// Disconnected / Connected but are not expired.
    pub async fn set_available(&self, available: bool) {
        let mut state = self.state.lock().await;
        if state.available == available {
            return;
        }
        state.available = available;

        let event = if available {
            SessionEvent::Connected
        } else {
            SessionEvent::Disconnected
        };
        tracing::debug!("Memory ensemble availability -> {} ({})", available, event);
        for events in state.sessions.values() {
            let _ = events.send(event);
        }
    }

    /// Expire one session
    pub async fn expire_session(&self, session: &str) -> bool {
        let Ok(id) = Uuid::parse_str(session) else {
            return false;
        };

        let mut state = self.state.lock().await;
        match state.end_session(id) {
            Some(events) => {
                tracing::debug!("Memory ensemble expired session {}", id);
                let _ = events.send(SessionEvent::Expired);
                true
            }
            None => false,
        }
    }

    /// Expire every live session
    pub async fn expire_all_sessions(&self) -> usize {
        let mut state = self.state.lock().await;
        let ids: Vec<SessionId> = state.sessions.keys().copied().collect();
        for id in &ids {
            if let Some(events) = state.end_session(*id) {
                let _ = events.send(SessionEvent::Expired);
            }
        }
        ids.len()
    }

    /// Children of `path`, sorted by name; empty if the path does not exist
    pub async fn children(&self, path: &str) -> Vec<String> {
        let state = self.state.lock().await;
        if !state.entries.contains_key(path) {
            return Vec::new();
        }
        state.children_of(path)
    }

    /// Payload stored at `path`, if the entry exists
    pub async fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().await.entries.get(path).map(|e| e.data.clone())
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }
}

/// Client for a [`MemoryEnsemble`]
pub struct MemoryClient {
    ensemble: MemoryEnsemble,
    session: Mutex<Option<SessionId>>,
    events: broadcast::Sender<SessionEvent>,
}

impl MemoryClient {
    /// Current session id, if connected
    pub async fn session_id(&self) -> Option<String> {
        self.session.lock().await.map(|id| id.to_string())
    }

    /// Expire this client's session on the ensemble
    pub async fn expire(&self) -> bool {
        match self.session_id().await {
            Some(id) => self.ensemble.expire_session(&id).await,
            None => false,
        }
    }

    /// Resolve the session for an operation, checking reachability and expiry
    async fn live_session(&self, state: &EnsembleState) -> Result<SessionId> {
        state.check_available()?;
        let session = (*self.session.lock().await).ok_or_else(|| Error::ConnectionFailed {
            address: "memory".into(),
            reason: "not connected".into(),
        })?;
        if !state.sessions.contains_key(&session) {
            return Err(Error::SessionExpired);
        }
        Ok(session)
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    async fn connect(&self, servers: &[String], _timeout: Duration) -> Result<()> {
        let mut state = self.ensemble.state.lock().await;
        if !state.available {
            return Err(Error::ConnectionFailed {
                address: servers.join(","),
                reason: "ensemble unavailable".into(),
            });
        }

        let mut session = self.session.lock().await;
        if let Some(id) = *session {
            if state.sessions.contains_key(&id) {
                return Ok(());
            }
        }

        let id = Uuid::new_v4();
        state.sessions.insert(id, self.events.clone());
        *session = Some(id);
        let _ = self.events.send(SessionEvent::Connected);
        tracing::trace!("Memory client opened session {}", id);
        Ok(())
    }

    async fn create_ephemeral_sequential(&self, prefix: &str, data: &[u8]) -> Result<String> {
        let mut state = self.ensemble.state.lock().await;
        let session = self.live_session(&state).await?;

        let parent = parent_of(prefix).to_string();
        let sequence = match state.entries.get_mut(&parent) {
            Some(entry) => {
                let sequence = entry.next_sequence;
                entry.next_sequence += 1;
                sequence
            }
            None => return Err(Error::NoNode(parent)),
        };

        let path = format!("{}{:010}", prefix, sequence);
        state.entries.insert(
            path.clone(),
            Entry {
                data: data.to_vec(),
                owner: Some(session),
                next_sequence: 0,
            },
        );
        state.fire_children_changed(&parent);
        Ok(path)
    }

    async fn ensure_path(&self, path: &str) -> Result<()> {
        let mut state = self.ensemble.state.lock().await;
        self.live_session(&state).await?;

        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let parent = if current.is_empty() { "/".to_string() } else { current.clone() };
            current.push('/');
            current.push_str(segment);
            if !state.entries.contains_key(&current) {
                state.entries.insert(current.clone(), Entry::persistent());
                state.fire_children_changed(&parent);
            }
        }
        Ok(())
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.ensemble.state.lock().await;
        self.live_session(&state).await?;

        if !state.entries.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(state.children_of(path))
    }

    async fn watch_children(&self, path: &str) -> Result<WatchHandle> {
        let mut state = self.ensemble.state.lock().await;
        let session = self.live_session(&state).await?;

        if !state.entries.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        state
            .watches
            .entry(path.to_string())
            .or_default()
            .push(ChildWatch { session, tx });
        Ok(WatchHandle::new(path, rx))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.ensemble.state.lock().await;
        self.live_session(&state).await?;

        if !state.entries.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        if !state.children_of(path).is_empty() {
            return Err(Error::Internal(format!("entry {} has children", path)));
        }
        state.remove_entry(path);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.ensemble.state.lock().await;
        if let Some(id) = self.session.lock().await.take() {
            state.end_session(id);
            tracing::trace!("Memory client closed session {}", id);
        }
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> Vec<String> {
        vec!["127.0.0.1:2181".to_string()]
    }

    async fn connected(ensemble: &MemoryEnsemble) -> Arc<MemoryClient> {
        let client = ensemble.client();
        client.connect(&servers(), Duration::from_secs(1)).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_sequential_names_increase() {
        let ensemble = MemoryEnsemble::new();
        let client = connected(&ensemble).await;
        client.ensure_path("/election/app").await.unwrap();

        let first = client.create_ephemeral_sequential("/election/app/a_", b"").await.unwrap();
        let second = client.create_ephemeral_sequential("/election/app/b_", b"").await.unwrap();
        assert_eq!(first, "/election/app/a_0000000000");
        assert_eq!(second, "/election/app/b_0000000001");

        let children = client.get_children("/election/app").await.unwrap();
        assert_eq!(children, vec!["a_0000000000", "b_0000000001"]);
        assert_eq!(ensemble.data(&second).await, Some(Vec::new()));
        assert_eq!(client.get_children("/election").await.unwrap(), vec!["app"]);
    }

    #[tokio::test]
    async fn test_watch_fires_once_on_child_change() {
        let ensemble = MemoryEnsemble::new();
        let client = connected(&ensemble).await;
        client.ensure_path("/e").await.unwrap();

        let watch = client.watch_children("/e").await.unwrap();
        let x = client.create_ephemeral_sequential("/e/x_", b"payload").await.unwrap();
        assert_eq!(ensemble.data(&x).await.as_deref(), Some(&b"payload"[..]));
        assert_eq!(watch.fired().await, WatchEvent::ChildrenChanged("/e".into()));

        // A second change without re-arming reaches nobody
        client.create_ephemeral_sequential("/e/y_", b"").await.unwrap();
        let rearmed = client.watch_children("/e").await.unwrap();
        client.create_ephemeral_sequential("/e/z_", b"").await.unwrap();
        assert_eq!(rearmed.fired().await, WatchEvent::ChildrenChanged("/e".into()));
    }

    #[tokio::test]
    async fn test_expiry_removes_ephemerals_and_notifies() {
        let ensemble = MemoryEnsemble::new();
        let owner = connected(&ensemble).await;
        let observer = connected(&ensemble).await;
        owner.ensure_path("/e").await.unwrap();
        owner.create_ephemeral_sequential("/e/m_", b"").await.unwrap();

        let mut events = owner.subscribe_events();
        let watch = observer.watch_children("/e").await.unwrap();

        assert!(owner.expire().await);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
        assert!(matches!(watch.fired().await, WatchEvent::ChildrenChanged(_)));
        assert!(ensemble.children("/e").await.is_empty());

        let err = owner.get_children("/e").await.unwrap_err();
        assert!(err.is_session_expired());

        // Reconnecting opens a fresh session
        owner.connect(&servers(), Duration::from_secs(1)).await.unwrap();
        assert!(owner.get_children("/e").await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_ensemble_rejects_calls() {
        let ensemble = MemoryEnsemble::new();
        let client = connected(&ensemble).await;
        let mut events = client.subscribe_events();

        ensemble.set_available(false).await;
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);
        assert!(client.get_children("/").await.unwrap_err().is_retryable());

        let fresh = ensemble.client();
        assert!(fresh.connect(&servers(), Duration::from_millis(10)).await.is_err());

        ensemble.set_available(true).await;
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Connected);
        assert!(client.get_children("/").await.is_ok());
    }

    #[tokio::test]
    async fn test_close_discards_watches_and_ephemerals() {
        let ensemble = MemoryEnsemble::new();
        let client = connected(&ensemble).await;
        client.ensure_path("/e").await.unwrap();
        let watch = client.watch_children("/").await.unwrap();
        client.create_ephemeral_sequential("/e/m_", b"").await.unwrap();

        client.close().await.unwrap();
        assert_eq!(watch.fired().await, WatchEvent::Discarded);
        assert!(ensemble.children("/e").await.is_empty());
        assert_eq!(ensemble.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_no_node() {
        let ensemble = MemoryEnsemble::new();
        let client = connected(&ensemble).await;
        let err = client.delete("/nope").await.unwrap_err();
        assert!(matches!(err, Error::NoNode(_)));
    }
}
