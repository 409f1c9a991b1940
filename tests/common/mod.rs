//! Test harness for multi-member election tests.
//!
//! Spawns coordinators against a shared in-memory ensemble and provides
//! polling helpers for the eventually-consistent parts of the API.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use zkcluster::config::CoordinatorConfig;
use zkcluster::coordinator::Coordinator;
use zkcluster::membership::{Node, Update};
use zkcluster::session::{CoordinationClient, MemoryEnsemble};

/// Upper bound for anything the tests wait on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a change may take to reach members that are already running
pub const PROPAGATION_WINDOW: Duration = Duration::from_millis(100);

/// Coordinator configuration with short backoffs for faster tests
pub fn test_config(path: &str, data: &str) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::new(
        vec!["127.0.0.1:2181".to_string()],
        Duration::from_secs(1),
        path,
        data,
    );
    config.retry.initial_backoff_ms = 5;
    config.retry.max_backoff_ms = 100;
    config
}

/// Poll `condition` until it holds or `duration` elapses
pub async fn eventually<F, Fut>(duration: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Build and start a coordinator on `client`
pub async fn start_coordinator(
    client: Arc<dyn CoordinationClient>,
    config: CoordinatorConfig,
    subscribers: Vec<mpsc::Sender<Update>>,
) -> Arc<Coordinator> {
    let coordinator = Coordinator::new(client, config, subscribers)
        .await
        .expect("config should be valid");
    coordinator.start().await.expect("coordinator should start");
    Arc::new(coordinator)
}

/// A set of coordinators sharing one election path
pub struct TestCluster {
    pub ensemble: MemoryEnsemble,
    pub path: String,
    pub members: Vec<Arc<Coordinator>>,
    spawned: usize,
}

impl TestCluster {
    /// Start `size` members under `path`
    pub async fn new(size: usize, path: &str) -> Self {
        let mut cluster = Self {
            ensemble: MemoryEnsemble::new(),
            path: path.to_string(),
            members: Vec::with_capacity(size),
            spawned: 0,
        };
        for _ in 0..size {
            cluster.spawn_member().await;
        }
        cluster
    }

    /// Start one more member and return its index
    pub async fn spawn_member(&mut self) -> usize {
        self.spawn_member_with(vec![]).await
    }

    /// Start one more member with the given subscribers and return its index
    pub async fn spawn_member_with(&mut self, subscribers: Vec<mpsc::Sender<Update>>) -> usize {
        let data = format!("member-{}", self.spawned);
        self.spawned += 1;

        let coordinator = start_coordinator(
            self.ensemble.client(),
            test_config(&self.path, &data),
            subscribers,
        )
        .await;
        self.members.push(coordinator);
        self.members.len() - 1
    }

    /// Stop the member at `idx` and drop it from the cluster
    pub async fn remove_member(&mut self, idx: usize) -> Arc<Coordinator> {
        let member = self.members.remove(idx);
        member.stop().await.expect("stop should succeed");
        member
    }

    /// Number of members currently reporting Leader
    pub async fn count_leaders(&self) -> usize {
        let mut count = 0;
        for member in &self.members {
            if member.is_leader().await {
                count += 1;
            }
        }
        count
    }

    /// Index of the first member reporting Leader
    pub async fn leader_index(&self) -> Option<usize> {
        for (idx, member) in self.members.iter().enumerate() {
            if member.is_leader().await {
                return Some(idx);
            }
        }
        None
    }

    /// Whether exactly one member leads and every member names it
    pub async fn agreed_leader(&self) -> Option<Node> {
        if self.count_leaders().await != 1 {
            return None;
        }
        let idx = self.leader_index().await?;
        let leader_id = self.members[idx].id().await;

        for member in &self.members {
            match member.leader().await {
                Some(node) if node.name == leader_id => {}
                _ => return None,
            }
        }
        self.members[idx].leader().await
    }

    /// Wait until all members agree on a single leader
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<Node> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(leader) = self.agreed_leader().await {
                return Some(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until every member's view holds exactly `expected` entries
    pub async fn wait_for_size(&self, expected: usize, timeout: Duration) -> bool {
        eventually(timeout, || async {
            for member in &self.members {
                match member.members().await {
                    Ok(nodes) if nodes.len() == expected => {}
                    _ => return false,
                }
            }
            true
        })
        .await
    }

    /// Stop every member
    pub async fn shutdown(self) {
        for member in &self.members {
            let _ = member.stop().await;
        }
    }
}
