//! Membership tests for join and leave ordering.

mod common;

use std::time::Duration;

use common::{eventually, start_coordinator, test_config, TestCluster, PROPAGATION_WINDOW, TEST_TIMEOUT};
use tokio::sync::mpsc;
use tokio::time::timeout;
use zkcluster::error::Error;
use zkcluster::session::{CoordinationClient, MemoryEnsemble};

/// Test 1: Every started member sees each new member as it joins
#[tokio::test]
async fn test_join_ordering() {
    let mut cluster = TestCluster::new(0, "/membership/join").await;

    for i in 0..4 {
        let (tx, mut rx) = mpsc::channel(8);
        cluster.spawn_member_with(vec![tx]).await;

        // The joining member is ready once its first snapshot arrives
        let ready = timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("joining member should report ready")
            .expect("channel should stay open");
        assert_eq!(ready.members.len(), i + 1);

        assert!(
            cluster.wait_for_size(i + 1, PROPAGATION_WINDOW).await,
            "members should see {} entries right after join {}",
            i + 1,
            i
        );
    }

    // Join order is sequence order
    let members = cluster.members[3].members().await.unwrap();
    for (idx, member) in cluster.members.iter().enumerate() {
        assert_eq!(members[idx].name, member.id().await);
    }

    cluster.shutdown().await;
}

/// Test 2: Members stopped in reverse order drop out of everyone's view
#[tokio::test]
async fn test_leave_ordering() {
    let mut cluster = TestCluster::new(4, "/membership/leave").await;
    assert!(cluster.wait_for_size(4, TEST_TIMEOUT).await);

    for remaining in (0..4).rev() {
        let stopped = cluster.remove_member(remaining).await;
        assert!(stopped.members().await.unwrap().is_empty());
        assert!(
            cluster.wait_for_size(remaining, TEST_TIMEOUT).await,
            "members should see {} entries",
            remaining
        );
    }

    assert!(cluster.ensemble.children("/membership/leave").await.is_empty());
}

/// Test 3: Member data is advertised in the entry name
#[tokio::test]
async fn test_member_data_is_advertised() {
    let ensemble = MemoryEnsemble::new();
    let a = start_coordinator(ensemble.client(), test_config("/membership/data", "10.0.0.1:7000"), vec![]).await;
    let b = start_coordinator(ensemble.client(), test_config("/membership/data", "10.0.0.2:7000"), vec![]).await;

    assert!(
        eventually(TEST_TIMEOUT, || async {
            a.members().await.map(|m| m.len() == 2).unwrap_or(false)
        })
        .await
    );

    let data: Vec<String> = a.members().await.unwrap().into_iter().map(|n| n.data).collect();
    assert_eq!(data, vec!["10.0.0.1:7000", "10.0.0.2:7000"]);
    assert_eq!(b.leader().await.unwrap().data, "10.0.0.1:7000");

    // The payload is stored on the entry as well
    let entry = format!("/membership/data/{}", b.id().await);
    assert_eq!(ensemble.data(&entry).await, Some(b"10.0.0.2:7000".to_vec()));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

/// Test 4: Foreign entries under the election path are ignored
#[tokio::test]
async fn test_foreign_entries_are_ignored() {
    let ensemble = MemoryEnsemble::new();
    let intruder = ensemble.client();
    intruder
        .connect(&["127.0.0.1:2181".to_string()], Duration::from_secs(1))
        .await
        .unwrap();
    intruder.ensure_path("/membership/foreign/lock").await.unwrap();

    let member = start_coordinator(ensemble.client(), test_config("/membership/foreign", "m"), vec![]).await;
    let members = member.members().await.unwrap();
    assert_eq!(members.len(), 1);
    assert!(member.is_leader().await);

    member.stop().await.unwrap();
    intruder.close().await.unwrap();
}

/// Test 5: Querying before the first start is an error
#[tokio::test]
async fn test_members_before_start() {
    let ensemble = MemoryEnsemble::new();
    let coordinator = zkcluster::Coordinator::new(ensemble.client(), test_config("/membership/early", "m"), vec![])
        .await
        .unwrap();

    assert!(matches!(coordinator.members().await, Err(Error::NeverConnected)));
    assert!(coordinator.leader().await.is_none());
}
