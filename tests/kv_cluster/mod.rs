use cubes::partition_of;
use cubes::KeyWatcher;
use cubes::PartitionRange;
use cubes::PublishOptions;
use serde_json::json;

use crate::commons::next_matching;
use crate::commons::wait_until;
use crate::commons::Router;
use crate::commons::WAIT;
use crate::enable_logger;

/// Partition 4095: owned by the second of two nodes
const HIGH_KEY: &str = "\u{fff}";

async fn wait_for_parts(
    watcher: &KeyWatcher,
    parts: PartitionRange,
) {
    let watcher = watcher.clone();
    wait_until(WAIT, || {
        let watcher = watcher.clone();
        async move { watcher.local_parts() == Some(parts) }
    })
    .await;
}

#[tokio::test]
async fn test_partitions_split_when_a_node_joins() {
    enable_logger();
    let router = Router::new();

    let (n1, _rx1) = router.join("n1");
    wait_for_parts(&n1, PartitionRange::all()).await;

    let (n2, _rx2) = router.join("n2");
    wait_for_parts(&n1, PartitionRange::new(0, 2048)).await;
    wait_for_parts(&n2, PartitionRange::new(2048, 4096)).await;

    router.leave("n2");
    wait_for_parts(&n1, PartitionRange::all()).await;
}

#[tokio::test]
async fn test_remote_publish_reaches_remote_watcher() {
    enable_logger();
    assert_eq!(partition_of(HIGH_KEY), 4095);
    let router = Router::new();
    let (n1, mut rx1) = router.join("n1");
    let (n2, _rx2) = router.join("n2");
    wait_for_parts(&n2, PartitionRange::new(2048, 4096)).await;
    wait_for_parts(&n1, PartitionRange::new(0, 2048)).await;

    n1.watch(&[HIGH_KEY.to_string()], "c1");
    assert!(n1.publish(HIGH_KEY, json!(42), PublishOptions::default(), "c2"));

    let notification = next_matching(&mut rx1, |n| n.key == HIGH_KEY).await;
    assert_eq!(notification.value, json!(42));
    assert_eq!(notification.clients, vec!["c1".to_string()]);
    assert_eq!(n2.stored_value(HIGH_KEY), Some(json!(42)));
    assert_eq!(n1.stored_value(HIGH_KEY), None);

    let n2_watchers = n2.clone();
    wait_until(WAIT, || {
        let n2 = n2_watchers.clone();
        async move { n2.remote_watchers(HIGH_KEY) == vec!["n1".to_string()] }
    })
    .await;
}

#[tokio::test]
async fn test_publisher_follows_partition_handoff() {
    enable_logger();
    let router = Router::new();
    let (n1, mut rx1) = router.join("n1");
    wait_for_parts(&n1, PartitionRange::all()).await;

    let publisher = PublishOptions {
        publisher: true,
        expire_in: None,
    };
    n1.watch(&[HIGH_KEY.to_string()], "watcher");
    n1.publish(HIGH_KEY, json!("v1"), publisher, "pub");
    next_matching(&mut rx1, |n| n.value == json!("v1")).await;
    assert_eq!(n1.stored_value(HIGH_KEY), Some(json!("v1")));

    // the key's partition moves to n2, the publication moves with it
    let (n2, _rx2) = router.join("n2");
    wait_for_parts(&n2, PartitionRange::new(2048, 4096)).await;
    let owner = n2.clone();
    wait_until(WAIT, || {
        let n2 = owner.clone();
        async move { n2.stored_value(HIGH_KEY) == Some(json!("v1")) }
    })
    .await;
    assert_eq!(n1.stored_value(HIGH_KEY), None);

    // the local watcher is served by the new owner
    n1.publish(HIGH_KEY, json!("v2"), publisher, "pub");
    let notification = next_matching(&mut rx1, |n| n.value == json!("v2")).await;
    assert_eq!(notification.clients, vec!["watcher".to_string()]);
}

#[tokio::test]
async fn test_disconnect_withdraws_remote_interest() {
    enable_logger();
    let router = Router::new();
    let (n1, _rx1) = router.join("n1");
    let (n2, _rx2) = router.join("n2");
    wait_for_parts(&n2, PartitionRange::new(2048, 4096)).await;
    wait_for_parts(&n1, PartitionRange::new(0, 2048)).await;

    n1.watch(&[HIGH_KEY.to_string()], "c1");
    let owner = n2.clone();
    wait_until(WAIT, || {
        let n2 = owner.clone();
        async move { n2.remote_watchers(HIGH_KEY) == vec!["n1".to_string()] }
    })
    .await;

    n1.disconnect("c1");
    assert!(n1.watched_keys("c1").is_empty());
    let owner = n2.clone();
    wait_until(WAIT, || {
        let n2 = owner.clone();
        async move { n2.remote_watchers(HIGH_KEY).is_empty() }
    })
    .await;
}
