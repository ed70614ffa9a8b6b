use std::sync::Arc;
use std::time::Duration;

use gateway::{InMemoryQueueManager, QueueClient, QueueGateway};
use proto::{BrowseStart, Delivery, ErrorKind, QueueError};

const Q: &str = "DEV.QUEUE.1";

fn setup(ttl: Duration) -> (Arc<InMemoryQueueManager>, QueueGateway) {
    let qm = Arc::new(InMemoryQueueManager::with_queues("QM1", [Q, "DEV.QUEUE.2"]));
    let gateway = QueueGateway::with_ttl(qm.clone(), ttl);
    (qm, gateway)
}

fn opened(start: BrowseStart) -> (Vec<u8>, String) {
    match start {
        BrowseStart::Opened { payload, token } => (payload, token.0),
        BrowseStart::Empty => panic!("expected a browsed message"),
    }
}

#[tokio::test]
async fn browse_is_non_destructive_and_get_consumes_in_order() {
    let (qm, gateway) = setup(Duration::from_secs(300));
    gateway.put(Q, b"a").await.expect("put a");
    gateway.put(Q, b"b").await.expect("put b");

    let (first, browse_id) = opened(gateway.browse_first(Q, 0, 0).await.expect("browse first"));
    assert_eq!(first, b"a");
    assert_eq!(browse_id.len(), 32);

    let next = gateway.browse_next(&browse_id, 0, 0).await.expect("browse next");
    assert_eq!(next, Delivery::Message(b"b".to_vec()));
    assert_eq!(qm.depth(Q).expect("depth"), 2);

    assert_eq!(
        gateway.get(Q, 0, 0).await.expect("get"),
        Delivery::Message(b"a".to_vec())
    );
    assert_eq!(
        gateway.get(Q, 0, 0).await.expect("get"),
        Delivery::Message(b"b".to_vec())
    );
    assert_eq!(gateway.get(Q, 0, 0).await.expect("get"), Delivery::Empty);

    let end = gateway.browse_next(&browse_id, 0, 0).await.expect("browse end");
    assert_eq!(end, Delivery::Empty);
    assert_eq!(gateway.session_count().await, 1);
}

#[tokio::test]
async fn zero_wait_on_empty_queue_returns_promptly() {
    let (_qm, gateway) = setup(Duration::from_secs(300));
    let result = tokio::time::timeout(Duration::from_millis(500), gateway.get(Q, 0, 0))
        .await
        .expect("get must not block");
    assert_eq!(result.expect("get"), Delivery::Empty);

    let negative = tokio::time::timeout(Duration::from_millis(500), gateway.get(Q, -5, -1))
        .await
        .expect("negative wait must not block");
    assert_eq!(negative.expect("get"), Delivery::Empty);

    let browse = tokio::time::timeout(Duration::from_millis(500), gateway.browse_first(Q, 0, 0))
        .await
        .expect("browse_first must not block");
    assert_eq!(browse.expect("browse_first"), BrowseStart::Empty);
    assert_eq!(gateway.session_count().await, 0);
}

#[tokio::test]
async fn zero_wait_browse_next_at_end_of_queue_returns_promptly() {
    let (_qm, gateway) = setup(Duration::from_secs(300));
    gateway.put(Q, b"only").await.expect("put");
    let (_, browse_id) = opened(gateway.browse_first(Q, 0, 0).await.expect("browse first"));

    let next = tokio::time::timeout(
        Duration::from_millis(500),
        gateway.browse_next(&browse_id, 0, 0),
    )
    .await
    .expect("browse_next must not block");
    assert_eq!(next.expect("browse next"), Delivery::Empty);

    let negative = tokio::time::timeout(
        Duration::from_millis(500),
        gateway.browse_next(&browse_id, -10, 0),
    )
    .await
    .expect("negative wait must not block");
    assert_eq!(negative.expect("browse next"), Delivery::Empty);
    assert_eq!(gateway.session_count().await, 1);
}

#[tokio::test]
async fn get_waits_for_a_message_put_later() {
    let (_qm, gateway) = setup(Duration::from_secs(300));
    let gateway = Arc::new(gateway);
    let producer = gateway.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        producer.put(Q, b"late").await.expect("put");
    });

    let delivery = gateway.get(Q, 5_000, 0).await.expect("get");
    assert_eq!(delivery, Delivery::Message(b"late".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_evicted_and_touched_sessions_survive() {
    let (qm, gateway) = setup(Duration::from_secs(60));
    for payload in [b"1", b"2", b"3"] {
        gateway.put(Q, payload).await.expect("put");
    }

    let (_, idle) = opened(gateway.browse_first(Q, 0, 0).await.expect("browse idle"));
    let (_, active) = opened(gateway.browse_first(Q, 0, 0).await.expect("browse active"));

    tokio::time::advance(Duration::from_secs(40)).await;
    gateway.browse_next(&active, 0, 0).await.expect("touch active");
    tokio::time::advance(Duration::from_secs(40)).await;

    let err = gateway
        .browse_next(&idle, 0, 0)
        .await
        .expect_err("idle session must be gone");
    assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    assert!(err.to_string().contains(&idle));

    let next = gateway.browse_next(&active, 0, 0).await.expect("active");
    assert_eq!(next, Delivery::Message(b"3".to_vec()));
    assert_eq!(gateway.session_count().await, 1);
    assert_eq!(qm.stats().browse_closed, 1);
}

#[tokio::test]
async fn shutdown_closes_every_session_and_disconnects() {
    let (qm, gateway) = setup(Duration::from_secs(300));
    gateway.put(Q, b"m").await.expect("put");
    for _ in 0..4 {
        gateway.browse_first(Q, 0, 0).await.expect("browse");
    }
    assert_eq!(gateway.session_count().await, 4);

    gateway.shutdown().await;
    gateway.shutdown().await;

    let stats = qm.stats();
    assert_eq!(stats.browse_opened, 4);
    assert_eq!(stats.browse_closed, 4);
    assert_eq!(stats.browse_open, 0);
    assert!(!stats.connected);
    assert_eq!(gateway.session_count().await, 0);
    assert!(gateway.is_shut_down());

    let err = gateway.put(Q, b"after").await.expect_err("disconnected");
    assert!(matches!(err, QueueError::Backend { .. }));
}

#[tokio::test]
async fn concurrent_browses_each_get_a_distinct_session() {
    let (qm, gateway) = setup(Duration::from_secs(300));
    gateway.put(Q, b"x").await.expect("put");
    let gateway = Arc::new(gateway);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let gateway = gateway.clone();
        tasks.push(tokio::spawn(async move {
            opened(gateway.browse_first(Q, 0, 0).await.expect("browse")).1
        }));
    }
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.expect("join"));
    }
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), 16);
    assert_eq!(gateway.session_count().await, 16);
    assert_eq!(qm.stats().browse_open, 16);
}

#[tokio::test]
async fn oversized_message_is_reported_and_kept() {
    let (qm, gateway) = setup(Duration::from_secs(300));
    gateway.put(Q, &[7u8; 128]).await.expect("put");

    let err = gateway.get(Q, 0, 16).await.expect_err("truncated");
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(qm.depth(Q).expect("depth"), 1);

    let delivery = gateway.get(Q, 0, 0).await.expect("default size fits");
    assert_eq!(delivery.into_payload().len(), 128);
}

#[tokio::test]
async fn inquire_reflects_queue_state() {
    let (qm, gateway) = setup(Duration::from_secs(300));
    gateway.put(Q, b"one").await.expect("put");
    qm.set_inhibit_put(Q, true).expect("inhibit");

    let info = gateway.inquire_queue(Q).await.expect("inquire");
    assert_eq!(info.name, Q);
    assert_eq!(info.current_depth, 1);
    assert_eq!(info.max_depth, 5000);
    assert_eq!(info.inhibit_put, 1);
    assert_eq!(info.inhibit_get, 0);

    let err = gateway.put(Q, b"two").await.expect_err("put inhibited");
    assert_eq!(err.kind(), ErrorKind::Backend);
}

#[tokio::test]
async fn unknown_queue_fails_with_backend_error() {
    let (qm, gateway) = setup(Duration::from_secs(300));
    let err = gateway.browse_first("NO.SUCH.QUEUE", 0, 0).await.expect_err("unknown");
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(gateway.session_count().await, 0);
    assert_eq!(qm.stats().browse_open, 0);

    qm.disconnect().await.expect("disconnect");
}
