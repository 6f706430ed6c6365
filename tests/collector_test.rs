mod common;

use std::collections::HashMap;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::TestHarness;
use notifier_core::models::Scope;
use notifier_core::{EventCollector, EventPublisher, NotifierConfig, NotifierError, PublishedEvent};
use serde_json::json;

const ROUTING: &str = r#"
[collectors.main.collect_events.order_placed]
scope = "order"
delay = 3600
ttl = 600

[collectors.main.collect_events.order_shipped]
scope = "order"
clear = ["order_placed"]

[collectors.main.collect_events.maintenance]
scope = "global"
"#;

fn collector(harness: &TestHarness) -> EventCollector {
    let config = NotifierConfig::from_toml_str(ROUTING).unwrap();
    let mut notifiers = HashMap::new();
    notifiers.insert("main".to_string(), harness.notifier.clone());
    EventCollector::new(&config.collectors, &notifiers).unwrap()
}

async fn wait_for_len(harness: &TestHarness, expected: usize) {
    for _ in 0..100 {
        if harness.store.len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached {expected} notifications, has {}", harness.store.len());
}

#[tokio::test]
async fn test_collect_stores_with_configured_timing() {
    let harness = TestHarness::new();
    let collector = collector(&harness);
    let now = harness.now();

    let stored = collector
        .collect(&PublishedEvent::new("order_placed", json!({"order_id": 11, "total": 30})))
        .await
        .unwrap();
    assert_eq!(stored, 1);

    let rows = harness.store.notifications();
    assert_eq!(rows[0].event, "order_placed");
    assert_eq!(rows[0].scope, Scope::named("order"));
    assert_eq!(rows[0].scope_id, Some(11));
    assert_eq!(rows[0].trigger_date, now + ChronoDuration::seconds(3600));
    assert_eq!(rows[0].expiry_date, Some(now + ChronoDuration::seconds(4200)));
    assert_eq!(rows[0].data, Some(json!({"order_id": 11, "total": 30})));
}

#[tokio::test]
async fn test_collect_supersedes_listed_events() {
    let harness = TestHarness::new();
    let collector = collector(&harness);

    for order_id in [1, 2] {
        collector
            .collect(&PublishedEvent::new("order_placed", json!({"order_id": order_id})))
            .await
            .unwrap();
    }
    collector
        .collect(&PublishedEvent::new("order_shipped", json!({"order_id": 1})))
        .await
        .unwrap();

    let rows: Vec<(String, Option<i64>)> = harness
        .store
        .notifications()
        .into_iter()
        .map(|row| (row.event, row.scope_id))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("order_placed".to_string(), Some(2)),
            ("order_shipped".to_string(), Some(1)),
        ]
    );
}

#[tokio::test]
async fn test_global_rules_ignore_payload_ids() {
    let harness = TestHarness::new();
    let collector = collector(&harness);

    collector
        .collect(&PublishedEvent::new("maintenance", json!({"global_id": 3})))
        .await
        .unwrap();
    let rows = harness.store.notifications();
    assert!(rows[0].scope.is_global());
    assert_eq!(rows[0].scope_id, None);
}

#[tokio::test]
async fn test_missing_scope_id_is_rejected() {
    let harness = TestHarness::new();
    let collector = collector(&harness);

    let err = collector
        .collect(&PublishedEvent::new("order_shipped", json!({"order_id": "abc"})))
        .await
        .unwrap_err();
    assert!(matches!(err, NotifierError::InvalidArgument { .. }));
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_spawned_collector_follows_publisher() {
    let harness = TestHarness::new();
    let publisher = EventPublisher::default();
    let handle = collector(&harness).spawn(&publisher);

    publisher.publish("order_placed", json!({"order_id": 4}));
    publisher.publish("unrelated", json!({}));
    // failures are logged and do not stop the collector
    publisher.publish("order_placed", json!({}));
    publisher.publish("order_shipped", json!({"order_id": 9}));
    wait_for_len(&harness, 2).await;

    drop(publisher);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("collector stops when the publisher is dropped")
        .unwrap();
}
