//! PostgreSQL store tests, run with `cargo test --features postgres-tests` against DATABASE_URL
#![cfg(feature = "postgres-tests")]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use notifier_core::filter::{Clause, NotificationFilter, Page};
use notifier_core::models::{LeaseClaim, LeaseDomain, NewNotification, Scope};
use notifier_core::store::{EventStore, LeaseStore, PgNotificationStore, PollOutcome, WaitRequest};
use notifier_core::{Listener, ListenOutcome, Notifier, Operator, Timing};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn new_notification(event: &str, scope: Scope, scope_id: Option<i64>) -> NewNotification {
    NewNotification {
        scope,
        scope_id,
        event: event.to_string(),
        trigger_date: Utc::now(),
        expiry_date: None,
        data: Some(json!({"event": event})),
    }
}

fn domain(event: &str) -> LeaseDomain {
    LeaseDomain {
        notification_table: "notifications".to_string(),
        event: event.to_string(),
        scope: Scope::named("order"),
        scope_id: Some(7),
    }
}

fn claim(offset: i64, holder: Uuid) -> LeaseClaim {
    let now = Utc::now();
    LeaseClaim {
        now,
        expires_at: now + ChronoDuration::seconds(60),
        offset,
        holder,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn test_search_orders_by_id_and_pages(pool: PgPool) -> sqlx::Result<()> {
    let store = PgNotificationStore::new(pool);
    let mut saved = Vec::new();
    for event in ["a", "b", "a", "a", "c"] {
        saved.push(store.save(new_notification(event, Scope::Global, None)).await.unwrap());
    }

    let filter = NotificationFilter::new()
        .with("event", Clause::one_of("event", ["a", "c"]))
        .with("id", Clause::compare("id", Operator::Gt, saved[0].id));
    let rows = store.search(&filter, Page::first(2)).await.unwrap();
    assert_eq!(
        rows.iter().map(|row| row.id).collect::<Vec<_>>(),
        vec![saved[2].id, saved[3].id]
    );
    assert_eq!(rows[0].data, Some(json!({"event": "a"})));

    let deleted = store.delete_multiple(&rows).await.unwrap();
    assert_eq!(deleted, 2);
    let rest = store.search(&filter, Page::first(10)).await.unwrap();
    assert_eq!(rest.iter().map(|row| row.id).collect::<Vec<_>>(), vec![saved[4].id]);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn test_lease_acquire_is_exclusive_and_saves_are_conditional(pool: PgPool) -> sqlx::Result<()> {
    let store = PgNotificationStore::new(pool);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    let mut held = store.try_acquire(&domain("tick"), &claim(4, first)).await.unwrap().unwrap();
    assert_eq!(held.offset, 4);
    assert!(store.try_acquire(&domain("tick"), &claim(0, second)).await.unwrap().is_none());

    // release keeps the offset for the next holder
    held.offset = 9;
    held.lock_expiry_date = None;
    assert!(store.save_lease(&held).await.unwrap());

    let adopted = store.try_acquire(&domain("tick"), &claim(0, second)).await.unwrap().unwrap();
    assert_eq!(adopted.id, held.id);
    assert_eq!(adopted.offset, 9);
    assert_eq!(adopted.locked_by, Some(second));

    // the previous holder can no longer write
    assert!(!store.save_lease(&held).await.unwrap());
    let persisted = store.find_lease(&domain("tick")).await.unwrap().unwrap();
    assert_eq!(persisted.locked_by, Some(second));
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn test_search_and_wait_times_out_then_sees_inserts(pool: PgPool) -> sqlx::Result<()> {
    let store = Arc::new(PgNotificationStore::new(pool));
    let filter = NotificationFilter::new().with("event", Clause::equals("event", "late"));

    let started = Instant::now();
    let outcome = store
        .search_and_wait(WaitRequest {
            filter: &filter,
            session_timeout: Duration::from_millis(200),
            query_wait: Duration::from_millis(20),
            page: Page::first(10),
            blocking: true,
            refresh: None,
        })
        .await
        .unwrap();
    assert!(outcome.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(200));

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.save(new_notification("late", Scope::Global, None)).await.unwrap();
    });
    let outcome = store
        .search_and_wait(WaitRequest {
            filter: &filter,
            session_timeout: Duration::from_secs(5),
            query_wait: Duration::from_millis(20),
            page: Page::first(10),
            blocking: true,
            refresh: None,
        })
        .await
        .unwrap();
    match outcome {
        PollOutcome::Rows(rows) => assert_eq!(rows.len(), 1),
        other => panic!("expected rows, got {other:?}"),
    }
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn test_listener_fetch_through_postgres(pool: PgPool) -> sqlx::Result<()> {
    let store = Arc::new(PgNotificationStore::new(pool));
    let notifier = Notifier::new(store.clone());
    let order = Scope::named("order");

    notifier
        .store_event(&order, "order_placed", &json!({"order_id": 7}), Some(7), Timing::immediate())
        .await
        .unwrap();
    notifier
        .store_event(&order, "order_placed", &json!({"order_id": 8}), Some(8), Timing::immediate())
        .await
        .unwrap();
    notifier
        .store_event(&order, "order_placed", &json!({"order_id": 7}), Some(7), Timing::delayed(3600))
        .await
        .unwrap();

    let mut listener = Listener::new(store.clone(), store.clone());
    listener.set_event("order_placed").set_scope(order.clone());
    listener.set_scope_id(Some(7)).unwrap();
    listener.set_timeout(Duration::from_secs(2));

    match listener.listen(10, None).await.unwrap() {
        ListenOutcome::Fetched(rows) => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].scope_id, Some(7));
        }
        other => panic!("expected a batch, got {other:?}"),
    }
    let lease = store.find_lease(&domain("order_placed")).await.unwrap().unwrap();
    assert!(lease.lock_expiry_date.is_none());
    assert_eq!(lease.offset, 0);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn test_long_polls_reuse_one_listen_connection(pool: PgPool) -> sqlx::Result<()> {
    let store = PgNotificationStore::new(pool.clone());
    let filter = NotificationFilter::new().with("event", Clause::equals("event", "quiet"));

    for _ in 0..3 {
        let outcome = store
            .search_and_wait(WaitRequest {
                filter: &filter,
                session_timeout: Duration::from_millis(60),
                query_wait: Duration::from_millis(20),
                page: Page::first(1),
                blocking: true,
                refresh: None,
            })
            .await
            .unwrap();
        assert!(outcome.is_timeout());
    }

    let listening: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pg_stat_activity \
         WHERE datname = current_database() AND query ILIKE 'LISTEN%'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(listening, 1);
    Ok(())
}
