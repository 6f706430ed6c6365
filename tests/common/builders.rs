use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notifier_core::models::{LeaseDomain, Notification, Scope};
use notifier_core::store::{InMemoryStore, LeaseStore};
use notifier_core::{BatchHandler, Clock, Listener, ManualClock, Notifier, Timing};

/// In-memory store, manual clock and a notifier writing through both
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Notifier,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::default());
        let clock = Arc::new(ManualClock::starting_now());
        let notifier = Notifier::new(store.clone()).with_clock(clock.clone());
        Self {
            store,
            clock,
            notifier,
        }
    }

    /// Listener with short session and query budgets
    pub fn listener(&self, event: &str) -> Listener {
        let mut listener = Listener::new(self.store.clone(), self.store.clone()).with_clock(self.clock.clone());
        listener
            .set_event(event)
            .set_timeout(Duration::from_millis(150));
        listener
            .set_query_timeout(Duration::from_millis(10))
            .expect("valid query timeout");
        listener
    }

    /// Store a global event that is already due
    pub async fn due_event(&self, event: &str) -> Notification {
        let stored = self
            .notifier
            .store_global_event(event, &serde_json::json!({"event": event}), Timing::immediate())
            .await
            .expect("store event");
        self.clock.advance(chrono::Duration::seconds(1));
        stored
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

pub fn global_domain(event: &str) -> LeaseDomain {
    LeaseDomain {
        notification_table: "notifications".to_string(),
        event: event.to_string(),
        scope: Scope::Global,
        scope_id: None,
    }
}

pub fn ids(rows: &[Notification]) -> Vec<i64> {
    rows.iter().map(|row| row.id).collect()
}

/// Records each batch and the persisted cursor seen when the batch arrives
pub struct Recorder {
    pub store: Arc<InMemoryStore>,
    pub domain: LeaseDomain,
    pub batches: Vec<Vec<i64>>,
    pub persisted_offsets: Vec<i64>,
}

impl Recorder {
    pub fn new(store: Arc<InMemoryStore>, domain: LeaseDomain) -> Self {
        Self {
            store,
            domain,
            batches: Vec::new(),
            persisted_offsets: Vec::new(),
        }
    }
}

#[async_trait]
impl BatchHandler for Recorder {
    async fn handle(&mut self, batch: &[Notification]) -> anyhow::Result<()> {
        let lease = self.store.find_lease(&self.domain).await?;
        self.persisted_offsets.push(lease.map_or(-1, |lease| lease.offset));
        self.batches.push(ids(batch));
        Ok(())
    }
}
