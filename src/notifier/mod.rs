//! # Notifier
//!
//! Producer side of the queue: records named events into an [`EventStore`] and cancels
//! outstanding ones.
//!
//! ## Timing
//!
//! A notification becomes due at `now + delay`. When a positive ttl is given it also carries
//! `expiry_date = trigger_date + ttl`; the expiry is advisory and consumers do not filter on it.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use notifier_core::models::Scope;
//! use notifier_core::notifier::{Notifier, Timing};
//! use notifier_core::store::InMemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let notifier = Notifier::new(Arc::new(InMemoryStore::default()));
//! let order = Scope::named("order");
//!
//! notifier
//!     .store_event(&order, "order_reminder", &serde_json::json!({"order_id": 42}), Some(42), Timing::delayed(3600))
//!     .await?;
//! notifier.clear_event(&order, "order_reminder", Some(42)).await?;
//! # Ok(())
//! # }
//! ```

pub mod collector;

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::clock::{checked_after_seconds, Clock, SystemClock};
use crate::constants::{columns, MAX_CLEAR_BATCH};
use crate::error::{NotifierError, Result};
use crate::filter::{Clause, NotificationFilter, Page};
use crate::logging::log_notification_operation;
use crate::models::{NewNotification, Notification, Scope};
use crate::store::EventStore;

pub use collector::EventCollector;

/// When a stored notification becomes due and how long it stays valid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    /// Seconds until due; zero or negative means immediately
    pub delay_seconds: i64,
    /// Seconds of validity once due; zero or negative means no expiry
    pub ttl_seconds: i64,
}

impl Timing {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn delayed(delay_seconds: i64) -> Self {
        Self {
            delay_seconds,
            ttl_seconds: 0,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }
}

/// Writes and cancels notifications in one store
#[derive(Debug, Clone)]
pub struct Notifier {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    clear_limit: usize,
}

impl Notifier {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            clear_limit: MAX_CLEAR_BATCH,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Page size of a single clear; values below 1 are raised to 1
    pub fn with_clear_limit(mut self, limit: usize) -> Self {
        self.clear_limit = limit.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn clear_limit(&self) -> usize {
        self.clear_limit
    }

    /// Record one notification
    #[instrument(skip(self, data), fields(table = %self.store.table_name(), scope = %scope))]
    pub async fn store_event<T>(
        &self,
        scope: &Scope,
        event: &str,
        data: &T,
        scope_id: Option<i64>,
        timing: Timing,
    ) -> Result<Notification>
    where
        T: Serialize + ?Sized,
    {
        validate_event(event)?;
        let scope_id = self.store.apply_scope_values(scope, scope_id)?;

        let trigger_date = checked_after_seconds(self.clock.now(), timing.delay_seconds.max(0))?;
        let expiry_date = if timing.ttl_seconds > 0 {
            Some(checked_after_seconds(trigger_date, timing.ttl_seconds)?)
        } else {
            None
        };

        let stored = self
            .store
            .save(NewNotification {
                scope: scope.clone(),
                scope_id,
                event: event.to_string(),
                trigger_date,
                expiry_date,
                data: payload(data)?,
            })
            .await?;

        debug!(id = stored.id, event = %event, trigger_date = %trigger_date, "Stored event");
        Ok(stored)
    }

    /// [`store_event`](Self::store_event) pinned to the global scope
    pub async fn store_global_event<T>(&self, event: &str, data: &T, timing: Timing) -> Result<Notification>
    where
        T: Serialize + ?Sized,
    {
        self.store_event(&Scope::Global, event, data, None, timing).await
    }

    /// Delete outstanding notifications of one event in one scope partition
    ///
    /// Removes at most one page ([`clear_limit`](Self::clear_limit) rows) per call and returns
    /// the number deleted. Use [`clear_all_events`](Self::clear_all_events) to drain everything.
    #[instrument(skip(self), fields(table = %self.store.table_name(), scope = %scope))]
    pub async fn clear_event(&self, scope: &Scope, event: &str, scope_id: Option<i64>) -> Result<u64> {
        let filter = self.event_filter(scope, event, scope_id)?;
        let (found, deleted) = self.clear_page(&filter).await?;
        if found >= self.clear_limit {
            warn!(
                event = %event,
                limit = self.clear_limit,
                "Clear reached its page limit; more matching notifications may remain"
            );
        }
        log_notification_operation("clear", self.store.table_name(), event, scope.as_str(), scope_id, Some(deleted));
        Ok(deleted)
    }

    /// [`clear_event`](Self::clear_event) pinned to the global scope
    pub async fn clear_global_event(&self, event: &str) -> Result<u64> {
        self.clear_event(&Scope::Global, event, None).await
    }

    /// Repeat single-page clears until a page comes back short
    #[instrument(skip(self), fields(table = %self.store.table_name(), scope = %scope))]
    pub async fn clear_all_events(&self, scope: &Scope, event: &str, scope_id: Option<i64>) -> Result<u64> {
        let filter = self.event_filter(scope, event, scope_id)?;
        let mut total = 0;
        loop {
            let (found, deleted) = self.clear_page(&filter).await?;
            total += deleted;
            // a page that deleted nothing cannot make progress
            if found < self.clear_limit || deleted == 0 {
                break;
            }
        }
        log_notification_operation("clear_all", self.store.table_name(), event, scope.as_str(), scope_id, Some(total));
        Ok(total)
    }

    fn event_filter(&self, scope: &Scope, event: &str, scope_id: Option<i64>) -> Result<NotificationFilter> {
        validate_event(event)?;
        let mut filter = self.store.scope_filter(scope, scope_id)?;
        filter.insert(columns::SCOPE, Clause::equals(columns::SCOPE, scope.as_str()));
        filter.insert(columns::EVENT, Clause::equals(columns::EVENT, event));
        Ok(filter)
    }

    async fn clear_page(&self, filter: &NotificationFilter) -> Result<(usize, u64)> {
        let rows: Vec<Notification> = self.store.search(filter, Page::first(self.clear_limit)).await?;
        if rows.is_empty() {
            return Ok((0, 0));
        }
        let deleted = self.store.delete_multiple(&rows).await?;
        Ok((rows.len(), deleted))
    }
}

fn validate_event(event: &str) -> Result<()> {
    if event.trim().is_empty() {
        return Err(NotifierError::invalid_argument("event name must not be empty"));
    }
    Ok(())
}

/// Serialized payload; null and empty strings, arrays and objects are stored as no data
fn payload<T: Serialize + ?Sized>(data: &T) -> Result<Option<Value>> {
    let value = serde_json::to_value(data)?;
    let empty = match &value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    };
    Ok((!empty).then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn notifier() -> (Notifier, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::default());
        let clock = Arc::new(ManualClock::starting_now());
        let notifier = Notifier::new(store.clone()).with_clock(clock.clone());
        (notifier, store, clock)
    }

    #[test]
    fn test_payload_drops_empty_values() {
        assert_eq!(payload(&json!(null)).unwrap(), None);
        assert_eq!(payload("").unwrap(), None);
        assert_eq!(payload(&Vec::<i32>::new()).unwrap(), None);
        assert_eq!(payload(&json!({})).unwrap(), None);
        assert_eq!(payload(&0).unwrap(), Some(json!(0)));
        assert_eq!(payload(&json!({"a": 1})).unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_delay_and_ttl_set_dates() {
        let (notifier, _, clock) = notifier();
        let now = clock.now();

        let stored = notifier
            .store_global_event("tick", &json!(null), Timing::delayed(10).with_ttl(20))
            .await
            .unwrap();
        assert_eq!(stored.trigger_date, now + ChronoDuration::seconds(10));
        assert_eq!(stored.expiry_date, Some(now + ChronoDuration::seconds(30)));

        let immediate = notifier
            .store_global_event("tick", &json!(null), Timing::immediate())
            .await
            .unwrap();
        assert_eq!(immediate.trigger_date, now);
        assert_eq!(immediate.expiry_date, None);
    }

    #[tokio::test]
    async fn test_negative_delay_is_immediate() {
        let (notifier, _, clock) = notifier();
        let stored = notifier
            .store_global_event("tick", &(), Timing::delayed(-30).with_ttl(-5))
            .await
            .unwrap();
        assert_eq!(stored.trigger_date, clock.now());
        assert_eq!(stored.expiry_date, None);
    }

    #[tokio::test]
    async fn test_out_of_range_timing_is_rejected() {
        let (notifier, store, _) = notifier();

        let delay = notifier
            .store_global_event("tick", &(), Timing::delayed(10_000_000_000_000))
            .await;
        assert!(matches!(delay, Err(NotifierError::InvalidArgument { .. })));

        let ttl = notifier
            .store_global_event("tick", &(), Timing::immediate().with_ttl(i64::MAX))
            .await;
        assert!(matches!(ttl, Err(NotifierError::InvalidArgument { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_scope_rules_apply_to_writes() {
        let (notifier, store, _) = notifier();
        let order = Scope::named("order");

        let missing = notifier.store_event(&order, "e", &(), None, Timing::immediate()).await;
        assert!(matches!(missing, Err(NotifierError::InvalidArgument { .. })));

        let global_with_id = notifier.store_event(&Scope::Global, "e", &(), Some(1), Timing::immediate()).await;
        assert!(matches!(global_with_id, Err(NotifierError::NonLogicScope { .. })));

        let empty_event = notifier.store_global_event(" ", &(), Timing::immediate()).await;
        assert!(matches!(empty_event, Err(NotifierError::InvalidArgument { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_respects_page_limit() {
        let (notifier, store, _) = notifier();
        let notifier = notifier.with_clear_limit(2);
        for _ in 0..5 {
            notifier.store_global_event("tick", &(), Timing::immediate()).await.unwrap();
        }

        assert_eq!(notifier.clear_global_event("tick").await.unwrap(), 2);
        assert_eq!(store.len(), 3);

        assert_eq!(notifier.clear_all_events(&Scope::Global, "tick", None).await.unwrap(), 3);
        assert!(store.is_empty());
    }
}
