//! # In-Memory Store
//!
//! Process-local implementation of [`EventStore`] and [`LeaseStore`] for testing and
//! embedded use.
//!
//! ## Features
//!
//! - **Strictly increasing ids**: assigned from an atomic counter on insert
//! - **SQL semantics**: filters evaluate with NULL-never-matches rules, like the Postgres store
//! - **Long polling**: inserts wake blocked `search_and_wait` calls through a `watch` channel
//! - **Atomic leases**: acquisition runs under the `DashMap` entry lock for the domain

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use super::{EventStore, LeaseStore, PollBudget, PollOutcome, WaitRequest};
use crate::error::{NotifierError, Result};
use crate::filter::{NotificationFilter, Page};
use crate::models::{Lease, LeaseClaim, LeaseDomain, NewNotification, Notification};

/// In-memory notification and lease storage
///
/// # Example
///
/// ```rust
/// use notifier_core::store::{EventStore, InMemoryStore};
/// use notifier_core::filter::{NotificationFilter, Page};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new("notifications");
/// let rows = store.search(&NotificationFilter::new(), Page::first(10)).await?;
/// assert!(rows.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    table: String,
    /// id -> notification, iteration order is id order
    notifications: RwLock<BTreeMap<i64, Notification>>,
    next_id: AtomicI64,
    leases: DashMap<LeaseDomain, Lease>,
    next_lease_id: AtomicI64,
    /// Bumped on every insert to wake long polls
    inserted: watch::Sender<u64>,
    /// When set, every operation fails with `QueryFailed` (for testing)
    unavailable: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_NOTIFICATION_TABLE)
    }
}

impl InMemoryStore {
    pub fn new(table: impl Into<String>) -> Self {
        let (inserted, _) = watch::channel(0);
        Self {
            table: table.into(),
            notifications: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            leases: DashMap::new(),
            next_lease_id: AtomicI64::new(1),
            inserted,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Number of stored notifications (for testing)
    pub fn len(&self) -> usize {
        self.notifications.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all stored notifications in id order (for testing)
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().values().cloned().collect()
    }

    /// Number of lease rows (for testing)
    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Simulate a store outage (for testing)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self, operation: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NotifierError::query_failed(operation, "store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    async fn save(&self, notification: NewNotification) -> Result<Notification> {
        self.ensure_available("save")?;
        // ids are assigned under the write lock so readers never see a gap being filled
        let stored = {
            let mut notifications = self.notifications.write();
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let stored = notification.into_notification(id);
            notifications.insert(id, stored.clone());
            stored
        };
        let id = stored.id;
        self.inserted.send_modify(|count| *count += 1);
        debug!(table = %self.table, id = id, event = %stored.event, "Stored notification");
        Ok(stored)
    }

    async fn search(&self, filter: &NotificationFilter, page: Page) -> Result<Vec<Notification>> {
        self.ensure_available("search")?;
        let notifications = self.notifications.read();
        let mut rows = Vec::new();
        let mut skipped = 0;
        for notification in notifications.values() {
            if rows.len() >= page.limit() {
                break;
            }
            if !filter.matches(notification)? {
                continue;
            }
            if skipped < page.offset() {
                skipped += 1;
                continue;
            }
            rows.push(notification.clone());
        }
        Ok(rows)
    }

    async fn search_and_wait(&self, request: WaitRequest<'_>) -> Result<PollOutcome> {
        let budget = PollBudget::start(&request);
        let mut filter = request.filter.clone();
        let mut inserted = self.inserted.subscribe();

        loop {
            inserted.borrow_and_update();
            let rows = self.search(&filter, request.page).await?;
            if !rows.is_empty() {
                return Ok(PollOutcome::Rows(rows));
            }
            if !request.blocking {
                return Ok(PollOutcome::Empty);
            }
            let Some(wait) = budget.next_wait() else {
                return Ok(PollOutcome::TimedOut);
            };
            // an insert or the end of the slice, whichever comes first
            let _ = tokio::time::timeout(wait, inserted.changed()).await;
            request.refreshed(&mut filter);
        }
    }

    async fn delete_multiple(&self, notifications: &[Notification]) -> Result<u64> {
        self.ensure_available("delete_multiple")?;
        let mut stored = self.notifications.write();
        let removed = notifications
            .iter()
            .filter(|notification| stored.remove(&notification.id).is_some())
            .count();
        Ok(removed as u64)
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn find_lease(&self, domain: &LeaseDomain) -> Result<Option<Lease>> {
        self.ensure_available("find_lease")?;
        Ok(self.leases.get(domain).map(|lease| lease.clone()))
    }

    async fn try_acquire(&self, domain: &LeaseDomain, claim: &LeaseClaim) -> Result<Option<Lease>> {
        self.ensure_available("try_acquire")?;
        match self.leases.entry(domain.clone()) {
            Entry::Vacant(vacant) => {
                let lease = Lease {
                    id: self.next_lease_id.fetch_add(1, Ordering::SeqCst),
                    domain: domain.clone(),
                    lock_date: claim.now,
                    lock_expiry_date: Some(claim.expires_at),
                    offset: claim.offset,
                    locked_by: Some(claim.holder),
                };
                vacant.insert(lease.clone());
                Ok(Some(lease))
            }
            Entry::Occupied(mut occupied) => {
                let lease = occupied.get_mut();
                if !lease.is_available(claim.now) {
                    return Ok(None);
                }
                lease.lock_date = claim.now;
                lease.lock_expiry_date = Some(claim.expires_at);
                lease.locked_by = Some(claim.holder);
                Ok(Some(lease.clone()))
            }
        }
    }

    async fn save_lease(&self, lease: &Lease) -> Result<bool> {
        self.ensure_available("save_lease")?;
        match self.leases.get_mut(&lease.domain) {
            Some(mut stored) if stored.id == lease.id && stored.locked_by == lease.locked_by => {
                *stored = lease.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(NotifierError::query_failed(
                "save_lease",
                format!("no lease row for domain {}", lease.domain),
            )),
        }
    }
}
