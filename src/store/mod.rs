//! # Event and Lease Stores
//!
//! Storage-agnostic traits the producer and consumer are built on.
//!
//! - [`EventStore`] holds notifications: insert, bounded search, bounded bulk delete and
//!   the tri-state long poll [`EventStore::search_and_wait`].
//! - [`LeaseStore`] holds one lease row per contention domain, with a single atomic
//!   conditional write for acquisition.
//!
//! Two implementations ship with the crate: [`InMemoryStore`] for tests and embedded use,
//! and [`PgNotificationStore`] for PostgreSQL.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::columns;
use crate::error::{NotifierError, Result};
use crate::filter::{Clause, NotificationFilter, Page};
use crate::models::{Lease, LeaseClaim, LeaseDomain, NewNotification, Notification, Scope};

pub use in_memory::InMemoryStore;
pub use postgres::PgNotificationStore;

/// Result of a long poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Matching rows, ordered by id
    Rows(Vec<Notification>),
    /// Nothing matched and no further waiting was requested
    Empty,
    /// The wait budget ran out without a match
    TimedOut,
}

impl PollOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollOutcome::TimedOut)
    }
}

/// Adjusts a long poll's filter before each re-query, e.g. to move a time bound forward
pub type FilterRefresh = dyn Fn(&mut NotificationFilter) + Send + Sync;

/// Parameters of [`EventStore::search_and_wait`]
#[derive(Clone, Copy)]
pub struct WaitRequest<'a> {
    pub filter: &'a NotificationFilter,
    /// Total time the store may spend waiting
    pub session_timeout: Duration,
    /// Pause between re-queries
    pub query_wait: Duration,
    pub page: Page,
    /// When false, a single query is issued and an empty result is returned as `Empty`
    pub blocking: bool,
    /// Applied to this request's filter only, before every re-query
    pub refresh: Option<&'a FilterRefresh>,
}

impl WaitRequest<'_> {
    /// Apply the request's refresh, if any, to `filter`
    pub fn refreshed(&self, filter: &mut NotificationFilter) {
        if let Some(refresh) = self.refresh {
            refresh(filter);
        }
    }
}

impl fmt::Debug for WaitRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitRequest")
            .field("filter", &self.filter.to_string())
            .field("session_timeout", &self.session_timeout)
            .field("query_wait", &self.query_wait)
            .field("page", &self.page)
            .field("blocking", &self.blocking)
            .field("refresh", &self.refresh.is_some())
            .finish()
    }
}

/// Bookkeeping for a store-side long poll
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    started: Instant,
    session_timeout: Duration,
    query_wait: Duration,
}

impl PollBudget {
    pub fn start(request: &WaitRequest<'_>) -> Self {
        Self {
            started: Instant::now(),
            session_timeout: request.session_timeout,
            query_wait: request.query_wait,
        }
    }

    /// Length of the next pause, `None` once the session budget is spent
    pub fn next_wait(&self) -> Option<Duration> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.session_timeout {
            return None;
        }
        Some(self.query_wait.min(self.session_timeout - elapsed))
    }
}

/// Durable collection of notifications
#[async_trait]
pub trait EventStore: Send + Sync + fmt::Debug {
    /// Table (or collection) name; part of every lease domain over this store
    fn table_name(&self) -> &str;

    /// Whether `scope` partitions rows by a scope id
    fn is_scope_id_required(&self, scope: &Scope) -> bool {
        !scope.is_global()
    }

    /// Validate a scope/scope id pair and return the scope id to store
    fn apply_scope_values(&self, scope: &Scope, scope_id: Option<i64>) -> Result<Option<i64>> {
        match scope_id {
            Some(_) if scope.is_global() => Err(NotifierError::non_logic_scope(format!(
                "The scope should not be '{scope}' when providing a scope id"
            ))),
            Some(id) if id < 0 => Err(NotifierError::invalid_argument(format!(
                "The provided scope id must be a non-negative integer, got {id}"
            ))),
            None if self.is_scope_id_required(scope) => Err(NotifierError::invalid_argument(
                format!("A scope id is required for scope '{scope}'"),
            )),
            other => Ok(other),
        }
    }

    /// Filter fragment selecting the rows of one scope partition
    fn scope_filter(&self, scope: &Scope, scope_id: Option<i64>) -> Result<NotificationFilter> {
        let scope_id = self.apply_scope_values(scope, scope_id)?;
        let mut filter = NotificationFilter::new();
        if let Some(id) = scope_id {
            filter.insert(columns::SCOPE_ID, Clause::equals(columns::SCOPE_ID, id));
        } else if scope.is_global() {
            filter.insert(columns::SCOPE_ID, Clause::is_null(columns::SCOPE_ID));
        }
        Ok(filter)
    }

    /// Insert one notification, returning it with its assigned id
    async fn save(&self, notification: NewNotification) -> Result<Notification>;

    /// Rows matching `filter`, ordered by id, restricted to `page`
    async fn search(&self, filter: &NotificationFilter, page: Page) -> Result<Vec<Notification>>;

    /// Long poll: re-query until rows match, the budget runs out, or (non-blocking) once
    ///
    /// `request.refresh` runs against a private copy of the filter before each re-query.
    async fn search_and_wait(&self, request: WaitRequest<'_>) -> Result<PollOutcome>;

    /// Delete the given rows, returning how many were removed
    async fn delete_multiple(&self, notifications: &[Notification]) -> Result<u64>;
}

/// Durable registry of leases, one per contention domain
#[async_trait]
pub trait LeaseStore: Send + Sync + fmt::Debug {
    async fn find_lease(&self, domain: &LeaseDomain) -> Result<Option<Lease>>;

    /// Atomically create the domain's lease or take over an available one
    ///
    /// Returns `None` when another holder's lease is still live. A created row records
    /// `claim.offset`; an adopted row keeps its stored offset.
    async fn try_acquire(&self, domain: &LeaseDomain, claim: &LeaseClaim) -> Result<Option<Lease>>;

    /// Persist heartbeat, expiry and offset of an existing lease
    ///
    /// The write only applies while `lease.locked_by` still owns the row; `false` means
    /// another session has taken the lease over since.
    async fn save_lease(&self, lease: &Lease) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_rules() {
        let store = InMemoryStore::new("notifications");
        let order = Scope::named("order");

        assert!(matches!(
            store.apply_scope_values(&Scope::Global, Some(1)),
            Err(NotifierError::NonLogicScope { .. })
        ));
        assert!(matches!(
            store.apply_scope_values(&order, None),
            Err(NotifierError::InvalidArgument { .. })
        ));
        assert!(matches!(
            store.apply_scope_values(&order, Some(-1)),
            Err(NotifierError::InvalidArgument { .. })
        ));
        assert_eq!(store.apply_scope_values(&order, Some(4)).unwrap(), Some(4));
        assert_eq!(store.apply_scope_values(&Scope::Global, None).unwrap(), None);
    }

    #[test]
    fn test_scope_filter() {
        let store = InMemoryStore::new("notifications");
        let global = store.scope_filter(&Scope::Global, None).unwrap();
        assert_eq!(global.to_string(), "scope_id IS NULL");

        let scoped = store.scope_filter(&Scope::named("order"), Some(3)).unwrap();
        assert_eq!(scoped.to_string(), "scope_id = 3");
    }

    #[tokio::test]
    async fn test_poll_budget_runs_out() {
        let filter = NotificationFilter::new();
        let request = WaitRequest {
            filter: &filter,
            session_timeout: Duration::from_millis(20),
            query_wait: Duration::from_millis(50),
            page: Page::first(1),
            blocking: true,
            refresh: None,
        };
        let budget = PollBudget::start(&request);
        let first = budget.next_wait().unwrap();
        assert!(first <= Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(budget.next_wait().is_none());
    }

    #[test]
    fn test_refresh_applies_to_request_filter() {
        let filter = NotificationFilter::new();
        let refresh = |filter: &mut NotificationFilter| {
            filter.insert(columns::EVENT, Clause::equals(columns::EVENT, "refreshed"));
        };
        let request = WaitRequest {
            filter: &filter,
            session_timeout: Duration::from_millis(20),
            query_wait: Duration::from_millis(5),
            page: Page::first(1),
            blocking: true,
            refresh: Some(&refresh),
        };

        let mut next = request.filter.clone();
        request.refreshed(&mut next);
        assert_eq!(next.get("event"), Some(&Clause::equals("event", "refreshed")));
        assert!(filter.is_empty());

        let plain = WaitRequest { refresh: None, ..request };
        let mut unchanged = plain.filter.clone();
        plain.refreshed(&mut unchanged);
        assert!(unchanged.is_empty());
    }
}
