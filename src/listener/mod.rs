//! # Listener
//!
//! Consumer side of the queue: drains due notifications of one contention domain under a
//! lease, in id order, resuming from the domain's persisted cursor.
//!
//! ## Session
//!
//! A call to [`Listener::listen`] is one session:
//!
//! 1. build the poll filter (scope partition, event, `trigger_date <= now`, `id > cursor`,
//!    conditions)
//! 2. acquire the lease, or fail with `Locked`
//! 3. long-poll the store until the session timeout runs out, handing every batch to the
//!    handler and heartbeating the lease with the new cursor
//! 4. release the lease, whatever the outcome
//!
//! Without a handler the first non-empty batch is returned as is and the cursor is left
//! where it was.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use notifier_core::listener::{Listener, ListenOutcome};
//! use notifier_core::models::Notification;
//! use notifier_core::store::InMemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::default());
//! let mut listener = Listener::new(store.clone(), store);
//! listener.set_event("order_shipped");
//!
//! let mut handler = |batch: &[Notification]| -> anyhow::Result<()> {
//!     println!("processing {} notifications", batch.len());
//!     Ok(())
//! };
//! if let ListenOutcome::Completed(summary) = listener.listen(50, Some(&mut handler)).await? {
//!     println!("cursor now at {}", summary.offset);
//! }
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod lease;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ListenerConfig;
use crate::constants::columns;
use crate::error::{NotifierError, Result};
use crate::filter::{Clause, Condition, NotificationFilter, Operator, Page};
use crate::models::{LeaseDomain, Notification, Scope};
use crate::store::{EventStore, LeaseStore, PollOutcome, WaitRequest};

pub use handler::BatchHandler;
pub use lease::LeaseManager;

const LEASE_KEY_SEPARATOR: &str = ",";

/// Events a listener consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSelector {
    Single(String),
    /// Any of a set of events, sharing one lease and one cursor
    Any(BTreeSet<String>),
}

impl EventSelector {
    /// Set selector; fails when no usable name is given
    pub fn any<I, S>(events: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events: BTreeSet<String> = events.into_iter().map(Into::into).collect();
        if events.is_empty() {
            return Err(NotifierError::invalid_argument(
                "event set must contain at least one event name",
            ));
        }
        for event in &events {
            validate_event_name(event)?;
        }
        if events.len() == 1 {
            if let Some(event) = events.pop_first() {
                return Ok(EventSelector::Single(event));
            }
        }
        Ok(EventSelector::Any(events))
    }

    /// Reject names that are blank or contain the lease key separator
    pub fn validate(&self) -> Result<()> {
        match self {
            EventSelector::Single(event) => validate_event_name(event),
            EventSelector::Any(events) => events.iter().try_for_each(|event| validate_event_name(event)),
        }
    }

    /// Event part of the lease domain: the name, or the sorted names joined with `,`
    pub fn lease_key(&self) -> String {
        match self {
            EventSelector::Single(event) => event.clone(),
            EventSelector::Any(events) => events
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(LEASE_KEY_SEPARATOR),
        }
    }

    pub fn contains(&self, event: &str) -> bool {
        match self {
            EventSelector::Single(name) => name == event,
            EventSelector::Any(events) => events.contains(event),
        }
    }

    fn clause(&self) -> Clause {
        match self {
            EventSelector::Single(event) => Clause::equals(columns::EVENT, event.as_str()),
            EventSelector::Any(events) => Clause::one_of(columns::EVENT, events.iter().map(String::as_str)),
        }
    }
}

fn validate_event_name(event: &str) -> Result<()> {
    if event.trim().is_empty() {
        return Err(NotifierError::invalid_argument("event names must not be empty"));
    }
    if event.contains(LEASE_KEY_SEPARATOR) {
        return Err(NotifierError::invalid_argument(format!(
            "event name '{event}' must not contain '{LEASE_KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}

impl From<&str> for EventSelector {
    fn from(event: &str) -> Self {
        EventSelector::Single(event.to_string())
    }
}

impl From<String> for EventSelector {
    fn from(event: String) -> Self {
        EventSelector::Single(event)
    }
}

impl fmt::Display for EventSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lease_key())
    }
}

/// Totals of a session that ran with a handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenSummary {
    pub batches: usize,
    pub notifications: usize,
    /// Cursor at the end of the session
    pub offset: i64,
}

/// Result of [`Listener::listen`]
#[derive(Debug, Clone, PartialEq)]
pub enum ListenOutcome {
    /// Single-shot mode: the first non-empty batch, or nothing if the session timed out
    Fetched(Vec<Notification>),
    /// Handler mode: the session ran until its timeout
    Completed(ListenSummary),
}

/// Lease-coordinated consumer of one contention domain
#[derive(Debug)]
pub struct Listener {
    events: Arc<dyn EventStore>,
    leases: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    scope: Scope,
    scope_id: Option<i64>,
    event: Option<EventSelector>,
    offset: i64,
    conditions: BTreeMap<String, Condition>,
    timeout: Duration,
    query_timeout: Duration,
    lock_timeout: Duration,
    lock_wait_time: Duration,
    lock_required: bool,
}

impl Listener {
    pub fn new(events: Arc<dyn EventStore>, leases: Arc<dyn LeaseStore>) -> Self {
        Self::with_config(events, leases, &ListenerConfig::default())
    }

    pub fn with_config(
        events: Arc<dyn EventStore>,
        leases: Arc<dyn LeaseStore>,
        config: &ListenerConfig,
    ) -> Self {
        Self {
            events,
            leases,
            clock: Arc::new(SystemClock),
            scope: Scope::Global,
            scope_id: None,
            event: None,
            offset: 0,
            conditions: BTreeMap::new(),
            timeout: config.timeout(),
            query_timeout: config.query_timeout(),
            lock_timeout: config.lock_timeout(),
            lock_wait_time: config.lock_wait_time(),
            lock_required: config.lock_required,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Switching back to the global scope drops any scope id
    pub fn set_scope(&mut self, scope: impl Into<Scope>) -> &mut Self {
        self.scope = scope.into();
        if self.scope.is_global() && self.scope_id.take().is_some() {
            debug!("Cleared scope id after switching to the global scope");
        }
        self
    }

    pub fn scope_id(&self) -> Option<i64> {
        self.scope_id
    }

    pub fn set_scope_id(&mut self, scope_id: Option<i64>) -> Result<&mut Self> {
        if let Some(id) = scope_id {
            if self.scope.is_global() {
                return Err(NotifierError::non_logic_scope(format!(
                    "The scope should not be '{}' when providing a scope id",
                    self.scope
                )));
            }
            if id < 0 {
                return Err(NotifierError::invalid_argument(format!(
                    "The provided scope id must be a non-negative integer, got {id}"
                )));
            }
        }
        self.scope_id = scope_id;
        Ok(self)
    }

    pub fn event(&self) -> Option<&EventSelector> {
        self.event.as_ref()
    }

    pub fn set_event(&mut self, event: impl Into<EventSelector>) -> &mut Self {
        self.event = Some(event.into());
        self
    }

    /// Consume any of several events under one lease
    pub fn set_events<I, S>(&mut self, events: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event = Some(EventSelector::any(events)?);
        Ok(self)
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Starting cursor for a session whose lease row does not exist yet
    ///
    /// An existing lease row always wins over this value.
    pub fn set_offset(&mut self, offset: i64) -> Result<&mut Self> {
        if offset < 0 {
            return Err(NotifierError::invalid_argument(format!(
                "offset must be a non-negative integer, got {offset}"
            )));
        }
        self.offset = offset;
        Ok(self)
    }

    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.get(name)
    }

    pub fn conditions(&self) -> &BTreeMap<String, Condition> {
        &self.conditions
    }

    /// Add or replace a named condition
    pub fn set_condition(&mut self, name: impl Into<String>, condition: Condition) -> &mut Self {
        self.conditions.insert(name.into(), condition);
        self
    }

    pub fn set_conditions<I, S>(&mut self, conditions: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, Condition)>,
        S: Into<String>,
    {
        for (name, condition) in conditions {
            self.conditions.insert(name.into(), condition);
        }
        self
    }

    pub fn unset_condition(&mut self, name: &str) -> Option<Condition> {
        self.conditions.remove(name)
    }

    pub fn lock_required(&self) -> bool {
        self.lock_required
    }

    /// Without a lock the cursor starts at 0 every session and is never persisted
    pub fn set_lock_required(&mut self, required: bool) -> &mut Self {
        self.lock_required = required;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub fn set_query_timeout(&mut self, query_timeout: Duration) -> Result<&mut Self> {
        if query_timeout.is_zero() {
            return Err(NotifierError::invalid_argument("query timeout must be greater than zero"));
        }
        self.query_timeout = query_timeout;
        Ok(self)
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn set_lock_timeout(&mut self, lock_timeout: Duration) -> Result<&mut Self> {
        if lock_timeout.is_zero() {
            return Err(NotifierError::invalid_argument("lock timeout must be greater than zero"));
        }
        self.lock_timeout = lock_timeout;
        Ok(self)
    }

    /// Reserved: how long a caller may wait for a held lease
    pub fn lock_wait_time(&self) -> Duration {
        self.lock_wait_time
    }

    pub fn set_lock_wait_time(&mut self, lock_wait_time: Duration) -> &mut Self {
        self.lock_wait_time = lock_wait_time;
        self
    }

    /// Single-shot session: the first batch of at most `chunk_size` due notifications
    pub async fn fetch(&mut self, chunk_size: usize) -> Result<Vec<Notification>> {
        match self.listen(chunk_size, None).await? {
            ListenOutcome::Fetched(rows) => Ok(rows),
            ListenOutcome::Completed(_) => Ok(Vec::new()),
        }
    }

    /// Run one session; see the module docs for the protocol
    #[instrument(skip(self, handler), fields(
        table = %self.events.table_name(),
        scope = %self.scope,
        scope_id = ?self.scope_id,
        with_handler = handler.is_some()
    ))]
    pub async fn listen(
        &mut self,
        chunk_size: usize,
        handler: Option<&mut dyn BatchHandler>,
    ) -> Result<ListenOutcome> {
        let event = self
            .event
            .clone()
            .ok_or_else(|| NotifierError::logic("an event must be set before listening"))?;
        if chunk_size < 1 {
            return Err(NotifierError::invalid_argument("chunk size must be at least 1"));
        }
        event.validate()?;
        let base = self.base_filter(&event)?;

        let mut lease = if self.lock_required {
            let domain = LeaseDomain {
                notification_table: self.events.table_name().to_string(),
                event: event.lease_key(),
                scope: self.scope.clone(),
                scope_id: self.scope_id,
            };
            let mut lease = LeaseManager::new(
                Arc::clone(&self.leases),
                Arc::clone(&self.clock),
                domain,
                self.lock_timeout,
            )?;
            match lease.acquire(self.offset).await? {
                Some(resume_from) => self.offset = resume_from,
                None => return Err(NotifierError::locked(self.poll_filter(&base).to_string())),
            }
            Some(lease)
        } else {
            self.offset = 0;
            None
        };

        let result = self.run_session(&base, chunk_size, handler, lease.as_mut()).await;

        let released = match lease.as_mut() {
            Some(lease) if lease.is_active() => lease.release().await,
            _ => Ok(()),
        };
        match (result, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(release_error)) => Err(release_error),
            (Err(session_error), Ok(())) => Err(session_error),
            (Err(session_error), Err(release_error)) => {
                warn!(error = %release_error, "Lease release failed after session error");
                Err(session_error)
            }
        }
    }

    async fn run_session(
        &mut self,
        base: &NotificationFilter,
        chunk_size: usize,
        mut handler: Option<&mut dyn BatchHandler>,
        mut lease: Option<&mut LeaseManager>,
    ) -> Result<ListenOutcome> {
        let clock = Arc::clone(&self.clock);
        let refresh = move |filter: &mut NotificationFilter| {
            filter.insert(columns::TRIGGER_DATE, trigger_bound(clock.now()));
        };

        let started = Instant::now();
        let mut summary = ListenSummary {
            offset: self.offset,
            ..ListenSummary::default()
        };

        loop {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }

            let filter = self.poll_filter(base);
            let outcome = self
                .events
                .search_and_wait(WaitRequest {
                    filter: &filter,
                    session_timeout: remaining,
                    query_wait: self.query_timeout,
                    page: Page::first(chunk_size),
                    blocking: true,
                    refresh: Some(&refresh),
                })
                .await?;

            let rows = match outcome {
                PollOutcome::Rows(rows) => rows,
                PollOutcome::Empty | PollOutcome::TimedOut => {
                    debug!(offset = self.offset, "No due notifications");
                    if let Some(lease) = lease.as_deref_mut() {
                        lease.renew(self.offset).await?;
                    }
                    continue;
                }
            };

            let Some(callback) = handler.as_deref_mut() else {
                debug!(count = rows.len(), "Returning fetched batch");
                return Ok(ListenOutcome::Fetched(rows));
            };
            callback
                .handle(&rows)
                .await
                .map_err(NotifierError::callback_failed)?;

            if let Some(last) = rows.iter().map(|row| row.id).max() {
                self.offset = self.offset.max(last);
            }
            summary.batches += 1;
            summary.notifications += rows.len();
            summary.offset = self.offset;
            debug!(count = rows.len(), offset = self.offset, "Processed batch");

            if let Some(lease) = lease.as_deref_mut() {
                lease.renew(self.offset).await?;
            }
        }

        Ok(match handler {
            Some(_) => ListenOutcome::Completed(summary),
            None => ListenOutcome::Fetched(Vec::new()),
        })
    }

    /// Clauses fixed for the whole session
    fn base_filter(&self, event: &EventSelector) -> Result<NotificationFilter> {
        let mut filter = self.events.scope_filter(&self.scope, self.scope_id)?;
        filter.insert(columns::SCOPE, Clause::equals(columns::SCOPE, self.scope.as_str()));
        filter.insert(columns::EVENT, event.clause());
        for (name, condition) in &self.conditions {
            filter.insert(format!("condition:{name}"), condition.to_clause());
        }
        Ok(filter)
    }

    /// Base filter plus the time bound and cursor, recomputed per iteration
    fn poll_filter(&self, base: &NotificationFilter) -> NotificationFilter {
        base.clone()
            .with(columns::TRIGGER_DATE, trigger_bound(self.clock.now()))
            .with(columns::ID, Clause::compare(columns::ID, Operator::Gt, self.offset))
    }
}

fn trigger_bound(now: chrono::DateTime<chrono::Utc>) -> Clause {
    Clause::compare(columns::TRIGGER_DATE, Operator::Lte, now)
}
