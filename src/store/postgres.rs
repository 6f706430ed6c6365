//! # PostgreSQL Store
//!
//! [`EventStore`] and [`LeaseStore`] over a sqlx `PgPool`.
//!
//! ## Architecture
//!
//! - **Parameterized filters**: [`NotificationFilter`]s render through `sqlx::QueryBuilder`
//!   with every value bound; table and column identifiers are validated before use.
//! - **Long polling**: `search_and_wait` re-queries after each `query_wait` slice. When
//!   LISTEN/NOTIFY is enabled it also wakes on `<table>_inserted` notifications raised by
//!   the insert trigger from `migrations/`. One LISTEN connection is opened lazily per store
//!   and kept for later polls; a poll that finds it in use falls back to the interval.
//! - **Atomic acquisition**: one `INSERT .. ON CONFLICT .. DO UPDATE .. WHERE` statement
//!   creates the domain's lease or takes over an expired one. Two racing sessions can never
//!   both see the row as available.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use notifier_core::store::PgNotificationStore;
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgNotificationStore::with_tables(pool, "notifications", "notification_listeners")?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{EventStore, LeaseStore, PollBudget, PollOutcome, WaitRequest};
use crate::config::DatabaseConfig;
use crate::constants::{DEFAULT_LEASE_TABLE, DEFAULT_NOTIFICATION_TABLE, INSERT_CHANNEL_SUFFIX};
use crate::error::{NotifierError, Result};
use crate::filter::{validate_identifier, Clause, FilterValue, NotificationFilter, Page};
use crate::models::{Lease, LeaseClaim, LeaseDomain, NewNotification, Notification, Scope};

const NOTIFICATION_COLUMNS: &str = "id, scope, scope_id, event, trigger_date, expiry_date, data";
const LEASE_COLUMNS: &str =
    r#"id, notification_table, event, scope, scope_id, lock_date, lock_expiry_date, "offset", locked_by"#;

/// LISTEN connection shared by the long polls of one store
#[derive(Clone, Default)]
struct InsertListener(Arc<Mutex<Option<PgListener>>>);

impl fmt::Debug for InsertListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.0.try_lock() {
            Ok(listener) if listener.is_some() => "connected",
            Ok(_) => "idle",
            Err(_) => "in use",
        };
        f.debug_tuple("InsertListener").field(&state).finish()
    }
}

/// Notification and lease storage in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
    table: String,
    lease_table: String,
    listen_notify: bool,
    insert_listener: InsertListener,
}

impl PgNotificationStore {
    /// Store over the default tables
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_NOTIFICATION_TABLE.to_string(),
            lease_table: DEFAULT_LEASE_TABLE.to_string(),
            listen_notify: true,
            insert_listener: InsertListener::default(),
        }
    }

    /// Store over custom tables sharing the default schema
    pub fn with_tables(
        pool: PgPool,
        table: impl Into<String>,
        lease_table: impl Into<String>,
    ) -> Result<Self> {
        let table = table.into();
        let lease_table = lease_table.into();
        validate_identifier(&table)?;
        validate_identifier(&lease_table)?;
        Ok(Self {
            table,
            lease_table,
            ..Self::new(pool)
        })
    }

    pub fn from_config(pool: PgPool, config: &DatabaseConfig) -> Result<Self> {
        Ok(Self::with_tables(pool, &config.notification_table, &config.lease_table)?
            .with_listen_notify(config.listen_notify))
    }

    /// Wake long polls on insert notifications instead of only on the query interval
    pub fn with_listen_notify(mut self, enabled: bool) -> Self {
        self.listen_notify = enabled;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn lease_table(&self) -> &str {
        &self.lease_table
    }

    fn insert_channel(&self) -> String {
        format!("{}{}", self.table, INSERT_CHANNEL_SUFFIX)
    }

    async fn connect_listener(&self) -> Option<PgListener> {
        let channel = self.insert_channel();
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "Could not open LISTEN connection, falling back to interval polling");
                return None;
            }
        };
        if let Err(e) = listener.listen(&channel).await {
            warn!(error = %e, channel = %channel, "LISTEN failed, falling back to interval polling");
            return None;
        }
        Some(listener)
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &FilterValue) {
    match value {
        FilterValue::Integer(value) => builder.push_bind(*value),
        FilterValue::Bool(value) => builder.push_bind(*value),
        FilterValue::Timestamp(value) => builder.push_bind(*value),
        FilterValue::Text(value) => builder.push_bind(value.clone()),
    };
}

fn push_clause(builder: &mut QueryBuilder<'_, Postgres>, clause: &Clause) -> Result<()> {
    for column in clause.columns() {
        validate_identifier(column)?;
    }
    match clause {
        Clause::Compare(predicate) => {
            builder.push(format!("{} {} ", predicate.column, predicate.operator.as_sql()));
            push_value(builder, &predicate.value);
        }
        Clause::In { values, .. } if values.is_empty() => {
            builder.push("FALSE");
        }
        Clause::In { column, values } => {
            builder.push(format!("{column} IN ("));
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    builder.push(", ");
                }
                push_value(builder, value);
            }
            builder.push(")");
        }
        Clause::IsNull { column } => {
            builder.push(format!("{column} IS NULL"));
        }
        Clause::IsNotNull { column } => {
            builder.push(format!("{column} IS NOT NULL"));
        }
        Clause::AnyOf(clauses) if clauses.is_empty() => {
            builder.push("FALSE");
        }
        Clause::AnyOf(clauses) => {
            builder.push("(");
            for (index, clause) in clauses.iter().enumerate() {
                if index > 0 {
                    builder.push(" OR ");
                }
                push_clause(builder, clause)?;
            }
            builder.push(")");
        }
    }
    Ok(())
}

/// Row counts saturate at `i64::MAX`; Postgres rejects negative LIMIT/OFFSET values
fn row_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn push_where(builder: &mut QueryBuilder<'_, Postgres>, filter: &NotificationFilter) -> Result<()> {
    for (index, clause) in filter.clauses().enumerate() {
        builder.push(if index == 0 { " WHERE " } else { " AND " });
        push_clause(builder, clause)?;
    }
    Ok(())
}

/// Internal struct for notification rows
#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    scope: String,
    scope_id: Option<i64>,
    event: String,
    trigger_date: DateTime<Utc>,
    expiry_date: Option<DateTime<Utc>>,
    data: Option<serde_json::Value>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            scope: Scope::named(row.scope),
            scope_id: row.scope_id,
            event: row.event,
            trigger_date: row.trigger_date,
            expiry_date: row.expiry_date,
            data: row.data,
        }
    }
}

/// Internal struct for lease rows
#[derive(sqlx::FromRow)]
struct LeaseRow {
    id: i64,
    notification_table: String,
    event: String,
    scope: String,
    scope_id: Option<i64>,
    lock_date: DateTime<Utc>,
    lock_expiry_date: Option<DateTime<Utc>>,
    offset: i64,
    locked_by: Option<Uuid>,
}

impl From<LeaseRow> for Lease {
    fn from(row: LeaseRow) -> Self {
        Lease {
            id: row.id,
            domain: LeaseDomain {
                notification_table: row.notification_table,
                event: row.event,
                scope: Scope::named(row.scope),
                scope_id: row.scope_id,
            },
            lock_date: row.lock_date,
            lock_expiry_date: row.lock_expiry_date,
            offset: row.offset,
            locked_by: row.locked_by,
        }
    }
}

#[async_trait]
impl EventStore for PgNotificationStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    #[instrument(skip(self, notification), fields(table = %self.table, event = %notification.event))]
    async fn save(&self, notification: NewNotification) -> Result<Notification> {
        let query = format!(
            "INSERT INTO {} (scope, scope_id, event, trigger_date, expiry_date, data) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {NOTIFICATION_COLUMNS}",
            self.table
        );
        let row = sqlx::query_as::<_, NotificationRow>(&query)
            .bind(notification.scope.as_str())
            .bind(notification.scope_id)
            .bind(&notification.event)
            .bind(notification.trigger_date)
            .bind(notification.expiry_date)
            .bind(&notification.data)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| NotifierError::query_failed("save notification", e.to_string()))?;
        debug!(id = row.id, "Stored notification");
        Ok(row.into())
    }

    async fn search(&self, filter: &NotificationFilter, page: Page) -> Result<Vec<Notification>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {NOTIFICATION_COLUMNS} FROM {}", self.table));
        push_where(&mut builder, filter)?;
        builder.push(" ORDER BY id ASC LIMIT ");
        builder.push_bind(row_count(page.limit()));
        builder.push(" OFFSET ");
        builder.push_bind(row_count(page.offset()));

        let rows = builder
            .build_query_as::<NotificationRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| NotifierError::query_failed("search notifications", e.to_string()))?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    #[instrument(skip(self, request), fields(table = %self.table, blocking = request.blocking))]
    async fn search_and_wait(&self, request: WaitRequest<'_>) -> Result<PollOutcome> {
        let budget = PollBudget::start(&request);
        let mut filter = request.filter.clone();
        let mut shared = if request.blocking && self.listen_notify {
            self.insert_listener.0.try_lock().ok()
        } else {
            None
        };
        if let Some(slot) = shared.as_mut() {
            if slot.is_none() {
                **slot = self.connect_listener().await;
            }
        } else if request.blocking && self.listen_notify {
            debug!("LISTEN connection busy with another poll, using interval polling");
        }

        loop {
            let rows = self.search(&filter, request.page).await?;
            if !rows.is_empty() {
                return Ok(PollOutcome::Rows(rows));
            }
            if !request.blocking {
                return Ok(PollOutcome::Empty);
            }
            let Some(wait) = budget.next_wait() else {
                debug!("Wait budget exhausted without matching rows");
                return Ok(PollOutcome::TimedOut);
            };

            let connection_lost = match shared.as_mut().and_then(|slot| (**slot).as_mut()) {
                Some(listener) => match tokio::time::timeout(wait, listener.recv()).await {
                    Ok(Err(e)) => {
                        warn!(error = %e, "LISTEN connection failed, continuing with interval polling");
                        true
                    }
                    _ => false,
                },
                None => {
                    tokio::time::sleep(wait).await;
                    false
                }
            };
            if connection_lost {
                if let Some(slot) = shared.as_mut() {
                    **slot = None;
                }
            }
            request.refreshed(&mut filter);
        }
    }

    async fn delete_multiple(&self, notifications: &[Notification]) -> Result<u64> {
        if notifications.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = notifications.iter().map(|n| n.id).collect();
        let query = format!("DELETE FROM {} WHERE id = ANY($1)", self.table);
        let result = sqlx::query(&query)
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(|e| NotifierError::query_failed("delete notifications", e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LeaseStore for PgNotificationStore {
    async fn find_lease(&self, domain: &LeaseDomain) -> Result<Option<Lease>> {
        let query = format!(
            "SELECT {LEASE_COLUMNS} FROM {} \
             WHERE notification_table = $1 AND event = $2 AND scope = $3 \
             AND scope_id IS NOT DISTINCT FROM $4",
            self.lease_table
        );
        let row = sqlx::query_as::<_, LeaseRow>(&query)
            .bind(&domain.notification_table)
            .bind(&domain.event)
            .bind(domain.scope.as_str())
            .bind(domain.scope_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| NotifierError::query_failed("find lease", e.to_string()))?;
        Ok(row.map(Lease::from))
    }

    #[instrument(skip(self, claim), fields(domain = %domain, holder = %claim.holder))]
    async fn try_acquire(&self, domain: &LeaseDomain, claim: &LeaseClaim) -> Result<Option<Lease>> {
        let query = format!(
            r#"INSERT INTO {table} AS lease
                   (notification_table, event, scope, scope_id, lock_date, lock_expiry_date, "offset", locked_by)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (notification_table, event, scope, (COALESCE(scope_id, -1)))
               DO UPDATE SET lock_date = EXCLUDED.lock_date,
                             lock_expiry_date = EXCLUDED.lock_expiry_date,
                             locked_by = EXCLUDED.locked_by
               WHERE lease.lock_expiry_date IS NULL
                  OR lease.lock_expiry_date <= EXCLUDED.lock_date
               RETURNING {LEASE_COLUMNS}"#,
            table = self.lease_table
        );
        let row = sqlx::query_as::<_, LeaseRow>(&query)
            .bind(&domain.notification_table)
            .bind(&domain.event)
            .bind(domain.scope.as_str())
            .bind(domain.scope_id)
            .bind(claim.now)
            .bind(claim.expires_at)
            .bind(claim.offset)
            .bind(claim.holder)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| NotifierError::query_failed("acquire lease", e.to_string()))?;
        Ok(row.map(Lease::from))
    }

    async fn save_lease(&self, lease: &Lease) -> Result<bool> {
        let query = format!(
            r#"UPDATE {} SET lock_date = $2, lock_expiry_date = $3, "offset" = $4
               WHERE id = $1 AND locked_by IS NOT DISTINCT FROM $5"#,
            self.lease_table
        );
        let result = sqlx::query(&query)
            .bind(lease.id)
            .bind(lease.lock_date)
            .bind(lease.lock_expiry_date)
            .bind(lease.offset)
            .bind(lease.locked_by)
            .execute(&self.pool)
            .await
            .map_err(|e| NotifierError::query_failed("save lease", e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }
}
