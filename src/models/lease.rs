use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::notification::Scope;

/// Contention domain guarded by a single lease row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseDomain {
    /// Table the notifications live in
    pub notification_table: String,
    /// Canonical event key (sorted, comma-joined for event sets)
    pub event: String,
    pub scope: Scope,
    pub scope_id: Option<i64>,
}

impl fmt::Display for LeaseDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.notification_table, self.event, self.scope)?;
        if let Some(scope_id) = self.scope_id {
            write!(f, "/{scope_id}")?;
        }
        Ok(())
    }
}

/// Persisted lease for one contention domain
///
/// Created on first acquisition and reused forever; only the heartbeat, expiry, holder and
/// offset change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: i64,
    pub domain: LeaseDomain,
    /// Last heartbeat
    pub lock_date: DateTime<Utc>,
    /// `None` or in the past means the lease is available
    pub lock_expiry_date: Option<DateTime<Utc>>,
    /// Highest notification id fully processed in this domain
    pub offset: i64,
    /// Session that holds or last held the lease
    pub locked_by: Option<Uuid>,
}

impl Lease {
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.lock_expiry_date.map_or(true, |expiry| expiry <= now)
    }

    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        !self.is_available(now)
    }
}

/// Parameters of an acquisition attempt
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseClaim {
    pub now: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Offset recorded only when the row is created
    pub offset: i64,
    pub holder: Uuid,
}
