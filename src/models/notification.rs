use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::constants::{columns, GLOBAL_SCOPE};
use crate::error::{NotifierError, Result};
use crate::filter::FilterValue;

/// Entity-partitioning key for notifications
///
/// `Global` is the unpartitioned scope; every other scope partitions notifications by a
/// non-negative `scope_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    #[default]
    Global,
    Named(String),
}

impl Scope {
    /// Build a scope from its stored name; `"global"` maps to [`Scope::Global`]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == GLOBAL_SCOPE {
            Scope::Global
        } else {
            Scope::Named(name)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scope::Global => GLOBAL_SCOPE,
            Scope::Named(name) => name,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    /// Payload key carrying the scope id for collected events, e.g. `order_id`
    pub fn id_key(&self) -> String {
        format!("{}_id", self.as_str())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Scope {
    fn from(name: String) -> Self {
        Scope::named(name)
    }
}

impl From<&str> for Scope {
    fn from(name: &str) -> Self {
        Scope::named(name)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.as_str().to_string()
    }
}

/// A stored notification
///
/// Immutable after creation; rows are only removed through a bulk clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Store-assigned, strictly increasing
    pub id: i64,
    pub scope: Scope,
    pub scope_id: Option<i64>,
    pub event: String,
    /// Eligible for delivery once now >= trigger_date
    pub trigger_date: DateTime<Utc>,
    /// Advisory end of life, not enforced by the poll filter
    pub expiry_date: Option<DateTime<Utc>>,
    /// Opaque payload serialized by the producer
    pub data: Option<Value>,
}

impl Notification {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.trigger_date <= now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now)
    }

    /// Deserialize the payload into a caller type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(NotifierError::from)
    }

    /// Value of a core column, `None` when the column is NULL
    ///
    /// Stores that evaluate filters in process use this; unknown columns are an error.
    pub fn column_value(&self, column: &str) -> Result<Option<FilterValue>> {
        let value = match column {
            columns::ID => Some(FilterValue::Integer(self.id)),
            columns::SCOPE => Some(FilterValue::Text(self.scope.as_str().to_string())),
            columns::SCOPE_ID => self.scope_id.map(FilterValue::Integer),
            columns::EVENT => Some(FilterValue::Text(self.event.clone())),
            columns::TRIGGER_DATE => Some(FilterValue::Timestamp(self.trigger_date)),
            columns::EXPIRY_DATE => self.expiry_date.map(FilterValue::Timestamp),
            other => {
                return Err(NotifierError::query_failed(
                    "filter",
                    format!("unknown notification column '{other}'"),
                ))
            }
        };
        Ok(value)
    }
}

/// A notification before the store has assigned its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub scope: Scope,
    pub scope_id: Option<i64>,
    pub event: String,
    pub trigger_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub data: Option<Value>,
}

impl NewNotification {
    pub fn into_notification(self, id: i64) -> Notification {
        Notification {
            id,
            scope: self.scope,
            scope_id: self.scope_id,
            event: self.event,
            trigger_date: self.trigger_date,
            expiry_date: self.expiry_date,
            data: self.data,
        }
    }
}
