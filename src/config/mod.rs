//! # Notifier Configuration
//!
//! Typed configuration for the database backend, consumer defaults and declarative event
//! collection. Every section deserializes with defaults, so a config file only names what it
//! overrides.
//!
//! ## Sources
//!
//! [`NotifierConfig::load`] layers, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file
//! 3. `NOTIFIER__`-prefixed environment variables, `__` separating path segments
//!    (`NOTIFIER__DATABASE__MAX_CONNECTIONS=20`)
//!
//! ## Example
//!
//! ```toml
//! [database]
//! url = "postgresql://localhost/notifier"
//!
//! [listener]
//! timeout_seconds = 10
//!
//! [collectors.notifications.collect_events.order_shipped]
//! scope = "order"
//! clear = ["order_reminder"]
//! delay = 3600
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::constants::{
    listener as listener_defaults, DEFAULT_LEASE_TABLE, DEFAULT_NOTIFICATION_TABLE, GLOBAL_SCOPE,
};
use crate::error::{NotifierError, Result};
use crate::filter::validate_identifier;
use crate::models::Scope;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub database: DatabaseConfig,
    pub listener: ListenerConfig,
    /// Store identifier -> events collected into that store
    pub collectors: HashMap<String, CollectConfig>,
}

/// PostgreSQL connection and table settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub notification_table: String,
    pub lease_table: String,
    /// Apply embedded migrations when the pool is created
    pub run_migrations: bool,
    /// Wake long polls through LISTEN/NOTIFY
    pub listen_notify: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/notifier_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
            notification_table: DEFAULT_NOTIFICATION_TABLE.to_string(),
            lease_table: DEFAULT_LEASE_TABLE.to_string(),
            run_migrations: true,
            listen_notify: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Defaults applied to every new `Listener`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Wall-clock budget of one `listen` session
    pub timeout_seconds: u64,
    /// Pause between re-queries while long polling
    pub query_timeout_micros: u64,
    /// Lease duration; each heartbeat extends the lease by this much
    pub lock_timeout_seconds: u64,
    /// Reserved hint for how long to wait on a held lease
    pub lock_wait_seconds: u64,
    pub lock_required: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: listener_defaults::DEFAULT_TIMEOUT_SECONDS,
            query_timeout_micros: listener_defaults::DEFAULT_QUERY_TIMEOUT_MICROS,
            lock_timeout_seconds: listener_defaults::DEFAULT_LOCK_TIMEOUT_SECONDS,
            lock_wait_seconds: listener_defaults::DEFAULT_LOCK_WAIT_SECONDS,
            lock_required: true,
        }
    }
}

impl ListenerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_micros(self.query_timeout_micros)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn lock_wait_time(&self) -> Duration {
        Duration::from_secs(self.lock_wait_seconds)
    }
}

/// Events collected into one store
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectConfig {
    /// External event name -> what to store when it fires
    pub collect_events: BTreeMap<String, CollectRule>,
}

/// What to do when an observed event fires
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectRule {
    pub scope: String,
    /// Events of the same scope partition to cancel before storing
    pub clear: Vec<String>,
    /// Seconds until the stored notification becomes due
    pub delay: i64,
    /// Seconds the notification stays valid once due; 0 means no expiry
    pub ttl: i64,
}

impl Default for CollectRule {
    fn default() -> Self {
        Self {
            scope: GLOBAL_SCOPE.to_string(),
            clear: Vec::new(),
            delay: 0,
            ttl: 0,
        }
    }
}

impl CollectRule {
    pub fn scope(&self) -> Scope {
        Scope::named(self.scope.as_str())
    }
}

impl NotifierConfig {
    /// Reject configurations no component could run with
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(NotifierError::configuration(
                "database.max_connections must be greater than 0",
            ));
        }
        validate_identifier(&self.database.notification_table)
            .map_err(|e| NotifierError::configuration(format!("database.notification_table: {e}")))?;
        validate_identifier(&self.database.lease_table)
            .map_err(|e| NotifierError::configuration(format!("database.lease_table: {e}")))?;

        if self.listener.timeout_seconds == 0 {
            return Err(NotifierError::configuration(
                "listener.timeout_seconds must be greater than 0",
            ));
        }
        if self.listener.query_timeout_micros == 0 {
            return Err(NotifierError::configuration(
                "listener.query_timeout_micros must be greater than 0",
            ));
        }
        if self.listener.lock_timeout_seconds == 0 {
            return Err(NotifierError::configuration(
                "listener.lock_timeout_seconds must be greater than 0",
            ));
        }

        for (store, collect) in &self.collectors {
            for (event, rule) in &collect.collect_events {
                if event.trim().is_empty() {
                    return Err(NotifierError::configuration(format!(
                        "collectors.{store}: collected event names must not be empty"
                    )));
                }
                if rule.scope.trim().is_empty() {
                    return Err(NotifierError::configuration(format!(
                        "collectors.{store}.{event}: scope must not be empty"
                    )));
                }
                if rule.clear.iter().any(|name| name.trim().is_empty()) {
                    return Err(NotifierError::configuration(format!(
                        "collectors.{store}.{event}: clear entries must not be empty"
                    )));
                }
            }
        }
        Ok(())
    }
}
