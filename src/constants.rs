//! # Notifier Constants
//!
//! Names and defaults shared by producers, consumers and stores.

/// Name of the unpartitioned scope
pub const GLOBAL_SCOPE: &str = "global";

/// Maximum number of rows removed by a single `clear_event` call
pub const MAX_CLEAR_BATCH: usize = 1000;

/// Default notification table name
pub const DEFAULT_NOTIFICATION_TABLE: &str = "notifications";

/// Default lease table name
pub const DEFAULT_LEASE_TABLE: &str = "notification_listeners";

/// Suffix of the LISTEN/NOTIFY channel raised on insert into a notification table
pub const INSERT_CHANNEL_SUFFIX: &str = "_inserted";

/// Listener defaults
pub mod listener {
    /// Wall-clock session budget in seconds
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;
    /// Per-query wait budget in microseconds
    pub const DEFAULT_QUERY_TIMEOUT_MICROS: u64 = 100_000;
    /// Lease duration in seconds
    pub const DEFAULT_LOCK_TIMEOUT_SECONDS: u64 = 300;
    /// Reserved lease-wait hint in seconds
    pub const DEFAULT_LOCK_WAIT_SECONDS: u64 = 10;
}

/// Column names understood by every notification store
pub mod columns {
    pub const ID: &str = "id";
    pub const SCOPE: &str = "scope";
    pub const SCOPE_ID: &str = "scope_id";
    pub const EVENT: &str = "event";
    pub const TRIGGER_DATE: &str = "trigger_date";
    pub const EXPIRY_DATE: &str = "expiry_date";
}
