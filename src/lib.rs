#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Notifier Core
//!
//! Durable, database-backed event notification queue with lease-coordinated consumers.
//!
//! ## Overview
//!
//! Producers record named events, optionally scoped to an entity, delayed and time-limited.
//! Consumers drain due events in id order under a cooperative lease, so only one session at a
//! time processes a given (table, event, scope, scope id) domain. The lease row carries the
//! domain's cursor, and a crashed consumer's successor resumes from it once the lease expires.
//!
//! ## Module Organization
//!
//! - [`notifier`] - producer: store, clear and declarative collection from an event bus
//! - [`listener`] - consumer: lease protocol and the bounded long-poll loop
//! - [`store`] - `EventStore`/`LeaseStore` traits with in-memory and PostgreSQL backends
//! - [`filter`] - typed filters and guard conditions shared by both sides
//! - [`models`] - notifications and leases
//! - [`config`] - TOML and environment configuration
//! - [`database`] - pool setup and embedded migrations
//! - [`events`] - in-process event bus
//! - [`error`] - structured error handling
//! - [`logging`] - tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use notifier_core::{Listener, Notifier, Timing};
//! use notifier_core::store::InMemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::default());
//!
//! let notifier = Notifier::new(store.clone());
//! notifier
//!     .store_global_event("cache_flush", &serde_json::json!({"region": "eu"}), Timing::immediate())
//!     .await?;
//!
//! let mut listener = Listener::new(store.clone(), store);
//! listener.set_event("cache_flush");
//! let batch = listener.fetch(10).await?;
//! assert_eq!(batch.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                              # Unit and in-memory integration tests
//! cargo test --features postgres-tests    # Adds PostgreSQL tests (needs DATABASE_URL)
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod filter;
pub mod listener;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CollectConfig, CollectRule, DatabaseConfig, ListenerConfig, NotifierConfig};
pub use error::{NotifierError, Result};
pub use events::{EventPublisher, PublishedEvent};
pub use filter::{Clause, Condition, FilterValue, NotificationFilter, Operator, Page, Predicate};
pub use listener::{BatchHandler, EventSelector, ListenOutcome, ListenSummary, Listener};
pub use models::{Lease, LeaseDomain, NewNotification, Notification, Scope};
pub use notifier::{EventCollector, Notifier, Timing};
pub use store::{EventStore, InMemoryStore, LeaseStore, PgNotificationStore, PollOutcome};
