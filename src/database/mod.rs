//! # Database Operations
//!
//! Pool construction and schema setup for the PostgreSQL backend.
//!
//! ## Key Components
//!
//! - [`connection`] - pool creation from [`DatabaseConfig`](crate::config::DatabaseConfig),
//!   embedded migrations and health checks
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use notifier_core::config::DatabaseConfig;
//! use notifier_core::database::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! let store = db.notification_store()?;
//! # Ok(())
//! # }
//! ```

pub mod connection;

pub use connection::{DatabaseConnection, MIGRATOR};
