//! # Notifier Error Types
//!
//! Structured error handling for producers, consumers and stores using thiserror.
//! Every public operation returns [`Result`], and errors propagate synchronously to the
//! caller of the operation that raised them.

use thiserror::Error;

/// Errors raised by the notification queue
#[derive(Error, Debug)]
pub enum NotifierError {
    /// Bad chunk size, offset, scope id or event, or a scope id missing where required
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A scope id was supplied while the scope is global
    #[error("Non-logic scope: {message}")]
    NonLogicScope { message: String },

    /// An operation was invoked in a state that does not allow it
    #[error("Logic error: {message}")]
    Logic { message: String },

    /// The lease for the contention domain is held by another session
    #[error("Could not acquire lock to process notifications for filter: {filter}")]
    Locked { filter: String },

    /// The store signalled a definitive failure
    #[error("Query failed: {operation}: {message}")]
    QueryFailed { operation: String, message: String },

    /// The batch callback failed; the session was aborted
    #[error("Callback failed: {source}")]
    CallbackFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl NotifierError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a non-logic scope error
    pub fn non_logic_scope(message: impl Into<String>) -> Self {
        Self::NonLogicScope {
            message: message.into(),
        }
    }

    /// Create a logic error
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic {
            message: message.into(),
        }
    }

    /// Create a locked error naming the filter that could not be served
    pub fn locked(filter: impl Into<String>) -> Self {
        Self::Locked {
            filter: filter.into(),
        }
    }

    /// Create a query failure
    pub fn query_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure raised by a batch callback
    pub fn callback_failed(source: anyhow::Error) -> Self {
        Self::CallbackFailed { source }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether a retry after this error may succeed without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::QueryFailed { .. })
    }
}

impl From<sqlx::Error> for NotifierError {
    fn from(err: sqlx::Error) -> Self {
        Self::query_failed("database", err.to_string())
    }
}

impl From<serde_json::Error> for NotifierError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<config::ConfigError> for NotifierError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NotifierError>;
