//! # Structured Logging Module
//!
//! Environment-aware structured logging for producers, consumers and background collectors.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// `RUST_LOG` wins over the environment-derived level. `NOTIFIER_LOG_FORMAT=json` switches
/// console output to JSON lines.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if json_output() {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("NOTIFIER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn json_output() -> bool {
    std::env::var("NOTIFIER_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for lease lifecycle changes
pub fn log_lease_operation(
    operation: &str,
    domain: &str,
    session: &str,
    offset: Option<i64>,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        domain = %domain,
        session = %session,
        offset = offset,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🔒 LEASE_OPERATION"
    );
}

/// Log structured data for producer writes and clears
pub fn log_notification_operation(
    operation: &str,
    table: &str,
    event: &str,
    scope: &str,
    scope_id: Option<i64>,
    count: Option<u64>,
) {
    tracing::info!(
        operation = %operation,
        table = %table,
        event = %event,
        scope = %scope,
        scope_id = scope_id,
        count = count,
        timestamp = %Utc::now().to_rfc3339(),
        "📨 NOTIFICATION_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
