pub mod lease;
pub mod notification;

// Re-export core models for easy access
pub use lease::{Lease, LeaseClaim, LeaseDomain};
pub use notification::{NewNotification, Notification, Scope};
