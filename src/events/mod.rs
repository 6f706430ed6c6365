//! # Event Bus
//!
//! In-process publish/subscribe used as the injectable source for declarative event
//! collection. Publishers never block on slow subscribers; a lagging subscriber skips ahead.

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
