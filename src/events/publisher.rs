use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcast publisher for application events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            published_at: chrono::Utc::now(),
        }
    }

    /// Non-negative integer stored under `key` in an object payload
    pub fn id_field(&self, key: &str) -> Option<i64> {
        self.payload
            .get(key)
            .and_then(Value::as_i64)
            .filter(|id| *id >= 0)
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and payload
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event_name: impl Into<String>, payload: Value) {
        // send only fails when nobody is subscribed
        let _ = self.sender.send(PublishedEvent::new(event_name, payload));
    }

    /// Serialize `payload` and publish it
    pub fn publish_serialized<T: Serialize>(
        &self,
        event_name: impl Into<String>,
        payload: &T,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_value(payload)?;
        self.publish(event_name, payload);
        Ok(())
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
