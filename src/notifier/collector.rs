//! Declarative event collection.
//!
//! Routes events from an injected [`EventPublisher`] into notifier writes according to
//! [`CollectConfig`] rules: for every observed event, clear the listed events of the same
//! scope partition, then store the event itself with the configured delay and ttl.

use std::collections::HashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{Notifier, Timing};
use crate::config::{CollectConfig, CollectRule};
use crate::error::{NotifierError, Result};
use crate::events::{EventPublisher, PublishedEvent};
use crate::logging::log_error;

#[derive(Debug, Clone)]
struct Route {
    store: String,
    notifier: Notifier,
    rule: CollectRule,
}

/// Turns published events into stored notifications
#[derive(Debug, Clone)]
pub struct EventCollector {
    /// observed event name -> routes, in store order
    routes: HashMap<String, Vec<Route>>,
}

impl EventCollector {
    /// Build routes from per-store collect rules
    ///
    /// Every store named in `collectors` must have a notifier in `notifiers`.
    pub fn new(
        collectors: &HashMap<String, CollectConfig>,
        notifiers: &HashMap<String, Notifier>,
    ) -> Result<Self> {
        let mut stores: Vec<&String> = collectors.keys().collect();
        stores.sort();

        let mut routes: HashMap<String, Vec<Route>> = HashMap::new();
        for store in stores {
            let notifier = notifiers.get(store).ok_or_else(|| {
                NotifierError::configuration(format!("no notifier registered for store '{store}'"))
            })?;
            for (event, rule) in &collectors[store].collect_events {
                routes.entry(event.clone()).or_default().push(Route {
                    store: store.clone(),
                    notifier: notifier.clone(),
                    rule: rule.clone(),
                });
            }
        }
        Ok(Self { routes })
    }

    /// Names of the events this collector reacts to
    pub fn observed_events(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Apply every route for `event`, returning how many notifications were stored
    #[instrument(skip(self, event), fields(event = %event.name))]
    pub async fn collect(&self, event: &PublishedEvent) -> Result<usize> {
        let Some(routes) = self.routes.get(&event.name) else {
            return Ok(0);
        };
        for route in routes {
            Self::apply(route, event).await?;
        }
        Ok(routes.len())
    }

    async fn apply(route: &Route, event: &PublishedEvent) -> Result<()> {
        let scope = route.rule.scope();
        let scope_id = if route.notifier.store().is_scope_id_required(&scope) {
            let key = scope.id_key();
            Some(event.id_field(&key).ok_or_else(|| {
                NotifierError::invalid_argument(format!(
                    "event '{}' needs a non-negative integer '{key}' in its payload",
                    event.name
                ))
            })?)
        } else {
            None
        };

        for cleared in &route.rule.clear {
            route.notifier.clear_event(&scope, cleared, scope_id).await?;
        }
        let timing = Timing {
            delay_seconds: route.rule.delay,
            ttl_seconds: route.rule.ttl,
        };
        route
            .notifier
            .store_event(&scope, &event.name, &event.payload, scope_id, timing)
            .await?;
        debug!(store = %route.store, scope = %scope, scope_id = scope_id, "Collected event");
        Ok(())
    }

    /// Collect from `publisher` on a background task until the publisher is dropped
    ///
    /// The subscription is taken before this returns, so events published afterwards are
    /// never missed.
    pub fn spawn(self, publisher: &EventPublisher) -> JoinHandle<()> {
        let mut receiver = publisher.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.collect(&event).await {
                            log_error("event_collector", "collect", &e.to_string(), Some(&event.name));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Event collector lagged behind the publisher");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event publisher closed, stopping collection");
                        break;
                    }
                }
            }
        })
    }
}
