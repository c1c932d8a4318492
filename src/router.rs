//! Event-type routing.
//!
//! Maps an event's declared type to the producers that should evaluate it.
//! The mapping is static configuration built at startup: known type strings
//! (including aliases such as `"pull_request"` / `"github_pull_request"`)
//! point at one or more registered producers, optionally restricted to a set
//! of sub-actions.
//!
//! Routing an unmapped type (or a filtered-out action) returns an empty list.
//! That outcome is expected and frequent - webhooks for unsupported event
//! types arrive all the time and must be acknowledged, not failed.

use crate::event::Event;
use crate::producer::{DecisionProducer, ProducerRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One route entry: a producer name plus an optional action allowlist.
#[derive(Debug, Clone)]
struct Binding {
    producer_name: &'static str,
    /// When set, only events whose `action` is in this list are routed.
    /// Events without an action pass the filter.
    allowed_actions: Option<&'static [&'static str]>,
}

/// Routes events to producers by declared type.
#[derive(Debug, Clone)]
pub struct Router {
    registry: ProducerRegistry,
    bindings: HashMap<&'static str, Vec<Binding>>,
}

impl Router {
    /// Creates a router with no bindings.
    #[must_use]
    pub fn new(registry: ProducerRegistry) -> Self {
        Self {
            registry,
            bindings: HashMap::new(),
        }
    }

    /// Creates a router with the standard bindings:
    ///
    /// - `pull_request`, `github_pull_request` → `release_review`
    ///   (actions `opened`, `synchronize`)
    /// - `stripe_invoice`, `stripe` → `budget_review`
    /// - `tech_debt_alert`, `tech_debt` → `tech_debt_review`
    #[must_use]
    pub fn with_default_bindings(registry: ProducerRegistry) -> Self {
        const PR_ACTIONS: &[&str] = &["opened", "synchronize"];

        let mut router = Self::new(registry);
        router.bind_filtered("pull_request", "release_review", PR_ACTIONS);
        router.bind_filtered("github_pull_request", "release_review", PR_ACTIONS);
        router.bind("stripe_invoice", "budget_review");
        router.bind("stripe", "budget_review");
        router.bind("tech_debt_alert", "tech_debt_review");
        router.bind("tech_debt", "tech_debt_review");
        router
    }

    /// Binds an event type to a producer for all actions.
    pub fn bind(&mut self, event_type: &'static str, producer_name: &'static str) {
        self.bindings.entry(event_type).or_default().push(Binding {
            producer_name,
            allowed_actions: None,
        });
    }

    /// Binds an event type to a producer, restricted to the given actions.
    pub fn bind_filtered(
        &mut self,
        event_type: &'static str,
        producer_name: &'static str,
        actions: &'static [&'static str],
    ) {
        self.bindings.entry(event_type).or_default().push(Binding {
            producer_name,
            allowed_actions: Some(actions),
        });
    }

    /// Resolves the producers for an event.
    ///
    /// Pure lookup, no state. An empty result means "ignore this event".
    #[must_use]
    pub fn route(&self, event: &Event) -> Vec<Arc<dyn DecisionProducer>> {
        let Some(bindings) = self.bindings.get(event.event_type.as_str()) else {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "No binding for event type, ignoring"
            );
            return Vec::new();
        };

        let mut producers = Vec::new();
        for binding in bindings {
            if let (Some(allowed), Some(action)) = (binding.allowed_actions, &event.action) {
                if !allowed.contains(&action.as_str()) {
                    debug!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        action = %action,
                        producer = binding.producer_name,
                        "Action filtered out, skipping binding"
                    );
                    continue;
                }
            }
            match self.registry.get(binding.producer_name) {
                Some(producer) => producers.push(producer),
                None => {
                    // Binding points at a producer that was never registered.
                    warn!(
                        event_type = %event.event_type,
                        producer = binding.producer_name,
                        "Bound producer not registered, skipping"
                    );
                }
            }
        }
        producers
    }
}
