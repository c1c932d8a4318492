//! Normalized inbound event.
//!
//! An [`Event`] is the single unit of work the engine processes: a webhook
//! delivery (PR opened, invoice created, debt scan finished) reduced to a
//! stable envelope. Events are immutable once received; `event_type` drives
//! routing and `action` drives per-binding filtering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A normalized inbound occurrence that triggers evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Delivery/event identifier. Generated if the transport did not carry one.
    pub id: String,
    /// Declared type, e.g. `"pull_request"` or `"stripe_invoice"`.
    pub event_type: String,
    /// Sub-action within the type, e.g. `"opened"` for a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// When the event occurred (receipt time if the source did not say).
    pub occurred_at: DateTime<Utc>,
    /// Raw source payload, passed through to producers untouched.
    pub payload: Value,
}

impl Event {
    /// Creates an event with a generated id and the current timestamp.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            action: None,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Sets the sub-action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets an explicit id (e.g. the transport's delivery id).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}
