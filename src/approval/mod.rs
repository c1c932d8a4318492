//! Durable human-approval workflow.
//!
//! This module provides:
//! - [`ApprovalRecord`] - the persisted unit of suspended work
//! - [`ApprovalStatus`] state machine (`pending` → terminal, terminal final)
//! - [`store::ApprovalStore`] - the durable-state boundary
//! - [`notify::Notifier`] - the human-channel boundary
//! - [`engine::ApprovalEngine`] - the workflow orchestrator
//! - [`sweeper::TimeoutSweeper`] - the background expiry sweep
//!
//! Suspension is not a blocked thread: when an outcome needs a human, the
//! engine persists a pending record, notifies, and returns. Resumption is a
//! fresh call that loads the record - from this process or any other.

pub mod engine;
pub mod notify;
pub mod store;
pub mod sweeper;

pub use engine::{ApprovalEngine, EngineConfig, EngineError, WorkflowResult};
pub use notify::{
    ApprovalPrompt, LogNotifier, NotificationHandle, Notifier, NotifyError, SlackConfig,
    SlackNotifier,
};
pub use store::{ApprovalStore, MemoryApprovalStore, PendingUpdate, StoreError, UpdateOutcome};
pub use sweeper::{TimeoutSweeper, DEFAULT_SWEEP_INTERVAL};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Default approval timeout: 24 hours.
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: i64 = 24 * 3600;

// ============================================================================
// Approval Status
// ============================================================================

/// Lifecycle status of an approval record.
///
/// Transitions only `Pending → {Approved, Rejected, Expired, Cancelled}`.
/// Terminal states are final: re-applying a decision to a terminal record is
/// a no-op, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a human decision.
    Pending,
    /// Human approved.
    Approved,
    /// Human rejected.
    Rejected,
    /// Timed out without a decision.
    Expired,
    /// Explicitly cancelled before a decision.
    Cancelled,
}

impl ApprovalStatus {
    /// Returns true for final states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ============================================================================
// Resume Value
// ============================================================================

/// Value the workflow resumes with once a record turns terminal.
///
/// Set on every terminal transition: human decisions, expiry ("timeout") and
/// cancellation all produce one, so a resumed workflow never has to guess why
/// it woke up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeValue {
    /// Whether the suspended work may proceed. Only a human approval sets
    /// this to true; expiry and cancellation never do.
    pub approved: bool,
    /// What resolved the record: `"approve"`, `"reject"`, `"timeout"`,
    /// `"cancelled"`.
    pub decision: String,
    /// Free-form detail (cancellation reason, for example).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Approval Record
// ============================================================================

/// The durable record of a workflow suspended for human approval.
///
/// Created when an outcome requires approval; mutated exactly once by a human
/// decision, a cancellation, or the timeout sweep; never deleted explicitly
/// (the store's TTL reclaims it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Unique approval identifier (`approval_<12 hex>`).
    pub approval_id: String,
    /// Groups approval attempts for one event/thread. At most one pending
    /// record may exist per workflow id.
    pub workflow_id: String,
    /// Producer/agent whose verdict triggered the suspension.
    pub agent_name: String,
    /// Human-readable description of what triggered the request.
    pub trigger_description: String,
    /// Opaque context rendered into the human-facing message.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Current lifecycle status.
    pub status: ApprovalStatus,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// `created_at + timeout`, fixed at creation and never extended.
    pub expires_at: DateTime<Utc>,
    /// Raw human decision string, once made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Who decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    /// Resume value, present iff the record is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_value: Option<ResumeValue>,
    /// Handle of the notification message, if one was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_handle: Option<NotificationHandle>,
}

impl ApprovalRecord {
    /// Creates a new pending record with a generated approval id and an
    /// expiry of `created_at + timeout`.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        agent_name: impl Into<String>,
        trigger_description: impl Into<String>,
        context: BTreeMap<String, Value>,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            approval_id: generate_approval_id(),
            workflow_id: workflow_id.into(),
            agent_name: agent_name.into(),
            trigger_description: trigger_description.into(),
            context,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + timeout,
            decision: None,
            approver_id: None,
            resume_value: None,
            notification_handle: None,
        }
    }

    /// Returns true once the expiry deadline has passed.
    ///
    /// Checked against the clock at read time regardless of stored status,
    /// so a stale `pending` read still reports expiry correctly.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Generates an approval id of the form `approval_<12 hex>`.
#[must_use]
pub fn generate_approval_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("approval_{}", &hex[..12])
}
