//! Durable approval storage.
//!
//! [`ApprovalStore`] is the only durable-state boundary the workflow engine
//! depends on: a keyed record store with TTL and a compare-and-set update for
//! pending records. The engine performs at most one store write per state
//! transition and treats the store as its serialization point, so a race
//! between a human decision and the timeout sweep resolves exactly once -
//! the loser observes [`UpdateOutcome::AlreadyTerminal`] with the winner's
//! record.
//!
//! [`MemoryApprovalStore`] is the in-process implementation. Anything with
//! the same guarantees (a Redis `SET ... EX` plus a conditional update)
//! satisfies the trait for multi-process deployments.

use super::{ApprovalRecord, ApprovalStatus, NotificationHandle, ResumeValue};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Errors
// ============================================================================

/// Errors from approval storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record with the given approval id.
    #[error("Approval '{approval_id}' not found")]
    NotFound {
        /// The missing approval id
        approval_id: String,
    },

    /// A pending approval already exists for the workflow.
    #[error("Workflow '{workflow_id}' already has pending approval '{existing_approval_id}'")]
    WorkflowConflict {
        /// The conflicting workflow id
        workflow_id: String,
        /// The approval id of the live record, so callers can converge on it
        existing_approval_id: String,
    },

    /// The backend failed; the transition must be treated as not-happened.
    #[error("Store backend error: {details}")]
    Backend {
        /// Failure details
        details: String,
    },
}

// ============================================================================
// Conditional updates
// ============================================================================

/// Mutation applied to a record only while it is still pending.
#[derive(Debug, Clone)]
pub enum PendingUpdate {
    /// Attach the notification handle after a successful send.
    AttachHandle(NotificationHandle),
    /// Resolve the record into a terminal status.
    Resolve {
        /// Terminal status to move to
        status: ApprovalStatus,
        /// Raw decision string, when a human decided
        decision: Option<String>,
        /// Who decided, when a human decided
        approver_id: Option<String>,
        /// Value the workflow resumes with
        resume_value: ResumeValue,
    },
}

/// Result of a conditional update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The record was pending; the update was applied.
    Applied(ApprovalRecord),
    /// The record was already terminal; nothing was written. Carries the
    /// stored record so the caller can report the winner's state.
    AlreadyTerminal(ApprovalRecord),
}

// ============================================================================
// ApprovalStore
// ============================================================================

/// Durable, keyed, TTL-capable storage for approval records.
#[async_trait]
pub trait ApprovalStore: Send + Sync + std::fmt::Debug {
    /// Full-record upsert. Overwrites completely; callers own the
    /// read-modify-write cycle.
    async fn put(&self, record: &ApprovalRecord) -> Result<(), StoreError>;

    /// Fetches a record by approval id.
    async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Lists records currently stored as pending. Stale reads are tolerated:
    /// expiry is re-checked against `expires_at` by the sweep regardless of
    /// the stored status.
    async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, StoreError>;

    /// Returns the approval id of the live (pending) record for a workflow.
    async fn find_by_workflow(&self, workflow_id: &str) -> Result<Option<String>, StoreError>;

    /// Inserts a new pending record, enforcing at most one live record per
    /// workflow id. On conflict, returns [`StoreError::WorkflowConflict`]
    /// carrying the existing approval id.
    async fn create_pending(&self, record: &ApprovalRecord) -> Result<(), StoreError>;

    /// Applies an update iff the record is still pending (compare-and-set).
    async fn update_pending(
        &self,
        approval_id: &str,
        update: PendingUpdate,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Reclaims records past their retention window. Backends with native
    /// TTL (Redis) need no explicit purge.
    async fn purge(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory approval store with concurrent access and TTL retention.
#[derive(Debug)]
pub struct MemoryApprovalStore {
    /// Records keyed by approval id.
    records: DashMap<String, ApprovalRecord>,
    /// Pending-record index: workflow id → approval id.
    by_workflow: DashMap<String, String>,
    /// How long records are kept past their expiry deadline.
    retention: Duration,
}

impl MemoryApprovalStore {
    /// Creates a store that retains records for one hour past expiry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(1))
    }

    /// Creates a store with a custom post-expiry retention window.
    #[must_use]
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            by_workflow: DashMap::new(),
            retention,
        }
    }

    /// Number of stored records (all statuses).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn drop_workflow_index(&self, workflow_id: &str, approval_id: &str) {
        self.by_workflow
            .remove_if(workflow_id, |_, live_id| live_id == approval_id);
    }
}

impl Default for MemoryApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn put(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        if record.status == ApprovalStatus::Pending {
            self.by_workflow
                .insert(record.workflow_id.clone(), record.approval_id.clone());
        } else {
            self.drop_workflow_index(&record.workflow_id, &record.approval_id);
        }
        self.records
            .insert(record.approval_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(self.records.get(approval_id).map(|r| r.clone()))
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .map(|r| r.clone())
            .collect())
    }

    async fn find_by_workflow(&self, workflow_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.by_workflow.get(workflow_id).map(|id| id.clone()))
    }

    async fn create_pending(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        if record.status != ApprovalStatus::Pending {
            return Err(StoreError::Backend {
                details: "create_pending requires a pending record".to_string(),
            });
        }
        // The entry guard makes the check-and-reserve atomic per workflow.
        match self.by_workflow.entry(record.workflow_id.clone()) {
            Entry::Occupied(existing) => Err(StoreError::WorkflowConflict {
                workflow_id: record.workflow_id.clone(),
                existing_approval_id: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.approval_id.clone());
                self.records
                    .insert(record.approval_id.clone(), record.clone());
                Ok(())
            }
        }
    }

    async fn update_pending(
        &self,
        approval_id: &str,
        update: PendingUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut entry =
            self.records
                .get_mut(approval_id)
                .ok_or_else(|| StoreError::NotFound {
                    approval_id: approval_id.to_string(),
                })?;

        if entry.status.is_terminal() {
            return Ok(UpdateOutcome::AlreadyTerminal(entry.clone()));
        }

        match update {
            PendingUpdate::AttachHandle(handle) => {
                entry.notification_handle = Some(handle);
                Ok(UpdateOutcome::Applied(entry.clone()))
            }
            PendingUpdate::Resolve {
                status,
                decision,
                approver_id,
                resume_value,
            } => {
                if !status.is_terminal() {
                    return Err(StoreError::Backend {
                        details: format!("resolution status must be terminal, got '{status}'"),
                    });
                }
                entry.status = status;
                entry.decision = decision;
                entry.approver_id = approver_id;
                entry.resume_value = Some(resume_value);

                let updated = entry.clone();
                // Release the record guard before touching the workflow
                // index; create_pending takes the locks in the other order.
                drop(entry);
                self.drop_workflow_index(&updated.workflow_id, approval_id);
                Ok(UpdateOutcome::Applied(updated))
            }
        }
    }

    async fn purge(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let overdue: Vec<(String, String)> = self
            .records
            .iter()
            .filter(|r| now > r.expires_at + self.retention)
            .map(|r| (r.approval_id.clone(), r.workflow_id.clone()))
            .collect();

        let count = overdue.len();
        for (approval_id, workflow_id) in overdue {
            self.records.remove(&approval_id);
            self.drop_workflow_index(&workflow_id, &approval_id);
        }
        if count > 0 {
            debug!(purged = count, "Purged approval records past retention");
        }
        Ok(count)
    }
}
