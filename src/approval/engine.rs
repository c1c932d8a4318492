//! Workflow engine: event intake to resolution.
//!
//! One entry point drives the pipeline: [`ApprovalEngine::process_event`]
//! routes the event, collects verdicts, aggregates them, and either resolves
//! the event automatically or suspends it into a pending approval record.
//!
//! Ordering rules the engine lives by:
//!
//! - Persist before notify. The pending record is written first; only then is
//!   the human channel messaged. A notification failure degrades to a warning
//!   and the approval stays resolvable.
//! - The store is authoritative on resolution. Every terminal transition goes
//!   through the store's compare-and-set, so a human decision racing the
//!   timeout sweep lands exactly once.

use super::notify::{ApprovalPrompt, NotificationHandle, Notifier};
use super::store::{ApprovalStore, PendingUpdate, StoreError, UpdateOutcome};
use super::{ApprovalRecord, ApprovalStatus, ResumeValue, DEFAULT_APPROVAL_TIMEOUT_SECS};
use crate::aggregate::{aggregate, AggregatorConfig};
use crate::decision::Outcome;
use crate::event::Event;
use crate::metrics::EngineMetrics;
use crate::router::Router;
use chrono::{Duration, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an approval stays open before it expires.
    pub approval_timeout: Duration,
    /// Aggregation settings (auto-approve threshold).
    pub aggregator: AggregatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::seconds(DEFAULT_APPROVAL_TIMEOUT_SECS),
            aggregator: AggregatorConfig::default(),
        }
    }
}

// ============================================================================
// Errors and results
// ============================================================================

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage failed; the operation did not happen.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A human decision string the engine does not understand.
    #[error("Invalid decision '{decision}', expected 'approve' or 'reject'")]
    InvalidDecision {
        /// The rejected input
        decision: String,
    },
}

/// What processing an event produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowResult {
    /// No producer is bound to this event type (or action); acknowledged
    /// and dropped.
    Ignored,
    /// The outcome cleared the auto-approve gate; no human involved.
    AutoResolved {
        /// The aggregated outcome
        outcome: Outcome,
    },
    /// The outcome needs a human; a pending record was persisted.
    Suspended {
        /// Id of the pending approval
        approval_id: String,
        /// The aggregated outcome that forced the suspension
        outcome: Outcome,
    },
    /// The workflow already has a live approval; no new record was created.
    AlreadyPending {
        /// Id of the existing approval
        approval_id: String,
    },
}

// ============================================================================
// Engine
// ============================================================================

/// Drives events through routing, aggregation, and the approval lifecycle.
pub struct ApprovalEngine {
    router: Router,
    store: Arc<dyn ApprovalStore>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    metrics: EngineMetrics,
}

impl ApprovalEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        router: Router,
        store: Arc<dyn ApprovalStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            router,
            store,
            notifier,
            config,
            metrics,
        }
    }

    /// Processes one inbound event end to end.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] only when persisting the pending record
    /// fails; evaluation and notification failures degrade instead.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process_event(&self, event: &Event) -> Result<WorkflowResult, EngineError> {
        let producers = self.router.route(event);
        if producers.is_empty() {
            self.metrics.record_event("ignored");
            return Ok(WorkflowResult::Ignored);
        }

        let evaluations = join_all(producers.iter().map(|p| p.evaluate(event))).await;

        let mut verdicts = Vec::with_capacity(producers.len());
        for (producer, evaluation) in producers.iter().zip(evaluations) {
            match evaluation {
                Ok(verdict) => {
                    self.metrics
                        .record_verdict(&verdict.producer_name, &verdict.decision.to_string());
                    verdicts.push(verdict);
                }
                Err(e) => {
                    // A failed producer must not take the pipeline down with
                    // it; the remaining verdicts still aggregate.
                    warn!(producer = producer.name(), error = %e, "Producer evaluation failed");
                }
            }
        }

        let outcome = aggregate(verdicts, &self.config.aggregator);
        info!(
            final_decision = %outcome.final_decision,
            requires_approval = outcome.requires_human_approval,
            summary = %outcome.summary,
            "Aggregated event outcome"
        );

        if !outcome.requires_human_approval {
            self.metrics.record_event("auto_resolved");
            return Ok(WorkflowResult::AutoResolved { outcome });
        }

        self.suspend(event, outcome).await
    }

    /// Persists a pending record for the outcome and notifies the human
    /// channel. Persist-before-notify: the record exists (and is resolvable)
    /// even if the notification never lands.
    async fn suspend(&self, event: &Event, outcome: Outcome) -> Result<WorkflowResult, EngineError> {
        let agent_name = outcome
            .contributing_verdicts
            .iter()
            .max_by_key(|v| v.decision)
            .map_or_else(|| "aggregate".to_string(), |v| v.producer_name.clone());

        let record = ApprovalRecord::new(
            event.id.clone(),
            agent_name,
            outcome.summary.clone(),
            approval_context(event, &outcome),
            self.config.approval_timeout,
        );

        match self.store.create_pending(&record).await {
            Ok(()) => {}
            Err(StoreError::WorkflowConflict {
                existing_approval_id,
                ..
            }) => {
                debug!(
                    approval_id = %existing_approval_id,
                    "Workflow already has a live approval, converging on it"
                );
                self.metrics.record_event("already_pending");
                return Ok(WorkflowResult::AlreadyPending {
                    approval_id: existing_approval_id,
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.metrics.record_event("suspended");
        self.metrics.record_created();

        let prompt = ApprovalPrompt::from_record(&record);
        match self.notifier.notify(&prompt).await {
            Ok(handle) => self.attach_handle(&record.approval_id, handle).await,
            Err(e) => {
                warn!(
                    approval_id = %record.approval_id,
                    notifier = self.notifier.name(),
                    error = %e,
                    "Notification failed, approval remains pending and resolvable"
                );
            }
        }

        info!(
            approval_id = %record.approval_id,
            workflow_id = %record.workflow_id,
            expires_at = %record.expires_at,
            "Suspended for human approval"
        );

        Ok(WorkflowResult::Suspended {
            approval_id: record.approval_id,
            outcome,
        })
    }

    /// Attaches the notification handle via the conditional update so a
    /// resolution that raced the send is never clobbered.
    async fn attach_handle(&self, approval_id: &str, handle: NotificationHandle) {
        match self
            .store
            .update_pending(approval_id, PendingUpdate::AttachHandle(handle))
            .await
        {
            Ok(UpdateOutcome::Applied(_)) => {}
            Ok(UpdateOutcome::AlreadyTerminal(record)) => {
                debug!(
                    approval_id,
                    status = %record.status,
                    "Approval resolved before the notification handle landed"
                );
            }
            Err(e) => {
                warn!(approval_id, error = %e, "Failed to attach notification handle");
            }
        }
    }

    /// Applies a human decision.
    ///
    /// Idempotent: resolving an already-terminal approval returns the stored
    /// record unchanged, never an error. The decision string must be
    /// `approve` or `reject`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidDecision`] for unknown decision strings,
    /// [`EngineError::Store`] when the record is missing or storage fails.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        approval_id: &str,
        decision: &str,
        approver_id: &str,
    ) -> Result<ApprovalRecord, EngineError> {
        let (status, approved) = match decision {
            "approve" => (ApprovalStatus::Approved, true),
            "reject" => (ApprovalStatus::Rejected, false),
            other => {
                return Err(EngineError::InvalidDecision {
                    decision: other.to_string(),
                })
            }
        };

        let update = PendingUpdate::Resolve {
            status,
            decision: Some(decision.to_string()),
            approver_id: Some(approver_id.to_string()),
            resume_value: ResumeValue {
                approved,
                decision: decision.to_string(),
                reason: None,
            },
        };

        match self.store.update_pending(approval_id, update).await? {
            UpdateOutcome::Applied(record) => {
                info!(
                    approval_id,
                    decision,
                    approver_id,
                    "Approval resolved by human decision"
                );
                self.record_resolution(&record);
                self.close_notification(&record).await;
                Ok(record)
            }
            UpdateOutcome::AlreadyTerminal(record) => {
                debug!(
                    approval_id,
                    status = %record.status,
                    "Approval already terminal, decision is a no-op"
                );
                Ok(record)
            }
        }
    }

    /// Cancels a pending approval with an optional reason.
    ///
    /// Idempotent like [`resolve`](Self::resolve): cancelling a terminal
    /// record returns it unchanged.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] when the record is missing or storage fails.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        approval_id: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRecord, EngineError> {
        let update = PendingUpdate::Resolve {
            status: ApprovalStatus::Cancelled,
            decision: Some("cancelled".to_string()),
            approver_id: None,
            resume_value: ResumeValue {
                approved: false,
                decision: "cancelled".to_string(),
                reason,
            },
        };

        match self.store.update_pending(approval_id, update).await? {
            UpdateOutcome::Applied(record) => {
                info!(approval_id, "Approval cancelled");
                self.record_resolution(&record);
                self.close_notification(&record).await;
                Ok(record)
            }
            UpdateOutcome::AlreadyTerminal(record) => Ok(record),
        }
    }

    /// Expires every pending approval whose deadline has passed. Returns the
    /// number of records this sweep transitioned (records another racer
    /// resolved first do not count).
    pub async fn sweep_expired(&self) -> Result<usize, EngineError> {
        let pending = self.store.list_pending().await?;
        let mut expired = 0;

        for record in pending.into_iter().filter(ApprovalRecord::is_expired) {
            let update = PendingUpdate::Resolve {
                status: ApprovalStatus::Expired,
                decision: None,
                approver_id: None,
                resume_value: ResumeValue {
                    approved: false,
                    decision: "timeout".to_string(),
                    reason: None,
                },
            };
            match self.store.update_pending(&record.approval_id, update).await {
                Ok(UpdateOutcome::Applied(record)) => {
                    info!(
                        approval_id = %record.approval_id,
                        workflow_id = %record.workflow_id,
                        "Approval expired without a decision"
                    );
                    self.record_resolution(&record);
                    self.close_notification(&record).await;
                    expired += 1;
                }
                Ok(UpdateOutcome::AlreadyTerminal(_)) => {}
                Err(e) => {
                    warn!(approval_id = %record.approval_id, error = %e, "Failed to expire approval");
                }
            }
        }

        self.store.purge().await?;
        Ok(expired)
    }

    /// Fetches an approval record.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] on storage failure.
    pub async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRecord>, EngineError> {
        Ok(self.store.get(approval_id).await?)
    }

    /// Lists pending approvals.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] on storage failure.
    pub async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, EngineError> {
        Ok(self.store.list_pending().await?)
    }

    fn record_resolution(&self, record: &ApprovalRecord) {
        let latency = (Utc::now() - record.created_at).num_milliseconds() as f64 / 1000.0;
        self.metrics
            .record_resolved(&record.status.to_string(), latency.max(0.0));
    }

    /// Best-effort update of the original notification message.
    async fn close_notification(&self, record: &ApprovalRecord) {
        if let Some(handle) = &record.notification_handle {
            if let Err(e) = self.notifier.close(handle, &record.status.to_string()).await {
                debug!(
                    approval_id = %record.approval_id,
                    error = %e,
                    "Failed to close notification message"
                );
            }
        }
    }
}

/// Context rendered into the human-facing prompt and kept on the record.
fn approval_context(event: &Event, outcome: &Outcome) -> BTreeMap<String, Value> {
    let reasons: Vec<&str> = outcome
        .contributing_verdicts
        .iter()
        .flat_map(|v| v.reasons.iter().map(String::as_str))
        .collect();

    let mut context = BTreeMap::new();
    context.insert(
        "event_type".to_string(),
        Value::String(event.event_type.clone()),
    );
    context.insert(
        "final_decision".to_string(),
        serde_json::json!(outcome.final_decision),
    );
    context.insert("reasons".to_string(), serde_json::json!(reasons));
    if let Some(action) = &event.action {
        context.insert("action".to_string(), Value::String(action.clone()));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::notify::{LogNotifier, NotifyError};
    use crate::approval::store::MemoryApprovalStore;
    use crate::decision::{Decision, Verdict};
    use crate::producer::{DecisionProducer, ProducerError, ProducerRegistry};
    use async_trait::async_trait;

    struct FixedProducer {
        name: &'static str,
        decision: Decision,
        confidence: f64,
    }

    #[async_trait]
    impl DecisionProducer for FixedProducer {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn evaluate(&self, _event: &Event) -> Result<Verdict, ProducerError> {
            Ok(Verdict::new(self.name, self.decision, self.confidence)
                .with_reason("fixed verdict"))
        }
    }

    struct FailingProducer;

    #[async_trait]
    impl DecisionProducer for FailingProducer {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn evaluate(&self, event: &Event) -> Result<Verdict, ProducerError> {
            Err(ProducerError::Evaluation {
                producer: "failing".to_string(),
                event_id: event.id.clone(),
                details: "boom".to_string(),
            })
        }
    }

    struct RefusingNotifier;

    #[async_trait]
    impl Notifier for RefusingNotifier {
        async fn notify(&self, _: &ApprovalPrompt) -> Result<NotificationHandle, NotifyError> {
            Err(NotifyError::PostFailed {
                reason: "down".to_string(),
                retriable: true,
            })
        }

        async fn close(&self, _: &NotificationHandle, _: &str) -> Result<(), NotifyError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "refusing"
        }
    }

    fn engine_with(
        producer: Arc<dyn DecisionProducer>,
        notifier: Arc<dyn Notifier>,
    ) -> (ApprovalEngine, Arc<MemoryApprovalStore>) {
        let mut registry = ProducerRegistry::new();
        let name = producer.name();
        registry.register(producer);
        let mut router = Router::new(registry);
        router.bind("pull_request", name);

        let store = Arc::new(MemoryApprovalStore::new());
        let engine = ApprovalEngine::new(
            router,
            store.clone(),
            notifier,
            EngineConfig::default(),
            EngineMetrics::disabled(),
        );
        (engine, store)
    }

    fn pr_event() -> Event {
        Event::new("pull_request", serde_json::json!({"pr_number": 7})).with_action("opened")
    }

    #[tokio::test]
    async fn confident_approve_auto_resolves() {
        let (engine, store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Approve,
                confidence: 0.95,
            }),
            Arc::new(LogNotifier),
        );

        let result = engine.process_event(&pr_event()).await.unwrap();
        match result {
            WorkflowResult::AutoResolved { outcome } => {
                assert_eq!(outcome.final_decision, Decision::Approve);
            }
            other => panic!("expected auto-resolve, got {other:?}"),
        }
        assert!(store.is_empty(), "no record persisted for auto-resolve");
    }

    #[tokio::test]
    async fn consequential_outcome_suspends_with_pending_record() {
        let (engine, store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Warn,
                confidence: 0.99,
            }),
            Arc::new(LogNotifier),
        );

        let result = engine.process_event(&pr_event()).await.unwrap();
        let approval_id = match result {
            WorkflowResult::Suspended { approval_id, .. } => approval_id,
            other => panic!("expected suspension, got {other:?}"),
        };

        let record = store.get(&approval_id).await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(record.agent_name, "release_review");
        assert!(record.notification_handle.is_some());
        assert_eq!(record.context["final_decision"], serde_json::json!("warn"));
    }

    #[tokio::test]
    async fn duplicate_event_converges_on_the_live_approval() {
        let (engine, _store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Block,
                confidence: 0.9,
            }),
            Arc::new(LogNotifier),
        );

        let event = pr_event();
        let first = engine.process_event(&event).await.unwrap();
        let WorkflowResult::Suspended { approval_id, .. } = first else {
            panic!("expected suspension");
        };

        let second = engine.process_event(&event).await.unwrap();
        match second {
            WorkflowResult::AlreadyPending { approval_id: id } => assert_eq!(id, approval_id),
            other => panic!("expected existing approval, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notify_failure_still_suspends() {
        let (engine, store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Warn,
                confidence: 0.8,
            }),
            Arc::new(RefusingNotifier),
        );

        let result = engine.process_event(&pr_event()).await.unwrap();
        let WorkflowResult::Suspended { approval_id, .. } = result else {
            panic!("expected suspension despite notifier failure");
        };

        let record = store.get(&approval_id).await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert!(record.notification_handle.is_none());
    }

    #[tokio::test]
    async fn all_producers_failing_degrades_to_no_op() {
        let (engine, store) = engine_with(Arc::new(FailingProducer), Arc::new(LogNotifier));

        let result = engine.process_event(&pr_event()).await.unwrap();
        match result {
            WorkflowResult::AutoResolved { outcome } => {
                assert!(!outcome.requires_human_approval);
                assert!(outcome.contributing_verdicts.is_empty());
            }
            other => panic!("expected degraded auto-resolve, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn resolve_approve_is_idempotent() {
        let (engine, _store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Warn,
                confidence: 0.8,
            }),
            Arc::new(LogNotifier),
        );

        let WorkflowResult::Suspended { approval_id, .. } =
            engine.process_event(&pr_event()).await.unwrap()
        else {
            panic!("expected suspension");
        };

        let first = engine.resolve(&approval_id, "approve", "alice").await.unwrap();
        assert_eq!(first.status, ApprovalStatus::Approved);
        assert_eq!(first.approver_id.as_deref(), Some("alice"));
        let resume = first.resume_value.unwrap();
        assert!(resume.approved);
        assert_eq!(resume.decision, "approve");

        // A repeat (or a conflicting reject) returns the stored state.
        let second = engine.resolve(&approval_id, "reject", "bob").await.unwrap();
        assert_eq!(second.status, ApprovalStatus::Approved);
        assert_eq!(second.approver_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn unknown_decision_string_is_rejected() {
        let (engine, _store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Warn,
                confidence: 0.8,
            }),
            Arc::new(LogNotifier),
        );

        let WorkflowResult::Suspended { approval_id, .. } =
            engine.process_event(&pr_event()).await.unwrap()
        else {
            panic!("expected suspension");
        };

        let err = engine.resolve(&approval_id, "maybe", "alice").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidDecision { .. }));
    }

    #[tokio::test]
    async fn cancel_records_the_reason() {
        let (engine, _store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Block,
                confidence: 0.9,
            }),
            Arc::new(LogNotifier),
        );

        let WorkflowResult::Suspended { approval_id, .. } =
            engine.process_event(&pr_event()).await.unwrap()
        else {
            panic!("expected suspension");
        };

        let record = engine
            .cancel(&approval_id, Some("superseded".to_string()))
            .await
            .unwrap();
        assert_eq!(record.status, ApprovalStatus::Cancelled);
        let resume = record.resume_value.unwrap();
        assert!(!resume.approved);
        assert_eq!(resume.decision, "cancelled");
        assert_eq!(resume.reason.as_deref(), Some("superseded"));
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_approvals() {
        let store = Arc::new(MemoryApprovalStore::new());
        let engine = ApprovalEngine::new(
            Router::new(ProducerRegistry::new()),
            store.clone(),
            Arc::new(LogNotifier),
            EngineConfig::default(),
            EngineMetrics::disabled(),
        );

        let mut overdue = ApprovalRecord::new(
            "wf-overdue",
            "release_review",
            "stale",
            BTreeMap::new(),
            Duration::hours(24),
        );
        overdue.expires_at = chrono::Utc::now() - Duration::minutes(1);
        store.create_pending(&overdue).await.unwrap();

        let fresh = ApprovalRecord::new(
            "wf-fresh",
            "release_review",
            "fresh",
            BTreeMap::new(),
            Duration::hours(24),
        );
        store.create_pending(&fresh).await.unwrap();

        let expired = engine.sweep_expired().await.unwrap();
        assert_eq!(expired, 1);

        let overdue = store.get(&overdue.approval_id).await.unwrap().unwrap();
        assert_eq!(overdue.status, ApprovalStatus::Expired);
        let resume = overdue.resume_value.unwrap();
        assert!(!resume.approved);
        assert_eq!(resume.decision, "timeout");

        let fresh = store.get(&fresh.approval_id).await.unwrap().unwrap();
        assert_eq!(fresh.status, ApprovalStatus::Pending);

        // A second sweep finds nothing new.
        assert_eq!(engine.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unmapped_event_is_ignored() {
        let (engine, _store) = engine_with(
            Arc::new(FixedProducer {
                name: "release_review",
                decision: Decision::Approve,
                confidence: 0.95,
            }),
            Arc::new(LogNotifier),
        );

        let event = Event::new("unknown_type", serde_json::json!({}));
        let result = engine.process_event(&event).await.unwrap();
        assert!(matches!(result, WorkflowResult::Ignored));
    }
}
