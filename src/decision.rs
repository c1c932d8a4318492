//! The decision contract shared by every producer and the aggregator.
//!
//! This module provides:
//! - [`Decision`] - the three-valued policy verdict (approve/warn/block)
//! - [`Verdict`] - one producer's opinion on one event
//! - [`Outcome`] - the aggregated final opinion across producers
//!
//! All three shapes are immutable once constructed: each state transition in
//! the workflow builds a new, fully-specified value instead of merging fields
//! into an existing one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Decision
// ============================================================================

/// Policy decision emitted by a producer or the aggregator.
///
/// Ordering of severity is `Block > Warn > Approve`; the aggregator relies on
/// the derived `Ord` for its precedence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// No concern, safe to proceed.
    Approve,
    /// Concerning but not disqualifying; a human should look.
    Warn,
    /// A single blocking signal vetoes the whole event.
    Block,
}

impl Decision {
    /// Returns true for decisions that always require a human in the loop.
    #[must_use]
    pub fn is_consequential(&self) -> bool {
        matches!(self, Self::Warn | Self::Block)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
        }
    }
}

// ============================================================================
// Verdict
// ============================================================================

/// One producer's opinion on one event.
///
/// Produced exactly once per producer invocation and never mutated. Multiple
/// verdicts exist for one event when more than one producer is routed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Name of the producer that emitted this verdict.
    pub producer_name: String,
    /// The producer's decision.
    pub decision: Decision,
    /// Confidence in the decision, clamped to `[0.0, 1.0]`.
    pub confidence: f64,
    /// Ordered human-readable reasons backing the decision.
    pub reasons: Vec<String>,
    /// Opaque supporting data for renderers and audit.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub supporting_data: BTreeMap<String, Value>,
}

impl Verdict {
    /// Creates a verdict with the confidence clamped into `[0.0, 1.0]`.
    #[must_use]
    pub fn new(producer_name: impl Into<String>, decision: Decision, confidence: f64) -> Self {
        Self {
            producer_name: producer_name.into(),
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            reasons: Vec::new(),
            supporting_data: BTreeMap::new(),
        }
    }

    /// Appends a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Attaches a supporting-data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.supporting_data.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// The aggregated final opinion across all producers for one event.
///
/// Computed once by [`crate::aggregate::aggregate`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Final decision under the block > warn > approve precedence.
    pub final_decision: Decision,
    /// Whether the workflow must suspend for human approval.
    pub requires_human_approval: bool,
    /// The verdicts that contributed, in producer invocation order.
    pub contributing_verdicts: Vec<Verdict>,
    /// `"name(decision)"` per contributing verdict, invocation order.
    pub summary: String,
}
