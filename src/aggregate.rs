//! Verdict aggregation.
//!
//! Combines the verdicts for one event into a single [`Outcome`] under a
//! fixed precedence: block > warn > approve. There is no averaging; one
//! blocking signal vetoes the event.
//!
//! Human approval is required whenever the final decision is consequential
//! (warn or block), and also for an approve whose best confidence falls below
//! the auto-approve threshold - a low-confidence approve still needs review.

use crate::decision::{Decision, Outcome, Verdict};
use serde::Deserialize;

/// Aggregation configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AggregatorConfig {
    /// Approvals auto-resolve only when the maximum confidence across
    /// verdicts reaches this threshold.
    pub auto_approve_threshold: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 0.90,
        }
    }
}

/// Summary used when no producer ran for an event.
pub const NO_PRODUCERS_SUMMARY: &str = "no producers ran";

/// Aggregates verdicts into a final outcome.
///
/// An empty verdict list is not an error: an event the router could not
/// resolve (or whose producers all failed) degrades to a safe no-op approve
/// that requires no human attention.
#[must_use]
pub fn aggregate(verdicts: Vec<Verdict>, config: &AggregatorConfig) -> Outcome {
    if verdicts.is_empty() {
        return Outcome {
            final_decision: Decision::Approve,
            requires_human_approval: false,
            contributing_verdicts: Vec::new(),
            summary: NO_PRODUCERS_SUMMARY.to_string(),
        };
    }

    let final_decision = verdicts
        .iter()
        .map(|v| v.decision)
        .max()
        .unwrap_or(Decision::Approve);

    let max_confidence = verdicts
        .iter()
        .map(|v| v.confidence)
        .fold(0.0_f64, f64::max);

    let requires_human_approval = final_decision.is_consequential()
        || max_confidence < config.auto_approve_threshold;

    let summary = verdicts
        .iter()
        .map(|v| format!("{}({})", v.producer_name, v.decision))
        .collect::<Vec<_>>()
        .join(", ");

    Outcome {
        final_decision,
        requires_human_approval,
        contributing_verdicts: verdicts,
        summary,
    }
}
