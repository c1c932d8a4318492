//! Tech-debt review producer for debt-scan events.
//!
//! Scores a scan report by its reported debt-item count. The scan itself
//! (TODO counting, dead-code detection) happens upstream; this producer only
//! judges the summary numbers.

use super::{DecisionProducer, ProducerError};
use crate::decision::{Decision, Verdict};
use crate::event::Event;
use async_trait::async_trait;

/// Reviews tech-debt scan events.
#[derive(Debug)]
pub struct TechDebtReviewProducer {
    /// Scans at or above this many debt items warn.
    warn_items: u64,
    /// Scans at or above this many debt items block.
    block_items: u64,
}

impl TechDebtReviewProducer {
    /// Producer name as used in routing bindings.
    pub const NAME: &'static str = "tech_debt_review";

    /// Creates the producer with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            warn_items: 25,
            block_items: 75,
        }
    }
}

impl Default for TechDebtReviewProducer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionProducer for TechDebtReviewProducer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn evaluate(&self, event: &Event) -> Result<Verdict, ProducerError> {
        let debt_items = event
            .payload
            .get("debt_items")
            .and_then(|v| v.as_array().map(|a| a.len() as u64).or_else(|| v.as_u64()))
            .or_else(|| event.payload.get("todo_count").and_then(|v| v.as_u64()))
            .unwrap_or(0);

        let verdict = if debt_items >= self.block_items {
            Verdict::new(Self::NAME, Decision::Block, 0.85)
                .with_reason(format!("{debt_items} debt items exceed the block ceiling"))
        } else if debt_items >= self.warn_items {
            Verdict::new(Self::NAME, Decision::Warn, 0.8)
                .with_reason(format!("{debt_items} debt items exceed the warn ceiling"))
        } else {
            Verdict::new(Self::NAME, Decision::Approve, 0.9)
                .with_reason("debt within tolerated range")
        };

        Ok(verdict.with_data("debt_items", serde_json::json!(debt_items)))
    }
}
