//! Budget review producer for invoice events.
//!
//! Flags invoices by amount against two thresholds. Amounts are read in
//! cents (`amount_due`) from the invoice payload, matching the Stripe wire
//! shape.

use super::{DecisionProducer, ProducerError};
use crate::decision::{Decision, Verdict};
use crate::event::Event;
use async_trait::async_trait;

/// Thresholds for the budget producer, in cents.
#[derive(Debug, Clone)]
pub struct BudgetThresholds {
    /// Invoices at or above this amount warn.
    pub warn_cents: u64,
    /// Invoices at or above this amount block.
    pub block_cents: u64,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            warn_cents: 100_000,  // $1,000
            block_cents: 500_000, // $5,000
        }
    }
}

/// Reviews invoice events for budget impact.
#[derive(Debug, Default)]
pub struct BudgetReviewProducer {
    thresholds: BudgetThresholds,
}

impl BudgetReviewProducer {
    /// Producer name as used in routing bindings.
    pub const NAME: &'static str = "budget_review";

    /// Creates the producer with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the producer with custom thresholds.
    #[must_use]
    pub fn with_thresholds(thresholds: BudgetThresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl DecisionProducer for BudgetReviewProducer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn evaluate(&self, event: &Event) -> Result<Verdict, ProducerError> {
        let invoice = event.payload.get("invoice").unwrap_or(&event.payload);
        let amount_cents = invoice
            .get("amount_due")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let currency = invoice
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or("usd");

        let dollars = amount_cents as f64 / 100.0;
        let verdict = if amount_cents >= self.thresholds.block_cents {
            Verdict::new(Self::NAME, Decision::Block, 0.9)
                .with_reason(format!("invoice amount {dollars:.2} {currency} exceeds block threshold"))
        } else if amount_cents >= self.thresholds.warn_cents {
            Verdict::new(Self::NAME, Decision::Warn, 0.8)
                .with_reason(format!("invoice amount {dollars:.2} {currency} exceeds warn threshold"))
        } else {
            Verdict::new(Self::NAME, Decision::Approve, 0.92)
                .with_reason("invoice amount within budget")
        };

        Ok(verdict.with_data("amount_due", serde_json::json!(amount_cents)))
    }
}
