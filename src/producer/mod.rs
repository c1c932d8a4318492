//! Decision producers and their registry.
//!
//! A producer turns one [`Event`] into one [`Verdict`]. The engine treats
//! producers polymorphically through the [`DecisionProducer`] trait; adding a
//! producer means adding an implementation and registering it, not editing a
//! dispatch table.
//!
//! Producers must be total over well-formed events of the types they are
//! registered for: a missing optional payload field yields a conservative
//! verdict, not an error. [`ProducerError`] exists for genuine evaluation
//! failures (an unreachable rule store, for example); the engine logs those
//! and excludes the producer from aggregation.

pub mod budget;
pub mod release;
pub mod tech_debt;

pub use budget::BudgetReviewProducer;
pub use release::ReleaseReviewProducer;
pub use tech_debt::TechDebtReviewProducer;

use crate::decision::Verdict;
use crate::event::Event;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors from producer evaluation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// Evaluation failed inside the producer.
    #[error("Producer '{producer}' failed to evaluate event '{event_id}': {details}")]
    Evaluation {
        /// Producer that failed
        producer: String,
        /// Event being evaluated
        event_id: String,
        /// Failure details
        details: String,
    },
}

// ============================================================================
// DecisionProducer
// ============================================================================

/// Capability interface for decision producers.
///
/// Implementations must be safe to invoke concurrently for different events.
#[async_trait]
pub trait DecisionProducer: Send + Sync {
    /// Stable producer name, used in verdicts and routing bindings.
    fn name(&self) -> &'static str;

    /// Evaluates one event into one verdict.
    async fn evaluate(&self, event: &Event) -> Result<Verdict, ProducerError>;
}

// ============================================================================
// Registry
// ============================================================================

/// Typed registry of producers, keyed by producer name.
///
/// Built once at startup by the composition root; read-only afterwards.
#[derive(Default, Clone)]
pub struct ProducerRegistry {
    producers: HashMap<&'static str, Arc<dyn DecisionProducer>>,
}

impl ProducerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer under its own name, replacing any previous entry.
    pub fn register(&mut self, producer: Arc<dyn DecisionProducer>) {
        self.producers.insert(producer.name(), producer);
    }

    /// Looks up a producer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn DecisionProducer>> {
        self.producers.get(name).cloned()
    }

    /// Number of registered producers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    /// Returns true if no producer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

impl std::fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerRegistry")
            .field("producers", &self.producers.keys().collect::<Vec<_>>())
            .finish()
    }
}
