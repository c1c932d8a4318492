//! EventGate - policy gate for inbound business events with durable
//! human-in-the-loop approvals.
//!
//! Events arrive over a signed webhook, get routed by declared type to
//! decision producers, and their verdicts aggregate under a fixed block >
//! warn > approve precedence. Consequential or low-confidence outcomes
//! suspend into a persisted approval record; humans resolve them through an
//! idempotent callback, and a background sweep expires the ones nobody
//! answers.
//!
//! # Pipeline
//!
//! - **Intake** ([`transport`]): HMAC-verified webhook envelope → [`event::Event`]
//! - **Routing** ([`router`]): event type → registered [`producer`]s
//! - **Aggregation** ([`aggregate`]): verdicts → one [`decision::Outcome`]
//! - **Approval** ([`approval`]): durable suspension, notification, human
//!   resolution, timeout sweep
//!
//! The approval store is the single durable-state boundary: every terminal
//! transition goes through its compare-and-set, which is what makes
//! resolution idempotent and the human-vs-sweep race resolve exactly once.

pub mod aggregate;
pub mod approval;
pub mod config;
pub mod decision;
pub mod event;
pub mod metrics;
pub mod producer;
pub mod router;
pub mod transport;
