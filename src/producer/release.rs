//! Release review producer for pull-request events.
//!
//! Thin rule glue over the PR payload: a handful of conservative regex
//! markers on the title/body plus a changed-file ceiling. The interesting
//! machinery (routing, aggregation, approval) lives outside the producer.

use super::{DecisionProducer, ProducerError};
use crate::decision::{Decision, Verdict};
use crate::event::Event;
use async_trait::async_trait;
use regex::Regex;

/// Reviews pull-request events for release risk.
pub struct ReleaseReviewProducer {
    blocking_markers: Regex,
    warning_markers: Regex,
    /// PRs touching more files than this get a warn.
    max_changed_files: u64,
}

impl ReleaseReviewProducer {
    /// Producer name as used in routing bindings.
    pub const NAME: &'static str = "release_review";

    /// Creates the producer with the default rule set.
    #[must_use]
    pub fn new() -> Self {
        // Patterns are fixed at construction so evaluate() stays total.
        Self {
            blocking_markers: Regex::new(r"(?i)\b(drop\s+table|truncate\s+table|force[ -]push|disable\s+auth)\b")
                .expect("static regex"),
            warning_markers: Regex::new(r"(?i)\b(hotfix|urgent|migration|rollback|skip\s+ci)\b")
                .expect("static regex"),
            max_changed_files: 40,
        }
    }
}

impl Default for ReleaseReviewProducer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionProducer for ReleaseReviewProducer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn evaluate(&self, event: &Event) -> Result<Verdict, ProducerError> {
        let pr = event
            .payload
            .get("pull_request")
            .unwrap_or(&event.payload);

        let title = pr.get("title").and_then(|v| v.as_str()).unwrap_or("");
        let body = pr.get("body").and_then(|v| v.as_str()).unwrap_or("");
        let changed_files = pr
            .get("changed_files")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let text = format!("{title}\n{body}");

        let mut verdict = if self.blocking_markers.is_match(&text) {
            Verdict::new(Self::NAME, Decision::Block, 0.9)
                .with_reason("destructive change marker found in PR title/body")
        } else if self.warning_markers.is_match(&text) {
            Verdict::new(Self::NAME, Decision::Warn, 0.7)
                .with_reason("risky change marker found in PR title/body")
        } else if changed_files > self.max_changed_files {
            Verdict::new(Self::NAME, Decision::Warn, 0.75).with_reason(format!(
                "large change set: {changed_files} files (limit {})",
                self.max_changed_files
            ))
        } else {
            Verdict::new(Self::NAME, Decision::Approve, 0.95)
                .with_reason("no release-risk markers found")
        };

        verdict = verdict.with_data("changed_files", serde_json::json!(changed_files));
        if let Some(number) = pr.get("number").and_then(|v| v.as_u64()) {
            verdict = verdict.with_data("pr_number", serde_json::json!(number));
        }

        Ok(verdict)
    }
}
