//! Runtime configuration.
//!
//! Every knob can be overridden via `EVENTGATE_*` environment variables;
//! unparseable values fall back to the default rather than failing startup.
//! The Slack credentials live in their own `SLACK_*` variables (see
//! [`crate::approval::notify::SlackConfig`]).

use std::time::Duration;

/// Runtime configuration for the gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Webhook HMAC secret. Unset disables signature verification, which is
    /// only acceptable in development.
    pub webhook_secret: Option<String>,

    /// How long approvals stay open before they expire
    pub approval_timeout: chrono::Duration,

    /// Interval between timeout sweeps
    pub sweep_interval: Duration,

    /// Confidence floor for auto-approving without a human
    pub auto_approve_threshold: f64,

    /// How long resolved records are retained past their expiry deadline
    pub record_retention: chrono::Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            webhook_secret: None,
            approval_timeout: chrono::Duration::seconds(
                crate::approval::DEFAULT_APPROVAL_TIMEOUT_SECS,
            ),
            sweep_interval: Duration::from_secs(30),
            auto_approve_threshold: 0.90,
            record_retention: chrono::Duration::hours(1),
        }
    }
}

impl GateConfig {
    /// Loads configuration from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `EVENTGATE_BIND` (default: 127.0.0.1:8080)
    /// - `EVENTGATE_WEBHOOK_SECRET` (unset: verification disabled)
    /// - `EVENTGATE_APPROVAL_TIMEOUT_SECS` (default: 86400)
    /// - `EVENTGATE_SWEEP_INTERVAL_SECS` (default: 30)
    /// - `EVENTGATE_AUTO_APPROVE_THRESHOLD` (default: 0.90)
    /// - `EVENTGATE_RECORD_RETENTION_SECS` (default: 3600)
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            bind_addr: std::env::var("EVENTGATE_BIND").unwrap_or(default.bind_addr),
            webhook_secret: std::env::var("EVENTGATE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            approval_timeout: std::env::var("EVENTGATE_APPROVAL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(default.approval_timeout, chrono::Duration::seconds),
            sweep_interval: std::env::var("EVENTGATE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(default.sweep_interval, Duration::from_secs),
            auto_approve_threshold: std::env::var("EVENTGATE_AUTO_APPROVE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|t: &f64| (0.0..=1.0).contains(t))
                .unwrap_or(default.auto_approve_threshold),
            record_retention: std::env::var("EVENTGATE_RECORD_RETENTION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(default.record_retention, chrono::Duration::seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GateConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.approval_timeout, chrono::Duration::hours(24));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert!((config.auto_approve_threshold - 0.90).abs() < f64::EPSILON);
    }
}
