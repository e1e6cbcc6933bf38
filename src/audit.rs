//! Security audit event boundary.
//!
//! Every MFA verification outcome is reported to an [`AuditSink`]; the
//! default sink emits structured `tracing` events. Full tokens, secrets, and
//! codes never appear in events.

use std::fmt;
use uuid::Uuid;

/// Outcome attached to an audit event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuditOutcome {
    Success,
    Failure,
    RateLimited,
}

impl AuditOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single security-relevant event.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    /// Machine-readable operation name, e.g. `mfa_totp_verify`.
    pub operation: &'static str,
    pub subject: Uuid,
    pub outcome: AuditOutcome,
    /// Source address of the request, when the operation is throttled.
    pub source: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(operation: &'static str, subject: Uuid, outcome: AuditOutcome) -> Self {
        Self {
            operation,
            subject,
            outcome,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

/// Destination for audit events (external collaborator).
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                operation = event.operation,
                subject = %event.subject,
                outcome = %event.outcome,
                source = event.source.as_deref(),
                "audit"
            ),
            AuditOutcome::Failure | AuditOutcome::RateLimited => tracing::warn!(
                operation = event.operation,
                subject = %event.subject,
                outcome = %event.outcome,
                source = event.source.as_deref(),
                "audit"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditEvent, AuditOutcome, AuditSink};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Sink that collects events for assertions.
    #[derive(Clone, Default)]
    pub(crate) struct CollectingSink {
        events: Arc<Mutex<Vec<AuditEvent>>>,
    }

    impl AuditSink for CollectingSink {
        fn record(&self, event: AuditEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    #[test]
    fn events_carry_operation_and_outcome() {
        let sink = CollectingSink::default();
        let subject = Uuid::new_v4();
        sink.record(
            AuditEvent::new("mfa_totp_verify", subject, AuditOutcome::Failure)
                .with_source("198.51.100.7"),
        );
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "mfa_totp_verify");
        assert_eq!(events[0].outcome, AuditOutcome::Failure);
        assert_eq!(events[0].source.as_deref(), Some("198.51.100.7"));
    }
}
