//! Metrics instrumentation for dnsaas-core.
//!
//! All metrics are prefixed with `dnsaas.`

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record a submitted change request.
pub fn record_submission(kind: RequestKindLabel, outcome: SubmissionOutcome) {
    let outcome_str = match outcome {
        SubmissionOutcome::AutoAccepted => "auto_accepted",
        SubmissionOutcome::Pending => "pending",
    };

    counter!("dnsaas.request.submitted.count", "kind" => kind.as_str(), "outcome" => outcome_str)
        .increment(1);
}

/// Request kinds for metrics.
#[derive(Debug, Clone, Copy)]
pub enum RequestKindLabel {
    /// Domain create or update.
    Domain,
    /// Record create or update.
    Record,
    /// Deletion of a domain or record.
    Delete,
}

impl RequestKindLabel {
    fn as_str(&self) -> &'static str {
        match self {
            RequestKindLabel::Domain => "domain",
            RequestKindLabel::Record => "record",
            RequestKindLabel::Delete => "delete",
        }
    }
}

/// Whether a submission was applied straight away.
#[derive(Debug, Clone, Copy)]
pub enum SubmissionOutcome {
    /// Applied in the same transaction.
    AutoAccepted,
    /// Left OPEN for review.
    Pending,
}

/// Record a request leaving the OPEN state.
pub fn record_transition(state: &'static str) {
    counter!("dnsaas.request.transition.count", "state" => state).increment(1);
}

/// Record an action of the PTR synchronizer.
pub fn record_ptr_sync(action: SyncAction) {
    counter!("dnsaas.ptr.sync.count", "action" => action.as_str()).increment(1);
}

/// Record an action of template propagation.
pub fn record_template_record(action: SyncAction) {
    counter!("dnsaas.template.record.count", "action" => action.as_str()).increment(1);
}

/// What a synchronizer did to a derived record.
#[derive(Debug, Clone, Copy)]
pub enum SyncAction {
    /// Derived record inserted.
    Created,
    /// Derived record rewritten in place.
    Updated,
    /// Derived record removed.
    Deleted,
    /// Nothing to do (policy or missing reverse zone).
    Skipped,
}

impl SyncAction {
    fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Deleted => "deleted",
            SyncAction::Skipped => "skipped",
        }
    }
}

/// Record a CNAME exclusivity violation.
pub fn record_conflict() {
    counter!("dnsaas.conflict.count").increment(1);
}

/// Record an update refused because other requests are OPEN.
pub fn record_precondition_failure() {
    counter!("dnsaas.precondition.count").increment(1);
}

/// Record a finished transaction.
pub fn record_transaction(committed: bool, duration: Duration) {
    let result = if committed { "commit" } else { "rollback" };
    histogram!("dnsaas.transaction.duration.seconds", "result" => result)
        .record(duration.as_secs_f64());
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
