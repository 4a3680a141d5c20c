//! Metrics for the secret reloader
//!
//! Provides OpenTelemetry metrics for:
//! - Notification flow (received, matched, acknowledged)
//! - Deployment restarts
//! - Cycle outcome and duration
//!
//! Instruments are recorded against the global meter. Without an exporter
//! (see [`crate::telemetry`]) the global meter is a no-op.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for reloader metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("secret_reloader"));

// ============================================================================
// Notification Metrics
// ============================================================================

/// Counter of notifications received from the queue
///
/// Labels:
/// - `resource`: SQSSecret namespace/name
pub static NOTIFICATIONS_RECEIVED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secret_reloader_notifications_received_total")
        .with_description("Total number of notifications received from the queue")
        .with_unit("{notifications}")
        .build()
});

/// Counter of notifications that matched the watched secret
///
/// Labels:
/// - `resource`: SQSSecret namespace/name
pub static NOTIFICATIONS_MATCHED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secret_reloader_notifications_matched_total")
        .with_description("Total number of rotation notifications for the watched secret")
        .with_unit("{notifications}")
        .build()
});

/// Counter of notifications deleted from the queue
///
/// Labels:
/// - `resource`: SQSSecret namespace/name
pub static NOTIFICATIONS_DELETED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secret_reloader_notifications_deleted_total")
        .with_description("Total number of notifications deleted from the queue")
        .with_unit("{notifications}")
        .build()
});

/// Counter of notifications the queue refused to delete
///
/// Labels:
/// - `resource`: SQSSecret namespace/name
pub static DELETE_FAILURES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secret_reloader_delete_failures_total")
        .with_description("Total number of notifications that could not be deleted")
        .with_unit("{notifications}")
        .build()
});

// ============================================================================
// Restart Metrics
// ============================================================================

/// Counter of deployment restarts
///
/// Labels:
/// - `resource`: SQSSecret namespace/name
pub static DEPLOYMENT_RESTARTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secret_reloader_deployment_restarts_total")
        .with_description("Total number of deployment restarts")
        .with_unit("{restarts}")
        .build()
});

// ============================================================================
// Cycle Metrics
// ============================================================================

/// Histogram of cycle duration
///
/// Labels:
/// - `resource`: SQSSecret namespace/name
/// - `result`: completed, aborted
pub static CYCLE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("secret_reloader_cycle_duration_seconds")
        .with_description("Duration of receive/restart/acknowledge cycles in seconds")
        .with_unit("s")
        .build()
});

/// Counter of aborted cycles
///
/// Labels:
/// - `resource`: SQSSecret namespace/name
/// - `error_type`: transient, permanent
pub static CYCLES_ABORTED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("secret_reloader_cycles_aborted_total")
        .with_description("Total number of cycles aborted before acknowledgement")
        .with_unit("{cycles}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Labels for cycle result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    /// Cycle ran to the acknowledgement step
    Completed,
    /// Cycle stopped before acknowledging anything
    Aborted,
}

impl CycleResult {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// Counts collected by a completed cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounts {
    /// Notifications received
    pub received: u64,
    /// Notifications matching the watched secret
    pub matched: u64,
    /// Deployments restarted
    pub restarts: u64,
    /// Notifications deleted
    pub deleted: u64,
    /// Notifications the queue refused to delete
    pub delete_failures: u64,
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a cycle with timing
pub struct CycleTimer {
    resource: String,
    start: std::time::Instant,
}

impl CycleTimer {
    /// Start timing a cycle for the given SQSSecret
    pub fn start(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            start: std::time::Instant::now(),
        }
    }

    /// Record a cycle that reached the acknowledgement step
    pub fn completed(self, counts: CycleCounts) {
        let labels = [KeyValue::new("resource", self.resource.clone())];
        add_nonzero(&NOTIFICATIONS_RECEIVED, counts.received, &labels);
        add_nonzero(&NOTIFICATIONS_MATCHED, counts.matched, &labels);
        add_nonzero(&DEPLOYMENT_RESTARTS, counts.restarts, &labels);
        add_nonzero(&NOTIFICATIONS_DELETED, counts.deleted, &labels);
        add_nonzero(&DELETE_FAILURES, counts.delete_failures, &labels);
        self.record_duration(CycleResult::Completed);
    }

    /// Record a cycle that stopped before acknowledging
    pub fn aborted(self, transient: bool) {
        CYCLES_ABORTED.add(
            1,
            &[
                KeyValue::new("resource", self.resource.clone()),
                KeyValue::new("error_type", if transient { "transient" } else { "permanent" }),
            ],
        );
        self.record_duration(CycleResult::Aborted);
    }

    fn record_duration(self, result: CycleResult) {
        let duration = self.start.elapsed().as_secs_f64();
        CYCLE_DURATION.record(
            duration,
            &[
                KeyValue::new("resource", self.resource),
                KeyValue::new("result", result.as_str()),
            ],
        );
    }
}

fn add_nonzero(counter: &Counter<u64>, value: u64, labels: &[KeyValue]) {
    if value > 0 {
        counter.add(value, labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_result_as_str() {
        assert_eq!(CycleResult::Completed.as_str(), "completed");
        assert_eq!(CycleResult::Aborted.as_str(), "aborted");
    }

    #[test]
    fn completed_cycle_timer() {
        let timer = CycleTimer::start("payments/db-credentials");
        assert_eq!(timer.resource, "payments/db-credentials");
        timer.completed(CycleCounts {
            received: 3,
            matched: 1,
            restarts: 2,
            deleted: 3,
            delete_failures: 0,
        });
    }

    #[test]
    fn aborted_cycle_timer() {
        CycleTimer::start("payments/db-credentials").aborted(true);
        CycleTimer::start("payments/db-credentials").aborted(false);
    }
}
