//! Metrics collection for member state monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Member state machine metrics.
pub struct Metrics {
    /// State transitions that changed the state.
    pub transitions: AtomicU64,
    /// Role elections requested.
    pub elections_triggered: AtomicU64,
    /// Access grants issued to the availability gate.
    pub access_granted: AtomicU64,
    /// Access denials issued to the availability gate.
    pub access_denied: AtomicU64,
    /// Times the cluster lost quorum while this node held a state.
    pub quorum_losses: AtomicU64,
    /// Listener callbacks that failed or panicked.
    pub listener_failures: AtomicU64,
    /// Handler failures that were logged and suppressed.
    pub handler_failures_recovered: AtomicU64,
    /// Handler failures escalated to the event source.
    pub handler_failures_fatal: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transitions: AtomicU64::new(0),
            elections_triggered: AtomicU64::new(0),
            access_granted: AtomicU64::new(0),
            access_denied: AtomicU64::new(0),
            quorum_losses: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            handler_failures_recovered: AtomicU64::new(0),
            handler_failures_fatal: AtomicU64::new(0),
        }
    }

    pub fn transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn election_triggered(&self) {
        self.elections_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn access_granted(&self) {
        self.access_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn access_denied(&self) {
        self.access_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn quorum_lost(&self) {
        self.quorum_losses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record failed listener callbacks from one fan-out.
    pub fn listener_failed(&self, count: usize) {
        if count > 0 {
            self.listener_failures
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn handler_failure_recovered(&self) {
        self.handler_failures_recovered
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failure_fatal(&self) {
        self.handler_failures_fatal.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transitions: self.transitions.load(Ordering::Relaxed),
            elections_triggered: self.elections_triggered.load(Ordering::Relaxed),
            access_granted: self.access_granted.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
            quorum_losses: self.quorum_losses.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            handler_failures_recovered: self.handler_failures_recovered.load(Ordering::Relaxed),
            handler_failures_fatal: self.handler_failures_fatal.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP hacluster_transitions_total State transitions that changed the member state
# TYPE hacluster_transitions_total counter
hacluster_transitions_total {}

# HELP hacluster_elections_triggered_total Role elections requested by this member
# TYPE hacluster_elections_triggered_total counter
hacluster_elections_triggered_total {}

# HELP hacluster_access_granted_total Availability grants issued
# TYPE hacluster_access_granted_total counter
hacluster_access_granted_total {}

# HELP hacluster_access_denied_total Availability denials issued
# TYPE hacluster_access_denied_total counter
hacluster_access_denied_total {}

# HELP hacluster_quorum_losses_total Quorum losses observed
# TYPE hacluster_quorum_losses_total counter
hacluster_quorum_losses_total {}

# HELP hacluster_listener_failures_total Member listener callbacks that failed
# TYPE hacluster_listener_failures_total counter
hacluster_listener_failures_total {}

# HELP hacluster_handler_failures_recovered_total Handler failures logged and suppressed
# TYPE hacluster_handler_failures_recovered_total counter
hacluster_handler_failures_recovered_total {}

# HELP hacluster_handler_failures_fatal_total Handler failures escalated
# TYPE hacluster_handler_failures_fatal_total counter
hacluster_handler_failures_fatal_total {}
"#,
            snapshot.transitions,
            snapshot.elections_triggered,
            snapshot.access_granted,
            snapshot.access_denied,
            snapshot.quorum_losses,
            snapshot.listener_failures,
            snapshot.handler_failures_recovered,
            snapshot.handler_failures_fatal,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transitions: u64,
    pub elections_triggered: u64,
    pub access_granted: u64,
    pub access_denied: u64,
    pub quorum_losses: u64,
    pub listener_failures: u64,
    pub handler_failures_recovered: u64,
    pub handler_failures_fatal: u64,
}

impl std::ops::Add for MetricsSnapshot {
    type Output = MetricsSnapshot;

    fn add(self, other: MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            transitions: self.transitions + other.transitions,
            elections_triggered: self.elections_triggered + other.elections_triggered,
            access_granted: self.access_granted + other.access_granted,
            access_denied: self.access_denied + other.access_denied,
            quorum_losses: self.quorum_losses + other.quorum_losses,
            listener_failures: self.listener_failures + other.listener_failures,
            handler_failures_recovered: self.handler_failures_recovered
                + other.handler_failures_recovered,
            handler_failures_fatal: self.handler_failures_fatal + other.handler_failures_fatal,
        }
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
