//! Simulation metrics.

use serde::Serialize;

/// Counters for one simulation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationMetrics {
    /// Scenario steps executed.
    pub steps_executed: u64,
    /// Cluster events delivered, counted per receiving node.
    pub events_delivered: u64,
    /// Elections held by the controller.
    pub elections_held: u64,
    /// Election requests raised by nodes.
    pub election_requests: u64,
    /// Assertions that held.
    pub assertions_passed: u64,
    /// Assertions that did not hold.
    pub assertions_failed: u64,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_step(&mut self) {
        self.steps_executed += 1;
    }

    pub fn record_delivery(&mut self) {
        self.events_delivered += 1;
    }

    pub fn record_election(&mut self, requests: usize) {
        self.elections_held += 1;
        self.election_requests += requests as u64;
    }

    pub fn record_assertion(&mut self, passed: bool) {
        if passed {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
        }
    }

    /// Get assertion pass rate.
    pub fn pass_rate(&self) -> f64 {
        let total = self.assertions_passed + self.assertions_failed;
        if total == 0 {
            return 1.0;
        }

        self.assertions_passed as f64 / total as f64
    }
}
