//! Availability gating for local request serving.

use std::collections::BTreeSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

/// All-or-nothing gate in front of the local database.
///
/// Each owner holds at most one outstanding denial; the database is
/// available only while no owner denies it. Both calls are idempotent for a
/// given owner.
pub trait AvailabilityGate: Send + Sync {
    /// Register a denial on behalf of `owner`.
    fn deny(&self, owner: &str);

    /// Withdraw the denial held by `owner`.
    fn grant(&self, owner: &str);
}

/// In-process availability gate.
pub struct AvailabilityGuard {
    denied: Mutex<BTreeSet<String>>,
    available: watch::Sender<bool>,
}

impl AvailabilityGuard {
    /// Create a gate with no outstanding denials.
    pub fn new() -> Self {
        let (available, _) = watch::channel(true);
        Self {
            denied: Mutex::new(BTreeSet::new()),
            available,
        }
    }

    /// Check if no owner currently denies access.
    pub fn is_available(&self) -> bool {
        self.denied.lock().is_empty()
    }

    /// Owners currently denying access, in sorted order.
    pub fn blocking_requirements(&self) -> Vec<String> {
        self.denied.lock().iter().cloned().collect()
    }

    /// Human-readable reason for unavailability, if any.
    pub fn describe_blockers(&self) -> Option<String> {
        let owners = self.blocking_requirements();
        if owners.is_empty() {
            return None;
        }
        Some(format!(
            "{} requirement(s) denying access: {}",
            owners.len(),
            owners.join(", ")
        ))
    }

    /// Wait until the gate is open or `timeout` elapses.
    pub async fn wait_available(&self, timeout: Duration) -> bool {
        let mut rx = self.available.subscribe();
        let opened = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|available| *available)).await,
            Ok(Ok(_))
        );
        opened
    }
}

impl Default for AvailabilityGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityGate for AvailabilityGuard {
    fn deny(&self, owner: &str) {
        let mut denied = self.denied.lock();
        if denied.insert(owner.to_string()) {
            debug!(owner, outstanding = denied.len(), "Access denied");
            if denied.len() == 1 {
                info!(owner, "Database access blocked");
            }
            self.available.send_replace(false);
        }
    }

    fn grant(&self, owner: &str) {
        let mut denied = self.denied.lock();
        if denied.remove(owner) {
            debug!(owner, outstanding = denied.len(), "Access granted");
            if denied.is_empty() {
                info!(owner, "Database access available");
                self.available.send_replace(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_deny_grant_single_owner() {
        let guard = AvailabilityGuard::new();
        assert!(guard.is_available());

        guard.deny("members");
        assert!(!guard.is_available());

        guard.grant("members");
        assert!(guard.is_available());
    }

    #[test]
    fn test_repeated_calls_are_idempotent() {
        let guard = AvailabilityGuard::new();
        guard.deny("members");
        guard.deny("members");
        guard.grant("members");
        assert!(guard.is_available());

        guard.grant("members");
        assert!(guard.is_available());
    }

    #[test]
    fn test_all_owners_must_grant() {
        let guard = AvailabilityGuard::new();
        guard.deny("members");
        guard.deny("store-copy");

        guard.grant("members");
        assert!(!guard.is_available());
        assert_eq!(guard.blocking_requirements(), vec!["store-copy".to_string()]);
        assert_eq!(
            guard.describe_blockers().unwrap(),
            "1 requirement(s) denying access: store-copy"
        );

        guard.grant("store-copy");
        assert!(guard.describe_blockers().is_none());
    }

    #[tokio::test]
    async fn test_wait_available() {
        let guard = Arc::new(AvailabilityGuard::new());
        guard.deny("members");

        assert!(!guard.wait_available(Duration::from_millis(20)).await);

        let granter = guard.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            granter.grant("members");
        });

        assert!(guard.wait_available(Duration::from_secs(5)).await);
    }

    #[test]
    fn test_wait_when_already_available() {
        let guard = AvailabilityGuard::new();
        assert!(tokio_test::block_on(
            guard.wait_available(Duration::from_millis(1))
        ));
    }
}
