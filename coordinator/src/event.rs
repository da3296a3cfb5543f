//! Member change events and the listeners that consume them.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::warn;

use hacluster_common::InstanceId;

use crate::listeners::Listeners;
use crate::state::MemberState;

/// Produced on every transition the state machine applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberChangeEvent {
    pub old_state: MemberState,
    pub new_state: MemberState,
    /// Instance the triggering cluster event was about, if any.
    pub instance_id: Option<InstanceId>,
    /// Address announced with the triggering event, if any.
    pub server_uri: Option<String>,
}

impl MemberChangeEvent {
    pub fn new(
        old_state: MemberState,
        new_state: MemberState,
        instance_id: Option<InstanceId>,
        server_uri: Option<String>,
    ) -> Self {
        Self {
            old_state,
            new_state,
            instance_id,
            server_uri,
        }
    }

    /// Check whether the transition changed the state.
    pub fn is_state_change(&self) -> bool {
        self.old_state != self.new_state
    }
}

/// Which listener callback an event is delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    MasterIsElected,
    MasterIsAvailable,
    SlaveIsAvailable,
    InstanceStops,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::MasterIsElected => "master_is_elected",
            ChangeKind::MasterIsAvailable => "master_is_available",
            ChangeKind::SlaveIsAvailable => "slave_is_available",
            ChangeKind::InstanceStops => "instance_stops",
        }
    }
}

/// Observer of member state changes.
///
/// Callbacks run synchronously on the thread that processes the cluster
/// event, while the state machine holds its event lock. They must not feed
/// cluster events back into the same state machine. All callbacks default to
/// doing nothing.
pub trait MemberListener: Send + Sync {
    fn master_is_elected(&self, _event: &MemberChangeEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn master_is_available(&self, _event: &MemberChangeEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn slave_is_available(&self, _event: &MemberChangeEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn instance_stops(&self, _event: &MemberChangeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

fn dispatch(
    listener: &dyn MemberListener,
    kind: ChangeKind,
    event: &MemberChangeEvent,
) -> anyhow::Result<()> {
    match kind {
        ChangeKind::MasterIsElected => listener.master_is_elected(event),
        ChangeKind::MasterIsAvailable => listener.master_is_available(event),
        ChangeKind::SlaveIsAvailable => listener.slave_is_available(event),
        ChangeKind::InstanceStops => listener.instance_stops(event),
    }
}

/// Deliver `event` to every listener registered when the call starts.
///
/// A listener that fails or panics is logged and skipped; the remaining
/// listeners still receive the event. Returns the number of listeners that
/// failed.
pub fn notify_listeners(
    listeners: &Listeners<dyn MemberListener>,
    kind: ChangeKind,
    event: &MemberChangeEvent,
) -> usize {
    let snapshot = listeners.snapshot();
    let mut failures = 0;

    for (id, listener) in snapshot.iter() {
        match catch_unwind(AssertUnwindSafe(|| dispatch(listener.as_ref(), kind, event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                warn!(
                    listener = %id,
                    callback = kind.as_str(),
                    error = %e,
                    "Member listener failed"
                );
            }
            Err(_) => {
                failures += 1;
                warn!(
                    listener = %id,
                    callback = kind.as_str(),
                    "Member listener panicked"
                );
            }
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(ChangeKind, MemberChangeEvent)>>,
    }

    impl MemberListener for Recording {
        fn master_is_elected(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
            self.seen.lock().push((ChangeKind::MasterIsElected, event.clone()));
            Ok(())
        }

        fn instance_stops(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
            self.seen.lock().push((ChangeKind::InstanceStops, event.clone()));
            Ok(())
        }
    }

    struct Failing;

    impl MemberListener for Failing {
        fn master_is_elected(&self, _event: &MemberChangeEvent) -> anyhow::Result<()> {
            anyhow::bail!("switcher unavailable")
        }
    }

    struct Panicking;

    impl MemberListener for Panicking {
        fn master_is_elected(&self, _event: &MemberChangeEvent) -> anyhow::Result<()> {
            panic!("listener bug")
        }
    }

    fn elected_event() -> MemberChangeEvent {
        MemberChangeEvent::new(
            MemberState::Pending,
            MemberState::ToMaster,
            Some(InstanceId::new(1)),
            None,
        )
    }

    #[test]
    fn test_dispatch_by_kind() {
        let listeners: Listeners<dyn MemberListener> = Listeners::new();
        let recording = Arc::new(Recording::default());
        listeners.add(recording.clone());

        let event = elected_event();
        assert_eq!(notify_listeners(&listeners, ChangeKind::MasterIsElected, &event), 0);
        assert_eq!(notify_listeners(&listeners, ChangeKind::SlaveIsAvailable, &event), 0);

        let seen = recording.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (ChangeKind::MasterIsElected, event));
    }

    #[test]
    fn test_failing_listeners_do_not_stop_fan_out() {
        let listeners: Listeners<dyn MemberListener> = Listeners::new();
        let before = Arc::new(Recording::default());
        let after = Arc::new(Recording::default());
        listeners.add(before.clone());
        listeners.add(Arc::new(Failing));
        listeners.add(Arc::new(Panicking));
        listeners.add(after.clone());

        let failures = notify_listeners(&listeners, ChangeKind::MasterIsElected, &elected_event());

        assert_eq!(failures, 2);
        assert_eq!(before.seen.lock().len(), 1);
        assert_eq!(after.seen.lock().len(), 1);
    }

    #[test]
    fn test_state_change_flag() {
        assert!(elected_event().is_state_change());
        let same = MemberChangeEvent::new(MemberState::Slave, MemberState::Slave, None, None);
        assert!(!same.is_state_change());
    }
}
