//! End-to-end role changes driven through the cluster event bus.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::sync::mpsc;

use hacluster_common::{ClusterRole, InstanceId};
use hacluster_coordinator::{
    AvailabilityGuard, ChangeKind, ChannelElectionTrigger, ClusterEvent, ClusterEventBus,
    ClusterMemberEvents, Collaborators, ElectionRequest, EventPublisher, MemberChangeEvent,
    MemberConfig,
    MemberListener, MemberState, MemberStateMachine, ObservedClusterMembers,
};

const OWNER: &str = "cluster-member-state";

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(ChangeKind, MemberState, MemberState)>>,
}

impl Recorder {
    fn push(&self, kind: ChangeKind, event: &MemberChangeEvent) -> anyhow::Result<()> {
        self.seen.lock().push((kind, event.old_state, event.new_state));
        Ok(())
    }

    fn seen(&self) -> Vec<(ChangeKind, MemberState, MemberState)> {
        self.seen.lock().clone()
    }
}

impl MemberListener for Recorder {
    fn master_is_elected(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        self.push(ChangeKind::MasterIsElected, event)
    }

    fn master_is_available(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        self.push(ChangeKind::MasterIsAvailable, event)
    }

    fn slave_is_available(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        self.push(ChangeKind::SlaveIsAvailable, event)
    }

    fn instance_stops(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        self.push(ChangeKind::InstanceStops, event)
    }
}

struct Node {
    machine: MemberStateMachine,
    bus: Arc<ClusterEventBus>,
    publisher: Option<EventPublisher>,
    guard: Arc<AvailabilityGuard>,
    elections: mpsc::UnboundedReceiver<ElectionRequest>,
    recorder: Arc<Recorder>,
}

impl Node {
    /// Node `me` in a cluster of `size` members, started.
    fn new(me: u32, size: u32) -> Self {
        let me = InstanceId::new(me);
        let (bus, publisher) = ClusterEventBus::new(64);
        let guard = Arc::new(AvailabilityGuard::new());
        let (election, elections) = ChannelElectionTrigger::new(me);
        let members = Arc::new(ObservedClusterMembers::with_members(
            (1..=size).map(InstanceId::new),
        ));
        bus.add_cluster_member_listener(members.clone());

        let machine = MemberStateMachine::new(
            &MemberConfig::for_instance(me),
            Collaborators {
                gate: guard.clone(),
                members,
                events: bus.clone(),
                election: Arc::new(election),
            },
        )
        .unwrap();
        let recorder = Arc::new(Recorder::default());
        machine.add_listener(recorder.clone());
        machine.start();

        Self {
            machine,
            bus,
            publisher: Some(publisher),
            guard,
            elections,
            recorder,
        }
    }

    fn deliver(&self, event: ClusterEvent) {
        self.bus.deliver(&event).unwrap();
    }

    fn election_count(&mut self) -> usize {
        let mut count = 0;
        while self.elections.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

fn id(n: u32) -> InstanceId {
    InstanceId::new(n)
}

fn elected(n: u32) -> ClusterEvent {
    ClusterEvent::CoordinatorIsElected {
        coordinator_id: id(n),
    }
}

fn available(role: ClusterRole, n: u32) -> ClusterEvent {
    ClusterEvent::MemberIsAvailable {
        role,
        instance_id: id(n),
        uri: format!("ha://node{}:6001", n),
        store_id: None,
    }
}

#[test]
fn test_startup_as_master() {
    let node = Node::new(1, 3);
    assert!(!node.guard.is_available());
    assert_eq!(node.guard.blocking_requirements(), vec![OWNER.to_string()]);

    node.deliver(elected(1));
    assert_eq!(node.machine.current_state(), MemberState::ToMaster);
    assert!(!node.guard.is_available());

    node.deliver(available(ClusterRole::Master, 1));
    assert_eq!(node.machine.current_state(), MemberState::Master);
    assert!(node.guard.is_available());
    assert_eq!(node.machine.description(), "Cluster state is 'MASTER'");

    assert_eq!(
        node.recorder.seen(),
        vec![
            (ChangeKind::MasterIsElected, MemberState::Pending, MemberState::ToMaster),
            (ChangeKind::MasterIsAvailable, MemberState::ToMaster, MemberState::Master),
        ]
    );
}

#[test]
fn test_startup_as_slave() {
    let node = Node::new(2, 3);

    node.deliver(elected(1));
    node.deliver(available(ClusterRole::Master, 1));
    assert_eq!(node.machine.current_state(), MemberState::ToSlave);
    assert!(!node.guard.is_available());

    node.deliver(available(ClusterRole::Slave, 2));
    assert_eq!(node.machine.current_state(), MemberState::Slave);
    assert!(node.guard.is_available());
    assert_eq!(
        node.machine.context().available_master_uri(),
        Some("ha://node1:6001")
    );
}

#[test]
fn test_master_failover_promotes_slave() {
    let mut node = Node::new(2, 3);
    node.deliver(elected(1));
    node.deliver(available(ClusterRole::Slave, 2));
    assert_eq!(node.machine.current_state(), MemberState::Slave);

    node.deliver(ClusterEvent::MemberIsFailed { instance_id: id(1) });
    assert_eq!(node.machine.current_state(), MemberState::Slave);

    node.deliver(elected(2));
    assert_eq!(node.machine.current_state(), MemberState::ToMaster);
    assert!(!node.guard.is_available());

    node.deliver(available(ClusterRole::Master, 2));
    assert_eq!(node.machine.current_state(), MemberState::Master);
    assert!(node.guard.is_available());
    assert_eq!(node.election_count(), 0);
}

#[test]
fn test_quorum_loss_and_recovery() {
    let mut node = Node::new(1, 3);
    node.deliver(elected(1));
    node.deliver(available(ClusterRole::Master, 1));

    node.deliver(ClusterEvent::MemberIsFailed { instance_id: id(2) });
    assert_eq!(node.machine.current_state(), MemberState::Master);

    node.deliver(ClusterEvent::MemberIsFailed { instance_id: id(3) });
    assert_eq!(node.machine.current_state(), MemberState::Pending);
    assert!(!node.guard.is_available());
    assert_eq!(node.election_count(), 0);

    node.deliver(ClusterEvent::MemberIsAlive { instance_id: id(2) });
    assert_eq!(node.election_count(), 1);

    let snapshot = node.machine.metrics().snapshot();
    assert_eq!(snapshot.quorum_losses, 1);
    assert_eq!(snapshot.elections_triggered, 1);
}

#[test]
fn test_self_unavailable_forces_elections() {
    let mut node = Node::new(1, 3);
    node.deliver(elected(1));
    node.deliver(available(ClusterRole::Master, 1));

    node.deliver(ClusterEvent::MemberIsUnavailable {
        role: ClusterRole::Master,
        instance_id: id(1),
    });

    assert_eq!(node.machine.current_state(), MemberState::Pending);
    assert!(!node.guard.is_available());
    assert_eq!(node.election_count(), 1);
    assert!(node.machine.context().elected_master_id().is_none());

    // already pending: nothing more happens
    node.deliver(ClusterEvent::MemberIsUnavailable {
        role: ClusterRole::Master,
        instance_id: id(1),
    });
    assert_eq!(node.election_count(), 0);

    // the new elections make someone else master, this node follows
    node.deliver(elected(2));
    assert_eq!(node.machine.current_state(), MemberState::ToSlave);
    assert!(!node.guard.is_available());

    node.deliver(available(ClusterRole::Slave, 1));
    assert_eq!(node.machine.current_state(), MemberState::Slave);
    assert!(node.guard.is_available());

    // and takes the role back when it is elected again
    node.deliver(elected(1));
    assert_eq!(node.machine.current_state(), MemberState::ToMaster);
    assert!(!node.guard.is_available());

    node.deliver(available(ClusterRole::Master, 1));
    assert_eq!(node.machine.current_state(), MemberState::Master);
    assert!(node.guard.is_available());
}

#[test]
fn test_stop_releases_role() {
    let node = Node::new(1, 3);
    node.deliver(elected(1));
    node.deliver(available(ClusterRole::Master, 1));

    node.machine.stop();

    assert_eq!(node.machine.current_state(), MemberState::Pending);
    assert!(!node.guard.is_available());
    assert_eq!(node.bus.listener_count(), 1);

    // no longer registered, events are not seen
    node.deliver(elected(1));
    assert_eq!(node.machine.current_state(), MemberState::Pending);
}

#[tokio::test]
async fn test_events_through_running_bus() {
    let mut node = Node::new(1, 1);
    let publisher = node.publisher.take().unwrap();
    let bus = node.bus.clone();
    let run = tokio::spawn(async move { bus.run().await });

    publisher.publish(elected(1)).await.unwrap();
    publisher
        .publish(available(ClusterRole::Master, 1))
        .await
        .unwrap();

    assert!(node.guard.wait_available(Duration::from_secs(5)).await);
    assert_eq!(node.machine.current_state(), MemberState::Master);

    drop(publisher);
    assert!(run.await.unwrap().is_ok());
}

#[derive(Debug, Clone)]
enum Step {
    Elected(u32),
    Available(bool, u32),
    Unavailable(u32),
    Failed(u32),
    Alive(u32),
}

impl Step {
    fn event(&self) -> ClusterEvent {
        match *self {
            Step::Elected(n) => elected(n),
            Step::Available(master, n) => available(
                if master { ClusterRole::Master } else { ClusterRole::Slave },
                n,
            ),
            Step::Unavailable(n) => ClusterEvent::MemberIsUnavailable {
                role: ClusterRole::Slave,
                instance_id: id(n),
            },
            Step::Failed(n) => ClusterEvent::MemberIsFailed { instance_id: id(n) },
            Step::Alive(n) => ClusterEvent::MemberIsAlive { instance_id: id(n) },
        }
    }
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u32..4).prop_map(Step::Elected),
        (any::<bool>(), 1u32..4).prop_map(|(m, n)| Step::Available(m, n)),
        (1u32..4).prop_map(Step::Unavailable),
        (1u32..4).prop_map(Step::Failed),
        (1u32..4).prop_map(Step::Alive),
    ]
}

proptest! {
    #[test]
    fn gate_follows_access_allowed_states(steps in prop::collection::vec(step(), 0..40)) {
        let node = Node::new(1, 3);

        for step in &steps {
            prop_assert!(node.bus.deliver(&step.event()).is_ok());

            let state = node.machine.current_state();
            prop_assert_eq!(node.guard.is_available(), state.is_access_allowed());

            let context = node.machine.context();
            match state {
                MemberState::ToMaster | MemberState::Master => {
                    prop_assert_eq!(context.elected_master_id(), Some(id(1)));
                }
                MemberState::ToSlave | MemberState::Slave => {
                    prop_assert!(context.elected_master_id().is_some());
                    prop_assert_ne!(context.elected_master_id(), Some(id(1)));
                }
                MemberState::Pending => {}
            }
        }
    }
}
