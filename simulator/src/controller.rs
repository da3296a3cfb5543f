//! Simulation controller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hacluster_common::{ClusterRole, InstanceId, StoreId};
use hacluster_coordinator::{
    AvailabilityGuard, ChannelElectionTrigger, ClusterEvent, ClusterEventBus, ClusterMemberEvents,
    Collaborators, ElectionRequest, MemberConfig, MemberState, MemberStateMachine, MetricsSnapshot,
    ObservedClusterMembers,
};

use crate::metrics::SimulationMetrics;
use crate::scenario::{Scenario, ScenarioStep};

/// One database node with its own state machine and event bus.
pub struct SimulatedNode {
    pub id: InstanceId,
    store_id: StoreId,
    machine: MemberStateMachine,
    bus: Arc<ClusterEventBus>,
    guard: Arc<AvailabilityGuard>,
    members: Arc<ObservedClusterMembers>,
    elections: mpsc::UnboundedReceiver<ElectionRequest>,
}

impl SimulatedNode {
    fn new(id: InstanceId, cluster: &[InstanceId]) -> anyhow::Result<Self> {
        let config = MemberConfig {
            cluster_members: cluster.to_vec(),
            ..MemberConfig::for_instance(id)
        };

        let (bus, _publisher) = ClusterEventBus::new(config.event_queue_capacity);
        let guard = Arc::new(AvailabilityGuard::new());
        let (election, elections) = ChannelElectionTrigger::new(id);
        let members = Arc::new(ObservedClusterMembers::with_members(cluster.iter().copied()));
        bus.add_cluster_member_listener(members.clone());

        let machine = MemberStateMachine::new(
            &config,
            Collaborators {
                gate: guard.clone(),
                members: members.clone(),
                events: bus.clone(),
                election: Arc::new(election),
            },
        )?;
        machine.start();

        Ok(Self {
            id,
            store_id: StoreId::new(),
            machine,
            bus,
            guard,
            members,
            elections,
        })
    }

    fn deliver(&self, event: &ClusterEvent) -> anyhow::Result<()> {
        self.bus.deliver(event)?;
        Ok(())
    }

    fn take_election_requests(&mut self) -> usize {
        let mut count = 0;
        while let Ok(request) = self.elections.try_recv() {
            debug!(requested_by = %request.requested_by, "Election request");
            count += 1;
        }
        count
    }

    pub fn state(&self) -> MemberState {
        self.machine.current_state()
    }

    pub fn is_available(&self) -> bool {
        self.guard.is_available()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.machine.metrics().snapshot()
    }

    /// The live master as this node sees it.
    pub fn observed_master(&self) -> Option<InstanceId> {
        self.members.current_master().map(|member| member.instance_id)
    }

    /// Reachable and total members as this node sees them.
    pub fn observed_alive(&self) -> (usize, usize) {
        (self.members.alive_count(), self.members.total_count())
    }

    pub fn description(&self) -> String {
        self.machine.description()
    }
}

/// Controls the simulation.
///
/// Plays the part of the cluster: events go to every node that is not
/// partitioned, and elections pick the lowest-id reachable node.
pub struct SimulationController {
    nodes: Vec<SimulatedNode>,
    /// Partitioned nodes.
    down: BTreeSet<InstanceId>,
    metrics: SimulationMetrics,
}

impl SimulationController {
    /// Create a cluster of `node_count` nodes, numbered from 1.
    pub fn new(node_count: u32) -> anyhow::Result<Self> {
        if node_count == 0 {
            return Err(anyhow::anyhow!("A cluster needs at least one node"));
        }

        let cluster: Vec<InstanceId> = (1..=node_count).map(InstanceId::new).collect();
        let nodes = cluster
            .iter()
            .map(|id| SimulatedNode::new(*id, &cluster))
            .collect::<anyhow::Result<Vec<_>>>()?;

        info!("Initialized cluster with {} nodes", node_count);

        Ok(Self {
            nodes,
            down: BTreeSet::new(),
            metrics: SimulationMetrics::new(),
        })
    }

    /// Run a scenario.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
            self.metrics.record_step();
        }

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Elect { coordinator } => {
                self.broadcast(&ClusterEvent::CoordinatorIsElected {
                    coordinator_id: InstanceId::new(*coordinator),
                })?;
            }
            ScenarioStep::Announce { role, instance } => {
                self.announce(*role, InstanceId::new(*instance))?;
            }
            ScenarioStep::Fail { instance } => self.fail(InstanceId::new(*instance))?,
            ScenarioStep::Recover { instance } => self.recover(InstanceId::new(*instance))?,
            ScenarioStep::Unavailable { role, instance } => {
                self.broadcast(&ClusterEvent::MemberIsUnavailable {
                    role: *role,
                    instance_id: InstanceId::new(*instance),
                })?;
            }
            ScenarioStep::RunElections => self.run_elections()?,
            ScenarioStep::AssertState { instance, state } => {
                let actual = self.node(InstanceId::new(*instance))?.state();
                self.check(
                    actual == *state,
                    format!("node {} is {}, expected {}", instance, actual, state),
                );
            }
            ScenarioStep::AssertAccess { instance, allowed } => {
                let actual = self.node(InstanceId::new(*instance))?.is_available();
                self.check(
                    actual == *allowed,
                    format!("node {} access allowed is {}, expected {}", instance, actual, allowed),
                );
            }
            ScenarioStep::AssertObservedMaster { instance, master } => {
                let actual = self.node(InstanceId::new(*instance))?.observed_master();
                let expected = master.map(InstanceId::new);
                self.check(
                    actual == expected,
                    format!(
                        "node {} sees master {:?}, expected {:?}",
                        instance, actual, expected
                    ),
                );
            }
            ScenarioStep::AssertConsistent => {
                let mismatched: Vec<InstanceId> = self
                    .nodes
                    .iter()
                    .filter(|node| node.is_available() != node.state().is_access_allowed())
                    .map(|node| node.id)
                    .collect();
                self.check(
                    mismatched.is_empty(),
                    format!("gate disagrees with state on nodes {:?}", mismatched),
                );
            }
        }

        Ok(())
    }

    fn check(&mut self, passed: bool, message: String) {
        if !passed {
            warn!("Assertion failed: {}", message);
        }
        self.metrics.record_assertion(passed);
    }

    fn node(&self, id: InstanceId) -> anyhow::Result<&SimulatedNode> {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .ok_or_else(|| anyhow::anyhow!("No such node: {}", id))
    }

    fn is_up(&self, id: InstanceId) -> bool {
        !self.down.contains(&id)
    }

    fn send(&mut self, index: usize, event: &ClusterEvent) -> anyhow::Result<()> {
        self.nodes[index].deliver(event)?;
        self.metrics.record_delivery();
        Ok(())
    }

    /// Deliver an event to every reachable node.
    fn broadcast(&mut self, event: &ClusterEvent) -> anyhow::Result<()> {
        for index in 0..self.nodes.len() {
            if self.is_up(self.nodes[index].id) {
                self.send(index, event)?;
            }
        }
        Ok(())
    }

    fn announce(&mut self, role: ClusterRole, id: InstanceId) -> anyhow::Result<()> {
        let store_id = self.node(id)?.store_id;
        self.broadcast(&ClusterEvent::MemberIsAvailable {
            role,
            instance_id: id,
            uri: format!("ha://node{}:6001", id),
            store_id: Some(store_id),
        })
    }

    /// Cut `id` off: it sees everyone else fail, and everyone else sees it fail.
    fn fail(&mut self, id: InstanceId) -> anyhow::Result<()> {
        self.node(id)?;
        if !self.is_up(id) {
            debug!(instance_id = %id, "Already partitioned");
            return Ok(());
        }

        info!(instance_id = %id, "Partitioning node");
        self.broadcast_except(id, &ClusterEvent::MemberIsFailed { instance_id: id })?;
        self.down.insert(id);

        let index = self.index_of(id)?;
        let others: Vec<InstanceId> = self
            .nodes
            .iter()
            .map(|node| node.id)
            .filter(|other| *other != id)
            .collect();
        for other in others {
            self.send(index, &ClusterEvent::MemberIsFailed { instance_id: other })?;
        }
        Ok(())
    }

    /// Reconnect `id`: it sees every reachable node come back and they see it.
    fn recover(&mut self, id: InstanceId) -> anyhow::Result<()> {
        self.node(id)?;
        if self.is_up(id) {
            debug!(instance_id = %id, "Not partitioned");
            return Ok(());
        }

        info!(instance_id = %id, "Reconnecting node");
        self.down.remove(&id);

        let index = self.index_of(id)?;
        let reachable: Vec<InstanceId> = self
            .nodes
            .iter()
            .map(|node| node.id)
            .filter(|other| *other != id && self.is_up(*other))
            .collect();
        for other in reachable {
            self.send(index, &ClusterEvent::MemberIsAlive { instance_id: other })?;
        }

        self.broadcast_except(id, &ClusterEvent::MemberIsAlive { instance_id: id })
    }

    fn broadcast_except(&mut self, skip: InstanceId, event: &ClusterEvent) -> anyhow::Result<()> {
        for index in 0..self.nodes.len() {
            let id = self.nodes[index].id;
            if id != skip && self.is_up(id) {
                self.send(index, event)?;
            }
        }
        Ok(())
    }

    fn index_of(&self, id: InstanceId) -> anyhow::Result<usize> {
        self.nodes
            .iter()
            .position(|node| node.id == id)
            .ok_or_else(|| anyhow::anyhow!("No such node: {}", id))
    }

    /// Elect the lowest-id reachable node, then have every reachable node
    /// announce itself in its new role.
    fn run_elections(&mut self) -> anyhow::Result<()> {
        let requests: usize = self
            .nodes
            .iter_mut()
            .map(SimulatedNode::take_election_requests)
            .sum();

        let reachable: Vec<InstanceId> = self
            .nodes
            .iter()
            .map(|node| node.id)
            .filter(|id| self.is_up(*id))
            .collect();
        let Some(winner) = reachable.first().copied() else {
            warn!("No reachable node to elect");
            return Ok(());
        };

        info!(coordinator = %winner, requests, "Holding elections");
        self.metrics.record_election(requests);

        self.broadcast(&ClusterEvent::CoordinatorIsElected {
            coordinator_id: winner,
        })?;
        self.announce(ClusterRole::Master, winner)?;
        for id in reachable.into_iter().filter(|id| *id != winner) {
            self.announce(ClusterRole::Slave, id)?;
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[SimulatedNode] {
        &self.nodes
    }

    /// Get simulation metrics.
    pub fn get_metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// State machine metrics summed over all nodes.
    pub fn combined_node_metrics(&self) -> MetricsSnapshot {
        self.nodes
            .iter()
            .map(SimulatedNode::metrics)
            .fold(MetricsSnapshot::default(), |total, snapshot| total + snapshot)
    }
}
