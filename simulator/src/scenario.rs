//! Simulation scenarios.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use hacluster_common::ClusterRole;
use hacluster_coordinator::MemberState;

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario. Instances are numbered from 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Announce a coordinator to every reachable node.
    Elect { coordinator: u32 },
    /// Announce an instance available in a role.
    Announce { role: ClusterRole, instance: u32 },
    /// Partition an instance away from the rest of the cluster.
    Fail { instance: u32 },
    /// Reconnect a partitioned instance.
    Recover { instance: u32 },
    /// Report an instance unavailable in a role.
    Unavailable { role: ClusterRole, instance: u32 },
    /// Answer outstanding election requests and hold an election.
    RunElections,
    /// Check the state of a node.
    AssertState { instance: u32, state: MemberState },
    /// Check whether a node allows access.
    AssertAccess { instance: u32, allowed: bool },
    /// Check which live master a node has observed.
    AssertObservedMaster { instance: u32, master: Option<u32> },
    /// Check every node's gate agrees with its state.
    AssertConsistent,
}

impl Scenario {
    /// Load a scenario by name for a cluster of `nodes` instances.
    pub fn load(name: &str, nodes: u32, seed: Option<u64>) -> anyhow::Result<Self> {
        let required = match name {
            "startup" => 1,
            "self-unavailable" => 2,
            "master-failover" | "quorum-loss" => 3,
            "churn" => 1,
            _ => return Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        };
        if nodes < required {
            return Err(anyhow::anyhow!(
                "Scenario {} needs at least {} nodes, got {}",
                name,
                required,
                nodes
            ));
        }

        Ok(match name {
            "startup" => Self::startup(nodes),
            "self-unavailable" => Self::self_unavailable(nodes),
            "master-failover" => Self::master_failover(nodes),
            "quorum-loss" => Self::quorum_loss(nodes),
            _ => Self::churn(nodes, seed),
        })
    }

    /// Cold start: node 1 is elected and every node announces its role.
    fn startup(nodes: u32) -> Self {
        let mut steps = vec![
            ScenarioStep::Elect { coordinator: 1 },
            ScenarioStep::AssertState {
                instance: 1,
                state: MemberState::ToMaster,
            },
            ScenarioStep::AssertAccess {
                instance: 1,
                allowed: false,
            },
            ScenarioStep::Announce {
                role: ClusterRole::Master,
                instance: 1,
            },
        ];
        steps.extend((2..=nodes).map(|instance| ScenarioStep::Announce {
            role: ClusterRole::Slave,
            instance,
        }));
        steps.extend(Self::all_serving(nodes, 1));
        steps.extend((1..=nodes).map(|instance| ScenarioStep::AssertObservedMaster {
            instance,
            master: Some(1),
        }));

        Self {
            name: "startup".to_string(),
            description: "All nodes start pending and settle into their roles".to_string(),
            steps,
        }
    }

    /// The master is partitioned away, the next node takes over and hands
    /// the role back once the old master returns.
    fn master_failover(nodes: u32) -> Self {
        let mut steps = vec![
            ScenarioStep::RunElections,
            ScenarioStep::Fail { instance: 1 },
            ScenarioStep::Wait { millis: 50 },
            ScenarioStep::AssertState {
                instance: 1,
                state: MemberState::Pending,
            },
            ScenarioStep::AssertAccess {
                instance: 1,
                allowed: false,
            },
            ScenarioStep::AssertState {
                instance: 2,
                state: MemberState::Slave,
            },
            ScenarioStep::AssertObservedMaster {
                instance: 2,
                master: None,
            },
            ScenarioStep::RunElections,
            ScenarioStep::AssertState {
                instance: 2,
                state: MemberState::Master,
            },
            ScenarioStep::AssertObservedMaster {
                instance: 3,
                master: Some(2),
            },
            ScenarioStep::AssertAccess {
                instance: 2,
                allowed: true,
            },
            ScenarioStep::AssertState {
                instance: 3,
                state: MemberState::Slave,
            },
            ScenarioStep::Recover { instance: 1 },
            ScenarioStep::RunElections,
        ];
        steps.extend(Self::all_serving(nodes, 1));
        steps.push(ScenarioStep::AssertConsistent);

        Self {
            name: "master-failover".to_string(),
            description: "Master partitioned away, a slave is promoted".to_string(),
            steps,
        }
    }

    /// Enough nodes fail that node 1 loses quorum and gives up its role.
    fn quorum_loss(nodes: u32) -> Self {
        let failing = nodes - nodes / 2;
        let first_failed = nodes - failing + 1;

        let mut steps = vec![ScenarioStep::RunElections];
        steps.extend((first_failed..=nodes).rev().map(|instance| ScenarioStep::Fail { instance }));
        steps.extend([
            ScenarioStep::AssertState {
                instance: 1,
                state: MemberState::Pending,
            },
            ScenarioStep::AssertAccess {
                instance: 1,
                allowed: false,
            },
            ScenarioStep::Recover {
                instance: first_failed,
            },
            ScenarioStep::RunElections,
            ScenarioStep::AssertState {
                instance: 1,
                state: MemberState::Master,
            },
            ScenarioStep::AssertState {
                instance: first_failed,
                state: MemberState::Slave,
            },
            ScenarioStep::AssertAccess {
                instance: first_failed,
                allowed: true,
            },
            ScenarioStep::AssertConsistent,
        ]);

        Self {
            name: "quorum-loss".to_string(),
            description: "Majority of the cluster fails and then partly recovers".to_string(),
            steps,
        }
    }

    /// A slave reports itself unavailable and rejoins after new elections.
    fn self_unavailable(nodes: u32) -> Self {
        let mut steps = vec![
            ScenarioStep::RunElections,
            ScenarioStep::Unavailable {
                role: ClusterRole::Slave,
                instance: 2,
            },
            ScenarioStep::AssertState {
                instance: 2,
                state: MemberState::Pending,
            },
            ScenarioStep::AssertAccess {
                instance: 2,
                allowed: false,
            },
            ScenarioStep::RunElections,
        ];
        steps.extend(Self::all_serving(nodes, 1));

        Self {
            name: "self-unavailable".to_string(),
            description: "A slave drops out of its role and is re-elected into it".to_string(),
            steps,
        }
    }

    /// Random failures, recoveries and elections; checks the gate after
    /// every step and ends with the whole cluster recovered.
    fn churn(nodes: u32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let mut steps = vec![ScenarioStep::RunElections];
        for _ in 0..40 {
            let instance = rng.gen_range(1..=nodes);
            let step = match rng.gen_range(0..5) {
                0 => ScenarioStep::Fail { instance },
                1 => ScenarioStep::Recover { instance },
                2 => ScenarioStep::Unavailable {
                    role: if rng.gen_bool(0.5) {
                        ClusterRole::Master
                    } else {
                        ClusterRole::Slave
                    },
                    instance,
                },
                _ => ScenarioStep::RunElections,
            };
            steps.push(step);
            steps.push(ScenarioStep::AssertConsistent);
        }

        steps.extend((1..=nodes).map(|instance| ScenarioStep::Recover { instance }));
        steps.push(ScenarioStep::RunElections);
        steps.extend(Self::all_serving(nodes, 1));
        steps.push(ScenarioStep::AssertConsistent);

        Self {
            name: "churn".to_string(),
            description: "Random partitions and elections".to_string(),
            steps,
        }
    }

    /// `master` is master, all other nodes are slaves, everyone serves.
    fn all_serving(nodes: u32, master: u32) -> Vec<ScenarioStep> {
        (1..=nodes)
            .flat_map(|instance| {
                let state = if instance == master {
                    MemberState::Master
                } else {
                    MemberState::Slave
                };
                [
                    ScenarioStep::AssertState { instance, state },
                    ScenarioStep::AssertAccess {
                        instance,
                        allowed: true,
                    },
                ]
            })
            .collect()
    }
}
