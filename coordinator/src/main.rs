//! HaCluster node binary
//!
//! Runs the member state machine for one database node. Cluster events are
//! read from stdin as JSON lines, one event per line.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hacluster_coordinator::{
    AvailabilityGuard, ChannelElectionTrigger, ClusterEvent, ClusterEventBus, ClusterMemberEvents,
    Collaborators, MemberChangeEvent, MemberConfig, MemberListener, MemberStateMachine,
    ObservedClusterMembers,
};

/// Logs every role change this node goes through.
struct RoleLogger;

impl MemberListener for RoleLogger {
    fn master_is_elected(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        if !event.is_state_change() {
            debug!(state = %event.new_state, coordinator = ?event.instance_id, "Coordinator re-elected");
            return Ok(());
        }
        info!(from = %event.old_state, to = %event.new_state, coordinator = ?event.instance_id, "Master elected");
        Ok(())
    }

    fn master_is_available(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        info!(from = %event.old_state, to = %event.new_state, uri = ?event.server_uri, "Master available");
        Ok(())
    }

    fn slave_is_available(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        info!(from = %event.old_state, to = %event.new_state, instance_id = ?event.instance_id, "Slave available");
        Ok(())
    }

    fn instance_stops(&self, event: &MemberChangeEvent) -> anyhow::Result<()> {
        info!(from = %event.old_state, "Instance stops serving its role");
        Ok(())
    }
}

fn init_logging(config: &MemberConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MemberConfig::from_env()?;
    init_logging(&config);

    info!("Starting HaCluster node");

    if let Err(e) = config.validate() {
        error!(error = %e, code = e.error_code(), "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }
    let instance_id = match config.require_instance_id() {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Invalid configuration");
            return Err(e.into());
        }
    };

    let (bus, publisher) = ClusterEventBus::new(config.event_queue_capacity);
    let guard = Arc::new(AvailabilityGuard::new());
    let (election, mut election_requests) = ChannelElectionTrigger::new(instance_id);

    // Liveness must be current before the state machine computes quorum.
    let members = Arc::new(ObservedClusterMembers::with_members(
        config.cluster_members.iter().copied(),
    ));
    members.join(instance_id);
    bus.add_cluster_member_listener(members.clone());

    let machine = Arc::new(MemberStateMachine::new(
        &config,
        Collaborators {
            gate: guard.clone(),
            members: members.clone(),
            events: bus.clone(),
            election: Arc::new(election),
        },
    )?);
    machine.add_listener(Arc::new(RoleLogger));
    machine.start();

    info!(
        instance_id = %instance_id,
        state = %machine.current_state(),
        alive = members.alive_count(),
        total = members.total_count(),
        listeners = bus.listener_count(),
        "Node running"
    );

    let bus_task = tokio::spawn({
        let bus = bus.clone();
        async move { bus.run().await }
    });

    tokio::spawn(async move {
        while let Some(request) = election_requests.recv().await {
            info!(
                requested_by = %request.requested_by,
                requested_at = %request.requested_at,
                "Role elections requested"
            );
        }
    });

    tokio::spawn({
        let guard = guard.clone();
        let timeout = config.availability_timeout;
        async move {
            if guard.wait_available(timeout).await {
                info!("Database available");
            } else {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    blockers = ?guard.describe_blockers(),
                    "Database still unavailable"
                );
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => match serde_json::from_str::<ClusterEvent>(&line) {
                        Ok(event) => {
                            if publisher.publish(event).await.is_err() {
                                warn!("Cluster event bus stopped, no longer reading events");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed cluster event"),
                    },
                    None => {
                        info!("Event input closed");
                        break;
                    }
                }
            }
        }
    }

    drop(publisher);
    match bus_task.await? {
        Ok(()) => {}
        Err(e) => error!(error = %e, "Cluster event processing failed"),
    }

    machine.stop();
    info!(
        description = %machine.description(),
        metrics = %machine.metrics().to_prometheus(),
        "Node stopped"
    );

    Ok(())
}
