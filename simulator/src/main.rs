//! HaCluster Simulator
//!
//! Runs a whole cluster of member state machines in one process and drives
//! them through failure scenarios.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// HaCluster Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "HaCluster member state simulation environment")]
struct Args {
    /// Number of simulated nodes
    #[arg(short, long, default_value = "3")]
    nodes: u32,

    /// Scenario to run (startup, master-failover, quorum-loss, self-unavailable, churn)
    #[arg(short, long, default_value = "startup")]
    scenario: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.json {
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

    info!("Starting HaCluster Simulator");
    info!("Nodes: {}", args.nodes);

    let scenario = Scenario::load(&args.scenario, args.nodes, args.seed)?;
    let mut controller = SimulationController::new(args.nodes)?;
    controller.run_scenario(&scenario).await?;

    info!("Simulation complete");
    for node in controller.nodes() {
        let (alive, total) = node.observed_alive();
        info!(
            "Node {}: {}, access {}, sees {}/{} alive, master {:?}",
            node.id,
            node.description(),
            if node.is_available() { "allowed" } else { "denied" },
            alive,
            total,
            node.observed_master()
        );
    }

    let metrics = controller.get_metrics();
    info!("Steps: {}", metrics.steps_executed);
    info!("Events delivered: {}", metrics.events_delivered);
    info!(
        "Elections: {} ({} requested)",
        metrics.elections_held, metrics.election_requests
    );
    info!(
        "Assertions: {} passed, {} failed ({:.0}%)",
        metrics.assertions_passed,
        metrics.assertions_failed,
        metrics.pass_rate() * 100.0
    );

    let combined = controller.combined_node_metrics();
    info!(
        transitions = combined.transitions,
        access_granted = combined.access_granted,
        access_denied = combined.access_denied,
        quorum_losses = combined.quorum_losses,
        elections_triggered = combined.elections_triggered,
        "Combined node metrics"
    );

    if metrics.assertions_failed > 0 {
        return Err(anyhow::anyhow!(
            "{} assertion(s) failed",
            metrics.assertions_failed
        ));
    }

    Ok(())
}
