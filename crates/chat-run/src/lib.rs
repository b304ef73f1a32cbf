//! Chat Run
//!
//! Driver pieces for running a demo hydraulic network on `chat-ecs`: the
//! network itself, the run file and a JSON-lines snapshot writer.

pub mod config;
pub mod network;
pub mod writer;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_ecs::{
    ComponentKind, ForcingSystem, ReportingSystem, Result, Simulation, SnapshotWriter,
    SolverSystem, World,
};

pub use config::RunConfig;
pub use network::{Network, build_network};
pub use writer::JsonLinesWriter;

use network::{Flow, Head, HeadBalance, Inflow, Received, inflow_routing, link_flow_system};

/// Initialize logging with sensible defaults.
///
/// Uses RUST_LOG env var if set, otherwise defaults to info level for
/// the engine and the driver.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chat_ecs=info,chat_run=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Build the demo network, its systems and the storm events described by
/// `config`, reporting into `writer`.
pub fn build_simulation(
    config: &RunConfig,
    writer: impl SnapshotWriter + 'static,
) -> Result<(Simulation, Network)> {
    let mut world = World::new();
    let network = build_network(&mut world, &config.network)?;
    let events = match &config.storm {
        Some(storm) => storm.events(&network)?,
        None => Vec::new(),
    };

    let reported = [
        ComponentKind::of::<Head>(),
        ComponentKind::of::<Inflow>(),
        ComponentKind::of::<Received>(),
        ComponentKind::of::<Flow>(),
    ];
    let simulation = Simulation::builder(world)
        .config(config.simulation.clone())
        .add_system(ForcingSystem::of::<Inflow>("storm"))
        .add_system(SolverSystem::new(HeadBalance, config.convergence))
        .add_system(link_flow_system())
        .add_system(inflow_routing())
        .add_system(
            ReportingSystem::new("snapshot", reported, writer).with_stride(config.report_stride),
        )
        .schedule_events(events)
        .build()?;

    info!(
        nodes = network.nodes.len(),
        links = network.links.len(),
        ticks = config.simulation.tick_count(),
        "run prepared"
    );
    Ok((simulation, network))
}
