//! Chat Run - runs the demo hydraulic network
//!
//! Loads an optional JSON run file, applies command-line overrides, runs the
//! simulation to its end and exits with the terminal status:
//! 0 completed, 1 aborted, 2 invalid configuration, 130 cancelled.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use chat_ecs::{ConvergencePolicy, ExecutionMode, NullWriter, Simulation, SnapshotWriter};
use chat_run::{JsonLinesWriter, RunConfig, build_simulation, init_logging};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    Abort,
    Continue,
}

impl From<Policy> for ConvergencePolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Abort => ConvergencePolicy::Abort,
            Policy::Continue => ConvergencePolicy::Continue,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "chat-run")]
#[command(about = "Run a hydraulic network simulation")]
struct Args {
    /// JSON run file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of nodes in the chain network
    #[arg(long)]
    nodes: Option<usize>,

    /// End time of the run
    #[arg(long)]
    end: Option<f64>,

    /// Time step
    #[arg(long)]
    dt: Option<f64>,

    /// Solver convergence tolerance
    #[arg(long)]
    tolerance: Option<f64>,

    /// Solver iteration cap per tick
    #[arg(long)]
    max_iterations: Option<u32>,

    /// What to do when the solver does not converge
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Run conflict-free systems in parallel
    #[arg(long)]
    parallel: bool,

    /// JSON-lines file for tick snapshots (discarded if omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(nodes) = self.nodes {
            config.network.nodes = nodes;
        }
        if let Some(end) = self.end {
            config.simulation.end = end;
        }
        if let Some(dt) = self.dt {
            config.simulation.dt = dt;
        }
        if let Some(tolerance) = self.tolerance {
            config.convergence.tolerance = tolerance;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.convergence.max_iterations = max_iterations;
        }
        if let Some(policy) = self.policy {
            config.simulation.convergence_policy = policy.into();
        }
        if self.parallel {
            config.simulation.execution = ExecutionMode::Parallel;
        }
    }
}

fn main() {
    init_logging();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading run file: {}", path.display());
            match RunConfig::load(path) {
                Ok(config) => config,
                Err(e) => {
                    error!("{:#}", e);
                    process::exit(2);
                }
            }
        }
        None => RunConfig::default(),
    };
    args.apply(&mut config);

    let code = match &args.output {
        Some(path) => match JsonLinesWriter::create(path) {
            Ok(writer) => {
                info!("Writing snapshots to: {}", path.display());
                run(&config, writer)
            }
            Err(e) => {
                error!("Failed to open {}: {}", path.display(), e);
                1
            }
        },
        None => run(&config, NullWriter),
    };
    process::exit(code);
}

fn run(config: &RunConfig, writer: impl SnapshotWriter + 'static) -> i32 {
    let mut simulation: Simulation = match build_simulation(config, writer) {
        Ok((simulation, _)) => simulation,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return e.exit_code();
        }
    };

    match simulation.run() {
        Ok(report) => {
            if report.nonconverged_ticks > 0 {
                warn!(
                    "{} of {} ticks did not converge",
                    report.nonconverged_ticks, report.ticks_run
                );
            }
            info!(
                ticks = report.ticks_run,
                converged = report.converged_ticks,
                late_events = report.late_events,
                "Run finished: {:?}",
                report.termination
            );
            report.exit_code()
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            e.exit_code()
        }
    }
}
