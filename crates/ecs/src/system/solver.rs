//! Solver systems
//!
//! A [`Solver`] performs one iteration of some network-consistency scheme and
//! returns the largest change it made. [`SolverSystem`] repeats it until the
//! change drops below the tolerance or the iteration cap is reached:
//!
//! ```text
//! for i in 1..=max_iterations:
//!     delta = solver.iterate()
//!     delta not finite  -> NumericError
//!     delta < tolerance -> converged after i iterations
//! not converged after max_iterations
//! ```
//!
//! A non-converged outcome is not an error here; the simulation loop applies
//! the configured policy.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use super::{System, SystemDescriptor, SystemOutcome, SystemRole, SystemView, TickContext};
use crate::component::ComponentKind;
use crate::error::{Error, Result};
use crate::types::{SimulationContext, Stage};

/// Iteration bounds for a solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Convergence threshold on the max component delta of one iteration.
    pub tolerance: f64,
    /// Iteration cap per tick.
    pub max_iterations: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

impl ConvergenceConfig {
    pub fn new(tolerance: f64, max_iterations: u32) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a bounded solver loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub converged: bool,
    pub iterations: u32,
    /// Max delta of the last iteration.
    pub max_delta: f64,
}

/// External solver contract.
pub trait Solver: Send {
    fn name(&self) -> &str;

    /// Component kinds the solver reads.
    fn reads(&self) -> Vec<ComponentKind>;

    /// Component kinds the solver updates.
    fn writes(&self) -> Vec<ComponentKind>;

    /// Perform one iteration and return the max component delta.
    fn iterate(&mut self, view: &mut SystemView<'_>, ctx: &SimulationContext) -> Result<f64>;
}

/// Runs a [`Solver`] to convergence once per tick.
pub struct SolverSystem<S> {
    solver: S,
    descriptor: SystemDescriptor,
    convergence: ConvergenceConfig,
}

impl<S: Solver> SolverSystem<S> {
    pub fn new(solver: S, convergence: ConvergenceConfig) -> Self {
        let descriptor = SystemDescriptor::new(solver.name(), SystemRole::Solver)
            .reads(solver.reads())
            .writes(solver.writes());
        Self {
            solver,
            descriptor,
            convergence,
        }
    }

    pub fn at(mut self, stage: Stage) -> Self {
        self.descriptor.stage = stage;
        self
    }

    pub fn convergence(&self) -> &ConvergenceConfig {
        &self.convergence
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Iterate the solver until convergence or the iteration cap.
    pub fn solve(
        &mut self,
        view: &mut SystemView<'_>,
        ctx: &SimulationContext,
    ) -> Result<ConvergenceReport> {
        let ConvergenceConfig {
            tolerance,
            max_iterations,
        } = self.convergence;
        let mut max_delta = f64::INFINITY;

        for iteration in 1..=max_iterations {
            max_delta = self.solver.iterate(view, ctx)?;
            trace!(iteration, max_delta, "solver iteration");

            if !max_delta.is_finite() {
                error!(system = %self.descriptor.name, iteration, max_delta, "non-finite solver delta");
                return Err(Error::NumericError {
                    system: self.descriptor.name.clone(),
                    message: format!("non-finite delta {max_delta} at iteration {iteration}"),
                });
            }

            if max_delta < tolerance {
                debug!(iterations = iteration, max_delta, "solver converged");
                return Ok(ConvergenceReport {
                    converged: true,
                    iterations: iteration,
                    max_delta,
                });
            }
        }

        Ok(ConvergenceReport {
            converged: false,
            iterations: max_iterations,
            max_delta,
        })
    }
}

impl<S: Solver> System for SolverSystem<S> {
    fn descriptor(&self) -> &SystemDescriptor {
        &self.descriptor
    }

    fn validate(&self) -> Result<()> {
        self.convergence.validate().map_err(|err| match err {
            Error::InvalidConfig(message) => {
                Error::InvalidConfig(format!("solver '{}': {message}", self.descriptor.name))
            }
            other => other,
        })
    }

    fn run(&mut self, view: &mut SystemView<'_>, ctx: &TickContext<'_>) -> Result<SystemOutcome> {
        let report = self.solve(view, ctx.sim())?;
        Ok(SystemOutcome::solved(report))
    }
}
