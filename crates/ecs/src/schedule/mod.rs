//! Scheduling
//!
//! Systems are grouped by stage. Within a stage an edge A → B exists when A
//! writes a component kind that B reads, and systems are leveled with Kahn's
//! algorithm: all systems of a level are conflict-free and may run in
//! parallel. Stages run in ascending ordinal order with a barrier between
//! levels and between stages. Reporting systems run after every stage.
//!
//! # Registration rules
//!
//! Checked by [`Schedule::build`], in this order:
//!
//! 1. system names are unique
//! 2. reporting systems declare no writes
//! 3. forcing systems run strictly before the first stage holding a solver
//! 4. no two systems of a stage write the same kind
//! 5. no stage contains a dependency cycle

mod executor;
mod topology;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::system::{SystemDescriptor, SystemRole};
use crate::types::Stage;

pub(crate) use executor::run_level;
pub use topology::Level;

/// Leveled systems of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub stage: Stage,
    pub levels: Vec<Level>,
}

/// Execution order for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    stages: Vec<StagePlan>,
    reporting: Level,
}

impl Schedule {
    /// Validate descriptors and compute the execution order. Indices in the
    /// result refer to positions in `descriptors`.
    pub fn build(descriptors: &[SystemDescriptor]) -> Result<Self> {
        check_unique_names(descriptors)?;
        check_reporting_is_read_only(descriptors)?;
        check_forcing_precedes_solvers(descriptors)?;

        let mut by_stage: BTreeMap<Stage, Vec<(usize, &SystemDescriptor)>> = BTreeMap::new();
        let mut reporting = Vec::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.role == SystemRole::Reporting {
                reporting.push(index);
            } else {
                by_stage
                    .entry(descriptor.stage)
                    .or_default()
                    .push((index, descriptor));
            }
        }

        let mut stages = Vec::with_capacity(by_stage.len());
        for (stage, nodes) in by_stage {
            check_write_overlap(stage, &nodes)?;
            let levels = topology::topological_levels(&nodes).map_err(|cycle| {
                let systems: Vec<String> = cycle
                    .involved
                    .iter()
                    .map(|&i| descriptors[i].name.clone())
                    .collect();
                error!(%stage, ?systems, "dependency cycle");
                Error::CycleDetected { stage, systems }
            })?;
            debug!(%stage, systems = nodes.len(), levels = levels.len(), "stage leveled");
            stages.push(StagePlan { stage, levels });
        }

        Ok(Self {
            stages,
            reporting: Level { systems: reporting },
        })
    }

    /// Non-reporting stages in execution order.
    pub fn stages(&self) -> &[StagePlan] {
        &self.stages
    }

    /// Reporting systems, in registration order.
    pub fn reporting(&self) -> &Level {
        &self.reporting
    }

    /// Every system index in the order a sequential tick runs them.
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        self.stages
            .iter()
            .flat_map(|plan| plan.levels.iter())
            .chain(std::iter::once(&self.reporting))
            .flat_map(|level| level.systems.iter().copied())
    }

    pub fn level_count(&self) -> usize {
        self.stages.iter().map(|plan| plan.levels.len()).sum()
    }
}

fn check_unique_names(descriptors: &[SystemDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        if !seen.insert(descriptor.name.as_str()) {
            return Err(Error::DuplicateSystem(descriptor.name.clone()));
        }
    }
    Ok(())
}

fn check_reporting_is_read_only(descriptors: &[SystemDescriptor]) -> Result<()> {
    for descriptor in descriptors {
        if descriptor.role == SystemRole::Reporting && !descriptor.writes.is_empty() {
            return Err(Error::InvalidSchedule {
                system: descriptor.name.clone(),
                message: "reporting systems must not write components".to_string(),
            });
        }
    }
    Ok(())
}

fn check_forcing_precedes_solvers(descriptors: &[SystemDescriptor]) -> Result<()> {
    let Some(first_solver) = descriptors
        .iter()
        .filter(|d| d.role == SystemRole::Solver)
        .map(|d| d.stage)
        .min()
    else {
        return Ok(());
    };
    for descriptor in descriptors {
        if descriptor.role == SystemRole::Forcing && descriptor.stage >= first_solver {
            return Err(Error::InvalidSchedule {
                system: descriptor.name.clone(),
                message: format!(
                    "forcing in {} does not run before the first solver stage ({first_solver})",
                    descriptor.stage
                ),
            });
        }
    }
    Ok(())
}

fn check_write_overlap(stage: Stage, nodes: &[(usize, &SystemDescriptor)]) -> Result<()> {
    for (i, (_, first)) in nodes.iter().enumerate() {
        for (_, second) in &nodes[i + 1..] {
            if let Some(kind) = first.write_overlap(second) {
                return Err(Error::OverlappingWrites {
                    stage,
                    kind,
                    first: first.name.clone(),
                    second: second.name.clone(),
                });
            }
        }
    }
    Ok(())
}
