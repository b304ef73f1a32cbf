//! Level execution
//!
//! A level runs either sequentially in registration order or, when parallel
//! execution is enabled and the level holds more than one system, on rayon
//! worker threads. In the parallel case every system's write columns are
//! checked out of the store before the level starts, the systems run against
//! a shared store, and all columns are returned afterwards (also on
//! failure). Outcomes are always reported in registration order.

use rayon::prelude::*;
use tracing::{error, trace};

use super::Level;
use crate::component::{ComponentStore, TakenColumns};
use crate::error::{Error, Result};
use crate::system::{System, SystemDescriptor, SystemOutcome, SystemView, TickContext};
use crate::world::World;

/// Run every system of `level`. Returns `(system index, outcome)` pairs in
/// registration order.
pub(crate) fn run_level(
    world: &mut World,
    systems: &mut [Box<dyn System>],
    descriptors: &[SystemDescriptor],
    level: &Level,
    ctx: &TickContext<'_>,
    parallel: bool,
) -> Result<Vec<(usize, SystemOutcome)>> {
    if parallel && level.systems.len() > 1 {
        run_parallel(world, systems, descriptors, level, ctx)
    } else {
        run_sequential(world, systems, descriptors, level, ctx)
    }
}

fn run_sequential(
    world: &mut World,
    systems: &mut [Box<dyn System>],
    descriptors: &[SystemDescriptor],
    level: &Level,
    ctx: &TickContext<'_>,
) -> Result<Vec<(usize, SystemOutcome)>> {
    let mut outcomes = Vec::with_capacity(level.systems.len());
    for &index in &level.systems {
        let descriptor = &descriptors[index];
        let system = &mut systems[index];
        trace!(system = %descriptor.name, "running system");
        let outcome = world
            .with_view(descriptor, |view| system.run(view, ctx))
            .map_err(|err| failed(err, ctx, descriptor))?;
        outcomes.push((index, outcome));
    }
    Ok(outcomes)
}

fn run_parallel(
    world: &mut World,
    systems: &mut [Box<dyn System>],
    descriptors: &[SystemDescriptor],
    level: &Level,
    ctx: &TickContext<'_>,
) -> Result<Vec<(usize, SystemOutcome)>> {
    let (registry, store) = world.parts_mut();

    let mut taken: Vec<TakenColumns> = Vec::with_capacity(level.systems.len());
    for &index in &level.systems {
        match store.take_columns(&descriptors[index].writes) {
            Ok(columns) => taken.push(columns),
            Err(err) => {
                restore(store, taken);
                return Err(failed(err, ctx, &descriptors[index]));
            }
        }
    }

    trace!(systems = level.systems.len(), "running level in parallel");
    let results: Vec<(usize, Result<SystemOutcome>)> = {
        let store: &ComponentStore = store;
        select_mut(systems, &level.systems)
            .into_par_iter()
            .zip(taken.par_iter_mut())
            .map(|((index, system), columns)| {
                let mut view = SystemView::new(registry, store, columns, &descriptors[index]);
                (index, system.run(&mut view, ctx))
            })
            .collect()
    };
    restore(store, taken);

    // Apply results sequentially for determinism
    let mut outcomes = Vec::with_capacity(results.len());
    for (index, result) in results {
        let outcome = result.map_err(|err| failed(err, ctx, &descriptors[index]))?;
        outcomes.push((index, outcome));
    }
    Ok(outcomes)
}

fn select_mut<'s>(
    systems: &'s mut [Box<dyn System>],
    indices: &[usize],
) -> Vec<(usize, &'s mut Box<dyn System>)> {
    systems
        .iter_mut()
        .enumerate()
        .filter(|(index, _)| indices.contains(index))
        .collect()
}

fn restore(store: &mut ComponentStore, taken: Vec<TakenColumns>) {
    for columns in taken {
        store.restore_columns(columns);
    }
}

fn failed(err: Error, ctx: &TickContext<'_>, descriptor: &SystemDescriptor) -> Error {
    error!(tick = ctx.tick(), system = %descriptor.name, error = %err, "system failed");
    err.in_system(ctx.tick(), &descriptor.name)
}
