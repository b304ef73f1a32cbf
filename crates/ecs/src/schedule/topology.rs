//! Dependency leveling within a stage.

use indexmap::IndexMap;

use crate::component::ComponentKind;
use crate::system::SystemDescriptor;

/// Systems that can run together. Indices refer to registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Level {
    pub systems: Vec<usize>,
}

/// Systems left with unresolved dependencies when leveling stopped.
#[derive(Debug)]
pub(crate) struct CycleError {
    pub involved: Vec<usize>,
}

/// Compute topological levels using Kahn's algorithm.
///
/// `nodes` pairs each system's registration index with its descriptor. An
/// edge A → B exists when A writes a kind B reads; a system reading its own
/// write is not an edge. Kinds are written by at most one system per stage.
pub(crate) fn topological_levels(
    nodes: &[(usize, &SystemDescriptor)],
) -> Result<Vec<Level>, CycleError> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut in_degree: IndexMap<usize, usize> = nodes.iter().map(|(id, _)| (*id, 0)).collect();
    let mut dependents: IndexMap<usize, Vec<usize>> = IndexMap::new();

    // Map written kinds to their writer for dependency lookup
    let mut writer_of: IndexMap<ComponentKind, usize> = IndexMap::new();
    for (id, descriptor) in nodes {
        for kind in &descriptor.writes {
            writer_of.insert(*kind, *id);
        }
    }

    for (id, descriptor) in nodes {
        for kind in &descriptor.reads {
            if let Some(&writer) = writer_of.get(kind)
                && writer != *id
            {
                if let Some(degree) = in_degree.get_mut(id) {
                    *degree += 1;
                }
                dependents.entry(writer).or_default().push(*id);
            }
        }
    }

    let mut levels = Vec::new();
    let mut current: Vec<usize> = nodes
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| in_degree[id] == 0)
        .collect();
    let mut processed = 0;

    while !current.is_empty() {
        // Sort for determinism
        current.sort_unstable();
        processed += current.len();

        let mut next = Vec::new();
        for id in &current {
            let Some(deps) = dependents.get(id) else {
                continue;
            };
            for dep in deps {
                if let Some(degree) = in_degree.get_mut(dep) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dep);
                    }
                }
            }
        }

        levels.push(Level { systems: current });
        current = next;
    }

    if processed != nodes.len() {
        let involved = nodes
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| in_degree[id] > 0)
            .collect();
        return Err(CycleError { involved });
    }

    Ok(levels)
}
