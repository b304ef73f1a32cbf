//! Demo hydraulic network
//!
//! A chain of nodes joined by conductance links, draining through an outfall
//! at the last node. Heads are balanced by a Jacobi iteration, link flows
//! follow the head difference and routed flows accumulate at the receiving
//! node.
//!
//! ```text
//! inflow ─► n0 ══c══ n1 ══c══ ... ══c══ n(N-1) ──k──► outfall level
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chat_ecs::{
    Component, ComponentKind, Connection, Entity, Error, Event, FnSystem, Result, RoutingSystem,
    SimulationContext, Solver, Stage, System, SystemDescriptor, SystemRole, SystemView, Value,
    World,
};

/// Piezometric head at a node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Head(pub f64);

impl Component for Head {
    fn observe(&self) -> Option<Value> {
        Some(Value::Scalar(self.0))
    }
}

/// External inflow at a node, set by forcing events.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Inflow(pub f64);

impl Component for Inflow {
    fn observe(&self) -> Option<Value> {
        Some(Value::Scalar(self.0))
    }

    fn force(&mut self, value: &Value) -> std::result::Result<(), String> {
        let inflow = value
            .as_scalar()
            .ok_or_else(|| format!("inflow expects a scalar, got {value}"))?;
        if !inflow.is_finite() {
            return Err(format!("inflow must be finite, got {inflow}"));
        }
        self.0 = inflow;
        Ok(())
    }
}

/// Free outfall: drains the node toward a fixed level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outfall {
    pub conductance: f64,
    pub level: f64,
}

impl Component for Outfall {}

/// Link conductance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conductance(pub f64);

impl Component for Conductance {}

/// Flow along a link, positive from upstream to downstream.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Flow(pub f64);

impl Component for Flow {
    fn observe(&self) -> Option<Value> {
        Some(Value::Scalar(self.0))
    }
}

/// Total flow routed into a node this tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Received(pub f64);

impl Component for Received {
    fn observe(&self) -> Option<Value> {
        Some(Value::Scalar(self.0))
    }
}

/// Shape of the generated chain network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub nodes: usize,
    pub conductance: f64,
    pub outfall_conductance: f64,
    pub outfall_level: f64,
    pub initial_head: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nodes: 2,
            conductance: 1.0,
            outfall_conductance: 1.0,
            outfall_level: 0.0,
            initial_head: 0.0,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(Error::InvalidConfig("network needs at least one node".into()));
        }
        for (name, value) in [
            ("conductance", self.conductance),
            ("outfall_conductance", self.outfall_conductance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if !self.outfall_level.is_finite() || !self.initial_head.is_finite() {
            return Err(Error::InvalidConfig(
                "outfall_level and initial_head must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Entities of a generated network, in chain order.
#[derive(Debug, Clone)]
pub struct Network {
    pub nodes: Vec<Entity>,
    pub links: Vec<Entity>,
}

impl Network {
    pub fn node(&self, index: usize) -> Option<Entity> {
        self.nodes.get(index).copied()
    }

    pub fn outlet(&self) -> Option<Entity> {
        self.nodes.last().copied()
    }
}

/// Populate `world` with a chain network.
pub fn build_network(world: &mut World, config: &NetworkConfig) -> Result<Network> {
    config.validate()?;
    register_kinds(world);

    let nodes: Vec<Entity> = (0..config.nodes)
        .map(|_| world.spawn_bundle((Head(config.initial_head), Inflow(0.0), Received(0.0))))
        .collect();
    if let Some(&outlet) = nodes.last() {
        world.attach(
            outlet,
            Outfall {
                conductance: config.outfall_conductance,
                level: config.outfall_level,
            },
        )?;
    }

    let links = nodes
        .windows(2)
        .map(|pair| {
            world.spawn_bundle((
                Connection::new(pair[0], pair[1]),
                Conductance(config.conductance),
                Flow(0.0),
            ))
        })
        .collect();

    debug!(nodes = config.nodes, "network built");
    Ok(Network { nodes, links })
}

/// Register every network kind, so single-node networks still satisfy the
/// declared accesses of the link systems.
pub fn register_kinds(world: &mut World) {
    world.register::<Head>();
    world.register::<Inflow>();
    world.register::<Received>();
    world.register::<Outfall>();
    world.register::<Connection>();
    world.register::<Conductance>();
    world.register::<Flow>();
}

/// Jacobi head balance.
///
/// Each node settles at the conductance-weighted mean of its neighbours'
/// heads, the outfall level and its inflow:
/// `h = (q + k·level + Σ c·h_m) / (k + Σ c)`. Nodes with no conductance keep
/// their head.
#[derive(Debug, Default)]
pub struct HeadBalance;

impl Solver for HeadBalance {
    fn name(&self) -> &str {
        "head_balance"
    }

    fn reads(&self) -> Vec<ComponentKind> {
        vec![
            ComponentKind::of::<Inflow>(),
            ComponentKind::of::<Outfall>(),
            ComponentKind::of::<Connection>(),
            ComponentKind::of::<Conductance>(),
        ]
    }

    fn writes(&self) -> Vec<ComponentKind> {
        vec![ComponentKind::of::<Head>()]
    }

    fn iterate(&mut self, view: &mut SystemView<'_>, _ctx: &SimulationContext) -> Result<f64> {
        let mut balance: IndexMap<Entity, (f64, f64)> = IndexMap::new();
        for node in &view.query(&[ComponentKind::of::<Head>(), ComponentKind::of::<Inflow>()])? {
            balance.insert(node, (view.get::<Inflow>(node)?.0, 0.0));
        }
        for node in &view.query(&[ComponentKind::of::<Outfall>()])? {
            let outfall = *view.get::<Outfall>(node)?;
            let entry = balance.entry(node).or_insert((0.0, 0.0));
            entry.0 += outfall.conductance * outfall.level;
            entry.1 += outfall.conductance;
        }
        let links = view.query(&[
            ComponentKind::of::<Connection>(),
            ComponentKind::of::<Conductance>(),
        ])?;
        for link in &links {
            let Connection {
                upstream,
                downstream,
            } = *view.get::<Connection>(link)?;
            let c = view.get::<Conductance>(link)?.0;
            let up = view.get::<Head>(upstream)?.0;
            let down = view.get::<Head>(downstream)?.0;
            for (node, other) in [(upstream, down), (downstream, up)] {
                let entry = balance.entry(node).or_insert((0.0, 0.0));
                entry.0 += c * other;
                entry.1 += c;
            }
        }

        let mut max_delta: f64 = 0.0;
        for (node, (numerator, denominator)) in balance {
            if denominator == 0.0 {
                continue;
            }
            let next = numerator / denominator;
            let head = view.get_mut::<Head>(node)?;
            max_delta = max_delta.max((next - head.0).abs());
            head.0 = next;
        }
        Ok(max_delta)
    }
}

/// Link flow from the settled head difference, `c·(h_up − h_down)`.
pub fn link_flow_system() -> impl System {
    let descriptor = SystemDescriptor::new("link_flow", SystemRole::Routing)
        .read::<Connection>()
        .read::<Conductance>()
        .read::<Head>()
        .write::<Flow>()
        .at(Stage::ROUTE);
    FnSystem::new(descriptor, |view, _ctx| {
        let links: Vec<Entity> = view
            .query(&[ComponentKind::of::<Connection>(), ComponentKind::of::<Flow>()])?
            .iter()
            .collect();
        for link in links {
            let Connection {
                upstream,
                downstream,
            } = *view.get::<Connection>(link)?;
            let c = view.get::<Conductance>(link)?.0;
            let flow = c * (view.get::<Head>(upstream)?.0 - view.get::<Head>(downstream)?.0);
            view.get_mut::<Flow>(link)?.0 = flow;
        }
        Ok(())
    })
}

/// Accumulates link flows into the receiving node.
pub fn inflow_routing() -> RoutingSystem<Flow, Received> {
    RoutingSystem::new("route_flow", |flow: &Flow| flow.0, |received: &mut Received, total| {
        received.0 = total;
    })
}

/// One block of a storm hyetograph: `intensity` applied from `start` until
/// the next block (or the end of the storm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StormBlock {
    pub start: f64,
    pub intensity: f64,
}

/// Stepwise rainfall hyetograph applied to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storm {
    /// Index of the node receiving the storm.
    #[serde(default)]
    pub node: usize,
    pub blocks: Vec<StormBlock>,
    /// Time the storm stops; inflow returns to zero.
    pub end: Option<f64>,
}

impl Storm {
    /// Forcing events for this storm, one per block plus a closing zero.
    pub fn events(&self, network: &Network) -> Result<Vec<Event>> {
        let target = network.node(self.node).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "storm targets node {} but the network has {} nodes",
                self.node,
                network.nodes.len()
            ))
        })?;
        if self.blocks.windows(2).any(|pair| pair[1].start <= pair[0].start) {
            return Err(Error::InvalidConfig(
                "storm blocks must have strictly increasing start times".into(),
            ));
        }

        let mut events: Vec<Event> = self
            .blocks
            .iter()
            .map(|block| Event::to::<Inflow>(target, block.intensity, block.start))
            .collect();
        if let Some(end) = self.end {
            if self.blocks.last().is_some_and(|last| end <= last.start) {
                return Err(Error::InvalidConfig(format!(
                    "storm end {end} is not after its last block"
                )));
            }
            events.push(Event::to::<Inflow>(target, 0.0, end));
        }
        Ok(events)
    }
}
