//! Integration test harness for chat-ecs.
//!
//! This crate provides utilities for end-to-end testing of the full
//! simulation pipeline: Build network → Schedule → Run ticks → Inspect
//! records and world state.

use chat_ecs::{
    ComponentKind, Entity, Event, MemoryWriter, Simulation, TickRecord, TickSummary,
};
use chat_run::network::{Flow, Head, Inflow, Received};
use chat_run::{Network, RunConfig, build_simulation};

/// Test harness around the demo network with an in-memory writer.
pub struct TestHarness {
    simulation: Simulation,
    network: Network,
    writer: MemoryWriter,
}

impl TestHarness {
    /// Create a harness from a run configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is rejected.
    pub fn new(config: &RunConfig) -> Self {
        let writer = MemoryWriter::new();
        let (simulation, network) =
            build_simulation(config, writer.clone()).expect("simulation failed to build");
        Self {
            simulation,
            network,
            writer,
        }
    }

    /// Queue an inflow event for node `index`.
    ///
    /// # Panics
    ///
    /// Panics if the event time is not finite.
    pub fn inject(&mut self, index: usize, inflow: f64, time: f64) {
        let node = self.node(index);
        self.simulation
            .schedule_event(Event::to::<Inflow>(node, inflow, time))
            .expect("event rejected");
    }

    /// Execute a single tick.
    ///
    /// # Panics
    ///
    /// Panics if the tick fails or the simulation already ended.
    pub fn tick(&mut self) -> TickSummary {
        self.simulation
            .step()
            .expect("tick failed")
            .expect("simulation ended before the tick ran")
    }

    /// Execute multiple ticks.
    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.tick();
        }
    }

    pub fn node(&self, index: usize) -> Entity {
        self.network.node(index).expect("node index out of range")
    }

    pub fn link(&self, index: usize) -> Entity {
        self.network.links[index]
    }

    pub fn head(&self, index: usize) -> f64 {
        self.component::<Head>(self.node(index)).0
    }

    pub fn inflow(&self, index: usize) -> f64 {
        self.component::<Inflow>(self.node(index)).0
    }

    pub fn received(&self, index: usize) -> f64 {
        self.component::<Received>(self.node(index)).0
    }

    pub fn flow(&self, link: usize) -> f64 {
        self.component::<Flow>(self.link(link)).0
    }

    fn component<C: chat_ecs::Component + Copy>(&self, entity: Entity) -> C {
        *self
            .simulation
            .world()
            .get::<C>(entity)
            .unwrap_or_else(|e| panic!("{} lookup failed: {e}", ComponentKind::of::<C>()))
    }

    /// Records written so far.
    pub fn records(&self) -> Vec<TickRecord> {
        self.writer.records()
    }

    pub fn writer(&self) -> &MemoryWriter {
        &self.writer
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.simulation
    }
}
