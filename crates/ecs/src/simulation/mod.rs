//! Simulation loop
//!
//! ```text
//! Initialized --step--> Running --step--> ... --> Terminated(reason)
//! ```
//!
//! Each [`Simulation::step`] executes one tick:
//!
//! 1. advance the clock to `start + tick·dt`
//! 2. drain due events (late ones are annotated)
//! 3. run every stage level by level; forcing systems apply the events
//! 4. run reporting systems with the tick's annotations
//! 5. terminate when the clock is exhausted or cancellation was requested
//!
//! Cancellation is only observed at tick boundaries, so the world is always
//! left at a completed tick. Fatal errors terminate the loop as `Aborted`.
//! On every termination each system's `finish` runs exactly once.

mod cancel;
mod clock;
mod config;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, error, info, instrument, warn};

use crate::component::ComponentKind;
use crate::error::{Error, Result};
use crate::event::{Event, EventQueue};
use crate::schedule::{Schedule, run_level};
use crate::system::{Annotation, System, SystemDescriptor, SystemRole, TickContext, TickRecord};
use crate::types::SimulationContext;
use crate::world::World;

pub use cancel::CancellationToken;
pub use config::{ConvergencePolicy, ExecutionMode, SimulationConfig};

use clock::Clock;

/// Why a simulation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The clock reached its end time.
    Completed,
    /// Cancellation was requested.
    Cancelled,
    /// A fatal error stopped the run.
    Aborted,
}

impl Termination {
    /// Process exit code a driver should report.
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Completed => 0,
            Termination::Aborted => 1,
            Termination::Cancelled => 130,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initialized,
    Running,
    Terminated(Termination),
}

/// Outcome of one executed tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub tick: u64,
    pub time: f64,
    /// Every solver of the tick converged.
    pub converged: bool,
    pub late_events: usize,
    pub annotations: usize,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub ticks_run: u64,
    pub converged_ticks: u64,
    pub nonconverged_ticks: u64,
    pub late_events: u64,
    pub termination: Option<Termination>,
    pub annotations: Vec<Annotation>,
    /// Every observable component at the last completed tick.
    pub final_state: TickRecord,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.termination.map_or(0, Termination::exit_code)
    }
}

#[derive(Debug, Default)]
struct RunStats {
    ticks_run: u64,
    converged_ticks: u64,
    nonconverged_ticks: u64,
    late_events: u64,
}

/// Collects the world, systems, configuration and initial events of a run.
pub struct SimulationBuilder {
    world: World,
    config: SimulationConfig,
    systems: Vec<Box<dyn System>>,
    events: Vec<Event>,
    cancellation: CancellationToken,
}

impl SimulationBuilder {
    pub fn new(world: World) -> Self {
        Self {
            world,
            config: SimulationConfig::default(),
            systems: Vec::new(),
            events: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_system(self, system: impl System + 'static) -> Self {
        self.add_boxed(Box::new(system))
    }

    pub fn add_boxed(mut self, system: Box<dyn System>) -> Self {
        self.systems.push(system);
        self
    }

    pub fn schedule_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    pub fn schedule_events(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.events.extend(events);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Validate everything and produce an `Initialized` simulation.
    ///
    /// All configuration errors surface here; a simulation that builds
    /// never fails for configuration reasons once it runs.
    pub fn build(self) -> Result<Simulation> {
        self.config.validate()?;
        for system in &self.systems {
            system.validate()?;
        }

        let descriptors: Vec<SystemDescriptor> =
            self.systems.iter().map(|s| s.descriptor().clone()).collect();
        for descriptor in &descriptors {
            if let Some(kind) = descriptor
                .accessed()
                .find(|kind| !self.world.is_registered(kind))
            {
                error!(system = %descriptor.name, %kind, "required component kind missing");
                return Err(Error::MissingRequiredKind {
                    system: descriptor.name.clone(),
                    kind: *kind,
                });
            }
        }
        let schedule = Schedule::build(&descriptors)?;

        let forcing_kinds = descriptors
            .iter()
            .filter(|d| d.role == SystemRole::Forcing)
            .flat_map(|d| d.writes.iter().copied())
            .collect();

        let mut queue = EventQueue::new();
        for event in self.events {
            queue.schedule(event)?;
        }

        let config = self.config;
        info!(
            systems = descriptors.len(),
            stages = schedule.stages().len(),
            levels = schedule.level_count(),
            entities = self.world.alive_count(),
            events = queue.len(),
            start = config.start,
            end = config.end,
            dt = config.dt,
            "simulation built"
        );

        Ok(Simulation {
            clock: Clock::new(config.start, config.end, config.dt),
            world: self.world,
            config,
            systems: self.systems,
            descriptors,
            schedule,
            forcing_kinds,
            queue,
            cancellation: self.cancellation,
            state: LoopState::Initialized,
            stats: RunStats::default(),
            annotations: Vec::new(),
            last: None,
            aborted: None,
        })
    }
}

/// A built simulation and its loop state.
pub struct Simulation {
    world: World,
    config: SimulationConfig,
    systems: Vec<Box<dyn System>>,
    descriptors: Vec<SystemDescriptor>,
    schedule: Schedule,
    forcing_kinds: HashSet<ComponentKind>,
    queue: EventQueue,
    clock: Clock,
    cancellation: CancellationToken,
    state: LoopState,
    stats: RunStats,
    annotations: Vec<Annotation>,
    last: Option<SimulationContext>,
    /// Tick that failed; its partial state is what the world holds.
    aborted: Option<SimulationContext>,
}

impl Simulation {
    pub fn builder(world: World) -> SimulationBuilder {
        SimulationBuilder::new(world)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, LoopState::Terminated(_))
    }

    pub fn termination(&self) -> Option<Termination> {
        match self.state {
            LoopState::Terminated(termination) => Some(termination),
            _ => None,
        }
    }

    /// Token that cancels this simulation at the next tick boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Context of the last completed tick.
    pub fn last_tick(&self) -> Option<&SimulationContext> {
        self.last.as_ref()
    }

    /// Queue an event while the simulation is paused between ticks. Events
    /// for already drained times are delivered at the next tick as late.
    ///
    /// Returns the event's sequence number. Non-finite times are rejected.
    pub fn schedule_event(&mut self, event: Event) -> Result<u64> {
        self.queue.schedule(event)
    }

    /// Run until termination and report.
    #[instrument(skip(self), name = "run")]
    pub fn run(&mut self) -> Result<RunReport> {
        if self.is_terminated() {
            return Err(Error::AlreadyTerminated);
        }
        info!(ticks = self.config.tick_count(), "simulation starting");
        while !self.is_terminated() {
            self.step()?;
        }
        Ok(self.report())
    }

    /// Execute one tick.
    ///
    /// Returns `None` when the simulation terminated at the tick boundary
    /// without running a tick (cancellation observed before it started).
    #[instrument(skip(self), name = "tick", fields(tick = self.clock.ticks()))]
    pub fn step(&mut self) -> Result<Option<TickSummary>> {
        if self.is_terminated() {
            return Err(Error::AlreadyTerminated);
        }
        if self.cancellation.is_cancelled() {
            self.terminate(Termination::Cancelled)?;
            return Ok(None);
        }
        let Some(sim) = self.clock.advance() else {
            self.terminate(Termination::Completed)?;
            return Ok(None);
        };
        self.state = LoopState::Running;

        let summary = match self.execute_tick(sim) {
            Ok(summary) => summary,
            Err(err) => {
                self.aborted = Some(sim);
                self.abort(&err);
                return Err(err);
            }
        };

        if self.clock.is_exhausted() {
            self.terminate(Termination::Completed)?;
        } else if self.cancellation.is_cancelled() {
            self.terminate(Termination::Cancelled)?;
        }
        Ok(Some(summary))
    }

    fn execute_tick(&mut self, sim: SimulationContext) -> Result<TickSummary> {
        let due = self.queue.drain_due(sim.time);
        let mut annotations = Vec::new();
        let mut late_events = 0;

        for drained in &due {
            let event = &drained.event;
            if !self.forcing_kinds.contains(&event.kind) {
                error!(target_entity = %event.target, kind = %event.kind, "no forcing system for event");
                return Err(Error::UnroutedEvent {
                    tick: sim.tick,
                    entity: event.target,
                    kind: event.kind,
                    time: event.time,
                });
            }
            if drained.late {
                late_events += 1;
                warn!(
                    target_entity = %event.target,
                    kind = %event.kind,
                    scheduled = event.time,
                    applied_at = sim.time,
                    "late event injected"
                );
                annotations.push(Annotation::LateInjection {
                    tick: sim.tick,
                    entity: event.target,
                    kind: event.kind.name().to_string(),
                    scheduled: event.time,
                    applied_at: sim.time,
                });
            }
        }
        debug!(time = sim.time, events = due.len(), "tick start");

        let parallel = self.config.execution == ExecutionMode::Parallel;
        let mut converged = true;

        for plan in self.schedule.stages() {
            let _span = debug_span!("stage", stage = %plan.stage).entered();
            for level in &plan.levels {
                let ctx = TickContext::new(sim)
                    .with_events(&due)
                    .with_annotations(&annotations);
                let outcomes = run_level(
                    &mut self.world,
                    &mut self.systems,
                    &self.descriptors,
                    level,
                    &ctx,
                    parallel,
                )?;

                for (index, outcome) in outcomes {
                    let Some(report) = outcome.convergence else {
                        continue;
                    };
                    if report.converged {
                        continue;
                    }
                    let system = &self.descriptors[index].name;
                    match self.config.convergence_policy {
                        ConvergencePolicy::Abort => {
                            error!(
                                %system,
                                iterations = report.iterations,
                                max_delta = report.max_delta,
                                "solver did not converge"
                            );
                            return Err(Error::ConvergenceFailure {
                                tick: sim.tick,
                                system: system.clone(),
                                iterations: report.iterations,
                                max_delta: report.max_delta,
                            });
                        }
                        ConvergencePolicy::Continue => {
                            warn!(
                                %system,
                                iterations = report.iterations,
                                max_delta = report.max_delta,
                                "solver did not converge, continuing"
                            );
                            converged = false;
                            annotations.push(Annotation::ConvergenceFailure {
                                tick: sim.tick,
                                system: system.clone(),
                                iterations: report.iterations,
                                max_delta: report.max_delta,
                            });
                        }
                    }
                }
            }
        }

        let ctx = TickContext::new(sim)
            .with_events(&due)
            .with_annotations(&annotations);
        run_level(
            &mut self.world,
            &mut self.systems,
            &self.descriptors,
            self.schedule.reporting(),
            &ctx,
            false,
        )?;

        self.stats.ticks_run += 1;
        if converged {
            self.stats.converged_ticks += 1;
        } else {
            self.stats.nonconverged_ticks += 1;
        }
        self.stats.late_events += late_events as u64;
        let summary = TickSummary {
            tick: sim.tick,
            time: sim.time,
            converged,
            late_events,
            annotations: annotations.len(),
        };
        self.annotations.extend(annotations);
        self.last = Some(sim);

        debug!(converged, "tick complete");
        Ok(summary)
    }

    fn terminate(&mut self, termination: Termination) -> Result<()> {
        self.state = LoopState::Terminated(termination);
        info!(
            ?termination,
            ticks = self.stats.ticks_run,
            converged = self.stats.converged_ticks,
            nonconverged = self.stats.nonconverged_ticks,
            late_events = self.stats.late_events,
            "simulation terminated"
        );
        self.finish_systems()
    }

    fn abort(&mut self, cause: &Error) {
        self.state = LoopState::Terminated(Termination::Aborted);
        error!(error = %cause, ticks = self.stats.ticks_run, "simulation aborted");
        if let Err(err) = self.finish_systems() {
            warn!(error = %err, "finishing systems after abort failed");
        }
    }

    fn finish_systems(&mut self) -> Result<()> {
        let tick = self.aborted.or(self.last).map_or(0, |sim| sim.tick);
        let mut first_error = None;
        for (system, descriptor) in self.systems.iter_mut().zip(&self.descriptors) {
            if let Err(err) = system.finish() {
                error!(system = %descriptor.name, error = %err, "system finish failed");
                first_error.get_or_insert(err.in_system(tick, &descriptor.name));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Counters, annotations and a snapshot of every observable component.
    ///
    /// After an abort the snapshot is labelled with the failed tick, since
    /// the world holds that tick's partial state.
    pub fn report(&self) -> RunReport {
        let (tick, time) = self
            .aborted
            .or(self.last)
            .map_or((0, self.config.start), |sim| (sim.tick, sim.time));
        let kinds: Vec<ComponentKind> = self.world.kinds().collect();
        let final_state = TickRecord::capture(
            tick,
            time,
            self.world.entities(),
            &kinds,
            |entity, kind| Ok(self.world.observe(entity, kind)),
        )
        .unwrap_or_else(|_| TickRecord {
            tick,
            time,
            entities: Vec::new(),
            annotations: Vec::new(),
        });

        RunReport {
            ticks_run: self.stats.ticks_run,
            converged_ticks: self.stats.converged_ticks,
            nonconverged_ticks: self.stats.nonconverged_ticks,
            late_events: self.stats.late_events,
            termination: self.termination(),
            annotations: self.annotations.clone(),
            final_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests::{Head, Inflow};
    use crate::system::{
        ConvergenceConfig, FnSystem, ForcingSystem, MemoryWriter, ReportingSystem, Solver,
        SolverSystem, SystemView,
    };
    use crate::types::Value;

    /// Moves head halfway toward inflow each iteration.
    struct Relax;

    impl Solver for Relax {
        fn name(&self) -> &str {
            "relax"
        }

        fn reads(&self) -> Vec<ComponentKind> {
            vec![ComponentKind::of::<Inflow>()]
        }

        fn writes(&self) -> Vec<ComponentKind> {
            vec![ComponentKind::of::<Head>()]
        }

        fn iterate(&mut self, view: &mut SystemView<'_>, _ctx: &SimulationContext) -> Result<f64> {
            let nodes: Vec<_> = view
                .query(&[ComponentKind::of::<Head>(), ComponentKind::of::<Inflow>()])?
                .iter()
                .collect();
            let mut max_delta: f64 = 0.0;
            for node in nodes {
                let target = view.get::<Inflow>(node)?.0;
                let head = view.get_mut::<Head>(node)?;
                let next = head.0 + (target - head.0) / 2.0;
                max_delta = max_delta.max((next - head.0).abs());
                head.0 = next;
            }
            Ok(max_delta)
        }
    }

    fn world() -> (World, crate::entity::Entity) {
        let mut world = World::new();
        let node = world.spawn_bundle((Head(0.0), Inflow(0.0)));
        (world, node)
    }

    fn builder(world: World, convergence: ConvergenceConfig, writer: MemoryWriter) -> SimulationBuilder {
        Simulation::builder(world)
            .config(SimulationConfig::new(0.0, 3.0, 1.0))
            .add_system(ForcingSystem::of::<Inflow>("rain"))
            .add_system(SolverSystem::new(Relax, convergence))
            .add_system(ReportingSystem::new(
                "report",
                [ComponentKind::of::<Head>(), ComponentKind::of::<Inflow>()],
                writer,
            ))
    }

    #[test]
    fn test_run_to_completion() {
        let (world, node) = world();
        let writer = MemoryWriter::new();
        let mut sim = builder(world, ConvergenceConfig::new(1e-3, 100), writer.clone())
            .schedule_event(Event::to::<Inflow>(node, 8.0, 0.0))
            .build()
            .unwrap();
        assert_eq!(sim.state(), LoopState::Initialized);

        let report = sim.run().unwrap();
        assert_eq!(report.termination, Some(Termination::Completed));
        assert_eq!(report.ticks_run, 4);
        assert_eq!(report.converged_ticks, 4);
        assert_eq!(report.exit_code(), 0);
        assert!(writer.is_closed());

        let records = writer.records();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].value(node, "Inflow"), Some(&Value::Scalar(8.0)));
        let head = sim.world().get::<Head>(node).unwrap().0;
        assert!((head - 8.0).abs() < 1e-3);
        assert!(matches!(sim.step(), Err(Error::AlreadyTerminated)));
    }

    #[test]
    fn test_nonconvergence_continue_annotates() {
        let (world, node) = world();
        let writer = MemoryWriter::new();
        let mut sim = builder(world, ConvergenceConfig::new(1e-9, 2), writer.clone())
            .schedule_event(Event::to::<Inflow>(node, 8.0, 0.0))
            .build()
            .unwrap();

        let summary = sim.step().unwrap().unwrap();
        assert!(!summary.converged);
        let record = &writer.records()[0];
        assert!(matches!(
            &record.annotations[0],
            Annotation::ConvergenceFailure { iterations: 2, .. }
        ));
        // Best state is kept: two halvings toward 8.
        assert_eq!(sim.world().get::<Head>(node).unwrap(), &Head(6.0));
    }

    #[test]
    fn test_nonconvergence_abort_policy() {
        let (world, node) = world();
        let writer = MemoryWriter::new();
        let mut sim = builder(world, ConvergenceConfig::new(1e-9, 2), writer.clone())
            .config(SimulationConfig::new(0.0, 3.0, 1.0).with_policy(ConvergencePolicy::Abort))
            .schedule_event(Event::to::<Inflow>(node, 8.0, 0.0))
            .build()
            .unwrap();

        let err = sim.run().unwrap_err();
        assert!(matches!(err, Error::ConvergenceFailure { tick: 0, .. }));
        assert_eq!(sim.termination(), Some(Termination::Aborted));
        assert!(writer.is_closed());
        assert!(writer.is_empty());
    }

    #[test]
    fn test_abort_report_labels_failed_tick() {
        let (world, node) = world();
        let writer = MemoryWriter::new();
        let mut sim = builder(world, ConvergenceConfig::new(1e-9, 2), writer.clone())
            .config(SimulationConfig::new(0.0, 3.0, 1.0).with_policy(ConvergencePolicy::Abort))
            .schedule_event(Event::to::<Inflow>(node, 8.0, 1.0))
            .build()
            .unwrap();

        // Tick 0 is already at rest; tick 1 forces a jump the cap cannot absorb.
        sim.step().unwrap();
        assert!(matches!(sim.step(), Err(Error::ConvergenceFailure { tick: 1, .. })));

        let report = sim.report();
        assert_eq!(report.ticks_run, 1);
        assert_eq!(report.final_state.tick, 1);
        assert_eq!(report.final_state.time, 1.0);
        assert_eq!(
            report.final_state.value(node, "Inflow"),
            Some(&Value::Scalar(8.0))
        );
        assert_eq!(report.final_state.value(node, "Head"), Some(&Value::Scalar(6.0)));
    }

    #[test]
    fn test_late_event_annotated() {
        let (world, node) = world();
        let writer = MemoryWriter::new();
        let mut sim = builder(world, ConvergenceConfig::new(1e-3, 100), writer.clone())
            .build()
            .unwrap();

        sim.step().unwrap();
        sim.step().unwrap();
        sim.schedule_event(Event::to::<Inflow>(node, 4.0, 0.5)).unwrap();
        let summary = sim.step().unwrap().unwrap();
        assert_eq!(summary.late_events, 1);

        let record = &writer.records()[2];
        assert_eq!(record.value(node, "Inflow"), Some(&Value::Scalar(4.0)));
        assert!(matches!(
            &record.annotations[0],
            Annotation::LateInjection { scheduled, applied_at, .. } if *scheduled == 0.5 && *applied_at == 2.0
        ));
        assert_eq!(sim.report().late_events, 1);
    }

    #[test]
    fn test_unrouted_event_aborts() {
        let (world, node) = world();
        let mut sim = builder(world, ConvergenceConfig::default(), MemoryWriter::new())
            .schedule_event(Event::to::<Head>(node, 1.0, 0.0))
            .build()
            .unwrap();
        let err = sim.step().unwrap_err();
        assert!(matches!(err, Error::UnroutedEvent { tick: 0, .. }));
        assert!(err.to_string().starts_with("tick 0:"));
        assert_eq!(sim.termination(), Some(Termination::Aborted));
    }

    #[test]
    fn test_unrouted_event_reports_its_tick() {
        let (world, node) = world();
        let mut sim = builder(world, ConvergenceConfig::default(), MemoryWriter::new())
            .schedule_event(Event::to::<Head>(node, 1.0, 2.0))
            .build()
            .unwrap();
        sim.step().unwrap();
        sim.step().unwrap();
        assert!(matches!(
            sim.step(),
            Err(Error::UnroutedEvent { tick: 2, time, .. }) if time == 2.0
        ));
    }

    #[test]
    fn test_non_finite_event_time_rejected_at_build() {
        for time in [f64::NAN, -f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let (world, node) = world();
            let result = builder(world, ConvergenceConfig::default(), MemoryWriter::new())
                .schedule_event(Event::to::<Inflow>(node, 1.0, 0.0))
                .schedule_event(Event::to::<Inflow>(node, 2.0, time))
                .build();
            assert!(matches!(result, Err(Error::InvalidConfig(_))), "time {time}");
        }
    }

    #[test]
    fn test_non_finite_event_time_rejected_while_paused() {
        let (world, node) = world();
        let writer = MemoryWriter::new();
        let mut sim = builder(world, ConvergenceConfig::new(1e-3, 100), writer.clone())
            .schedule_event(Event::to::<Inflow>(node, 8.0, 0.0))
            .build()
            .unwrap();

        let err = sim.schedule_event(Event::to::<Inflow>(node, 1.0, -f64::NAN));
        assert!(matches!(err, Err(Error::InvalidConfig(_))));

        // The rejected event does not block the valid one queued before it.
        sim.step().unwrap();
        assert_eq!(writer.records()[0].value(node, "Inflow"), Some(&Value::Scalar(8.0)));
        assert_eq!(sim.world().get::<Inflow>(node).unwrap(), &Inflow(8.0));
    }

    #[test]
    fn test_cancel_before_step() {
        let (world, _) = world();
        let mut sim = builder(world, ConvergenceConfig::default(), MemoryWriter::new())
            .build()
            .unwrap();
        sim.cancellation_token().cancel();
        assert_eq!(sim.step().unwrap(), None);
        assert_eq!(sim.termination(), Some(Termination::Cancelled));
        assert_eq!(sim.report().ticks_run, 0);
    }

    #[test]
    fn test_missing_required_kind() {
        let world = World::new();
        let result = Simulation::builder(world)
            .add_system(ForcingSystem::of::<Inflow>("rain"))
            .build();
        assert!(matches!(result, Err(Error::MissingRequiredKind { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (world, _) = world();
        let result = Simulation::builder(world)
            .config(SimulationConfig::new(0.0, 1.0, 0.0))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_finish_called_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting {
            descriptor: SystemDescriptor,
            finished: Arc<AtomicUsize>,
        }

        impl System for Counting {
            fn descriptor(&self) -> &SystemDescriptor {
                &self.descriptor
            }

            fn run(
                &mut self,
                _view: &mut SystemView<'_>,
                _ctx: &TickContext<'_>,
            ) -> Result<crate::system::SystemOutcome> {
                Ok(crate::system::SystemOutcome::done())
            }

            fn finish(&mut self) -> Result<()> {
                self.finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let finished = Arc::new(AtomicUsize::new(0));
        let (world, _) = world();
        let mut sim = Simulation::builder(world)
            .config(SimulationConfig::new(0.0, 2.0, 1.0))
            .add_system(Counting {
                descriptor: SystemDescriptor::new("count", SystemRole::Routing),
                finished: finished.clone(),
            })
            .add_system(FnSystem::new(
                SystemDescriptor::new("noop", SystemRole::Routing).read::<Head>(),
                |_, _| Ok(()),
            ))
            .build()
            .unwrap();
        sim.run().unwrap();
        assert!(sim.run().is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
