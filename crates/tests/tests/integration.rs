//! Integration tests for end-to-end simulation runs.
//!
//! These tests verify the full pipeline on the demo network:
//! Build world → Build schedule → Run ticks → Verify state and records

use chat_ecs::{
    Annotation, CancellationToken, ConvergenceConfig, ConvergencePolicy, Error, FnSystem,
    LoopState, MemoryWriter, ReportingSystem, Simulation, SimulationConfig, Stage,
    SystemDescriptor, SystemRole, Termination, Value, World,
};
use chat_run::RunConfig;
use chat_run::network::{
    Flow, Head, NetworkConfig, Received, Storm, StormBlock, register_kinds,
};
use chat_tests::TestHarness;

fn config(nodes: usize, end: f64) -> RunConfig {
    RunConfig {
        simulation: SimulationConfig::new(0.0, end, 60.0),
        convergence: ConvergenceConfig::new(1e-10, 2000),
        network: NetworkConfig {
            nodes,
            ..NetworkConfig::default()
        },
        ..RunConfig::default()
    }
}

/// Two nodes, one link, inflow 10 at node A at t=0.
///
/// With unit conductances and an outfall at level 0 the heads settle at
/// 20 and 10, so the link carries the full inflow.
#[test]
fn test_two_node_inflow_drives_link_flow() {
    let mut harness = TestHarness::new(&config(2, 600.0));
    harness.inject(0, 10.0, 0.0);

    let summary = harness.tick();
    assert_eq!(summary.tick, 0);
    assert!(summary.converged);

    assert_eq!(harness.inflow(0), 10.0);
    assert!((harness.head(0) - 20.0).abs() < 1e-6);
    assert!((harness.head(1) - 10.0).abs() < 1e-6);
    assert!((harness.flow(0) - 10.0).abs() < 1e-6);
    assert!((harness.received(1) - 10.0).abs() < 1e-6);
    assert_eq!(harness.received(0), 0.0);

    let records = harness.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value(harness.node(0), "Inflow"), Some(&Value::Scalar(10.0)));
}

/// Forcing persists until overridden.
#[test]
fn test_forcing_persists_between_events() {
    let mut harness = TestHarness::new(&config(3, 600.0));
    harness.inject(0, 4.0, 0.0);
    harness.inject(0, 0.0, 120.0);

    harness.run_ticks(2);
    assert_eq!(harness.inflow(0), 4.0);
    harness.tick();
    assert_eq!(harness.inflow(0), 0.0);
    assert!(harness.head(0).abs() < 1e-6);
}

/// Events scheduled for an already drained time arrive at the next tick,
/// annotated as late.
#[test]
fn test_late_event_is_applied_and_annotated() {
    let mut harness = TestHarness::new(&config(2, 600.0));
    harness.run_ticks(2);

    harness.inject(0, 5.0, 30.0);
    let summary = harness.tick();
    assert_eq!(summary.late_events, 1);
    assert_eq!(harness.inflow(0), 5.0);

    let records = harness.records();
    match &records[2].annotations[..] {
        [
            Annotation::LateInjection {
                tick,
                scheduled,
                applied_at,
                kind,
                ..
            },
        ] => {
            assert_eq!(*tick, 2);
            assert_eq!(*scheduled, 30.0);
            assert_eq!(*applied_at, 120.0);
            assert_eq!(kind, "Inflow");
        }
        other => panic!("unexpected annotations: {other:?}"),
    }
}

/// Cancellation requested during tick 2 stops the run at that tick's
/// boundary.
#[test]
fn test_cancellation_mid_tick_stops_at_boundary() {
    let token = CancellationToken::new();
    let mut world = World::new();
    chat_run::build_network(&mut world, &NetworkConfig::default()).unwrap();
    let writer = MemoryWriter::new();

    let canceller = token.clone();
    let watcher = FnSystem::new(
        SystemDescriptor::new("watcher", SystemRole::Routing)
            .read::<Head>()
            .at(Stage::ROUTE),
        move |_, ctx| {
            if ctx.tick() == 2 {
                canceller.cancel();
            }
            Ok(())
        },
    );

    let mut sim = Simulation::builder(world)
        .config(SimulationConfig::new(0.0, 600.0, 60.0))
        .add_system(watcher)
        .add_system(ReportingSystem::new(
            "snapshot",
            [chat_ecs::ComponentKind::of::<Head>()],
            writer.clone(),
        ))
        .cancellation(token)
        .build()
        .unwrap();

    let report = sim.run().unwrap();
    assert_eq!(report.termination, Some(Termination::Cancelled));
    assert_eq!(report.ticks_run, 3);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(sim.state(), LoopState::Terminated(Termination::Cancelled));
    assert_eq!(sim.last_tick().map(|t| t.tick), Some(2));

    // The tick in flight finished, including its report.
    let ticks: Vec<u64> = writer.records().iter().map(|r| r.tick).collect();
    assert_eq!(ticks, vec![0, 1, 2]);
    assert!(writer.is_closed());
}

/// Identical runs produce identical record streams.
#[test]
fn test_runs_are_deterministic() {
    let mut run = config(5, 900.0);
    run.storm = Some(Storm {
        node: 1,
        blocks: vec![
            StormBlock {
                start: 0.0,
                intensity: 3.0,
            },
            StormBlock {
                start: 240.0,
                intensity: 8.0,
            },
        ],
        end: Some(600.0),
    });

    let records = |run: &RunConfig| {
        let mut harness = TestHarness::new(run);
        harness.simulation_mut().run().unwrap();
        serde_json::to_string(&harness.records()).unwrap()
    };
    assert_eq!(records(&run), records(&run));

    run.simulation.execution = chat_ecs::ExecutionMode::Parallel;
    let parallel = records(&run);
    run.simulation.execution = chat_ecs::ExecutionMode::Sequential;
    assert_eq!(parallel, records(&run));
}

/// The run report carries counts and the final state.
#[test]
fn test_run_report_final_state() {
    let mut harness = TestHarness::new(&config(2, 180.0));
    harness.inject(0, 10.0, 0.0);
    let report = harness.simulation_mut().run().unwrap();

    assert_eq!(report.termination, Some(Termination::Completed));
    assert_eq!(report.ticks_run, 4);
    assert_eq!(report.converged_ticks, 4);
    assert_eq!(report.nonconverged_ticks, 0);
    assert_eq!(report.final_state.tick, 3);
    assert_eq!(
        report.final_state.value(harness.node(0), "Head"),
        Some(&Value::Scalar(harness.head(0)))
    );
    assert_eq!(
        report.final_state.value(harness.link(0), "Flow"),
        Some(&Value::Scalar(harness.flow(0)))
    );
    assert!(harness.writer().is_closed());
}

/// Under the continue policy a capped solver keeps its best state and the
/// tick is annotated.
#[test]
fn test_nonconvergence_continue() {
    let mut run = config(2, 120.0);
    run.convergence = ConvergenceConfig::new(1e-12, 3);
    let mut harness = TestHarness::new(&run);
    harness.inject(0, 10.0, 0.0);

    let summary = harness.tick();
    assert!(!summary.converged);
    let records = harness.records();
    assert!(matches!(
        &records[0].annotations[0],
        Annotation::ConvergenceFailure { iterations: 3, system, .. } if system == "head_balance"
    ));

    let report = harness.simulation_mut().run().unwrap();
    assert_eq!(report.nonconverged_ticks, 3);
    assert_eq!(report.exit_code(), 0);
}

/// With a report stride, non-convergence on skipped ticks still reaches
/// the record stream on the next written record.
#[test]
fn test_nonconvergence_with_stride_keeps_every_annotation() {
    let mut run = config(2, 300.0);
    run.convergence = ConvergenceConfig::new(1e-12, 3);
    run.report_stride = 4;
    let mut harness = TestHarness::new(&run);
    harness.inject(0, 10.0, 0.0);

    let report = harness.simulation_mut().run().unwrap();
    assert!(report.nonconverged_ticks > 1);

    let records = harness.records();
    let ticks: Vec<u64> = records.iter().map(|r| r.tick).collect();
    assert_eq!(ticks, vec![0, 4, 5]);

    let streamed: Vec<&Annotation> = records.iter().flat_map(|r| &r.annotations).collect();
    assert_eq!(streamed.len() as u64, report.nonconverged_ticks);
    assert_eq!(streamed.len(), report.annotations.len());
    for record in &records {
        assert!(record.annotations.iter().all(|a| a.tick() <= record.tick));
    }
}

/// Under the abort policy a capped solver stops the run.
#[test]
fn test_nonconvergence_abort() {
    let mut run = config(2, 120.0);
    run.convergence = ConvergenceConfig::new(1e-12, 3);
    run.simulation.convergence_policy = ConvergencePolicy::Abort;
    let mut harness = TestHarness::new(&run);
    harness.inject(0, 10.0, 0.0);

    let err = harness.simulation_mut().step().unwrap_err();
    assert!(matches!(
        err,
        Error::ConvergenceFailure { tick: 0, iterations: 3, .. }
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(harness.simulation().termination(), Some(Termination::Aborted));
    assert!(harness.records().is_empty());
    assert!(harness.writer().is_closed());
}

/// A dependency cycle is rejected before any tick runs.
#[test]
fn test_cycle_rejected_before_first_tick() {
    let mut world = World::new();
    register_kinds(&mut world);
    let writer = MemoryWriter::new();

    let forward = FnSystem::new(
        SystemDescriptor::new("forward", SystemRole::Routing)
            .read::<Flow>()
            .write::<Received>()
            .at(Stage::ROUTE),
        |_, _| Ok(()),
    );
    let backward = FnSystem::new(
        SystemDescriptor::new("backward", SystemRole::Routing)
            .read::<Received>()
            .write::<Flow>()
            .at(Stage::ROUTE),
        |_, _| Ok(()),
    );

    let result = Simulation::builder(world)
        .config(SimulationConfig::new(0.0, 60.0, 60.0))
        .add_system(forward)
        .add_system(backward)
        .add_system(ReportingSystem::new(
            "snapshot",
            [chat_ecs::ComponentKind::of::<Flow>()],
            writer.clone(),
        ))
        .build();

    let Err(err) = result else {
        panic!("cyclic schedule was accepted");
    };
    match &err {
        Error::CycleDetected { stage, systems } => {
            assert_eq!(*stage, Stage::ROUTE);
            assert_eq!(systems, &vec!["forward".to_string(), "backward".to_string()]);
        }
        other => panic!("expected cycle, got {other}"),
    }
    assert_eq!(err.exit_code(), 2);
    assert!(writer.is_empty());
    assert!(!writer.is_closed());
}

/// Two systems writing the same kind in one stage are rejected.
#[test]
fn test_overlapping_writes_rejected() {
    let mut world = World::new();
    register_kinds(&mut world);

    let first = FnSystem::new(
        SystemDescriptor::new("first", SystemRole::Routing)
            .write::<Flow>()
            .at(Stage::ROUTE),
        |_, _| Ok(()),
    );
    let second = FnSystem::new(
        SystemDescriptor::new("second", SystemRole::Routing)
            .write::<Flow>()
            .at(Stage::ROUTE),
        |_, _| Ok(()),
    );
    let result = Simulation::builder(world)
        .add_system(first)
        .add_system(second)
        .build();
    assert!(matches!(result, Err(Error::OverlappingWrites { .. })));
}
