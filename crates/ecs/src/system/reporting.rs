//! Reporting
//!
//! Reporting systems are pure readers. After all other stages of a tick have
//! run they snapshot the observable components of every live entity into a
//! [`TickRecord`] and hand it to a [`SnapshotWriter`].
//!
//! # Writers
//!
//! - [`MemoryWriter`]: keeps records in a shared buffer for inspection
//! - [`NullWriter`]: discards everything
//!
//! Writers receive `write` once per reported tick, `flush` and `close` once
//! when the simulation terminates. Writing after `close` is an error.

use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{System, SystemDescriptor, SystemOutcome, SystemRole, SystemView, TickContext};
use crate::component::ComponentKind;
use crate::entity::Entity;
use crate::error::{ReportError, Result};
use crate::types::{Stage, Value};

/// Recoverable condition attached to a tick's output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    /// An event arrived for a time that had already been drained.
    LateInjection {
        tick: u64,
        entity: Entity,
        kind: String,
        scheduled: f64,
        applied_at: f64,
    },
    /// A solver hit its iteration cap and the run continued.
    ConvergenceFailure {
        tick: u64,
        system: String,
        iterations: u32,
        max_delta: f64,
    },
}

impl Annotation {
    pub fn tick(&self) -> u64 {
        match self {
            Annotation::LateInjection { tick, .. } | Annotation::ConvergenceFailure { tick, .. } => {
                *tick
            }
        }
    }
}

/// Observable components of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity: Entity,
    pub components: IndexMap<String, Value>,
}

/// Immutable snapshot of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick: u64,
    pub time: f64,
    pub entities: Vec<EntitySnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl TickRecord {
    /// Snapshot `kinds` for every live entity, ascending by index. Entities
    /// with no observable component among `kinds` are left out.
    pub(crate) fn capture(
        tick: u64,
        time: f64,
        entities: impl Iterator<Item = Entity>,
        kinds: &[ComponentKind],
        mut observe: impl FnMut(Entity, &ComponentKind) -> Result<Option<Value>>,
    ) -> Result<Self> {
        let mut snapshots = Vec::new();
        for entity in entities {
            let mut components = IndexMap::new();
            for kind in kinds {
                if let Some(value) = observe(entity, kind)? {
                    components.insert(kind.name().to_string(), value);
                }
            }
            if !components.is_empty() {
                snapshots.push(EntitySnapshot { entity, components });
            }
        }
        Ok(Self {
            tick,
            time,
            entities: snapshots,
            annotations: Vec::new(),
        })
    }

    /// Snapshot of one entity, if it was observed.
    pub fn entity(&self, entity: Entity) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|s| s.entity == entity)
    }

    /// Observed value of `component` on `entity`.
    pub fn value(&self, entity: Entity, component: &str) -> Option<&Value> {
        self.entity(entity)?.components.get(component)
    }
}

/// Destination for tick records.
pub trait SnapshotWriter: Send {
    fn write(&mut self, record: &TickRecord) -> std::result::Result<(), ReportError>;

    fn flush(&mut self) -> std::result::Result<(), ReportError> {
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), ReportError>;
}

/// Discards all records.
pub struct NullWriter;

impl SnapshotWriter for NullWriter {
    fn write(&mut self, _record: &TickRecord) -> std::result::Result<(), ReportError> {
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), ReportError> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryBuffer {
    records: Vec<TickRecord>,
    flushes: usize,
    closed: bool,
}

/// In-memory writer. Clones share one buffer, so a clone kept outside the
/// simulation sees everything written by the reporting system.
#[derive(Clone, Default)]
pub struct MemoryWriter {
    inner: Arc<Mutex<MemoryBuffer>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self) -> MutexGuard<'_, MemoryBuffer> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn records(&self) -> Vec<TickRecord> {
        self.buffer().records.clone()
    }

    pub fn len(&self) -> usize {
        self.buffer().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().records.is_empty()
    }

    pub fn flushes(&self) -> usize {
        self.buffer().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.buffer().closed
    }
}

impl SnapshotWriter for MemoryWriter {
    fn write(&mut self, record: &TickRecord) -> std::result::Result<(), ReportError> {
        let mut buffer = self.buffer();
        if buffer.closed {
            return Err(ReportError::AlreadyClosed);
        }
        buffer.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> std::result::Result<(), ReportError> {
        self.buffer().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), ReportError> {
        let mut buffer = self.buffer();
        if buffer.closed {
            return Err(ReportError::AlreadyClosed);
        }
        buffer.closed = true;
        Ok(())
    }
}

/// Writes a [`TickRecord`] of the declared kinds every `stride` ticks.
///
/// Tick 0 and the final tick of the clock are always reported. Annotations
/// of skipped ticks are held back and attached to the next written record.
pub struct ReportingSystem {
    descriptor: SystemDescriptor,
    kinds: Vec<ComponentKind>,
    writer: Box<dyn SnapshotWriter>,
    stride: u64,
    written: u64,
    pending: Vec<Annotation>,
}

impl ReportingSystem {
    pub fn new(
        name: impl Into<String>,
        kinds: impl IntoIterator<Item = ComponentKind>,
        writer: impl SnapshotWriter + 'static,
    ) -> Self {
        let kinds: Vec<ComponentKind> = kinds.into_iter().collect();
        let descriptor = SystemDescriptor::new(name, SystemRole::Reporting).reads(kinds.iter().copied());
        Self {
            descriptor,
            kinds,
            writer: Box::new(writer),
            stride: 1,
            written: 0,
            pending: Vec::new(),
        }
    }

    /// Report only every `stride` ticks. A stride of 0 is treated as 1.
    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn at(mut self, stage: Stage) -> Self {
        self.descriptor.stage = stage;
        self
    }

    /// Number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Build the record for the current tick without writing it.
    pub fn snapshot(&self, view: &SystemView<'_>, ctx: &TickContext<'_>) -> Result<TickRecord> {
        let mut record = TickRecord::capture(
            ctx.tick(),
            ctx.time(),
            view.entities(),
            &self.kinds,
            |entity, kind| view.observe(entity, kind),
        )?;
        record.annotations = ctx.annotations().to_vec();
        Ok(record)
    }

    fn is_due(&self, ctx: &TickContext<'_>) -> bool {
        ctx.tick() % self.stride == 0 || ctx.sim().is_final_tick()
    }
}

impl System for ReportingSystem {
    fn descriptor(&self) -> &SystemDescriptor {
        &self.descriptor
    }

    fn run(&mut self, view: &mut SystemView<'_>, ctx: &TickContext<'_>) -> Result<SystemOutcome> {
        if !self.is_due(ctx) {
            self.pending.extend_from_slice(ctx.annotations());
            trace!(
                tick = ctx.tick(),
                pending = self.pending.len(),
                "reporting skipped by stride"
            );
            return Ok(SystemOutcome::done());
        }
        let mut record = self.snapshot(view, ctx)?;
        if !self.pending.is_empty() {
            let mut annotations = std::mem::take(&mut self.pending);
            annotations.append(&mut record.annotations);
            record.annotations = annotations;
        }
        self.writer.write(&record)?;
        self.written += 1;
        trace!(tick = record.tick, entities = record.entities.len(), "tick reported");
        Ok(SystemOutcome::done())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.close()?;
        debug!(system = %self.descriptor.name, records = self.written, "reporting closed");
        Ok(())
    }
}
