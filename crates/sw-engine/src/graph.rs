//! The render graph: stage ownership, execution order and live mutation.
//!
//! A [`RenderGraph`] owns every stage reachable backward from one terminal
//! stage, keyed by [`StageId`]. Parameter links are id references resolved
//! through that registry, so stages can be swapped in and out between
//! frames without dangling references.
//!
//! Structural mutation is not synchronized with rendering. Callers apply
//! edits strictly between frames.

use std::collections::{BTreeMap, BTreeSet};

use sw_gpu::GpuBackend;
use sw_ir::{AudioBuffer, StageId};
use thiserror::Error;

use crate::error::{Error, Result, StructureError};
use crate::parameter::Parameter;
use crate::stage::RenderStage;
use crate::topology::topological_sort_by_key;

/// A mutation that failed, with the stage it was given handed back.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct RejectedStage {
    #[source]
    pub source: Error,
    pub stage: Box<RenderStage>,
}

impl RejectedStage {
    fn new(source: Error, stage: RenderStage) -> Self {
        Self {
            source,
            stage: Box::new(stage),
        }
    }

    pub fn into_stage(self) -> RenderStage {
        *self.stage
    }

    pub fn into_parts(self) -> (Error, RenderStage) {
        (self.source, *self.stage)
    }
}

impl From<RejectedStage> for Error {
    fn from(rejected: RejectedStage) -> Self {
        rejected.source
    }
}

/// One wiring change between two adopted stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edit {
    Connect(StageId, StageId),
    Disconnect(StageId, StageId),
}

impl Edit {
    fn inverse(self) -> Edit {
        match self {
            Edit::Connect(a, b) => Edit::Disconnect(a, b),
            Edit::Disconnect(a, b) => Edit::Connect(a, b),
        }
    }
}

/// Stages reachable from a terminal, in execution order.
///
/// Each stage carries a rank that breaks ties between stages ready at the
/// same time. A replacement inherits the rank of the stage it replaces, so
/// it takes the same slot in the order.
#[derive(Debug)]
pub struct RenderGraph {
    stages: BTreeMap<StageId, RenderStage>,
    ranks: BTreeMap<StageId, u64>,
    next_rank: u64,
    terminal: StageId,
    order: Vec<StageId>,
}

impl RenderGraph {
    /// Adopt `stages` and validate their wiring backward from `terminal`.
    ///
    /// Every supplied stage must feed the terminal, every edge must be
    /// recorded on both ends and carry a parameter link, and the wiring
    /// must be acyclic. Nothing touches the GPU.
    pub fn new(stages: Vec<RenderStage>, terminal: StageId) -> Result<Self> {
        let mut map = BTreeMap::new();
        for stage in stages {
            let gid = stage.gid();
            if map.insert(gid, stage).is_some() {
                return Err(StructureError::AlreadyAdopted(gid).into());
            }
        }
        let end = map.get(&terminal).ok_or(Error::StageNotFound(terminal))?;
        if !end.consumers().is_empty() {
            return Err(StructureError::TerminalHasConsumer(terminal).into());
        }

        let reached = discover(&map, terminal)?;
        if let Some(&stray) = map.keys().find(|id| !reached.contains(*id)) {
            return Err(StructureError::Unreachable(stray).into());
        }

        let ranks: BTreeMap<StageId, u64> = map.keys().copied().zip(0..).collect();
        let mut graph = Self {
            next_rank: ranks.len() as u64,
            stages: map,
            ranks,
            terminal,
            order: Vec::new(),
        };
        graph.recompute_order()?;
        tracing::debug!(
            stages = graph.order.len(),
            terminal = %terminal,
            "render graph built"
        );
        Ok(graph)
    }

    /// Like [`RenderGraph::new`], with the terminal found as the single
    /// stage without consumers.
    pub fn from_stages(stages: Vec<RenderStage>) -> Result<Self> {
        let ends: Vec<StageId> = stages
            .iter()
            .filter(|s| s.consumers().is_empty())
            .map(RenderStage::gid)
            .collect();
        match ends.as_slice() {
            [] => Err(StructureError::NoTerminal.into()),
            [terminal] => Self::new(stages, *terminal),
            _ => Err(StructureError::MultipleTerminals(ends.to_vec()).into()),
        }
    }

    pub fn terminal(&self) -> StageId {
        self.terminal
    }

    /// Stage ids, producers before consumers.
    pub fn render_order(&self) -> &[StageId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.contains_key(&id)
    }

    /// Stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &RenderStage> {
        self.order.iter().filter_map(|id| self.stages.get(id))
    }

    pub fn find_stage(&self, id: StageId) -> Option<&RenderStage> {
        self.stages.get(&id)
    }

    pub fn find_stage_mut(&mut self, id: StageId) -> Option<&mut RenderStage> {
        self.stages.get_mut(&id)
    }

    pub fn find_parameter(&self, stage: StageId, name: &str) -> Option<&Parameter> {
        self.stages.get(&stage)?.find_parameter(name)
    }

    pub fn find_parameter_mut(&mut self, stage: StageId, name: &str) -> Option<&mut Parameter> {
        self.stages.get_mut(&stage)?.find_parameter_mut(name)
    }

    /// Frame read back by the terminal stage during the last render.
    pub fn output_buffer(&self) -> Option<&AudioBuffer> {
        self.stages.get(&self.terminal)?.output_buffer()
    }

    /// Initialize every stage in execution order.
    pub fn initialize(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        for id in &self.order {
            if let Some(stage) = self.stages.get_mut(id) {
                stage.initialize(gpu)?;
            }
        }
        Ok(())
    }

    /// Initialize anything added since the last frame, then re-bind every
    /// stage against the current wiring.
    pub fn bind(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        for id in &self.order {
            if let Some(stage) = self.stages.get_mut(id) {
                stage.prepare(gpu)?;
            }
        }
        for id in &self.order {
            if let Some(stage) = self.stages.get(id) {
                stage.bind(gpu, &self.stages)?;
            }
        }
        Ok(())
    }

    /// Bind a renderer-level uniform block into every stage whose program
    /// declares it. Returns how many stages picked it up.
    pub fn bind_global_block(&self, gpu: &mut dyn GpuBackend, block: &Parameter) -> Result<usize> {
        let mut bound = 0;
        for stage in self.stages() {
            if stage.bind_global_block(gpu, block)? {
                bound += 1;
            }
        }
        Ok(bound)
    }

    /// Run every stage's pass, producers first.
    pub fn render(&mut self, gpu: &mut dyn GpuBackend, time: u32) -> Result<()> {
        for id in &self.order {
            if let Some(stage) = self.stages.get_mut(id) {
                stage.render(gpu, time)?;
            }
        }
        Ok(())
    }

    /// Release every stage's GPU resources, consumers first.
    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        for id in self.order.iter().rev() {
            if let Some(stage) = self.stages.get_mut(id) {
                stage.release(gpu);
            }
        }
    }

    /// Splice `stage` directly downstream of `anchor`, taking over the
    /// anchor's consumer.
    pub fn insert_render_stage_behind(
        &mut self,
        anchor: StageId,
        stage: RenderStage,
    ) -> std::result::Result<(), RejectedStage> {
        let plan = self.plan_behind(anchor, stage.gid());
        self.splice(stage, plan, None)
    }

    fn plan_behind(&self, anchor: StageId, new: StageId) -> Result<Vec<Edit>> {
        let stage = self.stage(anchor)?;
        if anchor == self.terminal {
            return Err(StructureError::TerminalAnchor(anchor).into());
        }
        let consumer = stage
            .sole_consumer()?
            .ok_or(StructureError::Unreachable(anchor))?;
        Ok(vec![
            Edit::Disconnect(anchor, consumer),
            Edit::Connect(anchor, new),
            Edit::Connect(new, consumer),
        ])
    }

    /// Splice `stage` upstream of `anchor`.
    ///
    /// If the anchor has a free stream input (an open join slot, or no
    /// producer at all) the stage feeds it directly. Otherwise it goes
    /// between the anchor and its single producer.
    pub fn insert_render_stage_infront(
        &mut self,
        anchor: StageId,
        stage: RenderStage,
    ) -> std::result::Result<(), RejectedStage> {
        let plan = self.plan_infront(anchor, stage.gid());
        self.splice(stage, plan, None)
    }

    fn plan_infront(&self, anchor: StageId, new: StageId) -> Result<Vec<Edit>> {
        let stage = self.stage(anchor)?;
        if stage.has_free_stream() {
            return Ok(vec![Edit::Connect(new, anchor)]);
        }
        let producer = stage
            .sole_producer()?
            .ok_or(StructureError::NoFreeStream(anchor))?;
        Ok(vec![
            Edit::Disconnect(producer, anchor),
            Edit::Connect(producer, new),
            Edit::Connect(new, anchor),
        ])
    }

    /// Replace edge `from → to` with `from → stage → to`.
    pub fn insert_render_stage_between(
        &mut self,
        from: StageId,
        to: StageId,
        stage: RenderStage,
    ) -> std::result::Result<(), RejectedStage> {
        let plan = self.plan_between(from, to, stage.gid());
        self.splice(stage, plan, None)
    }

    fn plan_between(&self, from: StageId, to: StageId, new: StageId) -> Result<Vec<Edit>> {
        self.stage(to)?;
        if !self.stage(from)?.consumers().contains(&to) {
            return Err(StructureError::NotConnected { from, to }.into());
        }
        Ok(vec![
            Edit::Disconnect(from, to),
            Edit::Connect(from, new),
            Edit::Connect(new, to),
        ])
    }

    /// Add a new source feeding `consumer`'s free stream input.
    pub fn add_render_stage(
        &mut self,
        stage: RenderStage,
        consumer: StageId,
    ) -> std::result::Result<(), RejectedStage> {
        let plan = self
            .stage(consumer)
            .map(|_| vec![Edit::Connect(stage.gid(), consumer)]);
        self.splice(stage, plan, None)
    }

    /// Put `stage` in the place of `old` and hand `old` back.
    ///
    /// The new stage takes over `old`'s wiring and its slot in the render
    /// order. The returned stage keeps any GPU resources it holds; release
    /// it with the backend that created them. Replacing the terminal moves
    /// the terminal to the new stage.
    pub fn replace_render_stage(
        &mut self,
        old: StageId,
        stage: RenderStage,
    ) -> std::result::Result<RenderStage, RejectedStage> {
        let new = stage.gid();
        let plans = self
            .plan_replace(old, new)
            .and_then(|plans| self.check_new(&stage).map(|_| plans));
        let (detach, attach) = match plans {
            Ok(plans) => plans,
            Err(err) => return Err(RejectedStage::new(err, stage)),
        };
        let rank = self.ranks.get(&old).copied();
        if let Err(err) = self.rewire(&detach, Some(old), None) {
            return Err(RejectedStage::new(err, stage));
        }
        let removed = match self.take_stage(old) {
            Ok(removed) => removed,
            Err(err) => return Err(RejectedStage::new(err, stage)),
        };
        if let Err(rejected) = self.splice(stage, Ok(attach), rank) {
            self.restore(removed, rank, &detach);
            return Err(rejected);
        }
        if old == self.terminal {
            self.terminal = new;
        }
        tracing::debug!(old = %old, new = %new, "stage replaced");
        Ok(removed)
    }

    /// Edits cutting `old` loose, and edits wiring `new` the same way.
    fn plan_replace(&self, old: StageId, new: StageId) -> Result<(Vec<Edit>, Vec<Edit>)> {
        let stage = self.stage(old)?;
        let producers = stage.producers();
        let consumers = stage.consumers();
        let detach = producers
            .iter()
            .map(|&p| Edit::Disconnect(p, old))
            .chain(consumers.iter().map(|&c| Edit::Disconnect(old, c)))
            .collect();
        let attach = producers
            .iter()
            .map(|&p| Edit::Connect(p, new))
            .chain(consumers.iter().map(|&c| Edit::Connect(new, c)))
            .collect();
        Ok((detach, attach))
    }

    /// Wire a stage taken out by a failed replacement back in.
    fn restore(&mut self, stage: RenderStage, rank: Option<u64>, detached: &[Edit]) {
        let id = stage.gid();
        self.stages.insert(id, stage);
        if let Some(rank) = rank {
            self.ranks.insert(id, rank);
        }
        let reattach: Vec<Edit> = detached.iter().rev().map(|e| e.inverse()).collect();
        if let Err(err) = self.rewire(&reattach, None, None) {
            tracing::error!(stage = %id, error = %err, "failed to restore replaced stage");
        }
    }

    /// Take a stage out of the graph and hand it back.
    ///
    /// A stage with one producer and one consumer is bridged; a source with
    /// one consumer is simply detached. The terminal and stages with fan-in
    /// or fan-out cannot be removed. The returned stage keeps any GPU
    /// resources it holds.
    pub fn remove_render_stage(&mut self, id: StageId) -> Result<RenderStage> {
        let stage = self.stage(id)?;
        if id == self.terminal {
            return Err(StructureError::TerminalAnchor(id).into());
        }
        if stage.producers().len() > 1 || stage.consumers().len() != 1 {
            return Err(StructureError::CannotBridge(id).into());
        }
        let consumer = stage
            .sole_consumer()?
            .ok_or(StructureError::CannotBridge(id))?;
        let plan = match stage.sole_producer()? {
            Some(producer) => vec![
                Edit::Disconnect(producer, id),
                Edit::Disconnect(id, consumer),
                Edit::Connect(producer, consumer),
            ],
            None => vec![Edit::Disconnect(id, consumer)],
        };
        self.rewire(&plan, Some(id), None)?;
        let removed = self.take_stage(id)?;
        tracing::debug!(stage = %id, stages = self.order.len(), "stage removed");
        Ok(removed)
    }

    fn stage(&self, id: StageId) -> Result<&RenderStage> {
        self.stages.get(&id).ok_or(Error::StageNotFound(id))
    }

    fn take_stage(&mut self, id: StageId) -> Result<RenderStage> {
        let stage = self.stages.remove(&id).ok_or(Error::StageNotFound(id))?;
        self.ranks.remove(&id);
        self.order.retain(|&s| s != id);
        Ok(stage)
    }

    /// Adopt `stage` at `rank` (a fresh one if `None`) and apply `plan`, or
    /// hand the stage back untouched.
    fn splice(
        &mut self,
        mut stage: RenderStage,
        plan: Result<Vec<Edit>>,
        rank: Option<u64>,
    ) -> std::result::Result<(), RejectedStage> {
        let gid = stage.gid();
        let plan = match plan.and_then(|plan| self.check_new(&stage).map(|_| plan)) {
            Ok(plan) => plan,
            Err(err) => return Err(RejectedStage::new(err, stage)),
        };
        let rank = rank.unwrap_or_else(|| {
            self.next_rank += 1;
            self.next_rank - 1
        });
        self.ranks.insert(gid, rank);
        if let Err(err) = self.rewire(&plan, None, Some(&mut stage)) {
            self.ranks.remove(&gid);
            return Err(RejectedStage::new(err, stage));
        }
        self.stages.insert(gid, stage);
        tracing::debug!(stage = %gid, stages = self.order.len(), "stage inserted");
        Ok(())
    }

    fn check_new(&self, stage: &RenderStage) -> Result<()> {
        if self.stages.contains_key(&stage.gid()) {
            return Err(StructureError::AlreadyAdopted(stage.gid()).into());
        }
        if !stage.producers().is_empty() || !stage.consumers().is_empty() {
            return Err(StructureError::AlreadyWired(stage.gid()).into());
        }
        Ok(())
    }

    /// Apply `plan` and recompute the order, undoing every applied edit if
    /// any step fails. `leaving` is excluded from the new order; `incoming`
    /// is a stage joining the graph that is not registered yet.
    fn rewire(
        &mut self,
        plan: &[Edit],
        leaving: Option<StageId>,
        mut incoming: Option<&mut RenderStage>,
    ) -> Result<()> {
        for (done, edit) in plan.iter().enumerate() {
            if let Err(err) = self.apply(*edit, incoming.as_deref_mut()) {
                self.undo(&plan[..done], incoming);
                return Err(err);
            }
        }
        match self.sorted(leaving, incoming.as_deref()) {
            Ok(order) => {
                self.order = order;
                Ok(())
            }
            Err(err) => {
                self.undo(plan, incoming);
                Err(err)
            }
        }
    }

    fn undo(&mut self, applied: &[Edit], mut incoming: Option<&mut RenderStage>) {
        for edit in applied.iter().rev() {
            if let Err(err) = self.apply(edit.inverse(), incoming.as_deref_mut()) {
                tracing::error!(error = %err, edit = ?edit, "failed to roll back graph edit");
            }
        }
    }

    fn apply(&mut self, edit: Edit, incoming: Option<&mut RenderStage>) -> Result<()> {
        match edit {
            Edit::Connect(from, to) => {
                self.with_pair(from, to, incoming, |a, b| a.connect_render_stage(b))
            }
            Edit::Disconnect(from, to) => {
                self.with_pair(from, to, incoming, |a, b| a.disconnect_render_stage(b))
            }
        }
    }

    /// Run `f` with mutable access to two distinct stages, either of which
    /// may be the unregistered `incoming` stage.
    fn with_pair<R>(
        &mut self,
        a: StageId,
        b: StageId,
        incoming: Option<&mut RenderStage>,
        f: impl FnOnce(&mut RenderStage, &mut RenderStage) -> Result<R>,
    ) -> Result<R> {
        if a == b {
            return Err(StructureError::SelfConnection(a).into());
        }
        match incoming {
            Some(first) if first.gid() == a => {
                let second = self.stages.get_mut(&b).ok_or(Error::StageNotFound(b))?;
                f(first, second)
            }
            Some(second) if second.gid() == b => {
                let first = self.stages.get_mut(&a).ok_or(Error::StageNotFound(a))?;
                f(first, second)
            }
            _ => {
                let mut second = self.stages.remove(&b).ok_or(Error::StageNotFound(b))?;
                let result = match self.stages.get_mut(&a) {
                    Some(first) => f(first, &mut second),
                    None => Err(Error::StageNotFound(a)),
                };
                self.stages.insert(b, second);
                result
            }
        }
    }

    fn recompute_order(&mut self) -> Result<()> {
        self.order = self.sorted(None, None)?;
        Ok(())
    }

    fn sorted(&self, skip: Option<StageId>, incoming: Option<&RenderStage>) -> Result<Vec<StageId>> {
        let nodes: Vec<StageId> = self
            .stages
            .keys()
            .copied()
            .chain(incoming.map(RenderStage::gid))
            .filter(|&id| Some(id) != skip)
            .collect();
        let edges: Vec<(StageId, StageId)> = self
            .stages
            .values()
            .chain(incoming)
            .flat_map(|s| s.consumers().iter().map(move |&c| (s.gid(), c)))
            .collect();
        let rank = |id: StageId| self.ranks.get(&id).copied().unwrap_or(u64::MAX);
        topological_sort_by_key(&nodes, &edges, rank)
            .map_err(|stuck| StructureError::Cycle(stuck).into())
    }
}

/// Walk producers backward from `terminal`, checking every edge on the way.
fn discover(
    stages: &BTreeMap<StageId, RenderStage>,
    terminal: StageId,
) -> Result<BTreeSet<StageId>> {
    let mut reached = BTreeSet::from([terminal]);
    let mut pending = vec![terminal];
    while let Some(id) = pending.pop() {
        let Some(stage) = stages.get(&id) else {
            continue;
        };
        for &consumer in stage.consumers() {
            let next = stages.get(&consumer).ok_or(StructureError::MissingStage {
                stage: id,
                missing: consumer,
            })?;
            if !next.producers().contains(&id) {
                return Err(StructureError::InconsistentWiring {
                    producer: id,
                    consumer,
                }
                .into());
            }
        }
        for &producer in stage.producers() {
            let prev = stages.get(&producer).ok_or(StructureError::MissingStage {
                stage: id,
                missing: producer,
            })?;
            if !prev.consumers().contains(&id) || !carries_link(prev, stage) {
                return Err(StructureError::InconsistentWiring {
                    producer,
                    consumer: id,
                }
                .into());
            }
            if reached.insert(producer) {
                pending.push(producer);
            }
        }
    }
    Ok(reached)
}

/// True if some output of `producer` links reciprocally into `consumer`.
fn carries_link(producer: &RenderStage, consumer: &RenderStage) -> bool {
    producer.outputs().iter().any(|out| {
        let Some(from) = producer.find_parameter(out) else {
            return false;
        };
        let Some(target) = from.linked().filter(|t| t.stage == consumer.gid()) else {
            return false;
        };
        consumer
            .find_parameter(&target.name)
            .is_some_and(|to| to.previous() == from.reference().as_ref())
    })
}
