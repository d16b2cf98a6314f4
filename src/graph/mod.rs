//! Explicit task graphs
//!
//! A [`TaskGraph`] is a pure value: nodes hold everything they need to run
//! (their block of values and labels, or the position of their inputs) and
//! edges are data dependencies. Nodes are stored in topological order, so
//! any executor may run them front to back, or run each [level](TaskGraph::levels)
//! concurrently.

pub mod strategy;

pub use strategy::Method;

use crate::aggregate::{Aggregation, FinalizeKwargs};
use crate::array::{ChunkedArray, Chunks, NdArray, STACK_DIMS};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::labels::{GroupIdentity, LabelArray};
use crate::ops::{
    ChunkRequest, FinalResult, FinalizeRequest, PartialResult, ReindexAxis, chunk_reduce, combine,
    finalize, reindex,
};
use crate::runtime::{AggregationEngine, KernelCache, Kernels};
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

// ============================================================================
// Keys and ops
// ============================================================================

/// Pipeline stage of a task
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reduce one block
    ChunkReduce,
    /// Select one output partition of a block's partial result
    Split,
    /// Merge sibling partial results
    Combine,
    /// Turn a partial result into the statistic
    Finalize,
    /// Stitch finalized pieces into the output
    Assemble,
}

impl Stage {
    /// Short name used in task keys
    pub const fn name(self) -> &'static str {
        match self {
            Self::ChunkReduce => "chunk-reduce",
            Self::Split => "split",
            Self::Combine => "combine",
            Self::Finalize => "finalize",
            Self::Assemble => "assemble",
        }
    }
}

/// Identity of a task: its stage and coordinates within the stage
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskKey {
    /// Stage
    pub stage: Stage,
    /// Block or tree coordinates
    pub coords: SmallVec<[usize; STACK_DIMS]>,
}

impl TaskKey {
    /// Key of `stage` at `coords`
    pub fn new(stage: Stage, coords: &[usize]) -> Self {
        Self {
            stage,
            coords: SmallVec::from_slice(coords),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.stage.name(), self.coords.as_slice())
    }
}

/// Input of a chunk-reduce task
#[derive(Clone, Debug)]
pub struct ChunkTask {
    /// The block of values
    pub values: NdArray,
    /// Labels of the block's trailing dimensions
    pub labels: LabelArray,
    /// Linear index along the reduced axes of every label element
    pub arg_index: Option<Vec<usize>>,
    /// Fixed output identities
    pub expected: Option<Arc<[GroupIdentity]>>,
    /// Produce exactly `expected`
    pub reindex: bool,
}

/// How the output is stitched from finalized pieces
#[derive(Clone, Debug)]
pub struct AssembleSpec {
    /// Chunks of the non-reduced output axes
    pub kept_chunks: Chunks,
    /// Pieces concatenated along the group axis for each kept block
    pub parts: usize,
    /// Sort the groups of the stitched result
    pub sort: bool,
    /// Reindex the stitched result onto these identities
    pub expected: Option<Arc<[GroupIdentity]>>,
}

/// What a task computes
#[derive(Clone, Debug)]
pub enum TaskOp {
    /// Reduce one block
    ChunkReduce(Box<ChunkTask>),
    /// Take the groups at `range` of the input
    Split {
        /// Positions along the group axis
        range: Range<usize>,
    },
    /// Combine all inputs
    Combine,
    /// Finalize the single input
    Finalize {
        /// Identities to reindex onto
        expected: Option<Arc<[GroupIdentity]>>,
    },
    /// Stitch finalized inputs, ordered kept block major
    Assemble(AssembleSpec),
}

/// A task and the positions of the tasks it consumes
#[derive(Clone, Debug)]
pub struct TaskNode {
    /// Identity
    pub key: TaskKey,
    /// Computation
    pub op: TaskOp,
    /// Input node positions, all smaller than this node's position
    pub deps: Vec<usize>,
}

/// Result of running one task
#[derive(Clone, Debug)]
pub enum TaskOutput {
    /// Output of chunk-reduce, split and combine tasks
    Partial(PartialResult),
    /// Output of finalize and assemble tasks
    Final(FinalResult),
}

impl TaskOutput {
    fn partial(&self) -> Result<&PartialResult> {
        match self {
            Self::Partial(p) => Ok(p),
            Self::Final(_) => Err(Error::invariant("expected a partial result")),
        }
    }

    fn final_result(&self) -> Result<&FinalResult> {
        match self {
            Self::Final(f) => Ok(f),
            Self::Partial(_) => Err(Error::invariant("expected a finalized result")),
        }
    }

    /// The finalized result, when this is one
    pub fn into_final(self) -> Result<FinalResult> {
        match self {
            Self::Final(f) => Ok(f),
            Self::Partial(_) => Err(Error::invariant("graph output is not finalized")),
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Everything shared by the tasks of one reduction
pub struct GraphContext {
    /// Engine running the kernels
    pub engine: Arc<dyn AggregationEngine>,
    /// Kernel cache of the caller
    pub cache: Arc<KernelCache>,
    /// The reduction, with its group-size intermediate
    pub agg: Aggregation,
    /// Chunk fill values resolved for the input dtype
    pub fill_values: Vec<f64>,
    /// Sort observed groups
    pub sort: bool,
    /// Trailing label dimensions reduced
    pub reduce_ndim: Option<usize>,
    /// Value of groups without members
    pub fill_value: Option<f64>,
    /// Finalize parameters
    pub kwargs: FinalizeKwargs,
    /// Output dtype
    pub dtype: DType,
}

impl GraphContext {
    fn kernels(&self) -> Kernels<'_> {
        Kernels::new(self.engine.as_ref(), self.cache.as_ref())
    }
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("engine", &self.engine.name())
            .field("agg", &self.agg.name)
            .field("sort", &self.sort)
            .field("reduce_ndim", &self.reduce_ndim)
            .field("dtype", &self.dtype)
            .finish()
    }
}

/// Task graph of one reduction
#[derive(Debug)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    output: usize,
    ctx: Arc<GraphContext>,
}

impl TaskGraph {
    /// Empty graph over `ctx`
    pub fn new(ctx: Arc<GraphContext>) -> Self {
        Self {
            nodes: Vec::new(),
            output: 0,
            ctx,
        }
    }

    /// Append a node; its dependencies must already be present
    pub fn push(&mut self, key: TaskKey, op: TaskOp, deps: Vec<usize>) -> Result<usize> {
        let idx = self.nodes.len();
        if let Some(&bad) = deps.iter().find(|&&d| d >= idx) {
            return Err(Error::invariant(format!(
                "{key} depends on node {bad} which is not yet in the graph"
            )));
        }
        self.nodes.push(TaskNode { key, op, deps });
        self.output = idx;
        Ok(idx)
    }

    /// Mark `idx` as the output node
    pub fn set_output(&mut self, idx: usize) {
        self.output = idx;
    }

    /// Nodes in topological order
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for a graph without nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of the output node
    pub fn output(&self) -> usize {
        self.output
    }

    /// Shared context
    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    /// Number of nodes of `stage`
    pub fn count(&self, stage: Stage) -> usize {
        self.nodes.iter().filter(|n| n.key.stage == stage).count()
    }

    /// Number of tasks consuming each node
    pub fn consumers(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes.len()];
        for node in &self.nodes {
            for &d in &node.deps {
                counts[d] += 1;
            }
        }
        counts
    }

    /// Nodes grouped by depth; nodes of one level are independent
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.nodes.len()];
        let mut levels: Vec<Vec<usize>> = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            depth[i] = node.deps.iter().map(|&d| depth[d] + 1).max().unwrap_or(0);
            if levels.len() <= depth[i] {
                levels.resize_with(depth[i] + 1, Vec::new);
            }
            levels[depth[i]].push(i);
        }
        levels
    }

    /// Run node `idx` on the outputs of its dependencies, in `deps` order
    pub fn run_node(&self, idx: usize, inputs: &[&TaskOutput]) -> Result<TaskOutput> {
        let node = self
            .nodes
            .get(idx)
            .ok_or_else(|| Error::invariant(format!("no node {idx}")))?;
        if inputs.len() != node.deps.len() {
            return Err(Error::invariant(format!(
                "{} takes {} inputs, got {}",
                node.key,
                node.deps.len(),
                inputs.len()
            )));
        }
        let ctx = &*self.ctx;
        match &node.op {
            TaskOp::ChunkReduce(task) => {
                let request = ChunkRequest {
                    ops: &ctx.agg.chunk,
                    fill_values: &ctx.fill_values,
                    expected: task.expected.as_deref(),
                    reindex: task.reindex,
                    sort: ctx.sort,
                    reduce_ndim: ctx.reduce_ndim,
                    arg_index: task.arg_index.as_deref(),
                };
                chunk_reduce(ctx.kernels(), &task.values, &task.labels, &request)
                    .map(TaskOutput::Partial)
            }
            TaskOp::Split { range } => inputs[0]
                .partial()?
                .select(range.clone())
                .map(TaskOutput::Partial),
            TaskOp::Combine => {
                let siblings = inputs
                    .iter()
                    .map(|i| i.partial().cloned())
                    .collect::<Result<Vec<_>>>()?;
                combine(ctx.kernels(), &siblings, &ctx.agg).map(TaskOutput::Partial)
            }
            TaskOp::Finalize { expected } => {
                let request = FinalizeRequest {
                    fill_value: ctx.fill_value,
                    expected: expected.as_deref(),
                    kwargs: &ctx.kwargs,
                    dtype: ctx.dtype,
                };
                finalize(inputs[0].partial()?.clone(), &ctx.agg, &request).map(TaskOutput::Final)
            }
            TaskOp::Assemble(spec) => {
                let finals = inputs
                    .iter()
                    .map(|i| i.final_result())
                    .collect::<Result<Vec<_>>>()?;
                assemble(&finals, spec, self.fill()).map(TaskOutput::Final)
            }
        }
    }

    fn fill(&self) -> f64 {
        self.ctx.fill_value.unwrap_or(self.ctx.agg.final_fill_value)
    }
}

/// Stitch finalized pieces: concatenate along the group axis per kept
/// block, then place the kept blocks on their grid.
fn assemble(finals: &[&FinalResult], spec: &AssembleSpec, fill: f64) -> Result<FinalResult> {
    let nkept = spec.kept_chunks.nblocks();
    if finals.len() != nkept * spec.parts || spec.parts == 0 {
        return Err(Error::invariant(format!(
            "assembling {} pieces into {nkept} blocks of {} parts",
            finals.len(),
            spec.parts
        )));
    }

    let mut groups: Option<Vec<GroupIdentity>> = None;
    let mut blocks = Vec::with_capacity(nkept);
    for pieces in finals.chunks(spec.parts) {
        let block_groups: Vec<GroupIdentity> =
            pieces.iter().flat_map(|f| f.groups.iter().cloned()).collect();
        let arrays: Vec<&NdArray> = pieces.iter().map(|f| &f.array).collect();
        let block = NdArray::concatenate(&arrays, arrays[0].ndim() - 1)?;
        match &groups {
            Some(g) if *g != block_groups => {
                return Err(Error::invariant(
                    "blocks along the kept axes found different groups",
                ));
            }
            Some(_) => {}
            None => groups = Some(block_groups),
        }
        blocks.push(block);
    }
    let mut groups = groups.unwrap_or_default();

    let mut sizes = spec.kept_chunks.as_slices().to_vec();
    sizes.push(vec![groups.len()]);
    let mut array = ChunkedArray::from_blocks(Chunks::new(sizes)?, blocks)?.to_array()?;

    if spec.sort {
        let mut sorted = groups.clone();
        sorted.sort();
        if sorted != groups {
            array = reindex(&array, &groups, &sorted, None, ReindexAxis::Last)?;
            groups = sorted;
        }
    }
    if let Some(expected) = &spec.expected {
        if **expected != *groups {
            array = reindex(&array, &groups, expected, Some(fill), ReindexAxis::Last)?;
            groups = expected.to_vec();
        }
    }
    Ok(FinalResult { groups, array })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationKind;
    use crate::runtime::CpuEngine;

    fn context() -> Arc<GraphContext> {
        let agg = AggregationKind::Sum.aggregation().with_count();
        Arc::new(GraphContext {
            engine: Arc::new(CpuEngine::new()),
            cache: Arc::new(KernelCache::new()),
            fill_values: agg.fill_values_for(DType::F64),
            agg,
            sort: true,
            reduce_ndim: None,
            fill_value: None,
            kwargs: FinalizeKwargs::default(),
            dtype: DType::F64,
        })
    }

    fn chunk(values: &[f64], labels: &[i64]) -> TaskOp {
        TaskOp::ChunkReduce(Box::new(ChunkTask {
            values: NdArray::from_vec(values.to_vec(), [values.len()]).unwrap(),
            labels: LabelArray::from_ints(labels),
            arg_index: None,
            expected: None,
            reindex: false,
        }))
    }

    #[test]
    fn test_levels_and_run() {
        let mut graph = TaskGraph::new(context());
        let a = graph
            .push(TaskKey::new(Stage::ChunkReduce, &[0]), chunk(&[1.0, 2.0], &[0, 1]), vec![])
            .unwrap();
        let b = graph
            .push(TaskKey::new(Stage::ChunkReduce, &[1]), chunk(&[3.0], &[1]), vec![])
            .unwrap();
        let c = graph
            .push(TaskKey::new(Stage::Combine, &[0]), TaskOp::Combine, vec![a, b])
            .unwrap();
        let d = graph
            .push(
                TaskKey::new(Stage::Finalize, &[0]),
                TaskOp::Finalize { expected: None },
                vec![c],
            )
            .unwrap();
        assert_eq!(graph.levels(), vec![vec![a, b], vec![c], vec![d]]);
        assert_eq!(graph.consumers(), vec![1, 1, 1, 0]);
        assert_eq!(graph.output(), d);

        let oa = graph.run_node(a, &[]).unwrap();
        let ob = graph.run_node(b, &[]).unwrap();
        let oc = graph.run_node(c, &[&oa, &ob]).unwrap();
        let od = graph.run_node(d, &[&oc]).unwrap().into_final().unwrap();
        assert_eq!(od.array.data(), &[1.0, 5.0]);
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let mut graph = TaskGraph::new(context());
        let err = graph.push(TaskKey::new(Stage::Combine, &[0]), TaskOp::Combine, vec![0]);
        assert!(matches!(err, Err(Error::Invariant(_))));
    }

    #[test]
    fn test_task_key_display() {
        let key = TaskKey::new(Stage::Combine, &[1, 2]);
        assert_eq!(key.to_string(), "combine[1, 2]");
    }
}
