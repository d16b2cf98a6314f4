//! Strategy selection and graph construction
//!
//! - **map-reduce**: every block is reduced, all blocks along the reduced
//!   axes are combined through a tree, the root is finalized.
//! - **blockwise**: every group lives in one block; each block is reduced
//!   and finalized on its own.
//! - **cohorts**: blocks are partitioned into cohorts sharing no group;
//!   each cohort is reduced like a small map-reduce.

use super::{AssembleSpec, ChunkTask, GraphContext, Stage, TaskGraph, TaskKey, TaskOp};
use crate::array::{BlockCoords, ChunkedArray, Chunks, ravel_index, unravel_index};
use crate::error::{Error, Result};
use crate::labels::{GroupIdentity, LabelArray};
use crate::plan::find_group_cohorts;
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Execution strategy of a chunked reduction
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Method {
    /// Reduce every block, combine all blocks through a tree
    #[default]
    MapReduce,
    /// Reduce and finalize each block independently
    Blockwise,
    /// Reduce independent sets of blocks separately
    Cohorts,
}

impl Method {
    /// Canonical name
    pub const fn name(self) -> &'static str {
        match self {
            Self::MapReduce => "map-reduce",
            Self::Blockwise => "blockwise",
            Self::Cohorts => "cohorts",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "map-reduce" => Ok(Self::MapReduce),
            "blockwise" => Ok(Self::Blockwise),
            "cohorts" => Ok(Self::Cohorts),
            other => Err(Error::configuration(format!(
                "unknown method '{other}', expected 'map-reduce', 'blockwise' or 'cohorts'"
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Block-aligned input of a chunked reduction
///
/// The values' axes are ordered `[kept..., reduced...]` and their trailing
/// `labels.ndim()` axes are the label axes, chunked alike.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BlockedInput<'a> {
    pub values: &'a ChunkedArray,
    pub labels: &'a LabelArray,
    pub reduce_ndim: usize,
}

/// Strategy knobs, already validated
#[derive(Clone, Debug)]
pub(crate) struct StrategyOptions {
    pub method: Method,
    pub expected: Option<Arc<[GroupIdentity]>>,
    pub reindex: bool,
    pub split_out: usize,
    pub split_every: usize,
    pub merge: bool,
    pub sort: bool,
}

/// Build the task graph of `input` under `opts.method`
pub(crate) fn build_graph(
    ctx: Arc<GraphContext>,
    input: &BlockedInput<'_>,
    opts: &StrategyOptions,
) -> Result<TaskGraph> {
    let chunks = input.values.chunks();
    let nkept = chunks.ndim() - input.reduce_ndim;
    let builder = Builder {
        input,
        opts,
        arg: ctx.agg.is_arg_reduction(),
        kept_chunks: Chunks::new(chunks.as_slices()[..nkept].to_vec())?,
        reduced_chunks: Chunks::new(chunks.as_slices()[nkept..].to_vec())?,
    };
    let mut graph = TaskGraph::new(ctx);
    match opts.method {
        Method::MapReduce => builder.map_reduce(&mut graph)?,
        Method::Blockwise => builder.blockwise(&mut graph)?,
        Method::Cohorts => builder.cohorts(&mut graph)?,
    }
    debug!(
        method = %opts.method,
        nodes = graph.len(),
        chunk_tasks = graph.count(Stage::ChunkReduce),
        combine_tasks = graph.count(Stage::Combine),
        "built task graph"
    );
    Ok(graph)
}

struct Builder<'a> {
    input: &'a BlockedInput<'a>,
    opts: &'a StrategyOptions,
    arg: bool,
    kept_chunks: Chunks,
    reduced_chunks: Chunks,
}

impl Builder<'_> {
    fn map_reduce(&self, graph: &mut TaskGraph) -> Result<()> {
        let partitions = self.partitions()?;
        let nparts = partitions.len();
        let mut finals = Vec::with_capacity(self.kept_chunks.nblocks() * nparts);
        for kept in self.kept_chunks.iter_blocks() {
            let mut leaves: Vec<Vec<usize>> = vec![Vec::new(); nparts];
            for reduced in self.reduced_chunks.iter_blocks() {
                let coords = join(&kept, &reduced);
                let task = self.chunk_task(&coords, self.opts.expected.clone(), self.opts.reindex)?;
                let node = graph.push(
                    TaskKey::new(Stage::ChunkReduce, &coords),
                    TaskOp::ChunkReduce(Box::new(task)),
                    vec![],
                )?;
                if nparts == 1 {
                    leaves[0].push(node);
                    continue;
                }
                for (p, (range, _)) in partitions.iter().enumerate() {
                    let mut key = coords.clone();
                    key.push(p);
                    let split = graph.push(
                        TaskKey::new(Stage::Split, &key),
                        TaskOp::Split {
                            range: range.clone(),
                        },
                        vec![node],
                    )?;
                    leaves[p].push(split);
                }
            }
            for (p, (_, expected)) in partitions.iter().enumerate() {
                let root = self.tree(graph, std::mem::take(&mut leaves[p]), &kept, p)?;
                let mut key = kept.clone();
                key.push(p);
                finals.push(graph.push(
                    TaskKey::new(Stage::Finalize, &key),
                    TaskOp::Finalize {
                        expected: expected.clone(),
                    },
                    vec![root],
                )?);
            }
        }
        self.assemble(graph, finals, nparts, false, None)
    }

    fn blockwise(&self, graph: &mut TaskGraph) -> Result<()> {
        let nparts = self.reduced_chunks.nblocks();
        let mut finals = Vec::with_capacity(self.kept_chunks.nblocks() * nparts);
        for kept in self.kept_chunks.iter_blocks() {
            for reduced in self.reduced_chunks.iter_blocks() {
                let coords = join(&kept, &reduced);
                let task = self.chunk_task(&coords, None, false)?;
                let node = graph.push(
                    TaskKey::new(Stage::ChunkReduce, &coords),
                    TaskOp::ChunkReduce(Box::new(task)),
                    vec![],
                )?;
                finals.push(graph.push(
                    TaskKey::new(Stage::Finalize, &coords),
                    TaskOp::Finalize { expected: None },
                    vec![node],
                )?);
            }
        }
        self.assemble(graph, finals, nparts, self.opts.sort, self.opts.expected.clone())
    }

    fn cohorts(&self, graph: &mut TaskGraph) -> Result<()> {
        if self.input.reduce_ndim != self.input.labels.ndim() {
            return Err(Error::configuration(
                "method 'cohorts' reduces over all label axes",
            ));
        }
        let cohorts = find_group_cohorts(self.input.labels, &self.reduced_chunks, self.opts.merge)?;
        let mut finals = Vec::with_capacity(self.kept_chunks.nblocks() * cohorts.len());
        for kept in self.kept_chunks.iter_blocks() {
            for (c, cohort) in cohorts.iter().enumerate() {
                let groups: Arc<[GroupIdentity]> = cohort.groups.clone().into();
                let mut leaves = Vec::with_capacity(cohort.blocks.len());
                for &block in &cohort.blocks {
                    let coords = join(&kept, &self.reduced_chunks.coords(block));
                    let task = self.chunk_task(&coords, Some(groups.clone()), true)?;
                    leaves.push(graph.push(
                        TaskKey::new(Stage::ChunkReduce, &coords),
                        TaskOp::ChunkReduce(Box::new(task)),
                        vec![],
                    )?);
                }
                let root = self.tree(graph, leaves, &kept, c)?;
                let mut key = kept.clone();
                key.push(c);
                finals.push(graph.push(
                    TaskKey::new(Stage::Finalize, &key),
                    TaskOp::Finalize { expected: None },
                    vec![root],
                )?);
            }
        }
        self.assemble(graph, finals, cohorts.len(), self.opts.sort, self.opts.expected.clone())
    }

    /// Output partitions: group ranges and the identities of each
    fn partitions(&self) -> Result<Vec<(Range<usize>, Option<Arc<[GroupIdentity]>>)>> {
        let split_out = self.opts.split_out;
        if split_out <= 1 {
            return Ok(vec![(0..0, self.opts.expected.clone())]);
        }
        let expected = self.opts.expected.as_ref().ok_or_else(|| {
            Error::configuration("split_out > 1 requires expected groups")
        })?;
        let n = expected.len();
        let per = n.div_ceil(split_out).max(1);
        let parts: Vec<_> = (0..split_out)
            .map(|p| (p * per).min(n)..((p + 1) * per).min(n))
            .filter(|r| !r.is_empty())
            .map(|r| {
                let ids: Arc<[GroupIdentity]> = expected[r.clone()].into();
                (r, Some(ids))
            })
            .collect();
        if parts.len() <= 1 {
            return Ok(vec![(0..n, Some(expected.clone()))]);
        }
        Ok(parts)
    }

    fn chunk_task(
        &self,
        coords: &BlockCoords,
        expected: Option<Arc<[GroupIdentity]>>,
        reindex: bool,
    ) -> Result<ChunkTask> {
        let chunks = self.input.values.chunks();
        let flat = chunks.flat_index(coords);
        let values = self
            .input
            .values
            .block(flat)
            .ok_or_else(|| Error::invariant(format!("no block {flat}")))?
            .clone();
        let lndim = self.input.labels.ndim();
        let ranges = chunks.block_ranges(coords);
        let label_ranges = &ranges[ranges.len() - lndim..];
        let labels = self.input.labels.region(label_ranges)?;
        let arg_index = self.arg.then(|| self.arg_index(label_ranges));
        Ok(ChunkTask {
            values,
            labels,
            arg_index,
            expected,
            reindex,
        })
    }

    /// Linear index along the full reduced axes of every label element of
    /// the block covering `label_ranges`
    fn arg_index(&self, label_ranges: &[Range<usize>]) -> Vec<usize> {
        let lndim = label_ranges.len();
        let skip = lndim - self.input.reduce_ndim;
        let full = &self.input.labels.shape()[skip..];
        let local: SmallVec<[usize; 4]> = label_ranges.iter().map(|r| r.len()).collect();
        let n: usize = local.iter().product();
        (0..n)
            .map(|i| {
                let at = unravel_index(i, &local);
                let global: SmallVec<[usize; 4]> = at[skip..]
                    .iter()
                    .zip(&label_ranges[skip..])
                    .map(|(&c, r)| c + r.start)
                    .collect();
                ravel_index(&global, full)
            })
            .collect()
    }

    /// Combine `leaves` through a tree of fan-in `split_every`
    fn tree(
        &self,
        graph: &mut TaskGraph,
        mut level: Vec<usize>,
        kept: &BlockCoords,
        part: usize,
    ) -> Result<usize> {
        let mut depth = 0;
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(self.opts.split_every));
            for (i, siblings) in level.chunks(self.opts.split_every).enumerate() {
                if let [only] = siblings {
                    next.push(*only);
                    continue;
                }
                let mut key = kept.clone();
                key.extend([part, depth, i]);
                next.push(graph.push(
                    TaskKey::new(Stage::Combine, &key),
                    TaskOp::Combine,
                    siblings.to_vec(),
                )?);
            }
            level = next;
            depth += 1;
        }
        level
            .pop()
            .ok_or_else(|| Error::invariant("reduction tree without leaves"))
    }

    fn assemble(
        &self,
        graph: &mut TaskGraph,
        finals: Vec<usize>,
        parts: usize,
        sort: bool,
        expected: Option<Arc<[GroupIdentity]>>,
    ) -> Result<()> {
        let spec = AssembleSpec {
            kept_chunks: self.kept_chunks.clone(),
            parts,
            sort,
            expected,
        };
        let out = graph.push(
            TaskKey::new(Stage::Assemble, &[]),
            TaskOp::Assemble(spec),
            finals,
        )?;
        graph.set_output(out);
        Ok(())
    }
}

fn join(kept: &BlockCoords, reduced: &BlockCoords) -> BlockCoords {
    let mut coords = kept.clone();
    coords.extend_from_slice(reduced);
    coords
}
