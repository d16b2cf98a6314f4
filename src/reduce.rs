//! Grouped reductions: the public entry point
//!
//! [`GroupBy`] pairs an [`AggregationEngine`] and its kernel cache with an
//! [`Executor`]. A request goes through these steps:
//!
//! 1. validate shapes and options, resolve the aggregation;
//! 2. move the reduced axes behind every other axis;
//! 3. factorize composite or binned keys into one integer code per element;
//! 4. fully materialized input is reduced in place, without a graph;
//! 5. otherwise align the blocks of values and labels, pick the strategy
//!    and build the [`TaskGraph`];
//! 6. the executor runs the graph and multi-key results are reshaped into
//!    a cross-tabulation.

use crate::aggregate::{Aggregation, AggregationKind, FinalizeKwargs};
use crate::array::layout::axes_to_end_order;
use crate::array::{ChunkedArray, Chunks, NdArray, Shape, normalize_axes, normalize_axis, refine};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::factorize::{Bins, KeyGroups, factorize};
use crate::graph::strategy::{BlockedInput, StrategyOptions, build_graph};
use crate::graph::{GraphContext, Method, TaskGraph};
use crate::labels::{ChunkedLabels, GroupIdentity, Label, LabelArray};
use crate::ops::{
    ChunkRequest, FinalResult, FinalizeRequest, chunk_reduce, finalize, scan_chunked,
};
use crate::plan::{find_group_cohorts, rechunk_for_blockwise};
use crate::runtime::{AggregationEngine, Executor, KernelCache, Kernels, ScanOp, SyncExecutor};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Inputs
// ============================================================================

/// Values to reduce
#[derive(Clone, Debug)]
pub enum Values {
    /// Fully materialized array
    Dense(NdArray),
    /// Block-partitioned array
    Chunked(ChunkedArray),
}

impl Values {
    /// Dimensions of the array
    pub fn shape(&self) -> Shape {
        match self {
            Self::Dense(a) => a.shape().clone(),
            Self::Chunked(c) => c.shape(),
        }
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        match self {
            Self::Dense(a) => a.ndim(),
            Self::Chunked(c) => c.ndim(),
        }
    }

    /// Logical element type
    pub fn dtype(&self) -> DType {
        match self {
            Self::Dense(a) => a.dtype(),
            Self::Chunked(c) => c.dtype(),
        }
    }

    /// Materialize into one dense array
    pub fn to_array(&self) -> Result<NdArray> {
        match self {
            Self::Dense(a) => Ok(a.clone()),
            Self::Chunked(c) => c.to_array(),
        }
    }
}

impl From<NdArray> for Values {
    fn from(a: NdArray) -> Self {
        Self::Dense(a)
    }
}

impl From<ChunkedArray> for Values {
    fn from(c: ChunkedArray) -> Self {
        Self::Chunked(c)
    }
}

/// Labels of one grouping key
#[derive(Clone, Debug)]
pub enum ByInput {
    /// Labels without their own partitioning
    Dense(LabelArray),
    /// Labels partitioned independently of the values
    Chunked(ChunkedLabels),
}

impl ByInput {
    /// The labels
    pub fn labels(&self) -> &LabelArray {
        match self {
            Self::Dense(l) => l,
            Self::Chunked(c) => c.labels(),
        }
    }

    /// Partitioning of the labels, if they carry one
    pub fn chunks(&self) -> Option<&Chunks> {
        match self {
            Self::Dense(_) => None,
            Self::Chunked(c) => Some(c.chunks()),
        }
    }
}

impl From<LabelArray> for ByInput {
    fn from(l: LabelArray) -> Self {
        Self::Dense(l)
    }
}

impl From<ChunkedLabels> for ByInput {
    fn from(c: ChunkedLabels) -> Self {
        Self::Chunked(c)
    }
}

/// The reduction to compute
#[derive(Clone, Debug)]
pub enum Func {
    /// Registry name such as `"nanmean"`
    Named(String),
    /// Built-in reduction
    Kind(AggregationKind),
    /// Caller-defined reduction
    Custom(Aggregation),
}

impl Func {
    fn resolve(self) -> Result<Aggregation> {
        match self {
            Self::Named(name) => Ok(name.parse::<AggregationKind>()?.aggregation()),
            Self::Kind(kind) => Ok(kind.aggregation()),
            Self::Custom(agg) => {
                agg.validate()?;
                Ok(agg)
            }
        }
    }
}

impl From<&str> for Func {
    fn from(name: &str) -> Self {
        Self::Named(name.to_owned())
    }
}

impl From<String> for Func {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<AggregationKind> for Func {
    fn from(kind: AggregationKind) -> Self {
        Self::Kind(kind)
    }
}

impl From<Aggregation> for Func {
    fn from(agg: Aggregation) -> Self {
        Self::Custom(agg)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options of a grouped reduction
#[derive(Clone, Debug)]
pub struct ReduceOptions {
    /// Output groups of each key, or its bin edges when binned. `None` (or
    /// a missing entry) keeps the observed labels.
    pub expected_groups: Vec<Option<Vec<Label>>>,
    /// Whether each key is binned by the edges in `expected_groups`
    pub isbin: Vec<bool>,
    /// Bins are right-closed `(a, b]`; left-closed `[a, b)` when false
    pub right: bool,
    /// Axes to reduce, all among the label axes; `None` reduces all of them
    pub axis: Option<Vec<isize>>,
    /// Value of groups without members; the aggregation's default otherwise
    pub fill_value: Option<f64>,
    /// Number of independent output partitions (map-reduce only)
    pub split_out: usize,
    /// Execution strategy of chunked input
    pub method: Method,
    /// Sort observed groups
    pub sort: bool,
    /// Reduce every block into exactly the expected groups
    pub reindex: Option<bool>,
    /// Output dtype; the aggregation's dtype policy otherwise
    pub dtype: Option<DType>,
    /// Parameters of the finalize step
    pub finalize_kwargs: FinalizeKwargs,
    /// Fan-in of the combine tree
    pub split_every: usize,
    /// Pack small cohorts together
    pub merge_cohorts: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            expected_groups: Vec::new(),
            isbin: Vec::new(),
            right: true,
            axis: None,
            fill_value: None,
            split_out: 1,
            method: Method::MapReduce,
            sort: true,
            reindex: None,
            dtype: None,
            finalize_kwargs: FinalizeKwargs::default(),
            split_every: 4,
            merge_cohorts: true,
        }
    }
}

impl ReduceOptions {
    /// Fixed output groups of a single key
    pub fn expected(mut self, groups: Vec<Label>) -> Self {
        self.expected_groups = vec![Some(groups)];
        self.isbin = vec![false];
        self
    }

    /// Bin a single key by `edges`
    pub fn bins(mut self, edges: Vec<Label>) -> Self {
        self.expected_groups = vec![Some(edges)];
        self.isbin = vec![true];
        self
    }

    /// Output groups (or bin edges) of every key
    pub fn expected_groups(mut self, groups: Vec<Option<Vec<Label>>>) -> Self {
        self.expected_groups = groups;
        self
    }

    /// Binning flag of every key
    pub fn isbin(mut self, isbin: Vec<bool>) -> Self {
        self.isbin = isbin;
        self
    }

    /// Right- or left-closed bins
    pub fn right(mut self, right: bool) -> Self {
        self.right = right;
        self
    }

    /// Axes to reduce
    pub fn axis(mut self, axis: Vec<isize>) -> Self {
        self.axis = Some(axis);
        self
    }

    /// Value of groups without members
    pub fn fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    /// Number of output partitions
    pub fn split_out(mut self, split_out: usize) -> Self {
        self.split_out = split_out;
        self
    }

    /// Execution strategy
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sort observed groups
    pub fn sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    /// Reduce every block into exactly the expected groups
    pub fn reindex(mut self, reindex: bool) -> Self {
        self.reindex = Some(reindex);
        self
    }

    /// Output dtype
    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Parameters of the finalize step
    pub fn finalize_kwargs(mut self, kwargs: FinalizeKwargs) -> Self {
        self.finalize_kwargs = kwargs;
        self
    }

    /// Fan-in of the combine tree
    pub fn split_every(mut self, split_every: usize) -> Self {
        self.split_every = split_every;
        self
    }

    /// Pack small cohorts together
    pub fn merge_cohorts(mut self, merge: bool) -> Self {
        self.merge_cohorts = merge;
        self
    }

    fn key_groups(&self, nkeys: usize) -> Result<Vec<KeyGroups>> {
        if self.expected_groups.len() > nkeys || self.isbin.len() > nkeys {
            return Err(Error::invalid_argument(
                "expected_groups",
                format!(
                    "{} expected group sets and {} binning flags for {nkeys} keys",
                    self.expected_groups.len(),
                    self.isbin.len()
                ),
            ));
        }
        (0..nkeys)
            .map(|k| {
                let expected = self.expected_groups.get(k).and_then(Option::as_ref);
                let isbin = self.isbin.get(k).copied().unwrap_or(false);
                match (expected, isbin) {
                    (Some(edges), true) => {
                        let bins = Bins::from_labels(edges)?;
                        Ok(KeyGroups::Binned(if self.right { bins } else { bins.closed_left() }))
                    }
                    (None, true) => Err(Error::configuration(format!(
                        "key {k} is binned but no bin edges were given"
                    ))),
                    (Some(groups), false) => Ok(KeyGroups::Exact(groups.clone())),
                    (None, false) => Ok(KeyGroups::Found),
                }
            })
            .collect()
    }
}

// ============================================================================
// Results
// ============================================================================

/// Output of a grouped reduction
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedResult {
    /// Non-reduced axes followed by one group axis per key
    pub result: NdArray,
    /// Identities along each group axis
    pub groups: Vec<Vec<GroupIdentity>>,
}

/// Group sets of a composite or binned key, restored after the reduction
#[derive(Clone, Debug)]
struct Crosstab {
    shape: Shape,
    groups: Vec<Vec<GroupIdentity>>,
}

fn into_grouped(out: FinalResult, crosstab: Option<&Crosstab>) -> Result<GroupedResult> {
    let Some(ct) = crosstab else {
        return Ok(GroupedResult {
            result: out.array,
            groups: vec![out.groups],
        });
    };
    if out.groups.len() != ct.shape.numel() {
        return Err(Error::invariant(format!(
            "{} groups for a cross-tabulation of {:?}",
            out.groups.len(),
            ct.shape
        )));
    }
    let ndim = out.array.ndim();
    let mut shape: Shape = out.array.shape()[..ndim - 1].iter().copied().collect();
    shape.extend_from_slice(&ct.shape);
    Ok(GroupedResult {
        result: out.array.reshape(shape)?,
        groups: ct.groups.clone(),
    })
}

enum PlanKind {
    Eager(FinalResult),
    Graph(TaskGraph),
}

/// A planned reduction
///
/// Fully materialized input is reduced while planning; chunked input
/// yields a task graph that runs on [`compute`](Self::compute).
pub struct ReductionPlan {
    kind: PlanKind,
    crosstab: Option<Crosstab>,
}

impl ReductionPlan {
    /// The task graph, when the input is chunked
    pub fn graph(&self) -> Option<&TaskGraph> {
        match &self.kind {
            PlanKind::Graph(g) => Some(g),
            PlanKind::Eager(_) => None,
        }
    }

    /// True when the result was computed while planning
    pub fn is_eager(&self) -> bool {
        matches!(self.kind, PlanKind::Eager(_))
    }

    /// Run the plan on `executor`
    pub fn compute<X: Executor + ?Sized>(self, executor: &X) -> Result<GroupedResult> {
        let out = match self.kind {
            PlanKind::Eager(out) => out,
            PlanKind::Graph(graph) => executor.submit(&graph)?,
        };
        into_grouped(out, self.crosstab.as_ref())
    }
}

impl fmt::Debug for ReductionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ReductionPlan");
        match &self.kind {
            PlanKind::Eager(_) => s.field("eager", &true),
            PlanKind::Graph(g) => s.field("nodes", &g.len()),
        };
        s.field("crosstab", &self.crosstab.as_ref().map(|c| &c.shape))
            .finish()
    }
}

// ============================================================================
// GroupBy
// ============================================================================

/// Grouped reductions over dense or block-partitioned arrays
///
/// # Example
///
/// ```
/// use blockby::array::NdArray;
/// use blockby::labels::LabelArray;
/// use blockby::reduce::{GroupBy, ReduceOptions};
/// use blockby::runtime::CpuEngine;
///
/// let values = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], [4]).unwrap();
/// let labels = LabelArray::from_ints(&[0, 1, 0, 1]);
/// let out = GroupBy::new(CpuEngine::new())
///     .reduce(values, &[labels.into()], "sum", &ReduceOptions::default())
///     .unwrap();
/// assert_eq!(out.result.data(), &[4.0, 6.0]);
/// ```
pub struct GroupBy<X = SyncExecutor> {
    engine: Arc<dyn AggregationEngine>,
    cache: Arc<KernelCache>,
    executor: X,
}

impl GroupBy<SyncExecutor> {
    /// Reductions on `engine`, run on the calling thread
    pub fn new(engine: impl AggregationEngine + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
            cache: Arc::new(KernelCache::new()),
            executor: SyncExecutor::new(),
        }
    }
}

impl<X> GroupBy<X> {
    /// Run task graphs on `executor`
    pub fn with_executor<Y: Executor>(self, executor: Y) -> GroupBy<Y> {
        GroupBy {
            engine: self.engine,
            cache: self.cache,
            executor,
        }
    }

    /// Share `cache` with other reducers on the same engine
    pub fn with_cache(mut self, cache: Arc<KernelCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Compiled kernels
    pub fn cache(&self) -> &KernelCache {
        &self.cache
    }

    /// The engine
    pub fn engine(&self) -> &dyn AggregationEngine {
        self.engine.as_ref()
    }

    /// The executor
    pub fn executor(&self) -> &X {
        &self.executor
    }

    fn kernels(&self) -> Kernels<'_> {
        Kernels::new(self.engine.as_ref(), self.cache.as_ref())
    }
}

impl<X: fmt::Debug> fmt::Debug for GroupBy<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBy")
            .field("engine", &self.engine.name())
            .field("kernels", &self.cache.len())
            .field("executor", &self.executor)
            .finish()
    }
}

impl<X: Executor> GroupBy<X> {
    /// Reduce `values` grouped by the keys in `by` and run the reduction on
    /// this reducer's executor.
    ///
    /// The result has the non-reduced axes of `values` followed by one
    /// group axis per key.
    pub fn reduce(
        &self,
        values: impl Into<Values>,
        by: &[ByInput],
        func: impl Into<Func>,
        options: &ReduceOptions,
    ) -> Result<GroupedResult> {
        self.plan(values, by, func, options)?.compute(&self.executor)
    }

    /// Validate the request and build its plan without running it.
    ///
    /// Every configuration error is raised here. Chunked input may be
    /// redistributed through the executor to align blocks of values and
    /// labels, or to make a blockwise reduction possible.
    pub fn plan(
        &self,
        values: impl Into<Values>,
        by: &[ByInput],
        func: impl Into<Func>,
        options: &ReduceOptions,
    ) -> Result<ReductionPlan> {
        let values = values.into();
        let agg = func.into().resolve()?.with_count();

        let first = by
            .first()
            .ok_or_else(|| Error::invalid_argument("by", "at least one label array is required"))?;
        let lshape = first.labels().shape().clone();
        for b in &by[1..] {
            if *b.labels().shape() != lshape {
                return Err(Error::shape_mismatch(&lshape, b.labels().shape()));
            }
        }
        let vshape = values.shape();
        let (ndim, lndim) = (vshape.ndim(), lshape.ndim());
        if lndim == 0 || lndim > ndim || vshape[ndim - lndim..] != lshape[..] {
            return Err(Error::shape_mismatch(&lshape, &vshape));
        }
        if options.split_out == 0 {
            return Err(Error::invalid_argument("split_out", "must be at least 1"));
        }
        if options.split_every < 2 {
            return Err(Error::invalid_argument("split_every", "must be at least 2"));
        }

        let keys = options.key_groups(by.len())?;
        let fixed = keys.iter().all(KeyGroups::is_fixed);
        let lead = ndim - lndim;
        let reduced = reduced_axes(options.axis.as_deref(), ndim, lead)?;
        let reduce_ndim = reduced.len();
        let subset = reduce_ndim < lndim;
        if subset && !fixed {
            return Err(Error::configuration(
                "reducing a subset of the label axes requires expected groups for every key",
            ));
        }

        // [non-label..., untouched label..., reduced label...]
        let untouched: Vec<usize> = (lead..ndim).filter(|a| !reduced.contains(a)).collect();
        let order: Vec<usize> = (0..lead).chain(untouched).chain(reduced).collect();
        let label_order: Vec<usize> = order[lead..].iter().map(|a| a - lead).collect();
        let permuted = order.iter().enumerate().any(|(i, &a)| i != a);

        let labels = by
            .iter()
            .map(|b| {
                if permuted {
                    b.labels().permute(&label_order)
                } else {
                    Ok(b.labels().clone())
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let (labels, expected, crosstab) = prepare_keys(labels, keys, options.sort)?;

        let input_dtype = values.dtype();
        let dtype = options
            .dtype
            .unwrap_or_else(|| agg.output_dtype(input_dtype));
        let fill_values = agg.fill_values_for(input_dtype);

        let all_dense = by.iter().all(|b| b.chunks().is_none());
        if let (Values::Dense(array), true) = (&values, all_dense) {
            debug!(
                func = %agg.name,
                ndim,
                reduce_ndim,
                nkeys = by.len(),
                "reducing materialized input in place"
            );
            let array = if permuted { array.permute(&order)? } else { array.clone() };
            let request = ChunkRequest {
                ops: &agg.chunk,
                fill_values: &fill_values,
                expected: expected.as_deref(),
                reindex: expected.is_some(),
                sort: options.sort,
                reduce_ndim: Some(reduce_ndim),
                arg_index: None,
            };
            let partial = chunk_reduce(self.kernels(), &array, &labels, &request)?;
            let out = finalize(
                partial,
                &agg,
                &FinalizeRequest {
                    fill_value: options.fill_value,
                    expected: expected.as_deref(),
                    kwargs: &options.finalize_kwargs,
                    dtype,
                },
            )?;
            return Ok(ReductionPlan {
                kind: PlanKind::Eager(out),
                crosstab,
            });
        }

        let method = options.method;
        if options.split_out > 1 {
            if !fixed {
                return Err(Error::configuration(
                    "split_out > 1 requires expected groups",
                ));
            }
            if method != Method::MapReduce {
                return Err(Error::configuration(format!(
                    "split_out > 1 is only supported by method 'map-reduce', not '{method}'"
                )));
            }
            if options.reindex == Some(false) {
                return Err(Error::configuration("split_out > 1 requires reindex"));
            }
        }
        if subset && method != Method::MapReduce {
            return Err(Error::configuration(format!(
                "method '{method}' reduces over all label axes; use 'map-reduce' for a subset"
            )));
        }
        let reindex = match options.reindex {
            Some(true) if method == Method::Blockwise => {
                return Err(Error::configuration(
                    "reindex = true is not supported by method 'blockwise'",
                ));
            }
            Some(true) if expected.is_none() => {
                return Err(Error::configuration(
                    "reindex = true requires expected groups",
                ));
            }
            Some(r) => r,
            None => expected.is_some() && method == Method::MapReduce,
        } || options.split_out > 1;

        let array = self.align(&values, by, lead)?;
        let mut array = if permuted { array.permute(&order)? } else { array };

        if method == Method::Blockwise && !groups_within_blocks(&labels, &array, lead)? {
            if lndim == 1 {
                array = rechunk_for_blockwise(&self.executor, &array, -1, labels.data())?;
            }
            if !groups_within_blocks(&labels, &array, lead)? {
                return Err(Error::configuration(
                    "method 'blockwise' needs every group within one block along the reduced axes",
                ));
            }
        }
        if agg.order_dependent && !groups_within_blocks(&labels, &array, lead)? {
            return Err(Error::configuration(format!(
                "'{}' depends on element order and needs every group within one block; \
                 use method 'blockwise' or rechunk the values",
                agg.name
            )));
        }

        debug!(
            func = %agg.name,
            method = %method,
            ndim,
            reduce_ndim,
            nkeys = by.len(),
            blocks = array.chunks().nblocks(),
            reindex,
            split_out = options.split_out,
            "planning chunked reduction"
        );
        let ctx = Arc::new(GraphContext {
            engine: self.engine.clone(),
            cache: self.cache.clone(),
            agg,
            fill_values,
            sort: options.sort,
            reduce_ndim: Some(reduce_ndim),
            fill_value: options.fill_value,
            kwargs: options.finalize_kwargs.clone(),
            dtype,
        });
        let input = BlockedInput {
            values: &array,
            labels: &labels,
            reduce_ndim,
        };
        let strategy = StrategyOptions {
            method,
            expected: expected.map(Arc::from),
            reindex,
            split_out: options.split_out,
            split_every: options.split_every,
            merge: options.merge_cohorts,
            sort: options.sort,
        };
        let graph = build_graph(ctx, &input, &strategy)?;
        Ok(ReductionPlan {
            kind: PlanKind::Graph(graph),
            crosstab,
        })
    }

    /// Grouped scan of `values` along `axis`, grouped by the 1-D labels in
    /// `by` that run along that axis. `func` is `"cumsum"` or
    /// `"nancumsum"`. The output keeps the shape and blocks of the input.
    pub fn scan(
        &self,
        values: impl Into<Values>,
        by: &ByInput,
        func: &str,
        axis: isize,
    ) -> Result<Values> {
        let op: ScanOp = func.parse()?;
        let values = values.into();
        let ndim = values.ndim();
        let axis = normalize_axis(axis, ndim)?;
        let labels = by.labels();
        let len = values.shape()[axis];
        if labels.ndim() != 1 || labels.numel() != len {
            return Err(Error::shape_mismatch(&[len], labels.shape()));
        }
        let order = axes_to_end_order(ndim, &[axis]);
        let mut inverse = vec![0; ndim];
        for (i, &a) in order.iter().enumerate() {
            inverse[a] = i;
        }
        match values {
            Values::Dense(array) => {
                let moved = array.permute(&order)?;
                let chunked = ChunkedArray::from_array(&moved, Chunks::single(moved.shape()))?;
                let out = scan_chunked(self.kernels(), &chunked, labels, op)?.to_array()?;
                Ok(Values::Dense(out.permute(&inverse)?))
            }
            Values::Chunked(array) => {
                let out = scan_chunked(self.kernels(), &array.permute(&order)?, labels, op)?;
                Ok(Values::Chunked(out.permute(&inverse)?))
            }
        }
    }

    /// Chunked values whose label axes are split at every block boundary of
    /// the values and of each chunked key
    fn align(&self, values: &Values, by: &[ByInput], lead: usize) -> Result<ChunkedArray> {
        let current = match values {
            Values::Dense(a) => Chunks::single(a.shape()),
            Values::Chunked(c) => c.chunks().clone(),
        };
        let mut target = current.as_slices().to_vec();
        for chunks in by.iter().filter_map(ByInput::chunks) {
            for (j, sizes) in chunks.as_slices().iter().enumerate() {
                target[lead + j] = refine(&target[lead + j], sizes)?;
            }
        }
        match values {
            Values::Dense(a) => ChunkedArray::from_array(a, Chunks::new(target)?),
            Values::Chunked(c) => {
                let mut array = c.clone();
                for (axis, sizes) in target.iter().enumerate() {
                    if array.chunks().axis(axis) != sizes.as_slice() {
                        debug!(axis, from = ?array.chunks().axis(axis), to = ?sizes, "aligning blocks with labels");
                        array = self.executor.rechunk(&array, axis, sizes)?;
                    }
                }
                Ok(array)
            }
        }
    }
}

/// Axes to reduce, sorted; every one must be a label axis
fn reduced_axes(axis: Option<&[isize]>, ndim: usize, lead: usize) -> Result<Vec<usize>> {
    let Some(axis) = axis else {
        return Ok((lead..ndim).collect());
    };
    let axes = normalize_axes(axis, ndim)?;
    if axes.is_empty() {
        return Err(Error::invalid_argument("axis", "no axis to reduce"));
    }
    if let Some(&a) = axes.iter().find(|&&a| a < lead) {
        return Err(Error::invalid_argument(
            "axis",
            format!(
                "axis {a} is not a label axis; labels cover the last {} axes",
                ndim - lead
            ),
        ));
    }
    Ok(axes)
}

type PreparedKeys = (LabelArray, Option<Vec<GroupIdentity>>, Option<Crosstab>);

/// Collapse the keys into one label array.
///
/// A single unbinned key is used as is. Composite and binned keys are
/// factorized up front into integer codes covering every combination of
/// their groups; the codes are the expected groups of the reduction.
fn prepare_keys(mut labels: Vec<LabelArray>, keys: Vec<KeyGroups>, sort: bool) -> Result<PreparedKeys> {
    let binned = keys.iter().any(|k| matches!(k, KeyGroups::Binned(_)));
    if labels.len() == 1 && !binned {
        let expected = match keys.into_iter().next() {
            Some(KeyGroups::Exact(groups)) => {
                Some(groups.into_iter().map(GroupIdentity::Value).collect())
            }
            _ => None,
        };
        let labels = labels
            .pop()
            .ok_or_else(|| Error::invariant("no label array"))?;
        return Ok((labels, expected, None));
    }

    let refs: Vec<&LabelArray> = labels.iter().collect();
    let factorized = factorize(&refs, &keys, None, sort)?;
    let data = factorized
        .codes
        .iter()
        .map(|c| c.valid().map_or(Label::Missing, |i| Label::Int(i as i64)))
        .collect();
    let codes = LabelArray::new(data, labels[0].shape().clone())?;
    let expected = (0..factorized.ngroups)
        .map(|i| GroupIdentity::Value(Label::Int(i as i64)))
        .collect();
    let crosstab = Crosstab {
        shape: factorized.grp_shape,
        groups: factorized.found_groups,
    };
    Ok((codes, Some(expected), Some(crosstab)))
}

/// Whether every group lies within one block of the label axes of `array`
fn groups_within_blocks(labels: &LabelArray, array: &ChunkedArray, lead: usize) -> Result<bool> {
    let chunks = Chunks::new(array.chunks().as_slices()[lead..].to_vec())?;
    let cohorts = find_group_cohorts(labels, &chunks, false)?;
    Ok(cohorts.iter().all(|c| c.blocks.len() == 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CpuEngine;

    fn chunked(data: &[f64], chunks: Vec<usize>) -> ChunkedArray {
        let array = NdArray::from_vec(data.to_vec(), [data.len()]).unwrap();
        ChunkedArray::from_array(&array, Chunks::new(vec![chunks]).unwrap()).unwrap()
    }

    #[test]
    fn test_dense_input_is_eager() {
        let gb = GroupBy::new(CpuEngine::new());
        let values = NdArray::from_vec(vec![1.0, 2.0, 3.0], [3]).unwrap();
        let by = [ByInput::from(LabelArray::from_ints(&[1, 1, 2]))];
        let plan = gb.plan(values, &by, "sum", &ReduceOptions::default()).unwrap();
        assert!(plan.is_eager());
        let out = plan.compute(gb.executor()).unwrap();
        assert_eq!(out.result.data(), &[3.0, 3.0]);
        assert_eq!(out.groups[0], vec![GroupIdentity::from(1i64), GroupIdentity::from(2i64)]);
    }

    #[test]
    fn test_chunked_input_builds_graph() {
        let gb = GroupBy::new(CpuEngine::new());
        let values = chunked(&[1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let by = [ByInput::from(LabelArray::from_ints(&[0, 1, 0, 1]))];
        let plan = gb.plan(values, &by, "sum", &ReduceOptions::default()).unwrap();
        assert_eq!(plan.graph().map(|g| g.count(crate::graph::Stage::ChunkReduce)), Some(2));
        assert_eq!(plan.compute(gb.executor()).unwrap().result.data(), &[4.0, 6.0]);
    }

    #[test]
    fn test_binned_key_without_edges() {
        let gb = GroupBy::new(CpuEngine::new());
        let values = NdArray::from_vec(vec![1.0, 2.0], [2]).unwrap();
        let by = [ByInput::from(LabelArray::from_floats(&[0.5, 1.5]))];
        let options = ReduceOptions::default().isbin(vec![true]);
        assert!(matches!(
            gb.reduce(values, &by, "sum", &options),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_reduced_axes_must_be_label_axes() {
        assert_eq!(reduced_axes(None, 3, 1).unwrap(), vec![1, 2]);
        assert_eq!(reduced_axes(Some(&[-1]), 3, 1).unwrap(), vec![2]);
        assert!(matches!(
            reduced_axes(Some(&[0]), 3, 1),
            Err(Error::InvalidArgument { arg: "axis", .. })
        ));
    }

    #[test]
    fn test_unknown_reduction() {
        let gb = GroupBy::new(CpuEngine::new());
        let values = NdArray::from_vec(vec![1.0], [1]).unwrap();
        let by = [ByInput::from(LabelArray::from_ints(&[0]))];
        assert!(matches!(
            gb.reduce(values, &by, "median", &ReduceOptions::default()),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_order_dependent_across_blocks() {
        let gb = GroupBy::new(CpuEngine::new());
        let by = [ByInput::from(LabelArray::from_ints(&[0, 0, 1, 1]))];
        let spanning = chunked(&[1.0, 2.0, 3.0, 4.0], vec![1, 3]);
        assert!(matches!(
            gb.reduce(spanning, &by, "first", &ReduceOptions::default()),
            Err(Error::Configuration { .. })
        ));
        let aligned = chunked(&[1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let out = gb.reduce(aligned, &by, "last", &ReduceOptions::default()).unwrap();
        assert_eq!(out.result.data(), &[2.0, 4.0]);
    }
}
