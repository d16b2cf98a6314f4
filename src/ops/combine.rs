//! Merging partial results of sibling blocks

use super::{PartialResult, ReindexAxis, reindex};
use crate::aggregate::{Aggregation, resolve_fill_value};
use crate::array::NdArray;
use crate::dtype::promote_for_fill;
use crate::error::{Error, Result};
use crate::labels::{GroupIdentity, GroupIndex};
use crate::runtime::{KernelOp, Kernels};
use std::collections::BTreeSet;
use tracing::trace;

/// Merge the partial results of sibling blocks into one.
///
/// Siblings sharing the same groups keep that order; otherwise the output
/// groups are the sorted union. Each sibling is reindexed onto the union
/// with the aggregation's fill values, the siblings are concatenated along
/// the group axis and reduced again with the combine ops.
///
/// Arg-reductions keep the value and index intermediates of the same
/// element: the winner is chosen over `(value, position)` pairs.
pub fn combine(
    kernels: Kernels<'_>,
    siblings: &[PartialResult],
    agg: &Aggregation,
) -> Result<PartialResult> {
    let first = siblings
        .first()
        .ok_or_else(|| Error::invariant("combine called without inputs"))?;
    let nops = agg.combine.len();
    for s in siblings {
        if s.intermediates().len() != nops {
            return Err(Error::invariant(format!(
                "'{}' combines {nops} intermediates, got {}",
                agg.name,
                s.intermediates().len()
            )));
        }
    }
    if siblings.len() == 1 {
        return Ok(first.clone());
    }

    let union: Vec<GroupIdentity> = if siblings.iter().all(|s| s.groups() == first.groups()) {
        first.groups().to_vec()
    } else {
        let set: BTreeSet<&GroupIdentity> = siblings.iter().flat_map(|s| s.groups()).collect();
        set.into_iter().cloned().collect()
    };
    let nunion = union.len();
    trace!(nsiblings = siblings.len(), ngroups = nunion, "combining");

    let mut stacked = Vec::with_capacity(nops);
    let mut fills = Vec::with_capacity(nops);
    for i in 0..nops {
        let dtype = first.intermediates()[i].dtype();
        let fill = resolve_fill_value(dtype, agg.fill_values[i]);
        let aligned = siblings
            .iter()
            .map(|s| {
                let inter = &s.intermediates()[i];
                if s.groups() == union.as_slice() {
                    Ok(inter.clone())
                } else {
                    reindex(inter, s.groups(), &union, Some(fill), ReindexAxis::Last)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&NdArray> = aligned.iter().collect();
        stacked.push(NdArray::concatenate(&refs, refs[0].ndim() - 1)?);
        fills.push(fill);
    }

    let codes: Vec<GroupIndex> = (0..siblings.len())
        .flat_map(|_| (0..nunion).map(GroupIndex::Valid))
        .collect();

    let mut out = Vec::with_capacity(nops);
    if agg.is_arg_reduction() {
        let (values, positions) =
            select_arg(agg.combine[1], &stacked[0], &stacked[1], nunion, [fills[0], fills[1]])?;
        out.push(values);
        out.push(positions);
        for i in 2..nops {
            out.push(kernels.apply(&codes, &stacked[i], agg.combine[i], nunion, fills[i])?);
        }
    } else {
        for i in 0..nops {
            out.push(kernels.apply(&codes, &stacked[i], agg.combine[i], nunion, fills[i])?);
        }
    }
    PartialResult::new(union, out)
}

/// Pick the winning `(value, position)` pair of every group across siblings.
///
/// `values` and `positions` hold the siblings side by side along the last
/// axis, `ngroups` apart. A negative position marks a group the sibling
/// never saw. Equal values, and two NaN when NaN is not skipped, go to the
/// smaller position.
fn select_arg(
    op: KernelOp,
    values: &NdArray,
    positions: &NdArray,
    ngroups: usize,
    fills: [f64; 2],
) -> Result<(NdArray, NdArray)> {
    let (maximize, skip_nan) = match op {
        KernelOp::ArgMax => (true, false),
        KernelOp::NanArgMax => (true, true),
        KernelOp::ArgMin => (false, false),
        KernelOp::NanArgMin => (false, true),
        other => {
            return Err(Error::invariant(format!("'{other}' is not an arg-reduction")));
        }
    };
    let beats = |(v, p): (f64, f64), (bv, bp): (f64, f64)| match (v.is_nan(), bv.is_nan()) {
        (true, true) => p < bp,
        (true, false) => true,
        (false, true) => false,
        (false, false) if v == bv => p < bp,
        (false, false) => (v > bv) == maximize,
    };

    let width = values.last_dim();
    if positions.last_dim() != width {
        return Err(Error::invariant(format!(
            "{} stacked positions for {width} stacked values",
            positions.last_dim()
        )));
    }
    let nlanes = values.numel() / width.max(1);
    let mut best_values = Vec::with_capacity(nlanes * ngroups);
    let mut best_positions = Vec::with_capacity(nlanes * ngroups);
    let mut filled = false;
    for (vals, pos) in values.lanes().zip(positions.lanes()) {
        for g in 0..ngroups {
            let mut best: Option<(f64, f64)> = None;
            for s in (g..width).step_by(ngroups) {
                let entry = (vals[s], pos[s]);
                if entry.1.is_nan() || entry.1 < 0.0 || (skip_nan && entry.0.is_nan()) {
                    continue;
                }
                if best.is_none_or(|b| beats(entry, b)) {
                    best = Some(entry);
                }
            }
            let (v, p) = best.unwrap_or_else(|| {
                filled = true;
                (fills[0], fills[1])
            });
            best_values.push(v);
            best_positions.push(p);
        }
    }

    let values_out =
        NdArray::with_dtype(best_values, values.shape().with_last(ngroups), values.dtype())?;
    let positions_out = NdArray::with_dtype(
        best_positions,
        positions.shape().with_last(ngroups),
        positions.dtype(),
    )?;
    if filled {
        Ok((
            values_out.retag(promote_for_fill(values.dtype(), fills[0])),
            positions_out.retag(promote_for_fill(positions.dtype(), fills[1])),
        ))
    } else {
        Ok((values_out, positions_out))
    }
}

/// Combine `partials` in rounds of at most `split_every` until one remains.
pub fn tree_combine(
    kernels: Kernels<'_>,
    mut partials: Vec<PartialResult>,
    agg: &Aggregation,
    split_every: usize,
) -> Result<PartialResult> {
    if split_every < 2 {
        return Err(Error::invalid_argument(
            "split_every",
            format!("must be at least 2, got {split_every}"),
        ));
    }
    while partials.len() > 1 {
        partials = partials
            .chunks(split_every)
            .map(|group| combine(kernels, group, agg))
            .collect::<Result<Vec<_>>>()?;
    }
    partials
        .pop()
        .ok_or_else(|| Error::invariant("tree_combine called without inputs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationKind;
    use crate::runtime::{CpuEngine, KernelCache};

    fn partial(groups: &[i64], inters: Vec<Vec<f64>>) -> PartialResult {
        let groups: Vec<GroupIdentity> = groups.iter().map(|&g| g.into()).collect();
        let n = groups.len();
        let inters = inters
            .into_iter()
            .map(|d| NdArray::from_vec(d, [n]).unwrap())
            .collect();
        PartialResult::new(groups, inters).unwrap()
    }

    #[test]
    fn test_union_is_sorted_and_filled() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let agg = AggregationKind::Sum.aggregation();
        let a = partial(&[3, 1], vec![vec![30.0, 10.0]]);
        let b = partial(&[2], vec![vec![20.0]]);
        let out = combine(Kernels::new(&engine, &cache), &[a, b], &agg).unwrap();
        let groups: Vec<GroupIdentity> = vec![1i64.into(), 2i64.into(), 3i64.into()];
        assert_eq!(out.groups(), groups.as_slice());
        assert_eq!(out.intermediates()[0].data(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_identical_groups_keep_order() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let agg = AggregationKind::Max.aggregation();
        let a = partial(&[5, 1], vec![vec![1.0, 8.0]]);
        let b = partial(&[5, 1], vec![vec![4.0, 2.0]]);
        let out = combine(Kernels::new(&engine, &cache), &[a, b], &agg).unwrap();
        assert_eq!(out.groups()[0], GroupIdentity::from(5i64));
        assert_eq!(out.intermediates()[0].data(), &[4.0, 8.0]);
    }

    #[test]
    fn test_argmax_gathers_index_of_winner() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let agg = AggregationKind::ArgMax.aggregation();
        let a = partial(&[0, 1], vec![vec![5.0, 1.0], vec![2.0, 3.0]]);
        let b = partial(&[0, 1], vec![vec![4.0, 9.0], vec![7.0, 8.0]]);
        let out = combine(Kernels::new(&engine, &cache), &[a, b], &agg).unwrap();
        assert_eq!(out.intermediates()[0].data(), &[5.0, 9.0]);
        assert_eq!(out.intermediates()[1].data(), &[2.0, 8.0]);
    }

    #[test]
    fn test_absent_group_never_wins_against_infinite_value() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let kernels = Kernels::new(&engine, &cache);
        for (kind, extreme) in [
            (AggregationKind::ArgMax, f64::NEG_INFINITY),
            (AggregationKind::NanArgMax, f64::NEG_INFINITY),
            (AggregationKind::ArgMin, f64::INFINITY),
            (AggregationKind::NanArgMin, f64::INFINITY),
        ] {
            let agg = kind.aggregation();
            let a = partial(&[1], vec![vec![5.0], vec![0.0]]);
            let b = partial(&[0], vec![vec![extreme], vec![1.0]]);
            let out = combine(kernels, &[a, b], &agg).unwrap();
            assert_eq!(out.intermediates()[0].data(), &[extreme, 5.0], "{kind:?}");
            assert_eq!(out.intermediates()[1].data(), &[1.0, 0.0], "{kind:?}");
        }
    }

    #[test]
    fn test_arg_ties_go_to_smaller_position() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let kernels = Kernels::new(&engine, &cache);
        let agg = AggregationKind::ArgMax.aggregation();
        let a = partial(&[0, 1], vec![vec![5.0, f64::NAN], vec![4.0, 6.0]]);
        let b = partial(&[0, 1], vec![vec![5.0, f64::NAN], vec![2.0, 3.0]]);
        let out = combine(kernels, &[a, b], &agg).unwrap();
        assert_eq!(out.intermediates()[1].data(), &[2.0, 3.0]);

        let agg = AggregationKind::NanArgMin.aggregation();
        let a = partial(&[0], vec![vec![1.0], vec![9.0]]);
        let b = partial(&[0], vec![vec![f64::NAN], vec![-1.0]]);
        let c = partial(&[0], vec![vec![1.0], vec![4.0]]);
        let out = combine(kernels, &[a, b, c], &agg).unwrap();
        assert_eq!(out.intermediates()[0].data(), &[1.0]);
        assert_eq!(out.intermediates()[1].data(), &[4.0]);
    }

    #[test]
    fn test_nan_wins_argmax_unless_skipped() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let kernels = Kernels::new(&engine, &cache);
        let a = partial(&[0], vec![vec![9.0], vec![0.0]]);
        let b = partial(&[0], vec![vec![f64::NAN], vec![5.0]]);
        let parts = [a, b];

        let out = combine(kernels, &parts, &AggregationKind::ArgMax.aggregation()).unwrap();
        assert!(out.intermediates()[0].data()[0].is_nan());
        assert_eq!(out.intermediates()[1].data(), &[5.0]);

        let out = combine(kernels, &parts, &AggregationKind::NanArgMax.aggregation()).unwrap();
        assert_eq!(out.intermediates()[0].data(), &[9.0]);
        assert_eq!(out.intermediates()[1].data(), &[0.0]);
    }

    #[test]
    fn test_tree_matches_flat_combine() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let kernels = Kernels::new(&engine, &cache);
        let agg = AggregationKind::Sum.aggregation();
        let parts: Vec<PartialResult> = (0..7)
            .map(|i| partial(&[i % 3], vec![vec![i as f64]]))
            .collect();
        let flat = combine(kernels, &parts, &agg).unwrap();
        let tree = tree_combine(kernels, parts, &agg, 2).unwrap();
        assert_eq!(flat, tree);
    }

    #[test]
    fn test_split_every_must_be_two_or_more() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let agg = AggregationKind::Sum.aggregation();
        let err = tree_combine(Kernels::new(&engine, &cache), vec![], &agg, 1);
        assert!(matches!(err, Err(Error::InvalidArgument { .. })));
    }
}
