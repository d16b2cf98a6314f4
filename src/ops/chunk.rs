//! Per-block reduction

use super::PartialResult;
use crate::array::{NdArray, Shape};
use crate::dtype::{DType, promote_for_fill};
use crate::error::{Error, Result};
use crate::factorize::{KeyGroups, factorize};
use crate::labels::{GroupIdentity, GroupIndex, Label, LabelArray};
use crate::runtime::{KernelOp, Kernels};
use tracing::trace;

/// What to compute for one block
#[derive(Clone, Copy, Debug)]
pub struct ChunkRequest<'a> {
    /// One kernel op per intermediate
    pub ops: &'a [KernelOp],
    /// Value of groups without members, per intermediate
    pub fill_values: &'a [f64],
    /// Fixed output identities
    pub expected: Option<&'a [GroupIdentity]>,
    /// Produce exactly `expected` instead of the observed groups
    pub reindex: bool,
    /// Order observed groups by value instead of first appearance
    pub sort: bool,
    /// Trailing label dimensions reduced; `None` reduces all of them
    pub reduce_ndim: Option<usize>,
    /// Original linear index along the reduced axes of every label element
    pub arg_index: Option<&'a [usize]>,
}

impl<'a> ChunkRequest<'a> {
    /// Reduce all label dimensions into the observed groups, sorted
    pub fn new(ops: &'a [KernelOp], fill_values: &'a [f64]) -> Self {
        Self {
            ops,
            fill_values,
            expected: None,
            reindex: false,
            sort: true,
            reduce_ndim: None,
            arg_index: None,
        }
    }
}

/// Reduce one block.
///
/// `values` is shaped `[..., *labels.shape()]`; the label dimensions are
/// collapsed into one lane per leading index. The result's intermediates
/// are shaped `[..., ngroups]`, or `[..., untouched label dims, ngroups]`
/// when only the trailing `reduce_ndim` label dimensions are reduced.
///
/// A block whose labels are all excluded never reaches the engine: its
/// intermediates are synthesized from the fill values.
pub fn chunk_reduce(
    kernels: Kernels<'_>,
    values: &NdArray,
    labels: &LabelArray,
    request: &ChunkRequest<'_>,
) -> Result<PartialResult> {
    let (ndim, lndim) = (values.ndim(), labels.ndim());
    if lndim > ndim || values.shape()[ndim - lndim..] != labels.shape()[..] {
        return Err(Error::shape_mismatch(labels.shape(), values.shape()));
    }
    if request.fill_values.len() != request.ops.len() {
        return Err(Error::invariant(format!(
            "{} ops but {} fill values",
            request.ops.len(),
            request.fill_values.len()
        )));
    }
    let reduce_ndim = request.reduce_ndim.unwrap_or(lndim);
    let offset = reduce_ndim < lndim;
    let fixed = request.expected.is_some() && (request.reindex || offset);

    let key = match request.expected {
        Some(expected) if fixed => KeyGroups::Exact(identities_to_labels(expected)?),
        _ => KeyGroups::Found,
    };
    let factorized = factorize(&[labels], &[key], Some(reduce_ndim), request.sort)?;
    let groups = factorized.found_groups.into_iter().next().unwrap_or_default();

    let lead = &values.shape()[..ndim - lndim];
    let mut out_shape: Shape = lead.iter().copied().collect();
    out_shape.extend_from_slice(&labels.shape()[..lndim - reduce_ndim]);
    out_shape.push(groups.len());

    let all_excluded = factorized.codes.iter().all(|c| *c == GroupIndex::Excluded);
    if all_excluded {
        trace!(ngroups = groups.len(), "block has no valid labels");
        let intermediates = request
            .ops
            .iter()
            .zip(request.fill_values)
            .map(|(&op, &fill)| {
                let dtype = promote_for_fill(op_dtype(op, values.dtype()), fill);
                NdArray::full(out_shape.clone(), fill, dtype)
            })
            .collect();
        return PartialResult::new(groups, intermediates);
    }

    let lanes = values.clone().collapse_trailing(lndim)?;
    let inner: usize = labels.shape()[lndim - reduce_ndim..].iter().product();
    let mut intermediates = Vec::with_capacity(request.ops.len());
    for (&op, &fill) in request.ops.iter().zip(request.fill_values) {
        let mut out = kernels.apply(&factorized.codes, &lanes, op, factorized.size, fill)?;
        if op.is_arg() {
            resolve_positions(&mut out, request.arg_index, inner)?;
        }
        intermediates.push(out.reshape(out_shape.clone())?);
    }
    PartialResult::new(groups, intermediates)
}

/// Map lane positions returned by an arg kernel onto linear indices along
/// the reduced axes. Negative positions mark empty groups and are kept.
fn resolve_positions(out: &mut NdArray, arg_index: Option<&[usize]>, inner: usize) -> Result<()> {
    for v in out.data_mut() {
        if v.is_nan() || *v < 0.0 {
            continue;
        }
        let pos = *v as usize;
        *v = match arg_index {
            Some(index) => *index.get(pos).ok_or_else(|| {
                Error::invariant(format!("arg position {pos} outside the block"))
            })? as f64,
            None => (pos % inner.max(1)) as f64,
        };
    }
    Ok(())
}

pub(crate) fn identities_to_labels(identities: &[GroupIdentity]) -> Result<Vec<Label>> {
    identities
        .iter()
        .map(|g| {
            g.as_label().cloned().ok_or_else(|| {
                Error::invariant(format!("bin {g} cannot be matched against raw labels"))
            })
        })
        .collect()
}

/// Dtype of the intermediate `op` produces from `input`
fn op_dtype(op: KernelOp, input: DType) -> DType {
    match op {
        KernelOp::Len | KernelOp::NanLen => DType::I64,
        KernelOp::Any | KernelOp::All => DType::Bool,
        _ if op.is_arg() => DType::I64,
        KernelOp::Sum
        | KernelOp::NanSum
        | KernelOp::Prod
        | KernelOp::NanProd
        | KernelOp::SumOfSquares
        | KernelOp::NanSumOfSquares
            if input.is_bool() =>
        {
            DType::I64
        }
        _ => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CpuEngine, KernelCache};

    fn labels(v: &[i64]) -> LabelArray {
        LabelArray::from_ints(v)
    }

    #[test]
    fn test_observed_groups_sorted() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let values = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], [4]).unwrap();
        let req = ChunkRequest::new(&[KernelOp::Sum], &[0.0]);
        let p = chunk_reduce(Kernels::new(&engine, &cache), &values, &labels(&[5, 2, 5, 2]), &req)
            .unwrap();
        assert_eq!(p.groups(), &[GroupIdentity::from(2i64), GroupIdentity::from(5i64)]);
        assert_eq!(p.intermediates()[0].data(), &[6.0, 4.0]);
    }

    #[test]
    fn test_fixed_output_fills_absent_groups() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let values = NdArray::from_vec(vec![1.0, 2.0], [2]).unwrap();
        let expected: Vec<GroupIdentity> = vec![3i64.into(), 1i64.into(), 2i64.into()];
        let req = ChunkRequest {
            expected: Some(&expected),
            reindex: true,
            ..ChunkRequest::new(&[KernelOp::Sum], &[-1.0])
        };
        let p = chunk_reduce(Kernels::new(&engine, &cache), &values, &labels(&[1, 9]), &req)
            .unwrap();
        assert_eq!(p.groups(), expected.as_slice());
        assert_eq!(p.intermediates()[0].data(), &[-1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_all_excluded_block_skips_engine() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let values = NdArray::from_vec(vec![1.0, 2.0], [2]).unwrap();
        let missing = LabelArray::from_floats(&[f64::NAN, f64::NAN]);
        let req = ChunkRequest::new(&[KernelOp::Sum], &[0.0]);
        let p = chunk_reduce(Kernels::new(&engine, &cache), &values, &missing, &req).unwrap();
        assert_eq!(p.ngroups(), 0);
        assert_eq!(p.intermediates()[0].shape().as_slice(), &[0]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_arg_positions_resolve_through_index() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let values = NdArray::from_vec(vec![4.0, 9.0, 1.0], [3]).unwrap();
        let index = [10, 11, 12];
        let req = ChunkRequest {
            arg_index: Some(&index),
            ..ChunkRequest::new(&[KernelOp::Max, KernelOp::ArgMax], &[f64::NEG_INFINITY, -1.0])
        };
        let p = chunk_reduce(Kernels::new(&engine, &cache), &values, &labels(&[0, 0, 1]), &req)
            .unwrap();
        assert_eq!(p.intermediates()[0].data(), &[9.0, 1.0]);
        assert_eq!(p.intermediates()[1].data(), &[11.0, 12.0]);
    }

    #[test]
    fn test_axis_subset_offsets() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let values = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let by = labels(&[0, 1, 0, 1, 1, 1]).reshape([2, 3]).unwrap();
        let expected: Vec<GroupIdentity> = vec![0i64.into(), 1i64.into()];
        let req = ChunkRequest {
            expected: Some(&expected),
            reduce_ndim: Some(1),
            ..ChunkRequest::new(&[KernelOp::Sum], &[0.0])
        };
        let p = chunk_reduce(Kernels::new(&engine, &cache), &values, &by, &req).unwrap();
        assert_eq!(p.intermediates()[0].shape().as_slice(), &[2, 2]);
        assert_eq!(p.intermediates()[0].data(), &[4.0, 2.0, 0.0, 15.0]);
    }

    #[test]
    fn test_label_shape_must_be_suffix() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let values = NdArray::from_vec(vec![1.0, 2.0], [2]).unwrap();
        let req = ChunkRequest::new(&[KernelOp::Sum], &[0.0]);
        let err = chunk_reduce(Kernels::new(&engine, &cache), &values, &labels(&[1, 2, 3]), &req);
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }
}
