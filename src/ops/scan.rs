//! Grouped scans along the last axis

use super::chunk::identities_to_labels;
use crate::array::{ChunkedArray, NdArray};
use crate::dtype::promote;
use crate::error::{Error, Result};
use crate::factorize::{KeyGroups, factorize};
use crate::labels::{Label, LabelArray};
use crate::runtime::{Kernels, ScanOp};
use tracing::debug;

/// Scan one block whose labels index into `groups`.
///
/// `carry` holds the per-group totals of all earlier blocks, shaped
/// `[..., groups.len()]`. Returns the scanned block and the carry for the
/// next block.
pub fn scan_block(
    kernels: Kernels<'_>,
    values: &NdArray,
    labels: &LabelArray,
    groups: &[Label],
    op: ScanOp,
    carry: Option<&NdArray>,
) -> Result<(NdArray, NdArray)> {
    if labels.ndim() != 1 {
        return Err(Error::configuration(
            "grouped scans need one-dimensional labels",
        ));
    }
    let factorized = factorize(&[labels], &[KeyGroups::Exact(groups.to_vec())], None, false)?;
    let n = groups.len();
    let scanned = kernels.scan(&factorized.codes, values, op, n, carry)?;
    let totals = kernels.apply(&factorized.codes, values, op.carry_op(), n, 0.0)?;
    let next = match carry {
        Some(prev) => {
            let data = prev.data().iter().zip(totals.data()).map(|(a, b)| a + b).collect();
            NdArray::with_dtype(data, totals.shape().clone(), promote(prev.dtype(), totals.dtype()))?
        }
        None => totals,
    };
    Ok((scanned, next))
}

/// Scan a chunked array along its last axis, carrying group totals from
/// block to block. The output keeps the input's chunks.
pub fn scan_chunked(
    kernels: Kernels<'_>,
    array: &ChunkedArray,
    labels: &LabelArray,
    op: ScanOp,
) -> Result<ChunkedArray> {
    let ndim = array.ndim();
    if labels.ndim() != 1 || ndim == 0 || array.shape()[ndim - 1] != labels.numel() {
        return Err(Error::shape_mismatch(
            &array.shape()[ndim.saturating_sub(1)..],
            labels.shape(),
        ));
    }
    let found = factorize(&[labels], &[KeyGroups::Found], None, true)?;
    let groups = identities_to_labels(&found.found_groups[0])?;

    let chunks = array.chunks();
    let last = ndim - 1;
    let offsets = chunks.offsets(last);
    let nlast = chunks.axis(last).len();
    debug!(op = %op, blocks = chunks.nblocks(), ngroups = groups.len(), "chunked scan");

    let block_labels = (0..nlast)
        .map(|j| labels.region(&[offsets[j]..offsets[j + 1]]))
        .collect::<Result<Vec<_>>>()?;
    let mut out: Vec<Option<NdArray>> = vec![None; chunks.nblocks()];
    for start in chunks.iter_blocks().filter(|c| c[last] == 0) {
        let mut coords = start.clone();
        let mut carry: Option<NdArray> = None;
        for (j, block_labels) in block_labels.iter().enumerate() {
            coords[last] = j;
            let flat = chunks.flat_index(&coords);
            let block = array
                .block(flat)
                .ok_or_else(|| Error::invariant(format!("missing block {flat}")))?;
            let (scanned, next) =
                scan_block(kernels, block, block_labels, &groups, op, carry.as_ref())?;
            out[flat] = Some(scanned);
            carry = Some(next);
        }
    }
    let blocks = out
        .into_iter()
        .map(|b| b.ok_or_else(|| Error::invariant("block not scanned")))
        .collect::<Result<Vec<_>>>()?;
    ChunkedArray::from_blocks(chunks.clone(), blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Chunks;
    use crate::runtime::{CpuEngine, KernelCache};

    #[test]
    fn test_chunked_scan_matches_dense() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let kernels = Kernels::new(&engine, &cache);
        let values = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [6]).unwrap();
        let labels = LabelArray::from_ints(&[0, 1, 0, 0, 1, 1]);
        let groups = vec![Label::Int(0), Label::Int(1)];
        let (dense, totals) = scan_block(kernels, &values, &labels, &groups, ScanOp::CumSum, None)
            .unwrap();
        assert_eq!(dense.data(), &[1.0, 2.0, 4.0, 8.0, 7.0, 13.0]);
        assert_eq!(totals.data(), &[8.0, 13.0]);

        let chunked =
            ChunkedArray::from_array(&values, Chunks::new(vec![vec![2, 3, 1]]).unwrap()).unwrap();
        let out = scan_chunked(kernels, &chunked, &labels, ScanOp::CumSum).unwrap();
        assert_eq!(out.chunks(), chunked.chunks());
        assert_eq!(out.to_array().unwrap().data(), dense.data());
    }

    #[test]
    fn test_scan_needs_1d_labels() {
        let (engine, cache) = (CpuEngine::new(), KernelCache::new());
        let values = NdArray::from_vec(vec![1.0; 4], [2, 2]).unwrap();
        let labels = LabelArray::from_ints(&[0, 1, 0, 1]).reshape([2, 2]).unwrap();
        let err = scan_block(
            Kernels::new(&engine, &cache),
            &values,
            &labels,
            &[Label::Int(0)],
            ScanOp::CumSum,
            None,
        );
        assert!(matches!(err, Err(Error::Configuration { .. })));
    }
}
