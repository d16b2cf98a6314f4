//! Row-major layout helpers shared by value and label arrays
//!
//! Both [`NdArray`](super::NdArray) and [`LabelArray`](crate::labels::LabelArray)
//! are contiguous, row-major buffers. Transposes and sub-block extraction are
//! expressed as a list of source offsets, computed once here and then used to
//! gather elements of any type.

use super::shape::STACK_DIMS;
use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::ops::Range;

/// Row-major element strides for `shape`
pub fn contiguous_strides(shape: &[usize]) -> SmallVec<[usize; STACK_DIMS]> {
    let mut strides: SmallVec<[usize; STACK_DIMS]> = SmallVec::from_elem(1, shape.len());
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Flat row-major index of `coords` within `shape`
#[inline]
pub fn ravel_index(coords: &[usize], shape: &[usize]) -> usize {
    coords
        .iter()
        .zip(shape.iter())
        .fold(0, |acc, (&c, &s)| acc * s + c)
}

/// Coordinates of the flat row-major index `flat` within `shape`
pub fn unravel_index(mut flat: usize, shape: &[usize]) -> SmallVec<[usize; STACK_DIMS]> {
    let mut coords: SmallVec<[usize; STACK_DIMS]> = SmallVec::from_elem(0, shape.len());
    for i in (0..shape.len()).rev() {
        let s = shape[i].max(1);
        coords[i] = flat % s;
        flat /= s;
    }
    coords
}

/// Normalize a possibly negative axis
pub fn normalize_axis(axis: isize, ndim: usize) -> Result<usize> {
    let resolved = if axis < 0 { ndim as isize + axis } else { axis };
    if resolved < 0 || resolved as usize >= ndim {
        return Err(Error::InvalidDimension { dim: axis, ndim });
    }
    Ok(resolved as usize)
}

/// Normalize a list of axes, returning them sorted and deduplicated-checked
pub fn normalize_axes(axes: &[isize], ndim: usize) -> Result<Vec<usize>> {
    let mut out = axes
        .iter()
        .map(|&a| normalize_axis(a, ndim))
        .collect::<Result<Vec<_>>>()?;
    out.sort_unstable();
    if out.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::invalid_argument(
            "axis",
            format!("repeated axis in {axes:?}"),
        ));
    }
    Ok(out)
}

/// Axis order that moves `axes` (in the given order) behind every other axis
pub fn axes_to_end_order(ndim: usize, axes: &[usize]) -> Vec<usize> {
    (0..ndim)
        .filter(|a| !axes.contains(a))
        .chain(axes.iter().copied())
        .collect()
}

/// Calls `f(source_offset)` for every element of a strided view, in row-major
/// order of `shape`.
fn for_each_offset(shape: &[usize], strides: &[usize], base: usize, mut f: impl FnMut(usize)) {
    let numel: usize = shape.iter().product();
    if numel == 0 {
        return;
    }
    let ndim = shape.len();
    let mut coords: SmallVec<[usize; STACK_DIMS]> = SmallVec::from_elem(0, ndim);
    let mut offset = base;
    for _ in 0..numel {
        f(offset);
        for d in (0..ndim).rev() {
            coords[d] += 1;
            offset += strides[d];
            if coords[d] < shape[d] {
                break;
            }
            offset -= strides[d] * shape[d];
            coords[d] = 0;
        }
    }
}

/// Source offsets of the transpose of `shape` by `order`.
///
/// Element `i` of the result (row-major in the permuted shape) lives at
/// offset `out[i]` of the source buffer.
pub(crate) fn permuted_offsets(shape: &[usize], order: &[usize]) -> Vec<usize> {
    let strides = contiguous_strides(shape);
    let new_shape: SmallVec<[usize; STACK_DIMS]> = order.iter().map(|&a| shape[a]).collect();
    let new_strides: SmallVec<[usize; STACK_DIMS]> = order.iter().map(|&a| strides[a]).collect();
    let mut out = Vec::with_capacity(shape.iter().product());
    for_each_offset(&new_shape, &new_strides, 0, |o| out.push(o));
    out
}

/// Source offsets of the sub-block `ranges` of `shape`, in row-major order.
pub(crate) fn region_offsets(shape: &[usize], ranges: &[Range<usize>]) -> Vec<usize> {
    let strides = contiguous_strides(shape);
    let base: usize = ranges
        .iter()
        .zip(strides.iter())
        .map(|(r, &s)| r.start * s)
        .sum();
    let sub_shape: SmallVec<[usize; STACK_DIMS]> = ranges.iter().map(|r| r.len()).collect();
    let mut out = Vec::with_capacity(sub_shape.iter().product());
    for_each_offset(&sub_shape, &strides, base, |o| out.push(o));
    out
}

/// Validate that `order` is a permutation of `0..ndim`
pub(crate) fn check_permutation(order: &[usize], ndim: usize) -> Result<()> {
    let mut seen = vec![false; ndim];
    if order.len() != ndim {
        return Err(Error::invalid_argument(
            "axes",
            format!("expected {ndim} axes, got {}", order.len()),
        ));
    }
    for &a in order {
        if a >= ndim || seen[a] {
            return Err(Error::invalid_argument(
                "axes",
                format!("{order:?} is not a permutation of 0..{ndim}"),
            ));
        }
        seen[a] = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ravel_unravel() {
        let shape = [2, 3, 4];
        assert_eq!(ravel_index(&[1, 2, 3], &shape), 23);
        assert_eq!(unravel_index(23, &shape).as_slice(), &[1, 2, 3]);
        assert_eq!(ravel_index(&[], &[]), 0);
    }

    #[test]
    fn test_permuted_offsets_transpose() {
        // [[0, 1, 2], [3, 4, 5]] transposed -> [[0, 3], [1, 4], [2, 5]]
        assert_eq!(permuted_offsets(&[2, 3], &[1, 0]), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_region_offsets() {
        // rows 1..2, cols 1..3 of a 3x4 grid
        assert_eq!(region_offsets(&[3, 4], &[1..2, 1..3]), vec![5, 6]);
        assert!(region_offsets(&[3, 4], &[1..1, 0..4]).is_empty());
    }

    #[test]
    fn test_normalize_axes() {
        assert_eq!(normalize_axes(&[-1, 0], 3).unwrap(), vec![0, 2]);
        assert!(normalize_axes(&[3], 3).is_err());
        assert!(normalize_axes(&[1, -2], 3).is_err());
        assert_eq!(axes_to_end_order(4, &[1, 2]), vec![0, 3, 1, 2]);
    }
}
