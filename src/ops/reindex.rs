//! Remapping group-indexed arrays between identity orderings

use crate::array::NdArray;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::hash::Hash;

/// Which axis of the array is indexed by group
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ReindexAxis {
    /// The first axis
    First,
    /// The last axis
    #[default]
    Last,
}

/// Reorder the group axis of `array` from the identities `from` to `to`.
///
/// Positions of `to` found in `from` are copied; the others are set to
/// `fill_value`, which must then be `Some`. An empty `from` gives an
/// all-fill array. The dtype is kept unless a fill it cannot hold is
/// written (NaN into integers promotes to `F64`).
///
/// # Errors
///
/// [`Error::Invariant`] when filling is needed but `fill_value` is `None`;
/// [`Error::ShapeMismatch`] when the group axis length differs from `from`.
///
/// # Example
///
/// ```
/// use blockby::array::NdArray;
/// use blockby::ops::{ReindexAxis, reindex};
///
/// let a = NdArray::from_vec(vec![1.0, 2.0], [2]).unwrap();
/// let out = reindex(&a, &["a", "b"], &["b", "c", "a"], Some(0.0), ReindexAxis::Last).unwrap();
/// assert_eq!(out.data(), &[2.0, 0.0, 1.0]);
/// ```
pub fn reindex<T: Eq + Hash>(
    array: &NdArray,
    from: &[T],
    to: &[T],
    fill_value: Option<f64>,
    axis: ReindexAxis,
) -> Result<NdArray> {
    let axis = match axis {
        ReindexAxis::First => 0,
        ReindexAxis::Last => array.ndim().saturating_sub(1),
    };
    if array.ndim() == 0 {
        return Err(Error::InvalidDimension { dim: 0, ndim: 0 });
    }
    if array.shape()[axis] != from.len() {
        return Err(Error::shape_mismatch(&[from.len()], &[array.shape()[axis]]));
    }

    let positions: HashMap<&T, usize> = from.iter().enumerate().map(|(i, g)| (g, i)).collect();
    let indices: Vec<Option<usize>> = to.iter().map(|g| positions.get(g).copied()).collect();
    let fill = if indices.iter().any(Option::is_none) {
        fill_value.ok_or_else(|| {
            Error::invariant("filling is required but no fill value was given")
        })?
    } else {
        fill_value.unwrap_or(0.0)
    };
    array.take_along(axis, &indices, fill)
}
