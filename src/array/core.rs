//! Core dense array type

use super::layout::{check_permutation, normalize_axis, permuted_offsets, region_offsets};
use super::shape::Shape;
use crate::dtype::{DType, promote, promote_for_fill};
use crate::error::{Error, Result};
use std::fmt;
use std::ops::Range;

/// Dense, row-major N-dimensional array
///
/// `NdArray` is the value type every stage of a grouped reduction exchanges:
/// per-block inputs, intermediates carried through combine steps and the
/// final result. It consists of:
/// - **Data**: a contiguous `Vec<f64>` in row-major order
/// - **Shape**: the dimensions of the array
/// - **DType**: the logical element type (values are rounded to it on construction)
///
/// By convention the group axis of an intermediate is always the *last* axis.
///
/// # Example
///
/// ```
/// use blockby::array::NdArray;
///
/// let a = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
/// assert_eq!(a.shape(), &[2, 2]);
/// assert_eq!(a.permute(&[1, 0]).unwrap().data(), &[1.0, 3.0, 2.0, 4.0]);
/// ```
#[derive(Clone, PartialEq)]
pub struct NdArray {
    data: Vec<f64>,
    shape: Shape,
    dtype: DType,
}

impl NdArray {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create an `F64` array from row-major data
    pub fn from_vec(data: Vec<f64>, shape: impl Into<Shape>) -> Result<Self> {
        Self::with_dtype(data, shape, DType::F64)
    }

    /// Create an array of the given dtype, rounding every value to it
    pub fn with_dtype(mut data: Vec<f64>, shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return Err(Error::shape_mismatch(&shape, &[data.len()]));
        }
        if dtype != DType::F64 {
            data.iter_mut().for_each(|v| *v = dtype.cast(*v));
        }
        Ok(Self { data, shape, dtype })
    }

    /// Create an `I64` array from integers
    pub fn from_i64(data: &[i64], shape: impl Into<Shape>) -> Result<Self> {
        Self::with_dtype(data.iter().map(|&v| v as f64).collect(), shape, DType::I64)
    }

    /// Create a `Bool` array
    pub fn from_bool(data: &[bool], shape: impl Into<Shape>) -> Result<Self> {
        Self::with_dtype(
            data.iter().map(|&v| if v { 1.0 } else { 0.0 }).collect(),
            shape,
            DType::Bool,
        )
    }

    /// Array filled with `value`
    pub fn full(shape: impl Into<Shape>, value: f64, dtype: DType) -> Self {
        let shape = shape.into();
        Self {
            data: vec![dtype.cast(value); shape.numel()],
            shape,
            dtype,
        }
    }

    /// Array filled with zeros
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 0.0, dtype)
    }

    /// Build from raw parts without rounding
    pub(crate) fn from_parts(data: Vec<f64>, shape: Shape, dtype: DType) -> Self {
        debug_assert_eq!(data.len(), shape.numel());
        Self { data, shape, dtype }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Dimensions of the array
    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Logical element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Row-major elements
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable row-major elements
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consume the array, returning its elements
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Length of the last axis (1 for a scalar)
    #[inline]
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Element at `coords`
    pub fn get(&self, coords: &[usize]) -> Option<f64> {
        if coords.len() != self.ndim() || coords.iter().zip(self.shape.iter()).any(|(c, s)| c >= s)
        {
            return None;
        }
        Some(self.data[super::layout::ravel_index(coords, &self.shape)])
    }

    /// Elements interpreted as integers
    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.data.iter().map(|&v| v as i64).collect()
    }

    /// Elements interpreted as booleans
    pub fn to_bool_vec(&self) -> Vec<bool> {
        self.data.iter().map(|&v| v != 0.0).collect()
    }

    /// Iterate over the lanes of the last axis
    pub fn lanes(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.last_dim().max(1))
    }

    // ========================================================================
    // Dtype handling
    // ========================================================================

    /// Convert to another dtype
    pub fn astype(mut self, dtype: DType) -> Self {
        if dtype != self.dtype {
            if !dtype.is_float() || dtype == DType::F32 {
                self.data.iter_mut().for_each(|v| *v = dtype.cast(*v));
            }
            self.dtype = dtype;
        }
        self
    }

    /// Relabel the dtype without rounding, for data already known to fit
    pub(crate) fn retag(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Apply `f` elementwise, keeping shape
    pub fn map(&self, dtype: DType, f: impl Fn(f64) -> f64) -> Self {
        Self::from_parts(
            self.data.iter().map(|&v| dtype.cast(f(v))).collect(),
            self.shape.clone(),
            dtype,
        )
    }

    /// Overwrite the elements where `mask` is true with `fill_value`,
    /// promoting the dtype when the fill cannot be held.
    pub fn fill_where(mut self, mask: &[bool], fill_value: f64) -> Result<Self> {
        if mask.len() != self.numel() {
            return Err(Error::shape_mismatch(&[self.numel()], &[mask.len()]));
        }
        if mask.iter().any(|&m| m) {
            self.dtype = promote_for_fill(self.dtype, fill_value);
            let fill = self.dtype.cast(fill_value);
            for (v, _) in self.data.iter_mut().zip(mask).filter(|(_, m)| **m) {
                *v = fill;
            }
        }
        Ok(self)
    }

    // ========================================================================
    // Shape manipulation
    // ========================================================================

    /// Reinterpret the data with a new shape of the same size
    pub fn reshape(mut self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.numel() != self.numel() {
            return Err(Error::shape_mismatch(&shape, &self.shape));
        }
        self.shape = shape;
        Ok(self)
    }

    /// Transpose the axes into `order`
    pub fn permute(&self, order: &[usize]) -> Result<Self> {
        check_permutation(order, self.ndim())?;
        if order.iter().enumerate().all(|(i, &a)| i == a) {
            return Ok(self.clone());
        }
        let data = permuted_offsets(&self.shape, order)
            .into_iter()
            .map(|o| self.data[o])
            .collect();
        let shape = order.iter().map(|&a| self.shape[a]).collect();
        Ok(Self::from_parts(data, shape, self.dtype))
    }

    /// Move `axes` behind every other axis, preserving their relative order
    pub fn move_axes_to_end(&self, axes: &[usize]) -> Result<Self> {
        self.permute(&super::layout::axes_to_end_order(self.ndim(), axes))
    }

    /// Merge the trailing `n` axes into one
    pub fn collapse_trailing(self, n: usize) -> Result<Self> {
        let shape = self.shape.collapse_trailing(n);
        self.reshape(shape)
    }

    /// Sub-array covering `ranges` (one range per axis)
    pub fn region(&self, ranges: &[Range<usize>]) -> Result<Self> {
        if ranges.len() != self.ndim()
            || ranges
                .iter()
                .zip(self.shape.iter())
                .any(|(r, &s)| r.start > r.end || r.end > s)
        {
            return Err(Error::invalid_argument(
                "ranges",
                format!("{ranges:?} out of bounds for shape {:?}", self.shape),
            ));
        }
        let data = region_offsets(&self.shape, ranges)
            .into_iter()
            .map(|o| self.data[o])
            .collect();
        let shape = ranges.iter().map(|r| r.len()).collect();
        Ok(Self::from_parts(data, shape, self.dtype))
    }

    /// Sub-array covering `range` along `axis`
    pub fn slice_axis(&self, axis: usize, range: Range<usize>) -> Result<Self> {
        let mut ranges: Vec<Range<usize>> = self.shape.iter().map(|&s| 0..s).collect();
        match ranges.get_mut(axis) {
            Some(r) => *r = range,
            None => {
                return Err(Error::InvalidDimension {
                    dim: axis as isize,
                    ndim: self.ndim(),
                });
            }
        }
        self.region(&ranges)
    }

    /// Gather positions along `axis`; `None` entries are set to `fill_value`.
    ///
    /// The dtype is promoted only if a fill is actually written.
    pub fn take_along(&self, axis: usize, indices: &[Option<usize>], fill_value: f64) -> Result<Self> {
        let axis_len = *self.shape.get(axis).ok_or(Error::InvalidDimension {
            dim: axis as isize,
            ndim: self.ndim(),
        })?;
        if let Some(bad) = indices.iter().flatten().find(|&&i| i >= axis_len) {
            return Err(Error::invalid_argument(
                "indices",
                format!("index {bad} out of bounds for axis of length {axis_len}"),
            ));
        }
        let dtype = if indices.iter().any(Option::is_none) {
            promote_for_fill(self.dtype, fill_value)
        } else {
            self.dtype
        };
        let fill = dtype.cast(fill_value);
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        let mut data = Vec::with_capacity(outer * indices.len() * inner);
        for o in 0..outer {
            for idx in indices {
                match idx {
                    Some(i) => {
                        let start = (o * axis_len + i) * inner;
                        data.extend_from_slice(&self.data[start..start + inner]);
                    }
                    None => data.extend(std::iter::repeat_n(fill, inner)),
                }
            }
        }
        let mut dims = self.shape.to_vec();
        dims[axis] = indices.len();
        Ok(Self::from_parts(data, Shape::from(dims), dtype))
    }

    /// Join arrays along `axis`; all other dimensions must agree.
    ///
    /// The dtype of the result is the promotion of every input dtype.
    pub fn concatenate(arrays: &[&NdArray], axis: usize) -> Result<Self> {
        let first = arrays
            .first()
            .ok_or_else(|| Error::invalid_argument("arrays", "cannot concatenate zero arrays"))?;
        let ndim = first.ndim();
        normalize_axis(axis as isize, ndim)?;
        let mut dims = first.shape.to_vec();
        dims[axis] = 0;
        let mut dtype = first.dtype;
        for a in arrays {
            let compatible = a.ndim() == ndim
                && a.shape
                    .iter()
                    .zip(first.shape.iter())
                    .enumerate()
                    .all(|(i, (x, y))| i == axis || x == y);
            if !compatible {
                return Err(Error::shape_mismatch(&first.shape, &a.shape));
            }
            dims[axis] += a.shape[axis];
            dtype = promote(dtype, a.dtype);
        }
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let mut data = Vec::with_capacity(outer * dims[axis] * inner);
        for o in 0..outer {
            for a in arrays {
                let run = a.shape[axis] * inner;
                data.extend_from_slice(&a.data[o * run..(o + 1) * run]);
            }
        }
        Ok(Self::from_parts(data, Shape::from(dims), dtype))
    }
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdArray")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("data", &self.data)
            .finish()
    }
}
