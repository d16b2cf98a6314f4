//! Label arrays

use super::Label;
use crate::array::layout::{check_permutation, permuted_offsets, region_offsets};
use crate::array::{Chunks, Shape};
use crate::error::{Error, Result};
use std::ops::Range;

/// Dense, row-major array of raw labels
#[derive(Clone, Debug, PartialEq)]
pub struct LabelArray {
    data: Vec<Label>,
    shape: Shape,
}

impl LabelArray {
    /// Create from row-major labels
    pub fn new(data: Vec<Label>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return Err(Error::shape_mismatch(&shape, &[data.len()]));
        }
        Ok(Self { data, shape })
    }

    /// One-dimensional array of labels
    pub fn from_vec<T: Into<Label>>(data: Vec<T>) -> Self {
        let data: Vec<Label> = data.into_iter().map(Into::into).collect();
        let shape = Shape::from([data.len()]);
        Self { data, shape }
    }

    /// One-dimensional array of integer labels
    pub fn from_ints(data: &[i64]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// One-dimensional array of float labels; NaN is missing
    pub fn from_floats(data: &[f64]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Reinterpret with a new shape of the same size
    pub fn reshape(mut self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.numel() != self.data.len() {
            return Err(Error::shape_mismatch(&shape, &self.shape));
        }
        self.shape = shape;
        Ok(self)
    }

    /// Dimensions of the array
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of labels
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Row-major labels
    pub fn data(&self) -> &[Label] {
        &self.data
    }

    /// Transpose the axes into `order`
    pub fn permute(&self, order: &[usize]) -> Result<Self> {
        check_permutation(order, self.ndim())?;
        let data = permuted_offsets(&self.shape, order)
            .into_iter()
            .map(|o| self.data[o].clone())
            .collect();
        Ok(Self {
            data,
            shape: order.iter().map(|&a| self.shape[a]).collect(),
        })
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
            .map(|o| self.data[o].clone())
            .collect();
        Ok(Self {
            data,
            shape: ranges.iter().map(|r| r.len()).collect(),
        })
    }
}

/// Labels carrying their own block partitioning
///
/// The labels themselves are held in memory; `chunks` records how they are
/// partitioned, which may differ from the partitioning of the values they
/// group. Blocks of the two are matched by common refinement.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkedLabels {
    labels: LabelArray,
    chunks: Chunks,
}

impl ChunkedLabels {
    /// Attach a block partitioning to `labels`
    pub fn new(labels: LabelArray, chunks: Chunks) -> Result<Self> {
        if chunks.shape() != *labels.shape() {
            return Err(Error::shape_mismatch(labels.shape(), &chunks.shape()));
        }
        Ok(Self { labels, chunks })
    }

    /// The labels
    pub fn labels(&self) -> &LabelArray {
        &self.labels
    }

    /// Block partitioning of the labels
    pub fn chunks(&self) -> &Chunks {
        &self.chunks
    }

    /// Split into labels and partitioning
    pub fn into_parts(self) -> (LabelArray, Chunks) {
        (self.labels, self.chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_and_permute() {
        let labels = LabelArray::from_ints(&[0, 1, 2, 3, 4, 5]).reshape([2, 3]).unwrap();
        let sub = labels.region(&[0..2, 1..2]).unwrap();
        assert_eq!(sub.data(), &[Label::Int(1), Label::Int(4)]);
        let t = labels.permute(&[1, 0]).unwrap();
        assert_eq!(t.shape().as_slice(), &[3, 2]);
        assert_eq!(t.data()[1], Label::Int(3));
    }

    #[test]
    fn test_chunked_labels_shape_check() {
        let labels = LabelArray::from_ints(&[1, 2, 3]);
        assert!(ChunkedLabels::new(labels.clone(), Chunks::new(vec![vec![2, 1]]).unwrap()).is_ok());
        assert!(ChunkedLabels::new(labels, Chunks::new(vec![vec![2, 2]]).unwrap()).is_err());
    }
}
