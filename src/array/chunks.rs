//! Block partitioning of an array

use super::layout::{ravel_index, unravel_index};
use super::shape::{STACK_DIMS, Shape};
use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::ops::Range;

/// Block coordinates within a block grid
pub type BlockCoords = SmallVec<[usize; STACK_DIMS]>;

/// Per-axis block sizes of a partitioned array
///
/// `Chunks` describes a regular grid of blocks: block `(i, j, ...)` spans
/// `offsets(0)[i]..offsets(0)[i + 1]` along axis 0, and so on. Blocks are
/// enumerated in row-major order of the grid (the *flat* block index).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Chunks(Vec<Vec<usize>>);

impl Chunks {
    /// Create from explicit per-axis block sizes.
    ///
    /// Every axis needs at least one block; zero-sized blocks are only
    /// allowed for zero-length axes.
    pub fn new(sizes: Vec<Vec<usize>>) -> Result<Self> {
        for (axis, s) in sizes.iter().enumerate() {
            let total: usize = s.iter().sum();
            if s.is_empty() || (total > 0 && s.contains(&0)) {
                return Err(Error::invalid_argument(
                    "chunks",
                    format!("axis {axis} has invalid block sizes {s:?}"),
                ));
            }
        }
        Ok(Self(sizes))
    }

    /// One block per axis spanning the whole `shape`
    pub fn single(shape: &[usize]) -> Self {
        Self(shape.iter().map(|&s| vec![s]).collect())
    }

    /// Regular blocks of `size[axis]` along each axis of `shape`
    pub fn regular(shape: &[usize], size: &[usize]) -> Result<Self> {
        if shape.len() != size.len() {
            return Err(Error::shape_mismatch(shape, size));
        }
        let sizes = shape
            .iter()
            .zip(size)
            .map(|(&len, &bs)| normalize_chunks(len, bs))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(sizes))
    }

    /// Block sizes along `axis`
    pub fn axis(&self, axis: usize) -> &[usize] {
        &self.0[axis]
    }

    /// Per-axis block sizes
    pub fn as_slices(&self) -> &[Vec<usize>] {
        &self.0
    }

    /// Number of axes
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Shape of the whole partitioned array
    pub fn shape(&self) -> Shape {
        self.0.iter().map(|s| s.iter().sum()).collect()
    }

    /// Number of blocks along each axis
    pub fn numblocks(&self) -> Shape {
        self.0.iter().map(Vec::len).collect()
    }

    /// Total number of blocks
    pub fn nblocks(&self) -> usize {
        self.0.iter().map(Vec::len).product()
    }

    /// Start offsets of the blocks along `axis`, followed by the axis length
    pub fn offsets(&self, axis: usize) -> Vec<usize> {
        cumulative(&self.0[axis])
    }

    /// Element ranges covered by the block at `coords`
    pub fn block_ranges(&self, coords: &[usize]) -> SmallVec<[Range<usize>; STACK_DIMS]> {
        coords
            .iter()
            .zip(&self.0)
            .map(|(&c, sizes)| {
                let start: usize = sizes[..c].iter().sum();
                start..start + sizes[c]
            })
            .collect()
    }

    /// Shape of the block at `coords`
    pub fn block_shape(&self, coords: &[usize]) -> Shape {
        coords.iter().zip(&self.0).map(|(&c, s)| s[c]).collect()
    }

    /// Flat block index of `coords`
    pub fn flat_index(&self, coords: &[usize]) -> usize {
        ravel_index(coords, &self.numblocks())
    }

    /// Block coordinates of the flat block index `flat`
    pub fn coords(&self, flat: usize) -> BlockCoords {
        unravel_index(flat, &self.numblocks())
    }

    /// Block coordinates in row-major order
    pub fn iter_blocks(&self) -> impl Iterator<Item = BlockCoords> + '_ {
        let numblocks = self.numblocks();
        (0..self.nblocks()).map(move |flat| unravel_index(flat, &numblocks))
    }

    /// Chunks with axes reordered as `order`
    pub fn permute(&self, order: &[usize]) -> Self {
        Self(order.iter().map(|&a| self.0[a].clone()).collect())
    }

    /// Chunks with the block sizes of `axis` replaced
    pub fn with_axis(&self, axis: usize, sizes: Vec<usize>) -> Result<Self> {
        let expected: usize = self.0[axis].iter().sum();
        let got: usize = sizes.iter().sum();
        if expected != got {
            return Err(Error::invalid_argument(
                "chunks",
                format!("new block sizes sum to {got}, axis {axis} has length {expected}"),
            ));
        }
        let mut out = self.0.clone();
        out[axis] = sizes;
        Self::new(out)
    }
}

/// Cumulative boundaries `[0, s0, s0 + s1, ...]` of a block-size list
pub(crate) fn cumulative(sizes: &[usize]) -> Vec<usize> {
    std::iter::once(0)
        .chain(sizes.iter().scan(0, |acc, &s| {
            *acc += s;
            Some(*acc)
        }))
        .collect()
}

/// Regular block sizes of at most `blocksize` covering `len`
pub fn normalize_chunks(len: usize, blocksize: usize) -> Result<Vec<usize>> {
    if blocksize == 0 {
        return Err(Error::invalid_argument("chunks", "block size must be positive"));
    }
    if len == 0 {
        return Ok(vec![0]);
    }
    let mut out = vec![blocksize; len / blocksize];
    if len % blocksize != 0 {
        out.push(len % blocksize);
    }
    Ok(out)
}

/// Common refinement of two partitions of the same axis.
///
/// Every boundary of either input is a boundary of the result.
pub fn refine(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let (total_a, total_b): (usize, usize) = (a.iter().sum(), b.iter().sum());
    if total_a != total_b {
        return Err(Error::shape_mismatch(&[total_a], &[total_b]));
    }
    let (ca, cb) = (cumulative(a), cumulative(b));
    let mut bounds: Vec<usize> = ca.into_iter().chain(cb).collect();
    bounds.sort_unstable();
    bounds.dedup();
    let sizes: Vec<usize> = bounds.windows(2).map(|w| w[1] - w[0]).collect();
    if sizes.is_empty() {
        return Ok(vec![0]);
    }
    Ok(sizes)
}
