//! Block-partitioned arrays

use super::chunks::{BlockCoords, Chunks};
use super::core::NdArray;
use super::layout::{check_permutation, region_offsets};
use super::shape::Shape;
use crate::dtype::{DType, promote};
use crate::error::{Error, Result};

/// An N-dimensional array held as a grid of dense blocks
///
/// Blocks are stored in row-major order of the block grid described by
/// [`Chunks`]. Every block is an ordinary [`NdArray`]; grouped reductions
/// never need more than the blocks feeding one task in memory at a time.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkedArray {
    chunks: Chunks,
    blocks: Vec<NdArray>,
    dtype: DType,
}

impl ChunkedArray {
    /// Partition a dense array into blocks
    pub fn from_array(array: &NdArray, chunks: Chunks) -> Result<Self> {
        if chunks.shape() != *array.shape() {
            return Err(Error::shape_mismatch(array.shape(), &chunks.shape()));
        }
        let blocks = chunks
            .iter_blocks()
            .map(|coords| array.region(&chunks.block_ranges(&coords)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chunks,
            blocks,
            dtype: array.dtype(),
        })
    }

    /// Assemble from blocks listed in row-major grid order
    pub fn from_blocks(chunks: Chunks, blocks: Vec<NdArray>) -> Result<Self> {
        if blocks.len() != chunks.nblocks() {
            return Err(Error::invalid_argument(
                "blocks",
                format!("expected {} blocks, got {}", chunks.nblocks(), blocks.len()),
            ));
        }
        let mut dtype = blocks.first().map_or(DType::F64, NdArray::dtype);
        for (coords, block) in chunks.iter_blocks().zip(&blocks) {
            let expected = chunks.block_shape(&coords);
            if *block.shape() != expected {
                return Err(Error::shape_mismatch(&expected, block.shape()));
            }
            dtype = promote(dtype, block.dtype());
        }
        Ok(Self {
            chunks,
            blocks,
            dtype,
        })
    }

    /// Block partitioning
    pub fn chunks(&self) -> &Chunks {
        &self.chunks
    }

    /// Blocks in row-major grid order
    pub fn blocks(&self) -> &[NdArray] {
        &self.blocks
    }

    /// Block at flat index `flat`
    pub fn block(&self, flat: usize) -> Option<&NdArray> {
        self.blocks.get(flat)
    }

    /// Shape of the whole array
    pub fn shape(&self) -> Shape {
        self.chunks.shape()
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.chunks.ndim()
    }

    /// Logical element type
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Materialize into one dense array
    pub fn to_array(&self) -> Result<NdArray> {
        let shape = self.shape();
        let mut data = vec![0.0; shape.numel()];
        for (coords, block) in self.chunks.iter_blocks().zip(&self.blocks) {
            let targets = region_offsets(&shape, &self.chunks.block_ranges(&coords));
            for (t, &v) in targets.into_iter().zip(block.data()) {
                data[t] = v;
            }
        }
        NdArray::with_dtype(data, shape, self.dtype)
    }

    /// Redistribute the blocks along `axis` to the block sizes `sizes`.
    ///
    /// Each new block is stitched together from the overlapping pieces of
    /// the old blocks; the array is never materialized as a whole.
    pub fn rechunk_axis(&self, axis: usize, sizes: &[usize]) -> Result<Self> {
        if axis >= self.ndim() {
            return Err(Error::InvalidDimension {
                dim: axis as isize,
                ndim: self.ndim(),
            });
        }
        if self.chunks.axis(axis) == sizes {
            return Ok(self.clone());
        }
        let new_chunks = self.chunks.with_axis(axis, sizes.to_vec())?;
        let old_offsets = self.chunks.offsets(axis);
        let new_offsets = new_chunks.offsets(axis);

        let mut blocks = Vec::with_capacity(new_chunks.nblocks());
        for coords in new_chunks.iter_blocks() {
            let (start, stop) = (new_offsets[coords[axis]], new_offsets[coords[axis] + 1]);
            let mut pieces = Vec::new();
            for j in 0..self.chunks.axis(axis).len() {
                let (ostart, ostop) = (old_offsets[j], old_offsets[j + 1]);
                if ostop <= start || ostart >= stop {
                    continue;
                }
                let mut old: BlockCoords = coords.clone();
                old[axis] = j;
                let block = &self.blocks[self.chunks.flat_index(&old)];
                let lo = start.max(ostart) - ostart;
                let hi = stop.min(ostop) - ostart;
                pieces.push(block.slice_axis(axis, lo..hi)?);
            }
            let block = match pieces.len() {
                0 => NdArray::zeros(new_chunks.block_shape(&coords), self.dtype),
                1 => pieces.swap_remove(0),
                _ => NdArray::concatenate(&pieces.iter().collect::<Vec<_>>(), axis)?,
            };
            blocks.push(block);
        }
        Self::from_blocks(new_chunks, blocks)
    }

    /// Transpose the axes into `order`, block by block
    pub fn permute(&self, order: &[usize]) -> Result<Self> {
        check_permutation(order, self.ndim())?;
        let new_chunks = self.chunks.permute(order);
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for coords in new_chunks.iter_blocks() {
            let mut old: BlockCoords = coords.clone();
            for (i, &a) in order.iter().enumerate() {
                old[a] = coords[i];
            }
            blocks.push(self.blocks[self.chunks.flat_index(&old)].permute(order)?);
        }
        Ok(Self {
            chunks: new_chunks,
            blocks,
            dtype: self.dtype,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange(n: usize, shape: &[usize]) -> NdArray {
        NdArray::from_vec((0..n).map(|v| v as f64).collect(), shape).unwrap()
    }

    #[test]
    fn test_from_array_and_back() {
        let a = arange(12, &[3, 4]);
        let chunked = ChunkedArray::from_array(&a, Chunks::regular(&[3, 4], &[2, 3]).unwrap())
            .unwrap();
        assert_eq!(chunked.blocks().len(), 4);
        assert_eq!(chunked.block(1).unwrap().data(), &[3.0, 7.0]);
        assert_eq!(chunked.to_array().unwrap(), a);
    }

    #[test]
    fn test_rechunk_axis() {
        let a = arange(10, &[10]);
        let chunked = ChunkedArray::from_array(&a, Chunks::regular(&[10], &[3]).unwrap()).unwrap();
        let re = chunked.rechunk_axis(0, &[5, 5]).unwrap();
        assert_eq!(re.chunks().axis(0), &[5, 5]);
        assert_eq!(re.block(1).unwrap().data(), &[5.0, 6.0, 7.0, 8.0, 9.0]);
        assert!(chunked.rechunk_axis(0, &[5, 4]).is_err());
    }

    #[test]
    fn test_permute_blocks() {
        let a = arange(12, &[3, 4]);
        let chunked = ChunkedArray::from_array(&a, Chunks::regular(&[3, 4], &[2, 3]).unwrap())
            .unwrap();
        let t = chunked.permute(&[1, 0]).unwrap();
        assert_eq!(t.chunks().axis(0), &[3, 1]);
        assert_eq!(t.to_array().unwrap(), a.permute(&[1, 0]).unwrap());
    }
}
