//! Array model: dense arrays, shapes and block partitioning
//!
//! - [`NdArray`]: a dense, row-major, dtype-tagged array
//! - [`Chunks`]: per-axis block sizes of a partitioned array
//! - [`ChunkedArray`]: a grid of [`NdArray`] blocks

mod chunked;
mod chunks;
mod core;
pub(crate) mod layout;
mod shape;

pub use chunked::ChunkedArray;
pub use chunks::{BlockCoords, Chunks, normalize_chunks, refine};
pub use core::NdArray;
pub use layout::{normalize_axes, normalize_axis, ravel_index, unravel_index};
pub use shape::Shape;

pub(crate) use chunks::cumulative;
pub(crate) use shape::STACK_DIMS;
