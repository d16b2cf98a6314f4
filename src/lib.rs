//! # blockby
//!
//! **Grouped reductions over block-partitioned N-dimensional arrays.**
//!
//! blockby computes grouped statistics (sum, mean, variance, min/max,
//! arg-min/max, counts, boolean reductions, first/last and grouped scans)
//! over arrays split into independent blocks, with group membership given
//! by label arrays that may be partitioned on their own. The reduction is
//! decomposed into per-block partial results combined through an explicit
//! task graph, so no block ever needs the whole array.
//!
//! ## Strategies
//!
//! - **map-reduce**: reduce every block, combine through a tree, finalize
//! - **blockwise**: every group lives in one block; no combine step
//! - **cohorts**: independent sets of blocks are reduced separately
//!
//! ## Quick Start
//!
//! ```rust
//! use blockby::prelude::*;
//!
//! let values = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [6])?;
//! let values = ChunkedArray::from_array(&values, Chunks::new(vec![vec![2, 2, 2]])?)?;
//! let labels = LabelArray::from_ints(&[0, 1, 0, 1, 2, 2]);
//!
//! let out = GroupBy::new(CpuEngine::new())
//!     .reduce(values, &[labels.into()], "sum", &ReduceOptions::default())?;
//! assert_eq!(out.result.data(), &[4.0, 6.0, 11.0]);
//! # Ok::<(), blockby::error::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): `ThreadPoolExecutor` running graph levels in parallel

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod aggregate;
pub mod array;
pub mod dtype;
pub mod error;
pub mod factorize;
pub mod graph;
pub mod labels;
pub mod ops;
pub mod plan;
pub mod reduce;
pub mod runtime;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregate::{Aggregation, AggregationKind, FinalizeKwargs};
    pub use crate::array::{ChunkedArray, Chunks, NdArray, Shape};
    pub use crate::dtype::DType;
    pub use crate::error::{Error, Result};
    pub use crate::graph::Method;
    pub use crate::labels::{ChunkedLabels, GroupIdentity, Label, LabelArray};
    pub use crate::reduce::{ByInput, GroupBy, GroupedResult, ReduceOptions, Values};
    pub use crate::runtime::{AggregationEngine, CpuEngine, Executor, SyncExecutor};

    #[cfg(feature = "rayon")]
    pub use crate::runtime::ThreadPoolExecutor;
}
