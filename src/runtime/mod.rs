//! Engines, kernel cache and executors
//!
//! # Architecture
//!
//! ```text
//! AggregationEngine (numeric primitives, pluggable)
//! ├── KernelCache (compiled kernels keyed by (op, engine), caller-owned)
//! └── CpuEngine (reference implementation)
//!
//! Executor (runs a TaskGraph, redistributes blocks)
//! ├── SyncExecutor (calling thread)
//! └── ThreadPoolExecutor (rayon, feature "rayon")
//! ```

mod cache;
mod cpu;
mod engine;
mod executor;
mod op;

pub use cache::KernelCache;
pub use cpu::CpuEngine;
pub use engine::{AggregationEngine, Kernel, KernelArgs, ScanArgs, ScanKernel};
pub use executor::{Executor, SyncExecutor};
#[cfg(feature = "rayon")]
pub use executor::ThreadPoolExecutor;
pub use op::{KernelOp, ScanOp};

use crate::array::NdArray;
use crate::error::Result;
use crate::labels::GroupIndex;

/// An engine paired with the cache holding its compiled kernels
#[derive(Clone, Copy)]
pub struct Kernels<'a> {
    /// Engine running the kernels
    pub engine: &'a dyn AggregationEngine,
    /// Cache of compiled kernels
    pub cache: &'a KernelCache,
}

impl<'a> Kernels<'a> {
    /// Pair `engine` with `cache`
    pub fn new(engine: &'a dyn AggregationEngine, cache: &'a KernelCache) -> Self {
        Self { engine, cache }
    }

    /// See [`KernelCache::apply`]
    pub fn apply(
        &self,
        group_idx: &[GroupIndex],
        values: &NdArray,
        op: KernelOp,
        size: usize,
        fill_value: f64,
    ) -> Result<NdArray> {
        self.cache
            .apply(self.engine, group_idx, values, op, size, fill_value)
    }

    /// See [`KernelCache::scan`]
    pub fn scan(
        &self,
        group_idx: &[GroupIndex],
        values: &NdArray,
        op: ScanOp,
        size: usize,
        carry: Option<&NdArray>,
    ) -> Result<NdArray> {
        self.cache
            .scan(self.engine, group_idx, values, op, size, carry)
    }
}

impl std::fmt::Debug for Kernels<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernels")
            .field("engine", &self.engine.name())
            .field("cache", self.cache)
            .finish()
    }
}
