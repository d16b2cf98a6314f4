//! Aggregation engine contract

use super::op::{KernelOp, ScanOp};
use crate::array::NdArray;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Inputs of one grouped reduction kernel call
///
/// `values` has shape `[..., n]` and `group_idx` holds one bucket per lane
/// element, each in `0..size`. The kernel returns `[..., size]`, with
/// `fill_value` in buckets that received no element.
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs<'a> {
    /// Bucket of every lane element
    pub group_idx: &'a [usize],
    /// Values to reduce along their last axis
    pub values: &'a NdArray,
    /// Number of output buckets
    pub size: usize,
    /// Value of buckets without elements
    pub fill_value: f64,
}

/// Inputs of one grouped scan kernel call
///
/// Buckets equal to `size` mark elements outside every group; their
/// output is NaN. `carry`, shaped `[..., size]`, seeds each group's running
/// accumulation.
#[derive(Debug, Clone, Copy)]
pub struct ScanArgs<'a> {
    /// Bucket of every lane element
    pub group_idx: &'a [usize],
    /// Values to scan along their last axis
    pub values: &'a NdArray,
    /// Number of groups
    pub size: usize,
    /// Per-group starting accumulation
    pub carry: Option<&'a NdArray>,
}

/// A compiled grouped reduction
pub type Kernel = Arc<dyn Fn(&KernelArgs<'_>) -> Result<NdArray> + Send + Sync>;

/// A compiled grouped scan
pub type ScanKernel = Arc<dyn Fn(&ScanArgs<'_>) -> Result<NdArray> + Send + Sync>;

/// Executes grouped numeric primitives
///
/// Engines compile each [`KernelOp`] once; compiled kernels are kept in a
/// caller-owned [`KernelCache`](super::KernelCache) keyed by op and engine
/// name, so `name` must identify the engine's kernels uniquely.
pub trait AggregationEngine: Send + Sync {
    /// Engine identity, part of the kernel cache key
    fn name(&self) -> &'static str;

    /// Compile the kernel for `op`
    fn compile(&self, op: KernelOp) -> Result<Kernel>;

    /// Compile the scan kernel for `op`
    fn compile_scan(&self, op: ScanOp) -> Result<ScanKernel> {
        let _ = op;
        Err(Error::NotImplemented {
            feature: "grouped scans on this engine",
        })
    }
}
