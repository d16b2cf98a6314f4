//! Caller-owned cache of compiled kernels

use super::engine::{AggregationEngine, Kernel, KernelArgs, ScanArgs, ScanKernel};
use super::op::{KernelOp, ScanOp};
use crate::array::NdArray;
use crate::error::{Error, Result};
use crate::labels::GroupIndex;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Compiled kernels keyed by `(op, engine name)`
///
/// The cache is the single place where group indices cross into an engine:
/// [`GroupIndex::Excluded`] entries become the trailing sentinel bucket
/// `size`, the engine is asked for `size + 1` buckets and the sentinel
/// bucket is dropped from its output.
#[derive(Default)]
pub struct KernelCache {
    kernels: RwLock<HashMap<(KernelOp, &'static str), Kernel>>,
    scans: RwLock<HashMap<(ScanOp, &'static str), ScanKernel>>,
}

impl KernelCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of compiled kernels held
    pub fn len(&self) -> usize {
        self.kernels.read().len() + self.scans.read().len()
    }

    /// True when nothing has been compiled yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compiled kernel for `op`, compiling on first use
    pub fn kernel(&self, engine: &dyn AggregationEngine, op: KernelOp) -> Result<Kernel> {
        let key = (op, engine.name());

        // Check cache first
        {
            let cache = self.kernels.read();
            if let Some(kernel) = cache.get(&key) {
                return Ok(kernel.clone());
            }
        }

        trace!(op = op.name(), engine = engine.name(), "compiling kernel");
        let kernel = engine
            .compile(op)
            .map_err(|e| wrap_kernel_error(engine, op.name(), e))?;
        {
            let mut cache = self.kernels.write();
            cache.insert(key, kernel.clone());
        }
        Ok(kernel)
    }

    /// Compiled scan kernel for `op`, compiling on first use
    pub fn scan_kernel(&self, engine: &dyn AggregationEngine, op: ScanOp) -> Result<ScanKernel> {
        let key = (op, engine.name());
        {
            let cache = self.scans.read();
            if let Some(kernel) = cache.get(&key) {
                return Ok(kernel.clone());
            }
        }
        let kernel = engine.compile_scan(op)?;
        self.scans.write().insert(key, kernel.clone());
        Ok(kernel)
    }

    /// Reduce the last axis of `values` into `size` groups.
    ///
    /// Returns an array shaped `[..., size]`. Any engine failure is reported
    /// as [`Error::Kernel`].
    pub fn apply(
        &self,
        engine: &dyn AggregationEngine,
        group_idx: &[GroupIndex],
        values: &NdArray,
        op: KernelOp,
        size: usize,
        fill_value: f64,
    ) -> Result<NdArray> {
        if values.last_dim() != group_idx.len() {
            return Err(Error::shape_mismatch(&[group_idx.len()], &[values.last_dim()]));
        }
        let buckets: Vec<usize> = group_idx.iter().map(|g| g.to_bucket(size)).collect();
        let kernel = self.kernel(engine, op)?;
        let out = kernel(&KernelArgs {
            group_idx: &buckets,
            values,
            size: size + 1,
            fill_value,
        })
        .map_err(|e| wrap_kernel_error(engine, op.name(), e))?;

        let expected = values.shape().with_last(size + 1);
        if *out.shape() != expected {
            return Err(Error::kernel(
                engine.name(),
                op.name(),
                format!("returned shape {:?}, expected {expected:?}", out.shape()),
            ));
        }
        out.slice_axis(out.ndim() - 1, 0..size)
    }

    /// Scan the last axis of `values` within each of `size` groups.
    pub fn scan(
        &self,
        engine: &dyn AggregationEngine,
        group_idx: &[GroupIndex],
        values: &NdArray,
        op: ScanOp,
        size: usize,
        carry: Option<&NdArray>,
    ) -> Result<NdArray> {
        if values.last_dim() != group_idx.len() {
            return Err(Error::shape_mismatch(&[group_idx.len()], &[values.last_dim()]));
        }
        let buckets: Vec<usize> = group_idx.iter().map(|g| g.to_bucket(size)).collect();
        let kernel = self.scan_kernel(engine, op)?;
        let out = kernel(&ScanArgs {
            group_idx: &buckets,
            values,
            size,
            carry,
        })
        .map_err(|e| wrap_kernel_error(engine, op.name(), e))?;
        if out.shape() != values.shape() {
            return Err(Error::kernel(
                engine.name(),
                op.name(),
                format!("returned shape {:?}, expected {:?}", out.shape(), values.shape()),
            ));
        }
        Ok(out)
    }
}

fn wrap_kernel_error(engine: &dyn AggregationEngine, op: &'static str, err: Error) -> Error {
    match err {
        Error::Kernel { .. } | Error::NotImplemented { .. } => err,
        other => Error::kernel(engine.name(), op, other.to_string()),
    }
}

impl std::fmt::Debug for KernelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelCache")
            .field("kernels", &self.kernels.read().len())
            .field("scans", &self.scans.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CpuEngine;
    use std::sync::Arc;

    struct FailingEngine;

    impl AggregationEngine for FailingEngine {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn compile(&self, _op: KernelOp) -> Result<Kernel> {
            Ok(Arc::new(|_args: &KernelArgs<'_>| {
                Err(Error::invalid_argument("values", "boom"))
            }))
        }
    }

    #[test]
    fn test_apply_drops_sentinel_bucket() {
        let cache = KernelCache::new();
        let values = NdArray::from_vec(vec![1.0, 2.0, 3.0], [3]).unwrap();
        let idx = [GroupIndex::Valid(1), GroupIndex::Excluded, GroupIndex::Valid(1)];
        let out = cache
            .apply(&CpuEngine::new(), &idx, &values, KernelOp::Sum, 2, 0.0)
            .unwrap();
        assert_eq!(out.data(), &[0.0, 4.0]);
        assert_eq!(cache.len(), 1);

        cache
            .apply(&CpuEngine::new(), &idx, &values, KernelOp::Sum, 2, 0.0)
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_engine_failure_is_kernel_error() {
        let cache = KernelCache::new();
        let values = NdArray::from_vec(vec![1.0], [1]).unwrap();
        let err = cache
            .apply(&FailingEngine, &[GroupIndex::Valid(0)], &values, KernelOp::Sum, 1, 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::Kernel { engine: "failing", op: "sum", .. }));
    }
}
