//! Reference CPU engine
//!
//! Straightforward single-pass kernels over each lane of the last axis.
//! Buckets that receive no element get the requested fill value; buckets
//! whose elements are all NaN get NaN from the NaN-skipping value ops.

use super::engine::{AggregationEngine, Kernel, KernelArgs, ScanArgs, ScanKernel};
use super::op::{KernelOp, ScanOp};
use crate::array::NdArray;
use crate::dtype::{DType, promote_for_fill};
use crate::error::{Error, Result};
use std::sync::Arc;

/// CPU implementation of every [`KernelOp`] and [`ScanOp`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuEngine;

impl CpuEngine {
    /// Create the engine
    pub fn new() -> Self {
        Self
    }
}

impl AggregationEngine for CpuEngine {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn compile(&self, op: KernelOp) -> Result<Kernel> {
        Ok(Arc::new(move |args: &KernelArgs<'_>| reduce(op, args)))
    }

    fn compile_scan(&self, op: ScanOp) -> Result<ScanKernel> {
        Ok(Arc::new(move |args: &ScanArgs<'_>| scan(op, args)))
    }
}

// ============================================================================
// Reductions
// ============================================================================

fn reduce(op: KernelOp, args: &KernelArgs<'_>) -> Result<NdArray> {
    use KernelOp as Op;

    let input = args.values.dtype();
    let accumulate = if input.is_bool() { DType::I64 } else { input };
    let nan = f64::NAN;
    let max = |a: f64, b: f64| if a.is_nan() || b.is_nan() { nan } else { a.max(b) };
    let min = |a: f64, b: f64| if a.is_nan() || b.is_nan() { nan } else { a.min(b) };

    match op {
        Op::Sum => fold(args, accumulate, 0.0, false, None, |a, v| a + v),
        Op::NanSum => fold(args, accumulate, 0.0, true, None, |a, v| a + v),
        Op::Prod => fold(args, accumulate, 1.0, false, None, |a, v| a * v),
        Op::NanProd => fold(args, accumulate, 1.0, true, None, |a, v| a * v),
        Op::Len => fold(args, DType::I64, 0.0, false, None, |a, _| a + 1.0),
        Op::NanLen => fold(args, DType::I64, 0.0, true, None, |a, _| a + 1.0),
        Op::SumOfSquares => fold(args, accumulate, 0.0, false, None, |a, v| a + v * v),
        Op::NanSumOfSquares => fold(args, accumulate, 0.0, true, None, |a, v| a + v * v),
        Op::Max => fold(args, input, f64::NEG_INFINITY, false, None, max),
        Op::NanMax => fold(args, input, f64::NEG_INFINITY, true, Some(nan), f64::max),
        Op::Min => fold(args, input, f64::INFINITY, false, None, min),
        Op::NanMin => fold(args, input, f64::INFINITY, true, Some(nan), f64::min),
        Op::Any => fold(args, DType::Bool, 0.0, false, None, |a, v| {
            f64::from(a != 0.0 || v != 0.0)
        }),
        Op::All => fold(args, DType::Bool, 1.0, false, None, |a, v| {
            f64::from(a != 0.0 && v != 0.0)
        }),
        Op::ArgMax => arg_reduce(args, false, |v, best| !best.is_nan() && (v.is_nan() || v > best)),
        Op::NanArgMax => arg_reduce(args, true, |v, best| v > best),
        Op::ArgMin => arg_reduce(args, false, |v, best| !best.is_nan() && (v.is_nan() || v < best)),
        Op::NanArgMin => arg_reduce(args, true, |v, best| v < best),
        Op::First => pick(args, false, false),
        Op::Last => pick(args, true, false),
        Op::NanFirst => pick(args, false, true),
        Op::NanLast => pick(args, true, true),
    }
}

/// Lane geometry of a kernel call: (number of lanes, lane length)
fn lanes(args: &KernelArgs<'_>) -> Result<(usize, usize)> {
    let n = args.group_idx.len();
    if args.values.ndim() == 0 || args.values.last_dim() != n {
        return Err(Error::shape_mismatch(&[n], args.values.shape()));
    }
    if let Some(bad) = args.group_idx.iter().find(|&&g| g >= args.size) {
        return Err(Error::invalid_argument(
            "group_idx",
            format!("bucket {bad} out of range for size {}", args.size),
        ));
    }
    let shape = args.values.shape();
    Ok((shape[..shape.len() - 1].iter().product(), n))
}

fn finish(args: &KernelArgs<'_>, data: Vec<f64>, dtype: DType, filled: bool) -> Result<NdArray> {
    let dtype = if filled {
        promote_for_fill(dtype, args.fill_value)
    } else {
        dtype
    };
    NdArray::with_dtype(data, args.values.shape().with_last(args.size), dtype)
}

/// Accumulate `f` per bucket.
///
/// With `skip_nan`, NaN elements still make their bucket non-empty but do
/// not enter the accumulation; a bucket holding only NaN yields `all_nan`
/// (or the identity when `None`).
fn fold(
    args: &KernelArgs<'_>,
    dtype: DType,
    identity: f64,
    skip_nan: bool,
    all_nan: Option<f64>,
    f: impl Fn(f64, f64) -> f64,
) -> Result<NdArray> {
    let (nlanes, n) = lanes(args)?;
    let size = args.size;
    let values = args.values.data();
    let mut data = Vec::with_capacity(nlanes * size);
    let mut acc = vec![identity; size];
    let mut seen = vec![false; size];
    let mut valid = vec![false; size];
    let mut filled = false;

    for lane in 0..nlanes {
        acc.fill(identity);
        seen.fill(false);
        valid.fill(false);
        for (&g, &v) in args.group_idx.iter().zip(&values[lane * n..(lane + 1) * n]) {
            seen[g] = true;
            if skip_nan && v.is_nan() {
                continue;
            }
            valid[g] = true;
            acc[g] = f(acc[g], v);
        }
        for g in 0..size {
            data.push(if !seen[g] {
                filled = true;
                args.fill_value
            } else if !valid[g] {
                all_nan.unwrap_or(identity)
            } else {
                acc[g]
            });
        }
    }
    finish(args, data, dtype, filled)
}

/// Lane position of the winning element per bucket; the earliest position
/// wins ties. Buckets without a candidate get the fill value.
fn arg_reduce(
    args: &KernelArgs<'_>,
    skip_nan: bool,
    better: impl Fn(f64, f64) -> bool,
) -> Result<NdArray> {
    let (nlanes, n) = lanes(args)?;
    let size = args.size;
    let values = args.values.data();
    let mut data = Vec::with_capacity(nlanes * size);
    let mut best: Vec<Option<(f64, usize)>> = vec![None; size];
    let mut filled = false;

    for lane in 0..nlanes {
        best.fill(None);
        let lane_values = &values[lane * n..(lane + 1) * n];
        for (pos, (&g, &v)) in args.group_idx.iter().zip(lane_values).enumerate() {
            if skip_nan && v.is_nan() {
                continue;
            }
            match best[g] {
                Some((b, _)) if !better(v, b) => {}
                _ => best[g] = Some((v, pos)),
            }
        }
        for b in &best {
            data.push(match b {
                Some((_, pos)) => *pos as f64,
                None => {
                    filled = true;
                    args.fill_value
                }
            });
        }
    }
    finish(args, data, DType::I64, filled)
}

/// First or last element per bucket
fn pick(args: &KernelArgs<'_>, last: bool, skip_nan: bool) -> Result<NdArray> {
    let (nlanes, n) = lanes(args)?;
    let size = args.size;
    let values = args.values.data();
    let mut data = Vec::with_capacity(nlanes * size);
    let mut picked: Vec<Option<f64>> = vec![None; size];
    let mut seen = vec![false; size];
    let mut filled = false;

    for lane in 0..nlanes {
        picked.fill(None);
        seen.fill(false);
        for (&g, &v) in args.group_idx.iter().zip(&values[lane * n..(lane + 1) * n]) {
            seen[g] = true;
            if skip_nan && v.is_nan() {
                continue;
            }
            if last || picked[g].is_none() {
                picked[g] = Some(v);
            }
        }
        for g in 0..size {
            data.push(match picked[g] {
                Some(v) => v,
                None if seen[g] => f64::NAN,
                None => {
                    filled = true;
                    args.fill_value
                }
            });
        }
    }
    let dtype = if data.iter().any(|v| v.is_nan()) {
        promote_for_fill(args.values.dtype(), f64::NAN)
    } else {
        args.values.dtype()
    };
    finish(args, data, dtype, filled)
}

// ============================================================================
// Scans
// ============================================================================

fn scan(op: ScanOp, args: &ScanArgs<'_>) -> Result<NdArray> {
    let values = args.values;
    let n = args.group_idx.len();
    if values.ndim() == 0 || values.last_dim() != n {
        return Err(Error::shape_mismatch(&[n], values.shape()));
    }
    let nlanes = values.numel() / n.max(1);
    let size = args.size;
    if let Some(carry) = args.carry {
        if *carry.shape() != values.shape().with_last(size) {
            return Err(Error::shape_mismatch(
                &values.shape().with_last(size),
                carry.shape(),
            ));
        }
    }
    let skip_nan = op == ScanOp::NanCumSum;
    let mut data = Vec::with_capacity(values.numel());
    let mut running = vec![0.0; size];
    let mut excluded = false;
    for lane in 0..nlanes {
        match args.carry {
            Some(c) => running.copy_from_slice(&c.data()[lane * size..(lane + 1) * size]),
            None => running.fill(0.0),
        }
        for (&g, &v) in args.group_idx.iter().zip(&values.data()[lane * n..(lane + 1) * n]) {
            if g >= size {
                excluded = true;
                data.push(f64::NAN);
                continue;
            }
            if !(skip_nan && v.is_nan()) {
                running[g] += v;
            }
            data.push(running[g]);
        }
    }
    let base = if values.dtype().is_bool() {
        DType::I64
    } else {
        values.dtype()
    };
    let dtype = if excluded || data.iter().any(|v| v.is_nan()) {
        promote_for_fill(base, f64::NAN)
    } else {
        base
    };
    NdArray::with_dtype(data, values.shape().clone(), dtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(op: KernelOp, values: &[f64], idx: &[usize], size: usize, fill: f64) -> Vec<f64> {
        let values = NdArray::from_vec(values.to_vec(), [values.len()]).unwrap();
        let kernel = CpuEngine.compile(op).unwrap();
        kernel(&KernelArgs {
            group_idx: idx,
            values: &values,
            size,
            fill_value: fill,
        })
        .unwrap()
        .into_data()
    }

    #[test]
    fn test_sum_and_fill() {
        let out = run(KernelOp::Sum, &[1.0, 2.0, 3.0], &[0, 2, 0], 3, -7.0);
        assert_eq!(out, vec![4.0, -7.0, 2.0]);
    }

    #[test]
    fn test_nan_skipping() {
        let nan = f64::NAN;
        assert_eq!(run(KernelOp::NanSum, &[nan, 2.0], &[0, 0], 1, 0.0), vec![2.0]);
        assert_eq!(run(KernelOp::NanLen, &[nan, 2.0], &[0, 0], 1, 0.0), vec![1.0]);
        assert_eq!(run(KernelOp::Len, &[nan, 2.0], &[0, 0], 1, 0.0), vec![2.0]);
        assert!(run(KernelOp::Max, &[nan, 2.0], &[0, 0], 1, 0.0)[0].is_nan());
        assert!(run(KernelOp::NanMax, &[nan, nan], &[0, 0], 1, 0.0)[0].is_nan());
    }

    #[test]
    fn test_argmax_first_occurrence() {
        let out = run(KernelOp::ArgMax, &[1.0, 5.0, 5.0, 2.0], &[0, 0, 0, 1], 2, -1.0);
        assert_eq!(out, vec![1.0, 3.0]);
        let out = run(KernelOp::ArgMax, &[1.0, f64::NAN, 9.0], &[0, 0, 0], 1, -1.0);
        assert_eq!(out, vec![1.0]);
        let out = run(KernelOp::NanArgMin, &[1.0, f64::NAN, 0.5], &[0, 0, 0], 2, -1.0);
        assert_eq!(out, vec![2.0, -1.0]);
    }

    #[test]
    fn test_first_last() {
        let v = [f64::NAN, 1.0, 2.0];
        assert!(run(KernelOp::First, &v, &[0, 0, 0], 1, 0.0)[0].is_nan());
        assert_eq!(run(KernelOp::NanFirst, &v, &[0, 0, 0], 1, 0.0), vec![1.0]);
        assert_eq!(run(KernelOp::Last, &v, &[0, 0, 0], 1, 0.0), vec![2.0]);
    }

    #[test]
    fn test_lanes_reduce_independently() {
        let values = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let kernel = CpuEngine.compile(KernelOp::Sum).unwrap();
        let out = kernel(&KernelArgs {
            group_idx: &[0, 0],
            values: &values,
            size: 1,
            fill_value: 0.0,
        })
        .unwrap();
        assert_eq!(out.shape().as_slice(), &[2, 1]);
        assert_eq!(out.data(), &[3.0, 7.0]);
    }

    #[test]
    fn test_bool_sum_accumulates_to_int() {
        let values = NdArray::from_bool(&[true, true, false], [3]).unwrap();
        let kernel = CpuEngine.compile(KernelOp::Sum).unwrap();
        let out = kernel(&KernelArgs {
            group_idx: &[0, 0, 0],
            values: &values,
            size: 1,
            fill_value: 0.0,
        })
        .unwrap();
        assert_eq!(out.dtype(), DType::I64);
        assert_eq!(out.data(), &[2.0]);
    }

    #[test]
    fn test_cumsum_with_carry_and_exclusions() {
        let values = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], [4]).unwrap();
        let carry = NdArray::from_vec(vec![10.0, 0.0], [2]).unwrap();
        let kernel = CpuEngine.compile_scan(ScanOp::CumSum).unwrap();
        let out = kernel(&ScanArgs {
            group_idx: &[0, 1, 2, 0],
            values: &values,
            size: 2,
            carry: Some(&carry),
        })
        .unwrap();
        let d = out.data();
        assert_eq!(d[0], 11.0);
        assert_eq!(d[1], 2.0);
        assert!(d[2].is_nan());
        assert_eq!(d[3], 15.0);
    }
}
