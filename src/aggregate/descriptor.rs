//! Aggregation descriptors

use crate::array::NdArray;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::KernelOp;
use std::fmt;
use std::sync::Arc;

/// Whether intermediates carry values only, or value/position pairs
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReductionKind {
    /// Ordinary reduction
    Reduce,
    /// Arg-reduction: intermediate 0 holds the compared values and
    /// intermediate 1 the winning positions, combined together
    ArgReduce,
}

/// Output dtype rule of an aggregation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DTypePolicy {
    /// Same as the input
    Input,
    /// Same as the input, except booleans accumulate into `I64`
    Accumulate,
    /// Floating point (`F32` input stays `F32`)
    Float,
    /// Always this dtype
    Fixed(DType),
}

impl DTypePolicy {
    /// Output dtype for an input of `input`
    pub fn output_dtype(self, input: DType) -> DType {
        match self {
            Self::Input => input,
            Self::Accumulate if input.is_bool() => DType::I64,
            Self::Accumulate => input,
            Self::Float => input.float_result(),
            Self::Fixed(dt) => dt,
        }
    }
}

/// Extra parameters of the finalize step
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinalizeKwargs {
    /// Delta degrees of freedom of `var` and `std`
    pub ddof: usize,
}

impl FinalizeKwargs {
    /// Set delta degrees of freedom
    pub fn ddof(mut self, ddof: usize) -> Self {
        self.ddof = ddof;
        self
    }
}

/// Signature of a caller-supplied finalize function
pub type FinalizeFn = dyn Fn(&[NdArray], &FinalizeKwargs) -> Result<NdArray> + Send + Sync;

/// Conversion of combined intermediates into the user-facing statistic
#[derive(Clone)]
pub enum Finalize {
    /// The single intermediate is the result
    Identity,
    /// `sum / count`
    Mean,
    /// `(sum_sq - sum^2 / n) / (n - ddof)`
    Var,
    /// Square root of [`Finalize::Var`]
    Std,
    /// The position intermediate of an arg-reduction
    ArgIndex,
    /// Caller-supplied function
    Custom(Arc<FinalizeFn>),
}

impl Finalize {
    /// Number of intermediates consumed, when fixed
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::Identity => Some(1),
            Self::Mean | Self::ArgIndex => Some(2),
            Self::Var | Self::Std => Some(3),
            Self::Custom(_) => None,
        }
    }

    /// Apply to combined intermediates
    pub fn apply(&self, intermediates: &[NdArray], kwargs: &FinalizeKwargs) -> Result<NdArray> {
        if let Some(arity) = self.arity() {
            if intermediates.len() != arity {
                return Err(Error::invariant(format!(
                    "finalize expects {arity} intermediates, got {}",
                    intermediates.len()
                )));
            }
        }
        match self {
            Self::Identity => Ok(intermediates[0].clone()),
            Self::ArgIndex => Ok(intermediates[1].clone()),
            Self::Mean => {
                let (sum, count) = (&intermediates[0], &intermediates[1]);
                zip_map(sum, count, sum.dtype().float_result(), |s, n| s / n)
            }
            Self::Var | Self::Std => {
                let var = variance(intermediates, kwargs.ddof)?;
                if matches!(self, Self::Std) {
                    Ok(var.map(var.dtype(), f64::sqrt))
                } else {
                    Ok(var)
                }
            }
            Self::Custom(f) => f(intermediates, kwargs),
        }
    }
}

impl fmt::Debug for Finalize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Mean => f.write_str("Mean"),
            Self::Var => f.write_str("Var"),
            Self::Std => f.write_str("Std"),
            Self::ArgIndex => f.write_str("ArgIndex"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn zip_map(a: &NdArray, b: &NdArray, dtype: DType, f: impl Fn(f64, f64) -> f64) -> Result<NdArray> {
    if a.shape() != b.shape() {
        return Err(Error::shape_mismatch(a.shape(), b.shape()));
    }
    let data = a.data().iter().zip(b.data()).map(|(&x, &y)| f(x, y)).collect();
    NdArray::with_dtype(data, a.shape().clone(), dtype)
}

fn variance(intermediates: &[NdArray], ddof: usize) -> Result<NdArray> {
    let (sum_sq, sum, count) = (&intermediates[0], &intermediates[1], &intermediates[2]);
    for other in [sum, count] {
        if other.shape() != sum_sq.shape() {
            return Err(Error::shape_mismatch(sum_sq.shape(), other.shape()));
        }
    }
    let data = sum_sq
        .data()
        .iter()
        .zip(sum.data())
        .zip(count.data())
        .map(|((&sq, &s), &n)| {
            let dof = n - ddof as f64;
            if dof <= 0.0 {
                return f64::NAN;
            }
            let var = (sq - s * s / n) / dof;
            // rounding can leave a tiny negative value
            if var < 0.0 { 0.0 } else { var }
        })
        .collect();
    NdArray::with_dtype(data, sum_sq.shape().clone(), sum.dtype().float_result())
}

/// Declarative description of one grouped reduction
///
/// An aggregation runs `chunk` ops on every block, merges per-block
/// intermediates with `combine` ops, and turns the merged intermediates
/// into the statistic with `finalize`. `fill_values[i]` is the identity
/// written for groups absent from a partial result in intermediate `i`;
/// `-inf`/`+inf` resolve to the dtype's extreme values for integer input.
///
/// # Example
///
/// ```
/// use blockby::aggregate::{Aggregation, DTypePolicy, Finalize, FinalizeKwargs};
/// use blockby::array::NdArray;
/// use blockby::runtime::KernelOp;
/// use std::sync::Arc;
///
/// // range = max - min
/// let range = Aggregation::new(
///     "range",
///     vec![KernelOp::Max, KernelOp::Min],
///     vec![KernelOp::Max, KernelOp::Min],
///     Finalize::Custom(Arc::new(|xs: &[NdArray], _: &FinalizeKwargs| {
///         let data = xs[0].data().iter().zip(xs[1].data()).map(|(a, b)| a - b).collect();
///         NdArray::from_vec(data, xs[0].shape().clone())
///     })),
///     vec![f64::NEG_INFINITY, f64::INFINITY],
///     f64::NAN,
///     DTypePolicy::Input,
/// )
/// .unwrap();
/// assert_eq!(range.name, "range");
/// ```
#[derive(Clone, Debug)]
pub struct Aggregation {
    /// Name of the statistic
    pub name: String,
    /// Reduce or arg-reduce
    pub kind: ReductionKind,
    /// Per-block ops, one per intermediate
    pub chunk: Vec<KernelOp>,
    /// Combine ops, one per intermediate
    pub combine: Vec<KernelOp>,
    /// Intermediates to statistic
    pub finalize: Finalize,
    /// Identity of each intermediate for absent groups
    pub fill_values: Vec<f64>,
    /// Value of groups without any member, unless the caller supplies one
    pub final_fill_value: f64,
    /// Output dtype rule
    pub dtype_policy: DTypePolicy,
    /// Result depends on element order (first/last)
    pub order_dependent: bool,
    /// Whether a trailing group-size intermediate is tracked for masking
    pub(crate) mask_counts: bool,
}

impl Aggregation {
    /// Build and validate a custom reduction
    pub fn new(
        name: impl Into<String>,
        chunk: Vec<KernelOp>,
        combine: Vec<KernelOp>,
        finalize: Finalize,
        fill_values: Vec<f64>,
        final_fill_value: f64,
        dtype_policy: DTypePolicy,
    ) -> Result<Self> {
        let agg = Self {
            name: name.into(),
            kind: ReductionKind::Reduce,
            chunk,
            combine,
            finalize,
            fill_values,
            final_fill_value,
            dtype_policy,
            order_dependent: false,
            mask_counts: false,
        };
        agg.validate()?;
        Ok(agg)
    }

    /// Mark as an arg-reduction
    pub fn arg_reduction(mut self) -> Result<Self> {
        self.kind = ReductionKind::ArgReduce;
        self.validate()?;
        Ok(self)
    }

    /// Mark as order dependent
    pub fn order_dependent(mut self) -> Self {
        self.order_dependent = true;
        self
    }

    /// Check the structural invariants of the descriptor
    pub fn validate(&self) -> Result<()> {
        let n = self.chunk.len();
        if n == 0 {
            return Err(Error::configuration(format!(
                "aggregation '{}' has no chunk ops",
                self.name
            )));
        }
        if self.combine.len() != n || self.fill_values.len() != n {
            return Err(Error::configuration(format!(
                "aggregation '{}': {} chunk ops, {} combine ops, {} fill values",
                self.name,
                n,
                self.combine.len(),
                self.fill_values.len()
            )));
        }
        if let Some(arity) = self.finalize.arity() {
            if arity != self.nintermediates() {
                return Err(Error::configuration(format!(
                    "aggregation '{}': finalize consumes {arity} intermediates, {} produced",
                    self.name,
                    self.nintermediates()
                )));
            }
        }
        if self.kind == ReductionKind::ArgReduce
            && (n < 2 || !self.chunk[1].is_arg() || !self.combine[1].is_arg())
        {
            return Err(Error::configuration(format!(
                "arg-reduction '{}' needs a value op followed by a position op",
                self.name
            )));
        }
        Ok(())
    }

    /// Intermediates handed to finalize (the masking count excluded)
    pub fn nintermediates(&self) -> usize {
        self.chunk.len() - usize::from(self.mask_counts)
    }

    /// True for arg-reductions
    pub fn is_arg_reduction(&self) -> bool {
        self.kind == ReductionKind::ArgReduce
    }

    /// Track the number of members of every group so that groups without
    /// members can be set to the fill value after finalizing.
    pub fn with_count(mut self) -> Self {
        if !self.mask_counts {
            self.chunk.push(KernelOp::Len);
            self.combine.push(KernelOp::Sum);
            self.fill_values.push(0.0);
            self.mask_counts = true;
        }
        self
    }

    /// Fill values resolved for intermediates computed from `dtype` input
    pub fn fill_values_for(&self, dtype: DType) -> Vec<f64> {
        self.fill_values
            .iter()
            .map(|&v| resolve_fill_value(dtype, v))
            .collect()
    }

    /// Output dtype for an input of `input`
    pub fn output_dtype(&self, input: DType) -> DType {
        self.dtype_policy.output_dtype(input)
    }
}

/// Map infinite fill values onto the extreme values of integer dtypes
pub fn resolve_fill_value(dtype: DType, value: f64) -> f64 {
    if dtype.is_float() {
        return value;
    }
    if value == f64::NEG_INFINITY {
        dtype.min_value()
    } else if value == f64::INFINITY {
        dtype.max_value()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_lengths() {
        let bad = Aggregation::new(
            "bad",
            vec![KernelOp::Sum, KernelOp::NanLen],
            vec![KernelOp::Sum],
            Finalize::Mean,
            vec![0.0, 0.0],
            f64::NAN,
            DTypePolicy::Float,
        );
        assert!(matches!(bad, Err(Error::Configuration { .. })));

        let arity = Aggregation::new(
            "arity",
            vec![KernelOp::Sum],
            vec![KernelOp::Sum],
            Finalize::Mean,
            vec![0.0],
            f64::NAN,
            DTypePolicy::Float,
        );
        assert!(arity.is_err());
    }

    #[test]
    fn test_with_count_keeps_arity() {
        let agg = Aggregation::new(
            "sum",
            vec![KernelOp::Sum],
            vec![KernelOp::Sum],
            Finalize::Identity,
            vec![0.0],
            0.0,
            DTypePolicy::Accumulate,
        )
        .unwrap()
        .with_count();
        assert_eq!(agg.chunk.len(), 2);
        assert_eq!(agg.nintermediates(), 1);
        assert!(agg.validate().is_ok());
    }

    #[test]
    fn test_variance_finalize() {
        // values 1, 2, 3, 4 -> sum_sq 30, sum 10, n 4
        let xs = [
            NdArray::from_vec(vec![30.0], [1]).unwrap(),
            NdArray::from_vec(vec![10.0], [1]).unwrap(),
            NdArray::from_vec(vec![4.0], [1]).unwrap(),
        ];
        let var = Finalize::Var.apply(&xs, &FinalizeKwargs::default()).unwrap();
        assert!((var.data()[0] - 1.25).abs() < 1e-12);
        let std = Finalize::Std
            .apply(&xs, &FinalizeKwargs::default().ddof(1))
            .unwrap();
        assert!((std.data()[0] - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_resolve_fill_value() {
        assert_eq!(resolve_fill_value(DType::I32, f64::NEG_INFINITY), i32::MIN as f64);
        assert_eq!(resolve_fill_value(DType::F64, f64::INFINITY), f64::INFINITY);
        assert_eq!(resolve_fill_value(DType::I64, 0.0), 0.0);
    }
}
