//! Built-in reductions

use super::descriptor::{Aggregation, DTypePolicy, Finalize, ReductionKind};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::KernelOp;
use std::fmt;
use std::str::FromStr;

/// Every built-in grouped reduction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    /// Sum
    Sum,
    /// Sum skipping NaN
    NanSum,
    /// Product
    Prod,
    /// Product skipping NaN
    NanProd,
    /// Number of non-NaN members
    Count,
    /// Arithmetic mean
    Mean,
    /// Mean skipping NaN
    NanMean,
    /// Variance
    Var,
    /// Variance skipping NaN
    NanVar,
    /// Standard deviation
    Std,
    /// Standard deviation skipping NaN
    NanStd,
    /// Maximum
    Max,
    /// Maximum skipping NaN
    NanMax,
    /// Minimum
    Min,
    /// Minimum skipping NaN
    NanMin,
    /// Position of the maximum along the reduced axes
    ArgMax,
    /// Position of the maximum, skipping NaN
    NanArgMax,
    /// Position of the minimum along the reduced axes
    ArgMin,
    /// Position of the minimum, skipping NaN
    NanArgMin,
    /// Any member true
    Any,
    /// All members true
    All,
    /// First member
    First,
    /// Last member
    Last,
    /// First non-NaN member
    NanFirst,
    /// Last non-NaN member
    NanLast,
}

impl AggregationKind {
    /// All built-in reductions
    pub const ALL: [Self; 25] = [
        Self::Sum,
        Self::NanSum,
        Self::Prod,
        Self::NanProd,
        Self::Count,
        Self::Mean,
        Self::NanMean,
        Self::Var,
        Self::NanVar,
        Self::Std,
        Self::NanStd,
        Self::Max,
        Self::NanMax,
        Self::Min,
        Self::NanMin,
        Self::ArgMax,
        Self::NanArgMax,
        Self::ArgMin,
        Self::NanArgMin,
        Self::Any,
        Self::All,
        Self::First,
        Self::Last,
        Self::NanFirst,
        Self::NanLast,
    ];

    /// Registry name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::NanSum => "nansum",
            Self::Prod => "prod",
            Self::NanProd => "nanprod",
            Self::Count => "count",
            Self::Mean => "mean",
            Self::NanMean => "nanmean",
            Self::Var => "var",
            Self::NanVar => "nanvar",
            Self::Std => "std",
            Self::NanStd => "nanstd",
            Self::Max => "max",
            Self::NanMax => "nanmax",
            Self::Min => "min",
            Self::NanMin => "nanmin",
            Self::ArgMax => "argmax",
            Self::NanArgMax => "nanargmax",
            Self::ArgMin => "argmin",
            Self::NanArgMin => "nanargmin",
            Self::Any => "any",
            Self::All => "all",
            Self::First => "first",
            Self::Last => "last",
            Self::NanFirst => "nanfirst",
            Self::NanLast => "nanlast",
        }
    }

    /// Descriptor of this reduction
    pub fn aggregation(self) -> Aggregation {
        use AggregationKind as K;
        use KernelOp as Op;

        let nan = f64::NAN;
        let (neg_inf, pos_inf) = (f64::NEG_INFINITY, f64::INFINITY);
        match self {
            K::Sum | K::NanSum => {
                let op = if self == K::Sum { Op::Sum } else { Op::NanSum };
                simple(self, op, op, 0.0, 0.0, DTypePolicy::Accumulate)
            }
            K::Prod | K::NanProd => {
                let op = if self == K::Prod { Op::Prod } else { Op::NanProd };
                simple(self, op, op, 1.0, 1.0, DTypePolicy::Accumulate)
            }
            K::Count => simple(
                self,
                Op::NanLen,
                Op::Sum,
                0.0,
                0.0,
                DTypePolicy::Fixed(DType::I64),
            ),
            K::Mean | K::NanMean => {
                let sum = if self == K::Mean { Op::Sum } else { Op::NanSum };
                descriptor(
                    self,
                    vec![sum, Op::NanLen],
                    vec![Op::Sum, Op::Sum],
                    Finalize::Mean,
                    vec![0.0, 0.0],
                    nan,
                    DTypePolicy::Float,
                )
            }
            K::Var | K::NanVar | K::Std | K::NanStd => {
                let skip_nan = matches!(self, K::NanVar | K::NanStd);
                let (sq, sum) = if skip_nan {
                    (Op::NanSumOfSquares, Op::NanSum)
                } else {
                    (Op::SumOfSquares, Op::Sum)
                };
                let finalize = if matches!(self, K::Std | K::NanStd) {
                    Finalize::Std
                } else {
                    Finalize::Var
                };
                descriptor(
                    self,
                    vec![sq, sum, Op::NanLen],
                    vec![Op::Sum, Op::Sum, Op::Sum],
                    finalize,
                    vec![0.0, 0.0, 0.0],
                    nan,
                    DTypePolicy::Float,
                )
            }
            K::Max => simple(self, Op::Max, Op::Max, neg_inf, nan, DTypePolicy::Input),
            K::NanMax => simple(self, Op::NanMax, Op::NanMax, neg_inf, nan, DTypePolicy::Input),
            K::Min => simple(self, Op::Min, Op::Min, pos_inf, nan, DTypePolicy::Input),
            K::NanMin => simple(self, Op::NanMin, Op::NanMin, pos_inf, nan, DTypePolicy::Input),
            K::ArgMax | K::NanArgMax | K::ArgMin | K::NanArgMin => {
                let (value, position, fill) = match self {
                    K::ArgMax => (Op::Max, Op::ArgMax, neg_inf),
                    K::NanArgMax => (Op::NanMax, Op::NanArgMax, neg_inf),
                    K::ArgMin => (Op::Min, Op::ArgMin, pos_inf),
                    _ => (Op::NanMin, Op::NanArgMin, pos_inf),
                };
                let mut agg = descriptor(
                    self,
                    vec![value, position],
                    vec![value, position],
                    Finalize::ArgIndex,
                    vec![fill, -1.0],
                    -1.0,
                    DTypePolicy::Fixed(DType::I64),
                );
                agg.kind = ReductionKind::ArgReduce;
                agg
            }
            K::Any => simple(self, Op::Any, Op::Any, 0.0, 0.0, DTypePolicy::Fixed(DType::Bool)),
            K::All => simple(self, Op::All, Op::All, 1.0, 1.0, DTypePolicy::Fixed(DType::Bool)),
            // absent groups hold NaN, so combining must skip it
            K::First | K::NanFirst => {
                let op = if self == K::First { Op::First } else { Op::NanFirst };
                simple(self, op, Op::NanFirst, nan, nan, DTypePolicy::Input).order_dependent()
            }
            K::Last | K::NanLast => {
                let op = if self == K::Last { Op::Last } else { Op::NanLast };
                simple(self, op, Op::NanLast, nan, nan, DTypePolicy::Input).order_dependent()
            }
        }
    }
}

fn simple(
    kind: AggregationKind,
    chunk: KernelOp,
    combine: KernelOp,
    fill_value: f64,
    final_fill_value: f64,
    dtype_policy: DTypePolicy,
) -> Aggregation {
    descriptor(
        kind,
        vec![chunk],
        vec![combine],
        Finalize::Identity,
        vec![fill_value],
        final_fill_value,
        dtype_policy,
    )
}

fn descriptor(
    kind: AggregationKind,
    chunk: Vec<KernelOp>,
    combine: Vec<KernelOp>,
    finalize: Finalize,
    fill_values: Vec<f64>,
    final_fill_value: f64,
    dtype_policy: DTypePolicy,
) -> Aggregation {
    Aggregation {
        name: kind.name().to_owned(),
        kind: ReductionKind::Reduce,
        chunk,
        combine,
        finalize,
        fill_values,
        final_fill_value,
        dtype_policy,
        order_dependent: false,
        mask_counts: false,
    }
}

impl FromStr for AggregationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::configuration(format!("reduction '{s}' not implemented")))
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_round_trips_names() {
        for kind in AggregationKind::ALL {
            assert_eq!(kind.name().parse::<AggregationKind>().unwrap(), kind);
            kind.aggregation().validate().unwrap();
        }
        assert!(matches!(
            "median".parse::<AggregationKind>(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_dtype_policies() {
        let count = AggregationKind::Count.aggregation();
        assert_eq!(count.output_dtype(DType::F32), DType::I64);
        let mean = AggregationKind::Mean.aggregation();
        assert_eq!(mean.output_dtype(DType::I32), DType::F64);
        let sum = AggregationKind::Sum.aggregation();
        assert_eq!(sum.output_dtype(DType::Bool), DType::I64);
        assert_eq!(sum.output_dtype(DType::I32), DType::I32);
    }

    #[test]
    fn test_argmax_fill_values_resolve_for_ints() {
        let agg = AggregationKind::ArgMax.aggregation();
        assert!(agg.is_arg_reduction());
        assert_eq!(agg.fill_values_for(DType::I64), vec![i64::MIN as f64, -1.0]);
        assert!(AggregationKind::First.aggregation().order_dependent);
    }
}
