//! Primitive grouped operations an engine executes

use std::fmt;

/// Grouped reduction primitives
///
/// Each op reduces the last axis of a value array into `size` buckets given
/// one bucket index per element. `Nan*` variants skip NaN values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KernelOp {
    /// Sum of elements
    Sum,
    /// Sum of non-NaN elements
    NanSum,
    /// Product of elements
    Prod,
    /// Product of non-NaN elements
    NanProd,
    /// Number of elements (NaN included)
    Len,
    /// Number of non-NaN elements
    NanLen,
    /// Sum of squared elements
    SumOfSquares,
    /// Sum of squared non-NaN elements
    NanSumOfSquares,
    /// Maximum element; NaN propagates
    Max,
    /// Maximum non-NaN element
    NanMax,
    /// Minimum element; NaN propagates
    Min,
    /// Minimum non-NaN element
    NanMin,
    /// Lane position of the maximum; the first NaN wins
    ArgMax,
    /// Lane position of the maximum non-NaN element
    NanArgMax,
    /// Lane position of the minimum; the first NaN wins
    ArgMin,
    /// Lane position of the minimum non-NaN element
    NanArgMin,
    /// Logical OR (NaN counts as true)
    Any,
    /// Logical AND (NaN counts as true)
    All,
    /// First element
    First,
    /// Last element
    Last,
    /// First non-NaN element
    NanFirst,
    /// Last non-NaN element
    NanLast,
}

impl KernelOp {
    /// Canonical op name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::NanSum => "nansum",
            Self::Prod => "prod",
            Self::NanProd => "nanprod",
            Self::Len => "len",
            Self::NanLen => "nanlen",
            Self::SumOfSquares => "sum_of_squares",
            Self::NanSumOfSquares => "nansum_of_squares",
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

    /// True for ops returning lane positions instead of values
    pub const fn is_arg(self) -> bool {
        matches!(
            self,
            Self::ArgMax | Self::NanArgMax | Self::ArgMin | Self::NanArgMin
        )
    }
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Grouped scan primitives
///
/// A scan keeps the shape of its input: every element is replaced by the
/// running accumulation over the earlier elements of its own group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScanOp {
    /// Running sum; NaN propagates within its group
    CumSum,
    /// Running sum of non-NaN elements
    NanCumSum,
}

impl ScanOp {
    /// Canonical op name
    pub const fn name(self) -> &'static str {
        match self {
            Self::CumSum => "cumsum",
            Self::NanCumSum => "nancumsum",
        }
    }

    /// Reduction producing the total a block hands to the next block
    pub const fn carry_op(self) -> KernelOp {
        match self {
            Self::CumSum => KernelOp::Sum,
            Self::NanCumSum => KernelOp::NanSum,
        }
    }
}

impl std::str::FromStr for ScanOp {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cumsum" => Ok(Self::CumSum),
            "nancumsum" => Ok(Self::NanCumSum),
            other => Err(crate::error::Error::configuration(format!(
                "scan '{other}' not implemented"
            ))),
        }
    }
}

impl fmt::Display for ScanOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
