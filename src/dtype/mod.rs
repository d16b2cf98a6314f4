//! Data type system for blockby arrays
//!
//! Array elements are always held as `f64`. `DType` records the *logical*
//! element type so that reductions can follow the dtype policy of each
//! aggregation (sums of integers stay integers, means become floats, counts
//! are `I64`, boolean reductions are `Bool`) and so that fill values such as
//! `-inf` can be mapped to the nearest representable sentinel.

mod promotion;

pub use promotion::{promote, promote_for_fill};

use std::fmt;

// ============================================================================
// DType Enum
// ============================================================================

/// Logical element types supported by blockby arrays
///
/// Integers up to 2^53 in magnitude are represented exactly in the `f64`
/// storage, which covers every group index and arg-reduction position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DType {
    /// 64-bit floating point
    F64,
    /// 32-bit floating point; values are rounded through `f32` on construction
    F32,
    /// 64-bit signed integer
    I64,
    /// 32-bit signed integer
    I32,
    /// Boolean, stored as 0.0 / 1.0
    Bool,
}

impl DType {
    /// Returns true if this is a floating point type
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F64 | Self::F32)
    }

    /// Returns true if this is an integer type
    #[inline]
    pub const fn is_int(self) -> bool {
        matches!(self, Self::I64 | Self::I32)
    }

    /// Returns true if this is a boolean type
    #[inline]
    pub const fn is_bool(self) -> bool {
        matches!(self, Self::Bool)
    }

    /// Short name for display (e.g., "f32", "i64")
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::I64 => "i64",
            Self::I32 => "i32",
            Self::Bool => "bool",
        }
    }

    /// Smallest value representable by this dtype (as f64)
    ///
    /// Floats report `-inf`, which is what max-style reductions use as identity.
    pub fn min_value(self) -> f64 {
        match self {
            Self::F64 | Self::F32 => f64::NEG_INFINITY,
            Self::I64 => i64::MIN as f64,
            Self::I32 => i32::MIN as f64,
            Self::Bool => 0.0,
        }
    }

    /// Largest value representable by this dtype (as f64)
    pub fn max_value(self) -> f64 {
        match self {
            Self::F64 | Self::F32 => f64::INFINITY,
            Self::I64 => i64::MAX as f64,
            Self::I32 => i32::MAX as f64,
            Self::Bool => 1.0,
        }
    }

    /// Round a value to what this dtype can hold.
    ///
    /// NaN is kept as NaN for every dtype; callers promote integer arrays to
    /// `F64` before writing NaN into them.
    #[inline]
    pub fn cast(self, value: f64) -> f64 {
        if value.is_nan() {
            return value;
        }
        match self {
            Self::F64 => value,
            Self::F32 => value as f32 as f64,
            Self::I64 => (value as i64) as f64,
            Self::I32 => (value as i32) as f64,
            Self::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Float dtype used for statistics computed from this dtype (mean, var, ...)
    #[inline]
    pub const fn float_result(self) -> Self {
        match self {
            Self::F32 => Self::F32,
            _ => Self::F64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}
