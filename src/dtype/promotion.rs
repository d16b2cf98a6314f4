//! Type promotion rules for combining results and fill values

use super::DType;

/// Promote two dtypes to a common dtype
///
/// Follows NumPy-like promotion rules:
/// - Floats always win over integers
/// - Larger types win over smaller types
/// - Bool loses to everything
pub fn promote(lhs: DType, rhs: DType) -> DType {
    use DType::*;

    if lhs == rhs {
        return lhs;
    }

    let priority = |dt: DType| -> u8 {
        match dt {
            F64 => 100,
            F32 => 90,
            I64 => 65,
            I32 => 55,
            Bool => 25,
        }
    };

    // F32 mixed with 64-bit integers needs F64 to hold them
    if matches!((lhs, rhs), (F32, I64) | (I64, F32)) {
        return F64;
    }

    if priority(lhs) >= priority(rhs) {
        lhs
    } else {
        rhs
    }
}

/// Dtype able to hold both the values of `dtype` and `fill_value`
///
/// Writing NaN into an integer or boolean array promotes it to `F64`;
/// writing a non-integral value into an integer array does the same.
pub fn promote_for_fill(dtype: DType, fill_value: f64) -> DType {
    if dtype.is_float() {
        return dtype;
    }
    if fill_value.is_nan() || fill_value.is_infinite() || fill_value.fract() != 0.0 {
        return DType::F64;
    }
    if dtype.is_bool() && fill_value != 0.0 && fill_value != 1.0 {
        return DType::I64;
    }
    dtype
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote() {
        assert_eq!(promote(DType::I32, DType::I64), DType::I64);
        assert_eq!(promote(DType::Bool, DType::I32), DType::I32);
        assert_eq!(promote(DType::F32, DType::I64), DType::F64);
        assert_eq!(promote(DType::F32, DType::I32), DType::F32);
    }

    #[test]
    fn test_promote_for_fill() {
        assert_eq!(promote_for_fill(DType::I64, f64::NAN), DType::F64);
        assert_eq!(promote_for_fill(DType::I64, 0.0), DType::I64);
        assert_eq!(promote_for_fill(DType::Bool, 1.0), DType::Bool);
        assert_eq!(promote_for_fill(DType::Bool, -123.0), DType::I64);
        assert_eq!(promote_for_fill(DType::F32, f64::NAN), DType::F32);
    }
}
