//! Turning combined intermediates into the final statistic

use super::{FinalResult, PartialResult, ReindexAxis, reindex};
use crate::aggregate::{Aggregation, FinalizeKwargs};
use crate::array::NdArray;
use crate::dtype::{DType, promote_for_fill};
use crate::error::{Error, Result};
use crate::labels::GroupIdentity;

/// Options of the final stage
#[derive(Clone, Copy, Debug)]
pub struct FinalizeRequest<'a> {
    /// Value of groups without members; the aggregation's own fill otherwise
    pub fill_value: Option<f64>,
    /// Reindex the result onto these identities
    pub expected: Option<&'a [GroupIdentity]>,
    /// Parameters of the finalize function
    pub kwargs: &'a FinalizeKwargs,
    /// Output dtype
    pub dtype: DType,
}

/// Finalize a fully combined partial result.
///
/// When the aggregation tracks group sizes, groups with no members are set
/// to the fill value after finalizing, promoting the dtype if needed.
pub fn finalize(
    partial: PartialResult,
    agg: &Aggregation,
    request: &FinalizeRequest<'_>,
) -> Result<FinalResult> {
    let (groups, mut intermediates) = partial.into_parts();
    let counts = if agg.mask_counts {
        intermediates.pop()
    } else {
        None
    };
    if intermediates.len() != agg.nintermediates() {
        return Err(Error::invariant(format!(
            "'{}' finalizes {} intermediates, got {}",
            agg.name,
            agg.nintermediates(),
            intermediates.len()
        )));
    }

    let result = agg.finalize.apply(&intermediates, request.kwargs)?;
    let mut result = cast_result(result, request.dtype);
    let fill = request.fill_value.unwrap_or(agg.final_fill_value);

    if let Some(counts) = counts {
        if counts.shape() != result.shape() {
            return Err(Error::shape_mismatch(result.shape(), counts.shape()));
        }
        let empty: Vec<bool> = counts.data().iter().map(|&n| n == 0.0).collect();
        result = result.fill_where(&empty, fill)?;
    }

    match request.expected {
        Some(expected) if expected != groups.as_slice() => {
            let array = reindex(&result, &groups, expected, Some(fill), ReindexAxis::Last)?;
            Ok(FinalResult {
                groups: expected.to_vec(),
                array,
            })
        }
        _ => Ok(FinalResult {
            groups,
            array: result,
        }),
    }
}

/// Cast to `dtype`, keeping a float dtype when NaN is present
fn cast_result(array: NdArray, dtype: DType) -> NdArray {
    if !dtype.is_float() && array.data().iter().any(|v| v.is_nan()) {
        array.astype(promote_for_fill(dtype, f64::NAN))
    } else {
        array.astype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationKind;

    fn groups(g: &[i64]) -> Vec<GroupIdentity> {
        g.iter().map(|&v| v.into()).collect()
    }

    fn request<'a>(kwargs: &'a FinalizeKwargs, dtype: DType) -> FinalizeRequest<'a> {
        FinalizeRequest {
            fill_value: None,
            expected: None,
            kwargs,
            dtype,
        }
    }

    #[test]
    fn test_mean_with_empty_group_is_nan() {
        let agg = AggregationKind::Mean.aggregation().with_count();
        let sums = NdArray::from_vec(vec![6.0, 0.0], [2]).unwrap();
        let counts = NdArray::from_i64(&[3, 0], [2]).unwrap();
        let partial =
            PartialResult::new(groups(&[0, 1]), vec![sums, counts.clone(), counts]).unwrap();
        let kwargs = FinalizeKwargs::default();
        let out = finalize(partial, &agg, &request(&kwargs, DType::F64)).unwrap();
        assert_eq!(out.array.data()[0], 2.0);
        assert!(out.array.data()[1].is_nan());
    }

    #[test]
    fn test_user_fill_promotes_int_sum() {
        let agg = AggregationKind::Sum.aggregation().with_count();
        let sums = NdArray::from_i64(&[4, 0], [2]).unwrap();
        let counts = NdArray::from_i64(&[2, 0], [2]).unwrap();
        let partial = PartialResult::new(groups(&[0, 1]), vec![sums, counts]).unwrap();
        let kwargs = FinalizeKwargs::default();
        let req = FinalizeRequest {
            fill_value: Some(f64::NAN),
            ..request(&kwargs, DType::I64)
        };
        let out = finalize(partial, &agg, &req).unwrap();
        assert_eq!(out.array.dtype(), DType::F64);
        assert_eq!(out.array.data()[0], 4.0);
        assert!(out.array.data()[1].is_nan());
    }

    #[test]
    fn test_reindex_onto_expected() {
        let agg = AggregationKind::Sum.aggregation();
        let sums = NdArray::from_vec(vec![1.0, 2.0], [2]).unwrap();
        let partial = PartialResult::new(groups(&[1, 2]), vec![sums]).unwrap();
        let kwargs = FinalizeKwargs::default();
        let expected = groups(&[2, 3, 1]);
        let req = FinalizeRequest {
            expected: Some(&expected),
            ..request(&kwargs, DType::F64)
        };
        let out = finalize(partial, &agg, &req).unwrap();
        assert_eq!(out.groups, expected);
        assert_eq!(out.array.data(), &[2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_wrong_number_of_intermediates() {
        let agg = AggregationKind::Mean.aggregation();
        let sums = NdArray::from_vec(vec![1.0], [1]).unwrap();
        let partial = PartialResult::new(groups(&[0]), vec![sums]).unwrap();
        let kwargs = FinalizeKwargs::default();
        let err = finalize(partial, &agg, &request(&kwargs, DType::F64));
        assert!(matches!(err, Err(Error::Invariant(_))));
    }
}
