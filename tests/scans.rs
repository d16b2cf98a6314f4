//! Integration tests for grouped scans

mod common;

use blockby::prelude::*;
use common::{array, assert_allclose_f64, chunked, ints, reducer};

fn scanned(out: Values) -> NdArray {
    out.to_array().unwrap()
}

#[test]
fn test_cumsum_dense_and_chunked() {
    let gb = reducer();
    let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let by = ByInput::from(ints(&[0, 1, 0, 0, 1, 1]));
    let expected = [1.0, 2.0, 4.0, 8.0, 7.0, 13.0];

    let dense = gb.scan(array(&data, &[6]), &by, "cumsum", -1).unwrap();
    assert!(matches!(dense, Values::Dense(_)));
    assert_eq!(scanned(dense).data(), &expected);

    for chunks in [vec![2, 3, 1], vec![1; 6], vec![6]] {
        let out = gb
            .scan(chunked(&data, &[6], vec![chunks.clone()]), &by, "cumsum", 0)
            .unwrap();
        let Values::Chunked(out) = out else {
            panic!("chunked input gave dense output");
        };
        assert_eq!(out.chunks().axis(0), chunks.as_slice());
        assert_eq!(out.to_array().unwrap().data(), &expected);
    }
}

#[test]
fn test_nan_handling() {
    let gb = reducer();
    let data = [1.0, f64::NAN, 2.0, 3.0];
    let by = ByInput::from(ints(&[0, 0, 0, 1]));
    for chunks in [vec![4], vec![2, 2], vec![1, 3]] {
        let values = || chunked(&data, &[4], vec![chunks.clone()]);
        let plain = scanned(gb.scan(values(), &by, "cumsum", -1).unwrap());
        assert_allclose_f64(plain.data(), &[1.0, f64::NAN, f64::NAN, 3.0], 0.0, 0.0, "cumsum");
        let skipped = scanned(gb.scan(values(), &by, "nancumsum", -1).unwrap());
        assert_eq!(skipped.data(), &[1.0, 1.0, 3.0, 3.0]);
    }
}

#[test]
fn test_missing_labels_are_not_scanned() {
    let gb = reducer();
    let by = ByInput::from(LabelArray::from_floats(&[0.0, f64::NAN, 0.0]));
    let out = scanned(gb.scan(array(&[1.0, 2.0, 3.0], &[3]), &by, "cumsum", 0).unwrap());
    assert_allclose_f64(out.data(), &[1.0, f64::NAN, 4.0], 0.0, 0.0, "missing");
}

#[test]
fn test_scan_along_leading_axis() {
    let gb = reducer();
    let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let by = ByInput::from(ints(&[0, 1, 0]));
    let expected = [1.0, 2.0, 3.0, 4.0, 6.0, 8.0];

    let dense = scanned(gb.scan(array(&data, &[3, 2]), &by, "cumsum", 0).unwrap());
    assert_eq!(dense.shape(), &[3, 2]);
    assert_eq!(dense.data(), &expected);

    let values = chunked(&data, &[3, 2], vec![vec![2, 1], vec![1, 1]]);
    let Values::Chunked(out) = gb.scan(values, &by, "nancumsum", -2).unwrap() else {
        panic!("chunked input gave dense output");
    };
    assert_eq!(out.chunks().axis(0), &[2, 1]);
    assert_eq!(out.chunks().axis(1), &[1, 1]);
    assert_eq!(out.to_array().unwrap().data(), &expected);
}

#[test]
fn test_integer_scan_keeps_dtype() {
    let gb = reducer();
    let values = NdArray::from_i64(&[1, 2, 3, 4], [4]).unwrap();
    let by = ByInput::from(ints(&[0, 0, 1, 1]));
    let out = scanned(gb.scan(values, &by, "cumsum", 0).unwrap());
    assert_eq!(out.dtype(), DType::I64);
    assert_eq!(out.data(), &[1.0, 3.0, 3.0, 7.0]);
}

#[test]
fn test_scan_errors() {
    let gb = reducer();
    let values = || array(&[1.0, 2.0, 3.0], &[3]);
    let err = gb.scan(values(), &ByInput::from(ints(&[0, 1, 0])), "cumprod", 0);
    assert!(matches!(err, Err(Error::Configuration { .. })));
    let err = gb.scan(values(), &ByInput::from(ints(&[0, 1])), "cumsum", 0);
    assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    let err = gb.scan(values(), &ByInput::from(ints(&[0, 1, 0])), "cumsum", 1);
    assert!(matches!(err, Err(Error::InvalidDimension { .. })));
}
