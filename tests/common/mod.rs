//! Common test utilities
#![allow(dead_code)]

use blockby::prelude::*;

/// Every execution strategy
pub const METHODS: [Method; 3] = [Method::MapReduce, Method::Blockwise, Method::Cohorts];

/// Reducer on the reference CPU engine, run on the calling thread
pub fn reducer() -> GroupBy {
    GroupBy::new(CpuEngine::new())
}

/// Dense f64 array
pub fn array(data: &[f64], shape: &[usize]) -> NdArray {
    NdArray::from_vec(data.to_vec(), shape).unwrap()
}

/// Chunked f64 array with explicit block sizes per axis
pub fn chunked(data: &[f64], shape: &[usize], chunks: Vec<Vec<usize>>) -> ChunkedArray {
    ChunkedArray::from_array(&array(data, shape), Chunks::new(chunks).unwrap()).unwrap()
}

/// One-dimensional integer labels
pub fn ints(labels: &[i64]) -> LabelArray {
    LabelArray::from_ints(labels)
}

/// Integer group identities
pub fn int_groups(groups: &[i64]) -> Vec<GroupIdentity> {
    groups.iter().map(|&g| GroupIdentity::from(g)).collect()
}

/// Integer labels
pub fn int_labels(labels: &[i64]) -> Vec<Label> {
    labels.iter().map(|&l| Label::Int(l)).collect()
}

/// Numeric labels
pub fn float_labels(labels: &[f64]) -> Vec<Label> {
    labels.iter().map(|&l| Label::Float(l)).collect()
}

/// Assert two f64 slices are close within tolerance; NaN matches NaN
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f64(a: &[f64], b: &[f64], rtol: f64, atol: f64, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        if x.is_nan() || y.is_nan() {
            assert!(
                x.is_nan() && y.is_nan(),
                "{}: element {} differs: {} vs {}",
                msg,
                i,
                x,
                y
            );
            continue;
        }
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}
