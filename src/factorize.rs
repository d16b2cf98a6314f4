//! Label factorization
//!
//! Turns one or more raw label arrays into a single dense [`GroupIndex`]
//! array plus the ordered group identities of every key.
//!
//! # Rules
//!
//! - [`KeyGroups::Found`]: groups are the distinct observed labels, in
//!   first-appearance order or sorted.
//! - [`KeyGroups::Exact`]: groups are a fixed output set; the index is the
//!   position in that set and labels outside it are [`GroupIndex::Excluded`].
//! - [`KeyGroups::Binned`]: groups are the bins between consecutive edges;
//!   values outside every bin are excluded.
//! - Missing labels are always excluded.
//! - Several keys are combined by a mixed-radix ravel over the per-key group
//!   counts; exclusion in any key excludes the element.
//! - When only the trailing `k` label dimensions are reduced, every slice of
//!   the leading dimensions gets its own block of `ngroups` indices so that
//!   groups of different slices never collide.

use crate::array::{STACK_DIMS, Shape, ravel_index};
use crate::error::{Error, Result};
use crate::labels::{GroupIdentity, GroupIndex, Interval, Label, LabelArray};
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::trace;

// ============================================================================
// Group specifications
// ============================================================================

/// Strictly increasing bin edges
#[derive(Clone, Debug, PartialEq)]
pub struct Bins {
    edges: Vec<f64>,
    closed_right: bool,
}

impl Bins {
    /// Right-closed bins `(e[i], e[i + 1]]` between consecutive `edges`
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::configuration(format!(
                "binning needs at least two edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| e.is_nan()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::configuration(
                "bin edges must be strictly increasing",
            ));
        }
        Ok(Self {
            edges,
            closed_right: true,
        })
    }

    /// Bin edges from labels, which must all be numeric
    pub fn from_labels(edges: &[Label]) -> Result<Self> {
        let edges = edges
            .iter()
            .map(|l| {
                l.as_f64().ok_or_else(|| {
                    Error::configuration(format!("bin edge {l} is not numeric"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(edges)
    }

    /// Switch to left-closed bins `[e[i], e[i + 1])`
    pub fn closed_left(mut self) -> Self {
        self.closed_right = false;
        self
    }

    /// Bin edges
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    /// Always false; a valid `Bins` has at least one bin
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bins as group identities
    pub fn intervals(&self) -> Vec<GroupIdentity> {
        self.edges
            .windows(2)
            .map(|w| {
                GroupIdentity::Interval(Interval {
                    left: w[0],
                    right: w[1],
                    closed_right: self.closed_right,
                })
            })
            .collect()
    }

    /// Bin containing `value`
    pub fn bin_of(&self, value: f64) -> GroupIndex {
        if value.is_nan() {
            return GroupIndex::Excluded;
        }
        let j = if self.closed_right {
            self.edges.partition_point(|&e| e < value)
        } else {
            self.edges.partition_point(|&e| e <= value)
        };
        if j == 0 || j == self.edges.len() {
            GroupIndex::Excluded
        } else {
            GroupIndex::Valid(j - 1)
        }
    }
}

/// How the output groups of one key are determined
#[derive(Clone, Debug, PartialEq, Default)]
pub enum KeyGroups {
    /// Distinct observed labels
    #[default]
    Found,
    /// A fixed output set of labels
    Exact(Vec<Label>),
    /// Intervals between bin edges
    Binned(Bins),
}

impl KeyGroups {
    /// Number of groups, when fixed up front
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Found => None,
            Self::Exact(v) => Some(v.len()),
            Self::Binned(b) => Some(b.len()),
        }
    }

    /// True when the groups are fixed up front
    pub fn is_fixed(&self) -> bool {
        !matches!(self, Self::Found)
    }
}

// ============================================================================
// Factorization
// ============================================================================

/// Result of [`factorize`]
#[derive(Clone, Debug, PartialEq)]
pub struct Factorized {
    /// One index per label element, row-major; offset when `offset_group`
    pub codes: Vec<GroupIndex>,
    /// Ordered identities of each key
    pub found_groups: Vec<Vec<GroupIdentity>>,
    /// Number of groups of each key
    pub grp_shape: Shape,
    /// Number of combined groups (product of `grp_shape`)
    pub ngroups: usize,
    /// Size of the index space: `ngroups`, or `nslices * ngroups` when offset
    pub size: usize,
    /// Whether per-slice offsets were applied
    pub offset_group: bool,
}

/// Factorize one or more equally shaped label arrays.
///
/// `reduce_ndim` is the number of trailing label dimensions being reduced;
/// `None` reduces all of them.
pub fn factorize(
    by: &[&LabelArray],
    groups: &[KeyGroups],
    reduce_ndim: Option<usize>,
    sort: bool,
) -> Result<Factorized> {
    let first = by
        .first()
        .ok_or_else(|| Error::invalid_argument("by", "at least one label array is required"))?;
    if groups.len() != by.len() {
        return Err(Error::invalid_argument(
            "expected_groups",
            format!("{} group specs for {} label arrays", groups.len(), by.len()),
        ));
    }
    for b in &by[1..] {
        if b.shape() != first.shape() {
            return Err(Error::shape_mismatch(first.shape(), b.shape()));
        }
    }

    let mut per_key = Vec::with_capacity(by.len());
    let mut found_groups = Vec::with_capacity(by.len());
    for (labels, spec) in by.iter().zip(groups) {
        let (codes, identities) = factorize_key(labels.data(), spec, sort)?;
        per_key.push(codes);
        found_groups.push(identities);
    }

    let grp_shape: Shape = found_groups.iter().map(Vec::len).collect();
    let ngroups = grp_shape.numel();
    let mut codes = if per_key.len() == 1 {
        per_key.pop().unwrap_or_default()
    } else {
        ravel_keys(&per_key, &grp_shape)
    };

    let ndim = first.ndim();
    let reduce_ndim = reduce_ndim.unwrap_or(ndim);
    if reduce_ndim > ndim {
        return Err(Error::invalid_argument(
            "axis",
            format!("cannot reduce {reduce_ndim} dimensions of {ndim}-d labels"),
        ));
    }
    let offset_group = reduce_ndim < ndim;
    let size = if offset_group {
        let inner: usize = first.shape()[ndim - reduce_ndim..].iter().product();
        let nslices: usize = first.shape()[..ndim - reduce_ndim].iter().product();
        offset_codes(&mut codes, inner, ngroups);
        nslices * ngroups
    } else {
        ngroups
    };

    trace!(ngroups, size, offset_group, nkeys = by.len(), "factorized labels");
    Ok(Factorized {
        codes,
        found_groups,
        grp_shape,
        ngroups,
        size,
        offset_group,
    })
}

fn factorize_key(
    labels: &[Label],
    spec: &KeyGroups,
    sort: bool,
) -> Result<(Vec<GroupIndex>, Vec<GroupIdentity>)> {
    match spec {
        KeyGroups::Found => Ok(factorize_found(labels, sort)),
        KeyGroups::Exact(expected) => {
            let mut positions: HashMap<&Label, usize> = HashMap::with_capacity(expected.len());
            for (i, label) in expected.iter().enumerate() {
                if label.is_missing() {
                    return Err(Error::configuration(
                        "expected groups cannot contain missing labels",
                    ));
                }
                if positions.insert(label, i).is_some() {
                    return Err(Error::configuration(format!(
                        "expected groups contain {label} more than once"
                    )));
                }
            }
            let codes = labels
                .iter()
                .map(|l| {
                    positions
                        .get(l)
                        .map_or(GroupIndex::Excluded, |&i| GroupIndex::Valid(i))
                })
                .collect();
            let identities = expected.iter().cloned().map(GroupIdentity::Value).collect();
            Ok((codes, identities))
        }
        KeyGroups::Binned(bins) => {
            let codes = labels
                .iter()
                .map(|l| match l {
                    Label::Missing => Ok(GroupIndex::Excluded),
                    Label::Float(v) if v.is_nan() => Ok(GroupIndex::Excluded),
                    _ => l.as_f64().map(|v| bins.bin_of(v)).ok_or_else(|| {
                        Error::configuration(format!("cannot bin non-numeric label {l}"))
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((codes, bins.intervals()))
        }
    }
}

/// Dense factorization of observed labels, by first appearance or sorted.
fn factorize_found(labels: &[Label], sort: bool) -> (Vec<GroupIndex>, Vec<GroupIdentity>) {
    let mut positions: HashMap<&Label, usize> = HashMap::new();
    let mut uniques: Vec<&Label> = Vec::new();
    let mut codes: Vec<GroupIndex> = labels
        .iter()
        .map(|l| {
            if l.is_missing() {
                return GroupIndex::Excluded;
            }
            let next = uniques.len();
            let code = *positions.entry(l).or_insert(next);
            if code == next {
                uniques.push(l);
            }
            GroupIndex::Valid(code)
        })
        .collect();

    if sort {
        let mut order: Vec<usize> = (0..uniques.len()).collect();
        order.sort_by(|&a, &b| uniques[a].cmp(uniques[b]));
        let mut rank = vec![0; order.len()];
        for (r, &o) in order.iter().enumerate() {
            rank[o] = r;
        }
        for c in codes.iter_mut() {
            if let GroupIndex::Valid(i) = c {
                *i = rank[*i];
            }
        }
        uniques = order.into_iter().map(|o| uniques[o]).collect();
    }
    let identities = uniques.into_iter().cloned().map(GroupIdentity::Value).collect();
    (codes, identities)
}

fn ravel_keys(per_key: &[Vec<GroupIndex>], grp_shape: &[usize]) -> Vec<GroupIndex> {
    let n = per_key.first().map_or(0, Vec::len);
    (0..n)
        .map(|i| {
            let coords: Option<SmallVec<[usize; STACK_DIMS]>> =
                per_key.iter().map(|k| k[i].valid()).collect();
            coords.map_or(GroupIndex::Excluded, |c| {
                GroupIndex::Valid(ravel_index(&c, grp_shape))
            })
        })
        .collect()
}

/// Give every leading slice of `inner` elements its own block of `ngroups`
fn offset_codes(codes: &mut [GroupIndex], inner: usize, ngroups: usize) {
    if inner == 0 {
        return;
    }
    for (p, c) in codes.iter_mut().enumerate() {
        if let GroupIndex::Valid(i) = c {
            *i += (p / inner) * ngroups;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GroupIndex::{Excluded, Valid};

    #[test]
    fn test_found_first_appearance_and_sorted() {
        let labels = LabelArray::from_ints(&[3, 1, 3, 2]);
        let f = factorize(&[&labels], &[KeyGroups::Found], None, false).unwrap();
        assert_eq!(f.codes, vec![Valid(0), Valid(1), Valid(0), Valid(2)]);
        assert_eq!(f.found_groups[0][0], GroupIdentity::from(3i64));

        let f = factorize(&[&labels], &[KeyGroups::Found], None, true).unwrap();
        assert_eq!(f.codes, vec![Valid(2), Valid(0), Valid(2), Valid(1)]);
        assert_eq!(f.ngroups, 3);
    }

    #[test]
    fn test_missing_is_excluded() {
        let labels = LabelArray::from_floats(&[1.0, f64::NAN, 2.0]);
        let f = factorize(&[&labels], &[KeyGroups::Found], None, true).unwrap();
        assert_eq!(f.codes, vec![Valid(0), Excluded, Valid(1)]);
        assert_eq!(f.ngroups, 2);
    }

    #[test]
    fn test_exact_excludes_absent_labels() {
        let labels = LabelArray::from_ints(&[0, 5, 1]);
        let spec = KeyGroups::Exact(vec![Label::Int(1), Label::Int(0)]);
        let f = factorize(&[&labels], &[spec], None, true).unwrap();
        assert_eq!(f.codes, vec![Valid(1), Excluded, Valid(0)]);

        let dup = KeyGroups::Exact(vec![Label::Int(1), Label::Int(1)]);
        assert!(matches!(
            factorize(&[&labels], &[dup], None, true),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_bins_right_closed() {
        let labels = LabelArray::from_floats(&[0.5, 1.0, 1.5, 3.0, -1.0]);
        let bins = Bins::new(vec![0.0, 1.0, 2.0]).unwrap();
        let f = factorize(&[&labels], &[KeyGroups::Binned(bins.clone())], None, true).unwrap();
        assert_eq!(f.codes, vec![Valid(0), Valid(0), Valid(1), Excluded, Excluded]);

        let f = factorize(&[&labels], &[KeyGroups::Binned(bins.closed_left())], None, true)
            .unwrap();
        assert_eq!(f.codes, vec![Valid(0), Valid(1), Valid(1), Excluded, Excluded]);
    }

    #[test]
    fn test_bad_bins() {
        assert!(Bins::new(vec![1.0]).is_err());
        assert!(Bins::new(vec![1.0, 1.0]).is_err());
        assert!(Bins::from_labels(&[Label::from("a"), Label::Int(1)]).is_err());
        let labels = LabelArray::from_vec(vec!["a"]);
        let bins = KeyGroups::Binned(Bins::new(vec![0.0, 1.0]).unwrap());
        assert!(factorize(&[&labels], &[bins], None, true).is_err());
    }

    #[test]
    fn test_multiple_keys_ravel() {
        let a = LabelArray::from_ints(&[0, 1, 1, 0]);
        let b = LabelArray::from_vec(vec![Some(10i64), Some(20), None, Some(20)]);
        let f = factorize(&[&a, &b], &[KeyGroups::Found, KeyGroups::Found], None, true).unwrap();
        assert_eq!(f.grp_shape.as_slice(), &[2, 2]);
        assert_eq!(f.codes, vec![Valid(0), Valid(3), Excluded, Valid(1)]);
    }

    #[test]
    fn test_offset_labels() {
        let labels = LabelArray::from_ints(&[0, 1, 1, 0, 0, 2])
            .reshape([2, 3])
            .unwrap();
        let spec = KeyGroups::Exact(vec![Label::Int(0), Label::Int(1), Label::Int(2)]);
        let f = factorize(&[&labels], &[spec], Some(1), true).unwrap();
        assert!(f.offset_group);
        assert_eq!(f.size, 6);
        assert_eq!(f.codes, vec![Valid(0), Valid(1), Valid(1), Valid(3), Valid(3), Valid(5)]);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = LabelArray::from_ints(&[0, 1]);
        let b = LabelArray::from_ints(&[0]);
        assert!(matches!(
            factorize(&[&a, &b], &[KeyGroups::Found, KeyGroups::Found], None, true),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
