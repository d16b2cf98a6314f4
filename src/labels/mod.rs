//! Group labels, group identities and group indices
//!
//! Raw labels ([`Label`]) arrive in a [`LabelArray`] parallel to a suffix of
//! the value array. Factorizing them yields one [`GroupIndex`] per element
//! and an ordered set of [`GroupIdentity`] values naming the output groups.

mod array;
mod identity;

pub use array::{ChunkedLabels, LabelArray};
pub use identity::{GroupIdentity, Interval};

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

// ============================================================================
// Label
// ============================================================================

/// One raw group label
///
/// Floating point NaN is treated as missing: `Label::from(f64::NAN)` gives
/// [`Label::Missing`], and a `Float(NaN)` constructed directly is reported
/// missing by [`Label::is_missing`].
///
/// Labels of different variants never compare equal; ordering sorts
/// integers, then floats, then strings, with missing labels last.
#[derive(Clone, Debug)]
pub enum Label {
    /// Integer label
    Int(i64),
    /// Floating point label
    Float(f64),
    /// String label
    Str(String),
    /// Missing label; never belongs to a group
    Missing,
}

impl Label {
    /// Returns true for missing labels (including float NaN)
    #[inline]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric value of the label, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Float(v) if v.is_nan() => 3,
            Self::Float(_) => 1,
            Self::Str(_) => 2,
            Self::Missing => 3,
        }
    }

    /// Floats compared by bit pattern after folding -0.0 into 0.0
    fn float_bits(v: f64) -> u64 {
        if v == 0.0 { 0 } else { v.to_bits() }
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Float(a), Self::Float(b)) if !a.is_nan() && !b.is_nan() => {
                Self::float_bits(*a) == Self::float_bits(*b)
            }
            _ => self.is_missing() && other.is_missing(),
        }
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Float(v) if !v.is_nan() => Self::float_bits(*v).hash(state),
            Self::Str(s) => s.hash(state),
            _ => {}
        }
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) if !a.is_nan() && !b.is_nan() => {
                (a + 0.0).total_cmp(&(b + 0.0))
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) if v.is_nan() => write!(f, "<missing>"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Missing => write!(f, "<missing>"),
        }
    }
}

impl From<i64> for Label {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Label {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Label {
    fn from(v: f64) -> Self {
        if v.is_nan() { Self::Missing } else { Self::Float(v) }
    }
}

impl From<&str> for Label {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Label {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<Label>> From<Option<T>> for Label {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Missing, Into::into)
    }
}

// ============================================================================
// GroupIndex
// ============================================================================

/// Dense group index of one label element
///
/// `Excluded` marks elements that belong to no output group: missing labels,
/// labels absent from a fixed output set and values outside every bin.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupIndex {
    /// Index into the group identity set
    Valid(usize),
    /// Element contributes to no group
    Excluded,
}

impl GroupIndex {
    /// The index, if valid
    #[inline]
    pub fn valid(self) -> Option<usize> {
        match self {
            Self::Valid(i) => Some(i),
            Self::Excluded => None,
        }
    }

    /// Dense integer for an engine asked for `size + 1` buckets; exclusions
    /// land in the trailing sentinel bucket `size`.
    #[inline]
    pub fn to_bucket(self, size: usize) -> usize {
        self.valid().unwrap_or(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_is_missing() {
        assert!(Label::from(f64::NAN).is_missing());
        assert!(Label::Float(f64::NAN).is_missing());
        assert_eq!(Label::Float(f64::NAN), Label::Missing);
        assert_eq!(Label::from(None::<i64>), Label::Missing);
    }

    #[test]
    fn test_label_ordering() {
        let mut labels = vec![
            Label::Missing,
            Label::from("b"),
            Label::Float(0.5),
            Label::Int(3),
            Label::Int(-1),
            Label::from("a"),
        ];
        labels.sort();
        assert_eq!(labels, vec![
            Label::Int(-1),
            Label::Int(3),
            Label::Float(0.5),
            Label::from("a"),
            Label::from("b"),
            Label::Missing,
        ]);
        assert_eq!(Label::Float(-0.0), Label::Float(0.0));
        assert_ne!(Label::Int(1), Label::Float(1.0));
    }

    #[test]
    fn test_group_index_bucket() {
        assert_eq!(GroupIndex::Valid(2).to_bucket(5), 2);
        assert_eq!(GroupIndex::Excluded.to_bucket(5), 5);
    }
}
