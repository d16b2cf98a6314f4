//! Canonical identities of output groups

use super::Label;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A bin between two edges
///
/// Bins are right-closed `(left, right]` unless built with
/// `closed_right = false`, which gives `[left, right)`.
#[derive(Copy, Clone, Debug)]
pub struct Interval {
    /// Lower edge
    pub left: f64,
    /// Upper edge
    pub right: f64,
    /// Whether the upper edge belongs to the bin
    pub closed_right: bool,
}

impl Interval {
    /// Right-closed interval `(left, right]`
    pub fn right_closed(left: f64, right: f64) -> Self {
        Self {
            left,
            right,
            closed_right: true,
        }
    }

    /// Left-closed interval `[left, right)`
    pub fn left_closed(left: f64, right: f64) -> Self {
        Self {
            left,
            right,
            closed_right: false,
        }
    }

    /// Whether `value` falls in this bin
    pub fn contains(&self, value: f64) -> bool {
        if self.closed_right {
            self.left < value && value <= self.right
        } else {
            self.left <= value && value < self.right
        }
    }

    /// Midpoint of the bin
    pub fn mid(&self) -> f64 {
        0.5 * (self.left + self.right)
    }

    fn key(&self) -> (u64, u64, bool) {
        (
            (self.left + 0.0).to_bits(),
            (self.right + 0.0).to_bits(),
            self.closed_right,
        )
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Interval {}

impl Hash for Interval {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.left + 0.0)
            .total_cmp(&(other.left + 0.0))
            .then((self.right + 0.0).total_cmp(&(other.right + 0.0)))
            .then(self.closed_right.cmp(&other.closed_right))
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.closed_right {
            write!(f, "({}, {}]", self.left, self.right)
        } else {
            write!(f, "[{}, {})", self.left, self.right)
        }
    }
}

/// The canonical identity of one output group: a label value or a bin
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupIdentity {
    /// Group of all elements carrying this label
    Value(Label),
    /// Group of all elements whose numeric label falls in this bin
    Interval(Interval),
}

impl GroupIdentity {
    /// The label, for value identities
    pub fn as_label(&self) -> Option<&Label> {
        match self {
            Self::Value(l) => Some(l),
            Self::Interval(_) => None,
        }
    }

    /// The bin, for interval identities
    pub fn as_interval(&self) -> Option<&Interval> {
        match self {
            Self::Interval(i) => Some(i),
            Self::Value(_) => None,
        }
    }
}

macro_rules! identity_from_label {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for GroupIdentity {
                fn from(v: $ty) -> Self {
                    Self::Value(v.into())
                }
            }
        )*
    };
}

identity_from_label!(Label, i64, i32, f64, &str, String);

impl From<Interval> for GroupIdentity {
    fn from(v: Interval) -> Self {
        Self::Interval(v)
    }
}

impl fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(l) => l.fmt(f),
            Self::Interval(i) => i.fmt(f),
        }
    }
}
