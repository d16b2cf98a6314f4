//! Reduction stages: chunk reduce, combine, finalize, reindex and scans
//!
//! Every stage exchanges [`PartialResult`]s whose intermediates carry the
//! group axis last. A reduction is `chunk_reduce` per block, any tree of
//! `combine` calls, and one `finalize`.

mod chunk;
mod combine;
mod finalize;
mod reindex;
mod scan;

pub use chunk::{ChunkRequest, chunk_reduce};
pub use combine::{combine, tree_combine};
pub use finalize::{FinalizeRequest, finalize};
pub use reindex::{ReindexAxis, reindex};
pub use scan::{scan_block, scan_chunked};

use crate::array::NdArray;
use crate::error::{Error, Result};
use crate::labels::GroupIdentity;
use std::ops::Range;

/// Intermediate state of a reduction over some blocks
///
/// Every intermediate's last axis is indexed by `groups`.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialResult {
    groups: Vec<GroupIdentity>,
    intermediates: Vec<NdArray>,
}

impl PartialResult {
    /// Pair identities with intermediates, checking the group axis lengths
    pub fn new(groups: Vec<GroupIdentity>, intermediates: Vec<NdArray>) -> Result<Self> {
        for (i, inter) in intermediates.iter().enumerate() {
            if inter.ndim() == 0 || inter.last_dim() != groups.len() {
                return Err(Error::invariant(format!(
                    "intermediate {i} has shape {:?} but there are {} groups",
                    inter.shape(),
                    groups.len()
                )));
            }
        }
        Ok(Self {
            groups,
            intermediates,
        })
    }

    /// Group identities, in group-axis order
    pub fn groups(&self) -> &[GroupIdentity] {
        &self.groups
    }

    /// Intermediates
    pub fn intermediates(&self) -> &[NdArray] {
        &self.intermediates
    }

    /// Number of groups
    pub fn ngroups(&self) -> usize {
        self.groups.len()
    }

    /// Split into identities and intermediates
    pub fn into_parts(self) -> (Vec<GroupIdentity>, Vec<NdArray>) {
        (self.groups, self.intermediates)
    }

    /// The groups at positions `range`
    pub fn select(&self, range: Range<usize>) -> Result<Self> {
        let groups = self
            .groups
            .get(range.clone())
            .ok_or_else(|| {
                Error::invalid_argument(
                    "range",
                    format!("{range:?} out of bounds for {} groups", self.groups.len()),
                )
            })?
            .to_vec();
        let intermediates = self
            .intermediates
            .iter()
            .map(|a| a.slice_axis(a.ndim() - 1, range.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            groups,
            intermediates,
        })
    }
}

/// A finalized statistic and the identities of its last axis
#[derive(Clone, Debug, PartialEq)]
pub struct FinalResult {
    /// Identities of the group axis
    pub groups: Vec<GroupIdentity>,
    /// The statistic, group axis last
    pub array: NdArray,
}
