//! Cohort detection
//!
//! A cohort is a set of blocks that together hold every member of the
//! groups they contain. Cohorts can be reduced and finalized independently
//! of each other; their outputs are concatenated along the group axis.

use crate::array::Chunks;
use crate::array::layout::region_offsets;
use crate::error::{Error, Result};
use crate::factorize::{KeyGroups, factorize};
use crate::labels::{GroupIdentity, LabelArray};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Blocks reducible independently of all other blocks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cohort {
    /// Flat indices of the blocks, ascending
    pub blocks: Vec<usize>,
    /// Groups found in these blocks, sorted
    pub groups: Vec<GroupIdentity>,
}

/// Partition the blocks of `labels` (partitioned by `chunks`) into cohorts.
///
/// Blocks sharing a group always land in the same cohort, and blocks
/// holding no valid label form cohorts of their own. With `merge`,
/// consecutive cohorts are packed together as long as the packed cohort
/// has no more blocks than the largest unmerged one, or than `isqrt` of
/// the block count when that is larger. Cohorts are ordered by their
/// first block.
///
/// # Example
///
/// ```
/// use blockby::array::Chunks;
/// use blockby::labels::LabelArray;
/// use blockby::plan::find_group_cohorts;
///
/// let labels = LabelArray::from_ints(&[1, 2, 3, 1, 2, 3, 4]);
/// let chunks = Chunks::new(vec![vec![3, 4]]).unwrap();
/// let cohorts = find_group_cohorts(&labels, &chunks, false).unwrap();
/// assert_eq!(cohorts.len(), 1);
/// assert_eq!(cohorts[0].blocks, vec![0, 1]);
/// ```
pub fn find_group_cohorts(
    labels: &LabelArray,
    chunks: &Chunks,
    merge: bool,
) -> Result<Vec<Cohort>> {
    if chunks.shape() != *labels.shape() {
        return Err(Error::shape_mismatch(labels.shape(), &chunks.shape()));
    }
    let factorized = factorize(&[labels], &[KeyGroups::Found], None, true)?;
    let identities = &factorized.found_groups[0];
    let nblocks = chunks.nblocks();

    let block_groups: Vec<Vec<usize>> = chunks
        .iter_blocks()
        .map(|coords| {
            let ranges = chunks.block_ranges(&coords);
            let mut present: Vec<usize> = region_offsets(labels.shape(), &ranges)
                .into_iter()
                .filter_map(|o| factorized.codes[o].valid())
                .collect();
            present.sort_unstable();
            present.dedup();
            present
        })
        .collect();

    // group -> first block holding it; every later block is unioned with it
    let mut sets = DisjointSet::new(nblocks);
    let mut first_block: Vec<Option<usize>> = vec![None; identities.len()];
    for (block, groups) in block_groups.iter().enumerate() {
        for &g in groups {
            match first_block[g] {
                Some(first) => sets.union(first, block),
                None => first_block[g] = Some(block),
            }
        }
    }

    let mut by_root: HashMap<usize, usize> = HashMap::new();
    let mut cohorts: Vec<(Vec<usize>, BTreeSet<usize>)> = Vec::new();
    for (block, groups) in block_groups.iter().enumerate() {
        let root = sets.find(block);
        let idx = *by_root.entry(root).or_insert_with(|| {
            cohorts.push((Vec::new(), BTreeSet::new()));
            cohorts.len() - 1
        });
        cohorts[idx].0.push(block);
        cohorts[idx].1.extend(groups.iter().copied());
    }
    let unmerged = cohorts.len();
    if merge {
        cohorts = pack(cohorts);
    }

    let mut owner: Vec<Option<usize>> = vec![None; identities.len()];
    for (i, (_, groups)) in cohorts.iter().enumerate() {
        for &g in groups {
            if let Some(j) = owner[g].replace(i) {
                return Err(Error::invariant(format!(
                    "group {} found in cohorts {j} and {i}",
                    identities[g]
                )));
            }
        }
    }
    debug!(
        nblocks,
        ngroups = identities.len(),
        unmerged,
        cohorts = cohorts.len(),
        "found cohorts"
    );

    Ok(cohorts
        .into_iter()
        .map(|(blocks, groups)| Cohort {
            blocks,
            groups: groups.into_iter().map(|g| identities[g].clone()).collect(),
        })
        .collect())
}

/// Pack consecutive cohorts while the packed block count stays within the
/// largest input cohort, or within `isqrt(nblocks)` when that is larger so
/// that `n` single-block cohorts pack into about `sqrt(n)` cohorts
fn pack(cohorts: Vec<(Vec<usize>, BTreeSet<usize>)>) -> Vec<(Vec<usize>, BTreeSet<usize>)> {
    let nblocks: usize = cohorts.iter().map(|(b, _)| b.len()).sum();
    let largest = cohorts.iter().map(|(b, _)| b.len()).max().unwrap_or(0);
    let limit = largest.max(nblocks.isqrt());
    let mut packed: Vec<(Vec<usize>, BTreeSet<usize>)> = Vec::with_capacity(cohorts.len());
    for (blocks, groups) in cohorts {
        if let Some((cur_blocks, cur_groups)) = packed
            .last_mut()
            .filter(|(cur, _)| cur.len() + blocks.len() <= limit)
        {
            cur_blocks.extend(blocks);
            cur_blocks.sort_unstable();
            cur_groups.extend(groups);
            continue;
        }
        packed.push((blocks, groups));
    }
    packed
}

/// Union-find over block indices; the smallest index is the root
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cohort_groups(labels: &[i64], chunks: Vec<usize>, merge: bool) -> Vec<Vec<i64>> {
        let labels = LabelArray::from_ints(labels);
        let chunks = Chunks::new(vec![chunks]).unwrap();
        find_group_cohorts(&labels, &chunks, merge)
            .unwrap()
            .into_iter()
            .map(|c| {
                c.groups
                    .iter()
                    .map(|g| match g.as_label() {
                        Some(crate::labels::Label::Int(v)) => *v,
                        other => panic!("unexpected group {other:?}"),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_overlapping_blocks_form_one_cohort() {
        let labels = [1, 2, 3, 1, 2, 3, 4];
        assert_eq!(cohort_groups(&labels, vec![3, 4], false), vec![vec![1, 2, 3, 4]]);
        assert_eq!(
            cohort_groups(&labels, vec![2, 2, 2, 1], false),
            vec![vec![1, 2, 3], vec![4]]
        );
        assert_eq!(
            cohort_groups(&labels, vec![3, 3, 1], false),
            vec![vec![1, 2, 3], vec![4]]
        );
    }

    #[test]
    fn test_runs_of_repeated_labels() {
        let mut labels = Vec::new();
        for (g, n) in [4, 4, 12, 2, 3, 4].into_iter().enumerate() {
            labels.extend(std::iter::repeat_n(g as i64, n));
        }
        assert_eq!(
            cohort_groups(&labels, vec![4, 8, 4, 9, 4], false),
            vec![vec![0], vec![1, 2, 3, 4], vec![5]]
        );
    }

    #[test]
    fn test_merge_packs_small_cohorts() {
        let labels = [0, 1, 0, 1, 2, 3, 4, 5];
        let chunks = vec![2, 2, 1, 1, 1, 1];
        assert_eq!(cohort_groups(&labels, chunks.clone(), false).len(), 5);
        let merged = cohort_groups(&labels, chunks, true);
        assert_eq!(merged, vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_merge_packs_single_block_cohorts() {
        let labels: Vec<i64> = (0..9).collect();
        assert_eq!(cohort_groups(&labels, vec![1; 9], false).len(), 9);
        let merged = cohort_groups(&labels, vec![1; 9], true);
        assert_eq!(merged, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]]);

        let labels = [0, 1, 2, 3, 4];
        assert_eq!(
            cohort_groups(&labels, vec![1; 5], true),
            vec![vec![0, 1], vec![2, 3], vec![4]]
        );
    }

    #[test]
    fn test_block_without_labels_is_own_cohort() {
        let labels = LabelArray::from_floats(&[0.0, 0.0, f64::NAN, f64::NAN, 1.0]);
        let chunks = Chunks::new(vec![vec![2, 2, 1]]).unwrap();
        let cohorts = find_group_cohorts(&labels, &chunks, false).unwrap();
        assert_eq!(cohorts.len(), 3);
        assert_eq!(cohorts[1].blocks, vec![1]);
        assert!(cohorts[1].groups.is_empty());
    }

    #[test]
    fn test_2d_labels() {
        let labels = LabelArray::from_ints(&[0, 1, 2, 2, 3, 3]).reshape([2, 3]).unwrap();
        let chunks = Chunks::new(vec![vec![1, 1], vec![1, 2]]).unwrap();
        let cohorts = find_group_cohorts(&labels, &chunks, false).unwrap();
        // blocks (0,0) {0}, (0,1) {1,2}, (1,0) {2}, (1,1) {3}
        let blocks: Vec<Vec<usize>> = cohorts.iter().map(|c| c.blocks.clone()).collect();
        assert_eq!(blocks, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_shape_mismatch() {
        let labels = LabelArray::from_ints(&[0, 1, 2]);
        let chunks = Chunks::new(vec![vec![2]]).unwrap();
        assert!(matches!(
            find_group_cohorts(&labels, &chunks, false),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
