//! Group-aware block boundaries

use crate::array::{ChunkedArray, cumulative, normalize_axis};
use crate::error::{Error, Result};
use crate::labels::Label;
use crate::runtime::Executor;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Move block boundaries onto the edges of group runs.
///
/// Every boundary falling inside a run of one label moves to the nearer end
/// of that run, so that each group can be reduced within one block. When
/// every boundary already ends a run, `chunks` is returned unchanged.
///
/// # Example
///
/// ```
/// use blockby::labels::Label;
/// use blockby::plan::optimal_chunks_for_groups;
///
/// let labels: Vec<Label> = [1, 1, 1, 2, 2, 3, 3, 5, 5, 5].into_iter().map(Label::Int).collect();
/// assert_eq!(optimal_chunks_for_groups(&[3, 3, 3, 1], &labels).unwrap(), vec![3, 2, 5]);
/// ```
pub fn optimal_chunks_for_groups(chunks: &[usize], labels: &[Label]) -> Result<Vec<usize>> {
    let total: usize = chunks.iter().sum();
    if total != labels.len() {
        return Err(Error::shape_mismatch(&[labels.len()], &[total]));
    }
    if labels.is_empty() {
        return Ok(chunks.to_vec());
    }

    let mut extent: HashMap<&Label, (usize, usize)> = HashMap::new();
    for (i, label) in labels.iter().enumerate() {
        if !label.is_missing() {
            extent.entry(label).and_modify(|e| e.1 = i).or_insert((i, i));
        }
    }
    let run_of = |c: usize| -> (usize, usize) {
        extent.get(&labels[c]).copied().unwrap_or((c, c))
    };

    // last element of every block
    let chunk_ends: Vec<usize> = cumulative(chunks)
        .into_iter()
        .skip(1)
        .filter(|&end| end > 0)
        .map(|end| end - 1)
        .collect();
    if chunk_ends.iter().all(|&c| run_of(c).1 == c) {
        return Ok(chunks.to_vec());
    }

    let mut bounds = vec![0usize];
    for &c in &chunk_ends {
        let (first, last) = run_of(c);
        let prev = bounds[bounds.len() - 1];
        if c == 0 || prev > last {
            continue;
        }
        if c.abs_diff(first) < c.abs_diff(last) && first > prev {
            bounds.push(first);
        } else {
            bounds.push(last + 1);
        }
    }
    if bounds[bounds.len() - 1] != total {
        bounds.push(total);
    }
    let out: Vec<usize> = bounds.windows(2).map(|w| w[1] - w[0]).collect();
    debug!(from = ?chunks, to = ?out, "group-aligned chunks");
    Ok(out)
}

/// Block sizes along one axis that start a new block wherever a label in
/// `force_new_chunk_at` occurs.
///
/// Between forced breaks, blocks are cut after `chunksize` elements unless
/// the next forced break is within 10% of `chunksize`. Old boundaries are
/// kept unless `ignore_old_chunks`. `chunksize` defaults to the largest
/// old block size.
///
/// # Errors
///
/// [`Error::Configuration`] when no label of `force_new_chunk_at` occurs.
pub fn chunks_for_cohorts(
    labels: &[Label],
    old_chunks: &[usize],
    force_new_chunk_at: &[Label],
    chunksize: Option<usize>,
    ignore_old_chunks: bool,
) -> Result<Vec<usize>> {
    let total: usize = old_chunks.iter().sum();
    if total != labels.len() {
        return Err(Error::shape_mismatch(&[labels.len()], &[total]));
    }
    let chunksize = chunksize.unwrap_or_else(|| old_chunks.iter().copied().max().unwrap_or(0));

    let forced: HashSet<&Label> = force_new_chunk_at.iter().collect();
    let is_break: Vec<bool> = labels.iter().map(|l| forced.contains(l)).collect();
    let breaks: Vec<usize> = (0..labels.len()).filter(|&i| is_break[i]).collect();
    if breaks.is_empty() {
        return Err(Error::configuration(
            "none of the labels in force_new_chunk_at occur in the labels",
        ));
    }
    let old_bounds: HashSet<usize> = cumulative(old_chunks).into_iter().collect();
    let close = chunksize as f64 * 0.1;

    let mut divisions = Vec::new();
    let mut counter = 1usize;
    let mut next = 0usize;
    for idx in 0..labels.len() {
        while next < breaks.len() && breaks[next] < idx {
            next += 1;
        }
        if is_break[idx] || idx == 0 {
            divisions.push(idx);
            counter = 1;
            continue;
        }
        let next_break_is_close = breaks
            .get(next)
            .is_some_and(|&b| (b - idx) as f64 <= close);
        if (!ignore_old_chunks && old_bounds.contains(&idx))
            || (counter >= chunksize && !next_break_is_close)
        {
            divisions.push(idx);
            counter = 1;
            continue;
        }
        counter += 1;
    }
    divisions.push(labels.len());
    Ok(divisions.windows(2).map(|w| w[1] - w[0]).collect())
}

/// Redistribute `array` along `axis` so that a block starts wherever a label
/// in `force_new_chunk_at` occurs; see [`chunks_for_cohorts`].
pub fn rechunk_for_cohorts<X: Executor + ?Sized>(
    executor: &X,
    array: &ChunkedArray,
    axis: isize,
    labels: &[Label],
    force_new_chunk_at: &[Label],
    chunksize: Option<usize>,
    ignore_old_chunks: bool,
) -> Result<ChunkedArray> {
    let axis = normalize_axis(axis, array.ndim())?;
    let old = array.chunks().axis(axis);
    let sizes = chunks_for_cohorts(labels, old, force_new_chunk_at, chunksize, ignore_old_chunks)?;
    if sizes == old {
        return Ok(array.clone());
    }
    debug!(axis, from = ?old, to = ?sizes, "rechunking for cohorts");
    executor.rechunk(array, axis, &sizes)
}

/// Redistribute `array` along `axis` so that no group run straddles a block
/// boundary; see [`optimal_chunks_for_groups`].
pub fn rechunk_for_blockwise<X: Executor + ?Sized>(
    executor: &X,
    array: &ChunkedArray,
    axis: isize,
    labels: &[Label],
) -> Result<ChunkedArray> {
    let axis = normalize_axis(axis, array.ndim())?;
    let old = array.chunks().axis(axis);
    let sizes = optimal_chunks_for_groups(old, labels)?;
    if sizes == old {
        return Ok(array.clone());
    }
    debug!(axis, from = ?old, to = ?sizes, "rechunking for blockwise");
    executor.rechunk(array, axis, &sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> Vec<Label> {
        v.iter().copied().map(Label::Int).collect()
    }

    #[test]
    fn test_optimal_chunks_table() {
        let labels = ints(&[1, 1, 1, 2, 2, 3, 3, 5, 5, 5]);
        let cases: [(&[usize], &[usize]); 12] = [
            (&[1; 10], &[3, 2, 2, 3]),
            (&[2; 5], &[3, 2, 2, 3]),
            (&[3, 3, 3, 1], &[3, 2, 5]),
            (&[3, 1, 1, 2, 1, 1, 1], &[3, 2, 2, 3]),
            (&[3, 2, 2, 3], &[3, 2, 2, 3]),
            (&[4, 4, 2], &[3, 4, 3]),
            (&[5, 5], &[5, 5]),
            (&[6, 4], &[5, 5]),
            (&[7, 3], &[7, 3]),
            (&[8, 2], &[7, 3]),
            (&[9, 1], &[10]),
            (&[10], &[10]),
        ];
        for (chunks, expected) in cases {
            assert_eq!(
                optimal_chunks_for_groups(chunks, &labels).unwrap(),
                expected,
                "chunks {chunks:?}"
            );
        }
    }

    #[test]
    fn test_chunks_for_cohorts_table() {
        let labels: Vec<Label> = (0..30).map(|i| Label::Int(i % 7)).collect();
        let old = [7, 7, 7, 7, 2];
        let at = |l: i64| chunks_for_cohorts(&labels, &old, &[Label::Int(l)], None, false).unwrap();
        assert_eq!(at(1), vec![1, 6, 1, 6, 1, 6, 1, 6, 1, 1]);
        assert_eq!(at(0), vec![7, 7, 7, 7, 2]);
        assert_eq!(at(3), vec![3, 4, 3, 4, 3, 4, 3, 4, 2]);
    }

    #[test]
    fn test_forced_label_must_occur() {
        let labels = ints(&[0, 1, 2]);
        let err = chunks_for_cohorts(&labels, &[3], &[Label::Int(9)], None, false);
        assert!(matches!(err, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_ignore_old_chunks() {
        let labels = ints(&[0, 1, 0, 1, 0, 1, 0, 1]);
        let sizes =
            chunks_for_cohorts(&labels, &[3, 5], &[Label::Int(0)], Some(4), true).unwrap();
        assert_eq!(sizes, vec![2, 2, 2, 2]);
    }
}
