//! Planning ahead of graph construction
//!
//! - [`cohorts`]: partition blocks into sets that can be reduced
//!   independently because no group spans two of them.
//! - [`rechunk`]: block boundaries aligned to group runs, so that a
//!   reduction can go blockwise or form small cohorts.

pub mod cohorts;
pub mod rechunk;

pub use cohorts::{Cohort, find_group_cohorts};
pub use rechunk::{
    chunks_for_cohorts, optimal_chunks_for_groups, rechunk_for_blockwise, rechunk_for_cohorts,
};
