//! Aggregation descriptors and the built-in registry
//!
//! An [`Aggregation`] says which primitive ops to run per block and per
//! combine step, how to turn the resulting intermediates into the final
//! statistic, and what identity to use for groups a partial result lacks.
//! [`AggregationKind`] maps registry names (`"sum"`, `"nanmean"`, ...) to
//! the built-in descriptors.

mod descriptor;
mod registry;

pub use descriptor::{
    Aggregation, DTypePolicy, Finalize, FinalizeFn, FinalizeKwargs, ReductionKind,
    resolve_fill_value,
};
pub use registry::AggregationKind;
