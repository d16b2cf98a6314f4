//! Error types for blockby

use thiserror::Error;

/// Result type alias using blockby's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or running a grouped reduction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The request cannot be honoured with the given options.
    ///
    /// Always raised eagerly, before any task graph is built.
    #[error("Configuration error: {reason}")]
    Configuration {
        /// What is wrong with the request
        reason: String,
    },

    /// Shape mismatch between values and labels, or between label arrays
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Invalid axis for an array with `ndim` dimensions
    #[error("Invalid dimension {dim} for array with {ndim} dimensions")]
    InvalidDimension {
        /// The invalid axis
        dim: isize,
        /// Number of dimensions
        ndim: usize,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// An aggregation kernel failed on some block.
    ///
    /// Kernel failures are never retried or masked; they fail the whole reduction.
    #[error("Kernel '{op}' failed on engine '{engine}': {reason}")]
    Kernel {
        /// Engine that ran the kernel
        engine: &'static str,
        /// Kernel name
        op: &'static str,
        /// Failure description
        reason: String,
    },

    /// An internal invariant was violated. This is a programming error.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Feature not yet implemented
    #[error("Not implemented: {feature}")]
    NotImplemented {
        /// Description of the unimplemented feature
        feature: &'static str,
    },
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Create a kernel failure error
    pub fn kernel(engine: &'static str, op: &'static str, reason: impl Into<String>) -> Self {
        Self::Kernel {
            engine,
            op,
            reason: reason.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}
