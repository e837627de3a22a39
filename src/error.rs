use thiserror::Error;

/// Broad classification of a [`TreeError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid construction argument.
    Argument,
    /// A coordinate could not be mapped onto the discretised grid.
    Discretisation,
    /// Invalid query parameter.
    Domain,
}

/// Errors reported by tree construction and queries.
///
/// Construction failures abort the build and leave no partial tree behind;
/// query failures leave the tree untouched.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TreeError {
    #[error("Box size must be finite and non-negative, got {got}")]
    InvalidBoxSize { got: f64 },

    #[error("max_leaf_n and ncrit must be at least 1")]
    ZeroNodeCapacity,

    #[error("Coordinate array for axis {axis} has length {got}, expected {expected}")]
    MismatchedLengths {
        axis: usize,
        got: usize,
        expected: usize,
    },

    #[error(
        "Cannot discretise coordinate {coord} of particle {index} on axis {axis} \
         into a box of size {box_size}"
    )]
    CoordOutOfRange {
        index: usize,
        axis: usize,
        coord: f64,
        box_size: f64,
    },

    #[error("Opening angle theta must be positive and finite, got {got}")]
    InvalidTheta { got: f64 },

    #[error("Softening length must be non-negative and finite, got {got}")]
    InvalidSoftening { got: f64 },

    #[error("Particle index {index} out of range, tree holds {nparts} particles")]
    IndexOutOfRange { index: usize, nparts: usize },
}

impl TreeError {
    /// Broad classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::InvalidBoxSize { .. }
            | TreeError::ZeroNodeCapacity
            | TreeError::MismatchedLengths { .. } => ErrorKind::Argument,
            TreeError::CoordOutOfRange { .. } => ErrorKind::Discretisation,
            TreeError::InvalidTheta { .. }
            | TreeError::InvalidSoftening { .. }
            | TreeError::IndexOutOfRange { .. } => ErrorKind::Domain,
        }
    }
}
