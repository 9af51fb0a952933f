use std::error::Error;
use std::fmt;

/// Errors reported by the sparse backend.
///
/// These mirror the non-success statuses of a distributed sparse library: they indicate a
/// write that the storage cannot represent, never a recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Owned row ranges overlap or exceed the global size.
    InvalidLayout { reason: String },
    /// The row is not owned by this partition.
    RowNotOwned { row: usize },
    /// The column index exceeds the global number of columns.
    ColumnOutOfBounds { col: usize, ncols: usize },
    /// The entry was not part of the preallocated sparsity pattern.
    EntryNotInPattern { row: usize, col: usize },
    /// The provided sparsity pattern does not match the row layout.
    PatternMismatch { reason: String },
    /// A dense buffer had the wrong length.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLayout { reason } => write!(f, "invalid row layout: {reason}"),
            Self::RowNotOwned { row } => write!(f, "global row {row} is not owned by this partition"),
            Self::ColumnOutOfBounds { col, ncols } => {
                write!(f, "column {col} is out of bounds for a matrix with {ncols} columns")
            }
            Self::EntryNotInPattern { row, col } => {
                write!(f, "entry ({row}, {col}) is not part of the preallocated sparsity pattern")
            }
            Self::PatternMismatch { reason } => write!(f, "sparsity pattern mismatch: {reason}"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "expected buffer of length {expected}, got {actual}")
            }
        }
    }
}

impl Error for BackendError {}
