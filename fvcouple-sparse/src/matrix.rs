use crate::{BackendError, RowLayout};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::{CsrMatrix, SparseEntry, SparseEntryMut};
use rayon::prelude::*;
use std::sync::Arc;

/// How a value is combined with the stored entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InsertMode {
    /// Accumulate into the stored value.
    Add,
    /// Overwrite the stored value.
    Insert,
}

/// The owned rows of a globally indexed square sparse matrix.
///
/// The CSR storage has one row per owned global row (in local order, see [`RowLayout`]) and
/// one column per global column. Its sparsity pattern is fixed at construction.
#[derive(Debug, Clone)]
pub struct DistributedMatrix {
    layout: Arc<RowLayout>,
    csr: CsrMatrix<f64>,
    assembled: bool,
}

impl DistributedMatrix {
    /// Creates a zero matrix with the given preallocated pattern.
    ///
    /// The pattern must have one lane per owned row and one minor index per global column.
    pub fn try_from_pattern(layout: Arc<RowLayout>, pattern: SparsityPattern) -> Result<Self, BackendError> {
        if pattern.major_dim() != layout.num_local_rows() {
            return Err(BackendError::PatternMismatch {
                reason: format!(
                    "pattern has {} rows but the layout owns {} rows",
                    pattern.major_dim(),
                    layout.num_local_rows()
                ),
            });
        }
        if pattern.minor_dim() != layout.global_size() {
            return Err(BackendError::PatternMismatch {
                reason: format!(
                    "pattern has {} columns but the global size is {}",
                    pattern.minor_dim(),
                    layout.global_size()
                ),
            });
        }
        let nnz = pattern.nnz();
        let csr = CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz]).map_err(|e| {
            BackendError::PatternMismatch {
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            layout,
            csr,
            assembled: false,
        })
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    pub fn global_size(&self) -> usize {
        self.layout.global_size()
    }

    /// The number of explicitly stored entries in the owned rows.
    pub fn local_nnz(&self) -> usize {
        self.csr.nnz()
    }

    /// The CSR storage of the owned rows, indexed by local row and global column.
    pub fn local_csr(&self) -> &CsrMatrix<f64> {
        &self.csr
    }

    pub fn set_values(&mut self, row: usize, col: usize, value: f64, mode: InsertMode) -> Result<(), BackendError> {
        let local_row = self
            .layout
            .local_index(row)
            .ok_or(BackendError::RowNotOwned { row })?;
        let ncols = self.csr.ncols();
        if col >= ncols {
            return Err(BackendError::ColumnOutOfBounds { col, ncols });
        }
        match self.csr.get_entry_mut(local_row, col) {
            Some(SparseEntryMut::NonZero(entry)) => {
                match mode {
                    InsertMode::Add => *entry += value,
                    InsertMode::Insert => *entry = value,
                }
                self.assembled = false;
                Ok(())
            }
            _ => Err(BackendError::EntryNotInPattern { row, col }),
        }
    }

    pub fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), BackendError> {
        self.set_values(row, col, value, InsertMode::Add)
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), BackendError> {
        self.set_values(row, col, value, InsertMode::Insert)
    }

    /// Returns the stored value at the given global position.
    ///
    /// Entries in the pattern that were never written are zero. Returns `None` if the row is not
    /// owned or the entry is not part of the pattern.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let local_row = self.layout.local_index(row)?;
        match self.csr.get_entry(local_row, col)? {
            SparseEntry::NonZero(value) => Some(*value),
            SparseEntry::Zero => None,
        }
    }

    /// Zeroes all values while keeping the sparsity pattern.
    pub fn zero_entries(&mut self) {
        self.csr.values_mut().par_iter_mut().for_each(|v| *v = 0.0);
        self.assembled = false;
    }

    /// Finalizes the current values. Rows are always owned locally, so no data moves.
    pub fn assemble(&mut self) {
        self.assembled = true;
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    /// Iterates over stored entries as `(global_row, global_col, value)`.
    pub fn global_triplets(&self) -> impl '_ + Iterator<Item = (usize, usize, f64)> {
        self.csr.triplet_iter().map(move |(i, j, v)| {
            let row = self
                .layout
                .global_index(i)
                .expect("Internal error: CSR row must map to an owned global row");
            (row, j, *v)
        })
    }
}
