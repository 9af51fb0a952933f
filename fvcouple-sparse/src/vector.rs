use crate::{BackendError, InsertMode, RowLayout};
use nalgebra::DVector;
use std::sync::Arc;

/// The owned entries of a globally indexed dense vector.
#[derive(Debug, Clone)]
pub struct DistributedVector {
    layout: Arc<RowLayout>,
    values: DVector<f64>,
}

impl DistributedVector {
    pub fn zeros(layout: Arc<RowLayout>) -> Self {
        let values = DVector::zeros(layout.num_local_rows());
        Self { layout, values }
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    pub fn global_size(&self) -> usize {
        self.layout.global_size()
    }

    pub fn set_values(&mut self, row: usize, value: f64, mode: InsertMode) -> Result<(), BackendError> {
        let local = self
            .layout
            .local_index(row)
            .ok_or(BackendError::RowNotOwned { row })?;
        match mode {
            InsertMode::Add => self.values[local] += value,
            InsertMode::Insert => self.values[local] = value,
        }
        Ok(())
    }

    pub fn add_value(&mut self, row: usize, value: f64) -> Result<(), BackendError> {
        self.set_values(row, value, InsertMode::Add)
    }

    /// Returns the value at an owned global row.
    pub fn get(&self, row: usize) -> Option<f64> {
        self.layout.local_index(row).map(|local| self.values[local])
    }

    pub fn zero(&mut self) {
        self.values.fill(0.0);
    }

    /// Owned values in local order.
    pub fn local_values(&self) -> &DVector<f64> {
        &self.values
    }

    /// Overwrites all owned values.
    pub fn copy_from_local_slice(&mut self, values: &[f64]) -> Result<(), BackendError> {
        if values.len() != self.values.len() {
            return Err(BackendError::LengthMismatch {
                expected: self.values.len(),
                actual: values.len(),
            });
        }
        self.values.copy_from_slice(values);
        Ok(())
    }

    /// Iterates over owned entries as `(global_row, value)`.
    pub fn global_entries(&self) -> impl '_ + Iterator<Item = (usize, f64)> {
        self.layout.global_rows().zip(self.values.iter().copied())
    }
}
