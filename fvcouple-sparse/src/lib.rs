//! Sparse storage for distributed linear systems.
//!
//! Every partition stores the rows it owns. Global row indices owned by a partition need not be
//! contiguous: a coupled system typically owns one stripe per variable component. A [`RowLayout`]
//! describes the owned rows of one partition and an [`OwnershipTable`] describes the owned rows
//! of all partitions.
//!
//! Matrix storage is CSR over the owned rows with global column indices. The sparsity pattern is
//! fixed when the matrix is created, so that repeated assembly never reallocates.

mod error;
mod layout;
mod matrix;
mod vector;

pub use error::BackendError;
pub use layout::{OwnershipTable, RowLayout};
pub use matrix::{DistributedMatrix, InsertMode};
pub use vector::DistributedVector;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
