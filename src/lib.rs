//! Assembly of coupled multi-field finite-volume equations into one global sparse system.
//!
//! Fields of different element kinds, on one or more mesh partitions, are registered in a
//! [`CoupledSystem`]. Each step, per-field discretized operators are scattered into a single
//! distributed matrix and right-hand side, solved by an external [`LinearSolver`], and the
//! solution is copied back into the fields.
mod assembly;
pub mod comm;
pub mod element;
pub mod error;
pub mod field;
pub mod index_map;
pub mod mesh;
pub mod operator;
pub mod registry;
pub mod settings;
pub mod solution;
pub mod system;

pub use comm::{Communicator, SerialComm, ThreadComm};
pub use element::ElementKind;
pub use error::CoupledSystemError;
pub use field::{PatchCondition, PatchConditionRegistry, VolField};
pub use mesh::FvMesh;
pub use operator::{ComponentCoupling, CouplingMatrix, FvMatrix, LinearOperator};
pub use settings::SystemSettings;
pub use system::{CoupledSystem, LinearSolver};

pub extern crate fvcouple_sparse;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
