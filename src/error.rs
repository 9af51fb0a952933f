//! Errors raised while building, assembling or reading back a coupled system.
use crate::comm::CommError;
use crate::element::ElementKind;
use fvcouple_sparse::BackendError;
use std::error::Error;
use std::fmt;

/// A violated precondition of the coupled system.
///
/// None of these are recoverable for the run: a partition that encounters one must either
/// agree on the failure with its peers through [`CoupledSystem::assemble`](crate::CoupledSystem::assemble)
/// or terminate every partition with [`CoupledSystem::abort`](crate::CoupledSystem::abort).
#[derive(Debug)]
pub enum CoupledSystemError {
    /// A field was inserted after the global system had been created.
    FieldInsertedAfterEquation { field: String, mesh: String },
    DuplicateField { field: String, mesh: String },
    UnknownField { field: String, mesh: String },
    /// A boundary patch whose coupling the assembler cannot express.
    UnsupportedPatch { patch: String, patch_type: String, mesh: String },
    /// The single-component insertion was applied to fields of different element kinds.
    ComponentMismatch {
        row_field: String,
        row_kind: ElementKind,
        col_field: String,
        col_kind: ElementKind,
        operator_kind: ElementKind,
    },
    /// A list-form coupling references a component that does not exist.
    InvalidCoupling { reason: String },
    /// Operator or field data does not match the mesh it is defined on.
    SizeMismatch { what: String, expected: usize, actual: usize },
    /// A mesh is inconsistent, or inconsistent with the partitions it is coupled to.
    MeshMismatch { mesh: String, reason: String },
    UnknownPatchCondition { name: String },
    Backend(BackendError),
    Communication(CommError),
    /// Some partition (possibly this one) failed earlier in the step.
    RemoteFailure { rank: usize },
    Solver(eyre::Report),
}

impl fmt::Display for CoupledSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldInsertedAfterEquation { field, mesh } => write!(
                f,
                "cannot insert field {field} on mesh {mesh}: all fields must be inserted before any equation"
            ),
            Self::DuplicateField { field, mesh } => {
                write!(f, "field {field} is already part of the system on mesh {mesh}")
            }
            Self::UnknownField { field, mesh } => {
                write!(f, "field {field} is not part of the system on mesh {mesh}")
            }
            Self::UnsupportedPatch {
                patch,
                patch_type,
                mesh,
            } => write!(
                f,
                "patch {patch} of type {patch_type} on mesh {mesh} is not supported by the coupled assembler"
            ),
            Self::ComponentMismatch {
                row_field,
                row_kind,
                col_field,
                col_kind,
                operator_kind,
            } => write!(
                f,
                "cannot couple {row_field} ({row_kind:?}) to {col_field} ({col_kind:?}) through a \
                 {operator_kind:?} operator without an explicit component list"
            ),
            Self::InvalidCoupling { reason } => write!(f, "invalid component coupling: {reason}"),
            Self::SizeMismatch { what, expected, actual } => {
                write!(f, "{what}: expected {expected} values, got {actual}")
            }
            Self::MeshMismatch { mesh, reason } => write!(f, "mesh {mesh}: {reason}"),
            Self::UnknownPatchCondition { name } => write!(f, "unknown patch condition type {name}"),
            Self::Backend(err) => write!(f, "sparse backend failure: {err}"),
            Self::Communication(err) => write!(f, "communication failure: {err}"),
            Self::RemoteFailure { rank } => write!(f, "partition {rank} failed, the coupled system is unusable"),
            Self::Solver(report) => write!(f, "linear solver failure: {report}"),
        }
    }
}

impl Error for CoupledSystemError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            Self::Communication(err) => Some(err),
            Self::Solver(report) => {
                let source: &(dyn Error + 'static) = report.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<BackendError> for CoupledSystemError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl From<CommError> for CoupledSystemError {
    fn from(err: CommError) -> Self {
        Self::Communication(err)
    }
}
