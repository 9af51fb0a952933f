//! Scattering of operator coefficients into the global matrix and right-hand side.
//!
//! Insertion happens in two stages: [`validate_operator`] checks everything that could make
//! an insertion fail, and only then are coefficients written. A failed insertion therefore
//! commits nothing.
use crate::index_map::{MeshEntry, PatchStencil};
use crate::mesh::FvMesh;
use crate::operator::LinearOperator;
use crate::CoupledSystemError;
use fvcouple_sparse::{BackendError, DistributedMatrix, DistributedVector};
use itertools::{izip, Itertools};

/// Where one operator component is written.
#[derive(Debug, Copy, Clone)]
pub(crate) struct BlockInsertion<'a> {
    pub entry: &'a MeshEntry,
    pub row_bias: usize,
    pub col_bias: usize,
    /// Operator component providing sources and boundary coefficients.
    pub component: usize,
}

impl<'a> BlockInsertion<'a> {
    fn mesh(&self) -> &'a FvMesh {
        self.entry.mesh()
    }

    fn row(&self, cell: usize) -> usize {
        self.entry.ilower() + cell + self.row_bias
    }

    fn col(&self, cell: usize) -> usize {
        self.entry.ilower() + cell + self.col_bias
    }
}

fn check_len(what: impl FnOnce() -> String, expected: usize, actual: usize) -> Result<(), CoupledSystemError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CoupledSystemError::SizeMismatch {
            what: what(),
            expected,
            actual,
        })
    }
}

/// Checks that the operator matches the mesh partition and that every patch can be assembled.
pub(crate) fn validate_operator<Op>(
    operator: &Op,
    entry: &MeshEntry,
    components: &[usize],
) -> Result<(), CoupledSystemError>
where
    Op: LinearOperator + ?Sized,
{
    let mesh = entry.mesh();
    let name = mesh.name();

    for (patch, stencil) in mesh.patches().iter().zip(entry.stencils()) {
        if let PatchStencil::Unsupported { patch_type } = stencil {
            return Err(CoupledSystemError::UnsupportedPatch {
                patch: patch.name.clone(),
                patch_type: patch_type.clone(),
                mesh: name.to_string(),
            });
        }
    }

    let n_cells = mesh.num_cells();
    let n_faces = mesh.num_internal_faces();
    check_len(|| format!("diagonal on mesh {name}"), n_cells, operator.diag().len())?;
    check_len(|| format!("upper coefficients on mesh {name}"), n_faces, operator.upper().len())?;
    if !operator.is_symmetric() {
        check_len(|| format!("lower coefficients on mesh {name}"), n_faces, operator.lower().len())?;
    }
    check_len(|| format!("patches of operator on mesh {name}"), mesh.patches().len(), operator.num_patches())?;

    let n_components = operator.element_kind().num_components();
    for &component in components {
        if component >= n_components {
            return Err(CoupledSystemError::InvalidCoupling {
                reason: format!(
                    "component {component} of a {:?} operator on mesh {name}",
                    operator.element_kind()
                ),
            });
        }
        check_len(
            || format!("source of component {component} on mesh {name}"),
            n_cells,
            operator.source(component).len(),
        )?;
        for (index, patch) in mesh.patches().iter().enumerate() {
            check_len(
                || format!("internal coefficients of patch {} on mesh {name}", patch.name),
                patch.num_faces(),
                operator.internal_coeffs(index, component).len(),
            )?;
            check_len(
                || format!("boundary coefficients of patch {} on mesh {name}", patch.name),
                patch.num_faces(),
                operator.boundary_coeffs(index, component).len(),
            )?;
        }
    }
    Ok(())
}

/// Writes the matrix coefficients and the right-hand side of one operator component.
pub(crate) fn assemble_matrix_and_vector<Op>(
    matrix: &mut DistributedMatrix,
    rhs: &mut DistributedVector,
    operator: &Op,
    block: &BlockInsertion,
) -> Result<(), BackendError>
where
    Op: LinearOperator + ?Sized,
{
    let mesh = block.mesh();
    let component = block.component;

    let upper = operator.upper();
    let lower = if operator.is_symmetric() {
        upper
    } else {
        operator.lower()
    };
    for (&l, &u, &upper_coeff, &lower_coeff) in izip!(mesh.lower_addr(), mesh.upper_addr(), upper, lower) {
        matrix.add_value(block.row(u), block.col(l), lower_coeff)?;
        matrix.add_value(block.row(l), block.col(u), upper_coeff)?;
    }

    for (cell, (&diag, &source)) in operator.diag().iter().zip(operator.source(component)).enumerate() {
        matrix.add_value(block.row(cell), block.col(cell), diag)?;
        rhs.add_value(block.row(cell), source)?;
    }

    let mut remote = Vec::new();
    for (index, (patch, stencil)) in mesh.patches().iter().zip(block.entry.stencils()).enumerate() {
        let internal = operator.internal_coeffs(index, component);
        let boundary = operator.boundary_coeffs(index, component);
        let faces = izip!(&patch.face_cells, internal, boundary);
        match stencil {
            PatchStencil::Uncoupled => {
                for (&cell, &ic, &bc) in faces {
                    matrix.add_value(block.row(cell), block.col(cell), ic)?;
                    rhs.add_value(block.row(cell), bc)?;
                }
            }
            PatchStencil::Remote { columns } => {
                for ((&cell, &ic, &bc), &column) in faces.zip(columns) {
                    matrix.add_value(block.row(cell), block.col(cell), ic)?;
                    remote.push((block.row(cell), column + block.col_bias, -bc));
                }
            }
            PatchStencil::Periodic { columns } => {
                for ((&cell, &ic, &bc), &column) in faces.zip(columns) {
                    matrix.add_value(block.row(cell), block.col(cell), ic)?;
                    matrix.add_value(block.row(cell), column + block.col_bias, -bc)?;
                }
            }
            PatchStencil::Interpolated { faces: interface } => {
                for ((&cell, &ic, &bc), face) in faces.zip(interface) {
                    let row = block.row(cell);
                    matrix.add_value(row, block.col(cell), ic)?;
                    if face.corrected {
                        matrix.add_value(row, block.col(cell), -bc)?;
                    } else {
                        for &(column, weight) in &face.targets {
                            matrix.add_value(row, column + block.col_bias, -bc * weight)?;
                        }
                    }
                }
            }
            // Rejected by validation
            PatchStencil::Unsupported { .. } => {}
        }
    }

    // Partition boundary slots are overwritten on every pass. Faces sharing a slot, such as the
    // processor and processor-periodic faces of a two-cell ring, are summed first.
    remote.sort_unstable_by_key(|&(row, col, _)| (row, col));
    let slots = remote.into_iter().coalesce(|a, b| {
        if (a.0, a.1) == (b.0, b.1) {
            Ok((a.0, a.1, a.2 + b.2))
        } else {
            Err((a, b))
        }
    });
    for (row, col, value) in slots {
        matrix.set_value(row, col, value)?;
    }
    Ok(())
}

/// Writes only the right-hand side of one operator component.
///
/// Used when the matrix of a previous step is reused: only sources and the boundary
/// coefficients of uncoupled patches change.
pub(crate) fn assemble_vector<Op>(
    rhs: &mut DistributedVector,
    operator: &Op,
    block: &BlockInsertion,
) -> Result<(), BackendError>
where
    Op: LinearOperator + ?Sized,
{
    let mesh = block.mesh();
    let component = block.component;

    for (cell, &source) in operator.source(component).iter().enumerate() {
        rhs.add_value(block.row(cell), source)?;
    }

    for (index, (patch, stencil)) in mesh.patches().iter().zip(block.entry.stencils()).enumerate() {
        if let PatchStencil::Uncoupled = stencil {
            let boundary = operator.boundary_coeffs(index, component);
            for (&cell, &bc) in patch.face_cells.iter().zip(boundary) {
                rhs.add_value(block.row(cell), bc)?;
            }
        }
    }
    Ok(())
}
