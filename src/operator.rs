//! Discretized linear operators consumed by the assembler.
use crate::element::ElementKind;
use crate::mesh::FvMesh;
use nalgebra::DVector;

/// A sparse linear operator on one mesh partition in lower/diagonal/upper form.
///
/// The face and diagonal coefficients are shared by all components of the operator's element
/// kind, while sources and boundary coefficients are given per component.
pub trait LinearOperator {
    fn mesh_name(&self) -> &str;

    fn element_kind(&self) -> ElementKind;

    /// Symmetric operators only provide upper coefficients.
    fn is_symmetric(&self) -> bool;

    fn diag(&self) -> &[f64];

    /// The coefficient of each internal face in the row of its lower cell.
    fn upper(&self) -> &[f64];

    /// The coefficient of each internal face in the row of its upper cell.
    ///
    /// Only queried for non-symmetric operators.
    fn lower(&self) -> &[f64];

    fn source(&self, component: usize) -> &[f64];

    fn num_patches(&self) -> usize;

    /// The coefficient of each patch face added to the diagonal of its cell.
    fn internal_coeffs(&self, patch: usize, component: usize) -> &[f64];

    /// The coefficient of each patch face coupling to the value behind the face.
    fn boundary_coeffs(&self, patch: usize, component: usize) -> &[f64];
}

#[derive(Debug, Clone, PartialEq)]
struct PatchCoeffs {
    internal: Vec<DVector<f64>>,
    boundary: Vec<DVector<f64>>,
}

/// An operator stored as dense coefficient arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct FvMatrix {
    mesh_name: String,
    kind: ElementKind,
    diag: DVector<f64>,
    upper: DVector<f64>,
    lower: Option<DVector<f64>>,
    source: Vec<DVector<f64>>,
    patches: Vec<PatchCoeffs>,
}

impl FvMatrix {
    /// A symmetric zero operator on the given mesh.
    pub fn zeros(mesh: &FvMesh, kind: ElementKind) -> Self {
        let n_components = kind.num_components();
        let per_component = |n: usize| vec![DVector::zeros(n); n_components];
        Self {
            mesh_name: mesh.name().to_string(),
            kind,
            diag: DVector::zeros(mesh.num_cells()),
            upper: DVector::zeros(mesh.num_internal_faces()),
            lower: None,
            source: per_component(mesh.num_cells()),
            patches: mesh
                .patches()
                .iter()
                .map(|patch| PatchCoeffs {
                    internal: per_component(patch.num_faces()),
                    boundary: per_component(patch.num_faces()),
                })
                .collect(),
        }
    }

    pub fn diag_mut(&mut self) -> &mut DVector<f64> {
        &mut self.diag
    }

    pub fn upper_mut(&mut self) -> &mut DVector<f64> {
        &mut self.upper
    }

    /// Makes the operator non-symmetric, starting from the current upper coefficients.
    pub fn lower_mut(&mut self) -> &mut DVector<f64> {
        let upper = &self.upper;
        self.lower.get_or_insert_with(|| upper.clone())
    }

    pub fn source_mut(&mut self, component: usize) -> &mut DVector<f64> {
        &mut self.source[component]
    }

    pub fn internal_coeffs_mut(&mut self, patch: usize, component: usize) -> &mut DVector<f64> {
        &mut self.patches[patch].internal[component]
    }

    pub fn boundary_coeffs_mut(&mut self, patch: usize, component: usize) -> &mut DVector<f64> {
        &mut self.patches[patch].boundary[component]
    }

    /// Sets the source of every component to the same values.
    pub fn set_source_all(&mut self, values: &DVector<f64>) {
        for source in &mut self.source {
            source.copy_from(values);
        }
    }

    /// Sets the patch coefficients of every component to the same values.
    pub fn set_patch_coeffs_all(&mut self, patch: usize, internal: &DVector<f64>, boundary: &DVector<f64>) {
        let coeffs = &mut self.patches[patch];
        coeffs.internal.iter_mut().for_each(|c| c.copy_from(internal));
        coeffs.boundary.iter_mut().for_each(|c| c.copy_from(boundary));
    }
}

impl LinearOperator for FvMatrix {
    fn mesh_name(&self) -> &str {
        &self.mesh_name
    }

    fn element_kind(&self) -> ElementKind {
        self.kind
    }

    fn is_symmetric(&self) -> bool {
        self.lower.is_none()
    }

    fn diag(&self) -> &[f64] {
        self.diag.as_slice()
    }

    fn upper(&self) -> &[f64] {
        self.upper.as_slice()
    }

    fn lower(&self) -> &[f64] {
        self.lower.as_ref().unwrap_or(&self.upper).as_slice()
    }

    fn source(&self, component: usize) -> &[f64] {
        self.source[component].as_slice()
    }

    fn num_patches(&self) -> usize {
        self.patches.len()
    }

    fn internal_coeffs(&self, patch: usize, component: usize) -> &[f64] {
        self.patches[patch].internal[component].as_slice()
    }

    fn boundary_coeffs(&self, patch: usize, component: usize) -> &[f64] {
        self.patches[patch].boundary[component].as_slice()
    }
}

/// One coupling term of a list-form operator.
///
/// `row` and `col` are indices into the valid components of the row and column field, and
/// `component` selects the operator component providing the coefficients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ComponentCoupling {
    pub row: usize,
    pub col: usize,
    pub component: usize,
}

impl ComponentCoupling {
    pub fn new(row: usize, col: usize, component: usize) -> Self {
        Self { row, col, component }
    }
}

/// A generic linear coupling between the components of two fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingMatrix<Op> {
    operator: Op,
    couplings: Vec<ComponentCoupling>,
}

impl<Op: LinearOperator> CouplingMatrix<Op> {
    pub fn new(operator: Op, couplings: Vec<ComponentCoupling>) -> Self {
        Self { operator, couplings }
    }

    pub fn operator(&self) -> &Op {
        &self.operator
    }

    pub fn operator_mut(&mut self) -> &mut Op {
        &mut self.operator
    }

    pub fn couplings(&self) -> &[ComponentCoupling] {
        &self.couplings
    }
}
