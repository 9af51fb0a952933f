//! Cell-centred fields and their boundary conditions.
use crate::element::ElementKind;
use crate::mesh::{FvMesh, PatchTopology};
use crate::CoupledSystemError;
use nalgebra::DMatrix;
use rustc_hash::FxHashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Computes the face values of one boundary patch from the cell values.
pub trait PatchCondition: Debug + Send + Sync {
    fn type_name(&self) -> &str;

    /// Updates `values` (faces × components) of patch `patch` from `cells` (cells × components).
    fn evaluate(&self, mesh: &FvMesh, patch: usize, cells: &DMatrix<f64>, values: &mut DMatrix<f64>);
}

/// Face values are prescribed and left untouched.
#[derive(Debug, Copy, Clone, Default)]
pub struct FixedValue;

/// Face values equal the adjacent cell values.
#[derive(Debug, Copy, Clone, Default)]
pub struct ZeroGradient;

/// Face values are computed elsewhere.
#[derive(Debug, Copy, Clone, Default)]
pub struct Calculated;

/// Face values are the average of the two cells coupled through a cyclic patch pair.
#[derive(Debug, Copy, Clone, Default)]
pub struct CyclicCondition;

impl PatchCondition for FixedValue {
    fn type_name(&self) -> &str {
        "fixedValue"
    }

    fn evaluate(&self, _mesh: &FvMesh, _patch: usize, _cells: &DMatrix<f64>, _values: &mut DMatrix<f64>) {}
}

impl PatchCondition for ZeroGradient {
    fn type_name(&self) -> &str {
        "zeroGradient"
    }

    fn evaluate(&self, mesh: &FvMesh, patch: usize, cells: &DMatrix<f64>, values: &mut DMatrix<f64>) {
        for (face, &cell) in mesh.patches()[patch].face_cells.iter().enumerate() {
            values.row_mut(face).copy_from(&cells.row(cell));
        }
    }
}

impl PatchCondition for Calculated {
    fn type_name(&self) -> &str {
        "calculated"
    }

    fn evaluate(&self, _mesh: &FvMesh, _patch: usize, _cells: &DMatrix<f64>, _values: &mut DMatrix<f64>) {}
}

impl PatchCondition for CyclicCondition {
    fn type_name(&self) -> &str {
        "cyclic"
    }

    fn evaluate(&self, mesh: &FvMesh, patch: usize, cells: &DMatrix<f64>, values: &mut DMatrix<f64>) {
        let this = &mesh.patches()[patch];
        let neighbour = match this.topology {
            PatchTopology::Cyclic { neighbour_patch } => &mesh.patches()[neighbour_patch],
            _ => return,
        };
        for (face, (&own, &other)) in this.face_cells.iter().zip(&neighbour.face_cells).enumerate() {
            let average = (cells.row(own) + cells.row(other)) * 0.5;
            values.row_mut(face).copy_from(&average);
        }
    }
}

pub type PatchConditionFactory = Box<dyn Fn() -> Box<dyn PatchCondition> + Send + Sync>;

/// Run-time selection of patch conditions by type name.
pub struct PatchConditionRegistry {
    factories: FxHashMap<String, PatchConditionFactory>,
}

impl Debug for PatchConditionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("PatchConditionRegistry")
            .field("types", &names)
            .finish()
    }
}

impl Default for PatchConditionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PatchConditionRegistry {
    pub fn empty() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// A registry knowing `fixedValue`, `zeroGradient`, `calculated` and `cyclic`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("fixedValue", || Box::new(FixedValue));
        registry.register("zeroGradient", || Box::new(ZeroGradient));
        registry.register("calculated", || Box::new(Calculated));
        registry.register("cyclic", || Box::new(CyclicCondition));
        registry
    }

    /// Registers a factory, replacing any factory previously registered under the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn PatchCondition> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn PatchCondition>, CoupledSystemError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| CoupledSystemError::UnknownPatchCondition { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

#[derive(Debug)]
struct PatchField {
    values: DMatrix<f64>,
    condition: Box<dyn PatchCondition>,
}

/// A field with one value of kind `kind` per cell of a mesh partition.
#[derive(Debug)]
pub struct VolField {
    name: String,
    mesh: Arc<FvMesh>,
    kind: ElementKind,
    // cells × components
    cells: DMatrix<f64>,
    patches: Vec<PatchField>,
}

impl VolField {
    /// A zero field with one condition per mesh patch.
    pub fn try_new(
        name: impl Into<String>,
        mesh: Arc<FvMesh>,
        kind: ElementKind,
        conditions: Vec<Box<dyn PatchCondition>>,
    ) -> Result<Self, CoupledSystemError> {
        let name = name.into();
        if conditions.len() != mesh.patches().len() {
            return Err(CoupledSystemError::SizeMismatch {
                what: format!("patch conditions of field {name}"),
                expected: mesh.patches().len(),
                actual: conditions.len(),
            });
        }
        Ok(Self::from_parts(name, mesh, kind, conditions))
    }

    /// A zero field whose patch conditions are selected by type name.
    pub fn from_condition_names(
        name: impl Into<String>,
        mesh: Arc<FvMesh>,
        kind: ElementKind,
        registry: &PatchConditionRegistry,
        condition_names: &[&str],
    ) -> Result<Self, CoupledSystemError> {
        let conditions = condition_names
            .iter()
            .map(|&name| registry.create(name))
            .collect::<Result<_, _>>()?;
        Self::try_new(name, mesh, kind, conditions)
    }

    /// A zero field with `zeroGradient` on uncoupled patches, `cyclic` on cyclic patches and
    /// `calculated` on every other patch.
    pub fn with_default_conditions(name: impl Into<String>, mesh: Arc<FvMesh>, kind: ElementKind) -> Self {
        let conditions = mesh
            .patches()
            .iter()
            .map(|patch| -> Box<dyn PatchCondition> {
                match patch.topology {
                    PatchTopology::Uncoupled => Box::new(ZeroGradient),
                    PatchTopology::Cyclic { .. } => Box::new(CyclicCondition),
                    _ => Box::new(Calculated),
                }
            })
            .collect();
        Self::from_parts(name.into(), mesh, kind, conditions)
    }

    fn from_parts(
        name: String,
        mesh: Arc<FvMesh>,
        kind: ElementKind,
        conditions: Vec<Box<dyn PatchCondition>>,
    ) -> Self {
        let n_components = kind.num_components();
        let patches = mesh
            .patches()
            .iter()
            .zip(conditions)
            .map(|(patch, condition)| PatchField {
                values: DMatrix::zeros(patch.num_faces(), n_components),
                condition,
            })
            .collect();
        Self {
            name,
            cells: DMatrix::zeros(mesh.num_cells(), n_components),
            mesh,
            kind,
            patches,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &Arc<FvMesh> {
        &self.mesh
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Cell values, one row per cell and one column per component.
    pub fn cell_values(&self) -> &DMatrix<f64> {
        &self.cells
    }

    pub fn cell_values_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.cells
    }

    pub fn component(&self, component: usize) -> Vec<f64> {
        self.cells.column(component).iter().copied().collect()
    }

    /// Overwrites the cell values of one component.
    pub fn set_component(&mut self, component: usize, values: &[f64]) -> Result<(), CoupledSystemError> {
        if component >= self.kind.num_components() {
            return Err(CoupledSystemError::SizeMismatch {
                what: format!("components of field {}", self.name),
                expected: self.kind.num_components(),
                actual: component + 1,
            });
        }
        if values.len() != self.cells.nrows() {
            return Err(CoupledSystemError::SizeMismatch {
                what: format!("cell values of field {}", self.name),
                expected: self.cells.nrows(),
                actual: values.len(),
            });
        }
        self.cells.column_mut(component).copy_from_slice(values);
        Ok(())
    }

    /// Face values of a patch, one row per face and one column per component.
    pub fn patch_values(&self, patch: usize) -> &DMatrix<f64> {
        &self.patches[patch].values
    }

    pub fn patch_values_mut(&mut self, patch: usize) -> &mut DMatrix<f64> {
        &mut self.patches[patch].values
    }

    pub fn patch_condition(&self, patch: usize) -> &dyn PatchCondition {
        self.patches[patch].condition.as_ref()
    }

    /// Re-evaluates every patch from the current cell values.
    pub fn correct_boundary_conditions(&mut self) {
        let mesh = &self.mesh;
        let cells = &self.cells;
        for (index, patch) in self.patches.iter_mut().enumerate() {
            patch.condition.evaluate(mesh, index, cells, &mut patch.values);
        }
    }

    /// Moves the field to a new topology of the same cells. Face values of resized patches
    /// keep their leading rows.
    pub(crate) fn set_mesh(&mut self, mesh: Arc<FvMesh>) {
        let n_components = self.kind.num_components();
        for (patch_field, patch) in self.patches.iter_mut().zip(mesh.patches()) {
            if patch_field.values.nrows() != patch.num_faces() {
                let mut values = DMatrix::zeros(patch.num_faces(), n_components);
                let kept = patch_field.values.nrows().min(patch.num_faces());
                values
                    .rows_mut(0, kept)
                    .copy_from(&patch_field.values.rows(0, kept));
                patch_field.values = values;
            }
        }
        self.mesh = mesh;
    }
}
