//! Registration of the fields that make up the global unknown vector.
use crate::element::ElementKind;
use crate::CoupledSystemError;
use log::{debug, warn};
use rustc_hash::FxHashMap;

/// A field registered in the coupled system.
///
/// On a mesh with global cell count `n`, the unknowns of the variable form one contiguous
/// block of `n` rows per valid component, starting at `first_flat_offset` relative to the
/// mesh's block of the global vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub mesh_name: String,
    pub mesh_index: usize,
    pub kind: ElementKind,
    /// Indices of the components of `kind` that take part in the system.
    pub valid_components: Vec<usize>,
    pub n_local_cells: usize,
    pub n_global_cells: usize,
    /// Number of valid components of earlier variables on the same mesh.
    pub first_component: usize,
    pub first_flat_offset: usize,
    /// Index among the variables of the same element kind.
    pub local_id: usize,
}

impl Variable {
    pub fn num_valid_components(&self) -> usize {
        self.valid_components.len()
    }

    /// Offset of the block of the `valid_index`-th valid component within the mesh block.
    pub fn bias(&self, valid_index: usize) -> usize {
        self.first_flat_offset + valid_index * self.n_global_cells
    }

    /// Number of global unknowns of this variable.
    pub fn global_size(&self) -> usize {
        self.num_valid_components() * self.n_global_cells
    }
}

/// All variables of a coupled system, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<Variable>,
    lookup: FxHashMap<(String, String), usize>,
    frozen: bool,
}

/// A variable about to be registered.
#[derive(Debug, Clone)]
pub(crate) struct NewVariable<'a> {
    pub name: &'a str,
    pub mesh_name: &'a str,
    pub mesh_index: usize,
    pub kind: ElementKind,
    pub valid_components: Vec<usize>,
    pub n_local_cells: usize,
    pub n_global_cells: usize,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn get(&self, index: usize) -> Option<&Variable> {
        self.variables.get(index)
    }

    /// The registry index of the variable with the given name on the given mesh.
    pub fn find(&self, name: &str, mesh_name: &str) -> Option<usize> {
        self.lookup
            .get(&(name.to_string(), mesh_name.to_string()))
            .copied()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Rejects all further insertions.
    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Checks that the variable could be inserted, without inserting it.
    pub(crate) fn check_insert(&self, name: &str, mesh_name: &str) -> Result<(), CoupledSystemError> {
        if self.frozen {
            return Err(CoupledSystemError::FieldInsertedAfterEquation {
                field: name.to_string(),
                mesh: mesh_name.to_string(),
            });
        }
        if self.find(name, mesh_name).is_some() {
            return Err(CoupledSystemError::DuplicateField {
                field: name.to_string(),
                mesh: mesh_name.to_string(),
            });
        }
        Ok(())
    }

    /// Appends a variable, placing it after every earlier variable on the same mesh.
    pub(crate) fn insert(&mut self, new: NewVariable) -> Result<usize, CoupledSystemError> {
        self.check_insert(new.name, new.mesh_name)?;

        let (first_component, first_flat_offset) = self
            .variables
            .iter()
            .filter(|v| v.mesh_index == new.mesh_index)
            .fold((0, 0), |(cmpt, offset), v| {
                (cmpt + v.num_valid_components(), offset + v.global_size())
            });
        let local_id = self.variables.iter().filter(|v| v.kind == new.kind).count();

        if new.valid_components.is_empty() {
            warn!(
                "Field {} on mesh {} has no valid components and adds no unknowns",
                new.name, new.mesh_name
            );
        }

        let index = self.variables.len();
        self.variables.push(Variable {
            name: new.name.to_string(),
            mesh_name: new.mesh_name.to_string(),
            mesh_index: new.mesh_index,
            kind: new.kind,
            valid_components: new.valid_components,
            n_local_cells: new.n_local_cells,
            n_global_cells: new.n_global_cells,
            first_component,
            first_flat_offset,
            local_id,
        });
        self.lookup
            .insert((new.name.to_string(), new.mesh_name.to_string()), index);
        debug!(
            "Registered field {} on mesh {} at offset {} (first component {})",
            new.name, new.mesh_name, first_flat_offset, first_component
        );
        Ok(index)
    }

    /// Row offsets of every valid component block on the given mesh, in increasing order.
    pub fn biases_on_mesh(&self, mesh_index: usize) -> Vec<usize> {
        self.variables
            .iter()
            .filter(|v| v.mesh_index == mesh_index)
            .flat_map(|v| (0..v.num_valid_components()).map(move |i| v.bias(i)))
            .collect()
    }

    /// Names of every valid component, such as `Ux`, in registration order.
    pub fn component_names(&self) -> Vec<String> {
        self.variables
            .iter()
            .flat_map(|v| {
                let names = v.kind.component_names();
                v.valid_components
                    .iter()
                    .map(move |&c| format!("{}{}", v.name, names[c]))
            })
            .collect()
    }
}
