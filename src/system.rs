//! The coupled system: registered fields, the global linear system and its lifecycle.
use crate::assembly::{assemble_matrix_and_vector, assemble_vector, validate_operator, BlockInsertion};
use crate::comm::{Communicator, SerialComm};
use crate::field::VolField;
use crate::index_map::IndexMap;
use crate::mesh::FvMesh;
use crate::operator::{ComponentCoupling, CouplingMatrix, LinearOperator};
use crate::registry::{NewVariable, Variable, VariableRegistry};
use crate::settings::SystemSettings;
use crate::solution::scatter_solution;
use crate::CoupledSystemError;
use fvcouple_sparse::{BackendError, DistributedMatrix, DistributedVector, OwnershipTable};
use log::{debug, error, info};
use std::sync::Arc;

/// An external linear solver.
pub trait LinearSolver {
    /// Solves `matrix * x = rhs`, using the incoming `x` as the initial guess.
    ///
    /// Called collectively on every partition.
    fn solve(&mut self, matrix: &DistributedMatrix, rhs: &DistributedVector, x: &mut DistributedVector)
        -> eyre::Result<()>;
}

#[derive(Debug)]
struct GlobalSystem {
    matrix: DistributedMatrix,
    rhs: DistributedVector,
    solution: DistributedVector,
    ownership: OwnershipTable,
}

/// Several fields on one or more meshes, solved together as one sparse linear system.
///
/// Fields are inserted first, then equations are inserted every step, the system is solved,
/// and the step is finished. Operations documented as collective must be called in the same
/// order on every partition.
///
/// Any error poisons the system. The next [`assemble`](Self::assemble) then fails on every
/// partition, so that no partition is left waiting in a collective.
pub struct CoupledSystem<C: Communicator = SerialComm> {
    name: String,
    settings: SystemSettings,
    comm: C,
    registry: VariableRegistry,
    index_map: IndexMap,
    // Indexed like the registry
    fields: Vec<VolField>,
    system: Option<GlobalSystem>,
    first_step: bool,
    poisoned: bool,
}

impl CoupledSystem<SerialComm> {
    pub fn serial(name: impl Into<String>, settings: SystemSettings) -> Self {
        Self::new(name, settings, SerialComm)
    }
}

impl<C: Communicator> CoupledSystem<C> {
    pub fn new(name: impl Into<String>, settings: SystemSettings, comm: C) -> Self {
        Self {
            name: name.into(),
            settings,
            comm,
            registry: VariableRegistry::new(),
            index_map: IndexMap::new(),
            fields: Vec::new(),
            system: None,
            first_step: true,
            poisoned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SystemSettings {
        &self.settings
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn index_map(&self) -> &IndexMap {
        &self.index_map
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn is_first_step(&self) -> bool {
        self.first_step
    }

    /// Whether the next insertion writes matrix coefficients or only the right-hand side.
    pub fn needs_matrix_assembly(&self) -> bool {
        self.settings.requires_matrix_assembly(self.first_step)
    }

    fn poison_on_error<T>(&mut self, result: Result<T, CoupledSystemError>) -> Result<T, CoupledSystemError> {
        if let Err(err) = &result {
            if !self.poisoned {
                error!("Coupled system {} is no longer usable: {err}", self.name);
            }
            self.poisoned = true;
        }
        result
    }

    /// Collective. Adds a field to the system and returns its registry index.
    ///
    /// The set of fields is frozen when the global system is created, which happens at the latest
    /// on the first equation insertion. Later insertions fail.
    pub fn insert_field(&mut self, field: VolField) -> Result<usize, CoupledSystemError> {
        let result = self.try_insert_field(field);
        self.poison_on_error(result)
    }

    fn try_insert_field(&mut self, field: VolField) -> Result<usize, CoupledSystemError> {
        let mesh = Arc::clone(field.mesh());
        self.registry.check_insert(field.name(), mesh.name())?;
        let mesh_index = self.index_map.register_mesh(&self.comm, &mesh)?;

        let entry = self.index_map.entry(mesh_index);
        if entry.mesh().num_cells() != mesh.num_cells() {
            return Err(CoupledSystemError::MeshMismatch {
                mesh: mesh.name().to_string(),
                reason: format!(
                    "field {} has {} cells but the registered mesh has {}",
                    field.name(),
                    mesh.num_cells(),
                    entry.mesh().num_cells()
                ),
            });
        }

        let valid_components = field.kind().valid_components(mesh.solution_directions());
        let n_valid = valid_components.len();
        let index = self.registry.insert(NewVariable {
            name: field.name(),
            mesh_name: mesh.name(),
            mesh_index,
            kind: field.kind(),
            valid_components,
            n_local_cells: mesh.num_cells(),
            n_global_cells: entry.n_global_cells(),
        })?;
        self.index_map.add_components(mesh_index, n_valid);
        self.fields.push(field);
        Ok(index)
    }

    /// The registry index of a field, if it is part of the system.
    pub fn find_field(&self, name: &str, mesh_name: &str) -> Option<usize> {
        self.registry.find(name, mesh_name)
    }

    pub fn field(&self, name: &str, mesh_name: &str) -> Option<&VolField> {
        self.find_field(name, mesh_name).map(|index| &self.fields[index])
    }

    pub fn field_mut(&mut self, name: &str, mesh_name: &str) -> Option<&mut VolField> {
        let index = self.find_field(name, mesh_name)?;
        Some(&mut self.fields[index])
    }

    pub fn fields(&self) -> &[VolField] {
        &self.fields
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.registry
            .variables()
            .iter()
            .map(|v| v.name.as_str())
            .collect()
    }

    /// Names of every unknown component, such as `Ux`.
    pub fn component_names(&self) -> Vec<String> {
        self.registry.component_names()
    }

    /// Number of global unknowns.
    pub fn global_size(&self) -> usize {
        self.index_map.global_size()
    }

    pub fn matrix(&self) -> Option<&DistributedMatrix> {
        self.system.as_ref().map(|system| &system.matrix)
    }

    pub fn rhs(&self) -> Option<&DistributedVector> {
        self.system.as_ref().map(|system| &system.rhs)
    }

    pub fn solution(&self) -> Option<&DistributedVector> {
        self.system.as_ref().map(|system| &system.solution)
    }

    /// The solution vector, for solvers driven outside of [`solve_with`](Self::solve_with).
    pub fn solution_mut(&mut self) -> Option<&mut DistributedVector> {
        self.system.as_mut().map(|system| &mut system.solution)
    }

    /// Collective. Allocates the global matrix and vectors if they do not exist yet.
    ///
    /// Freezes the set of fields.
    pub fn create_system(&mut self) -> Result<(), CoupledSystemError> {
        let result = self.try_create_system();
        self.poison_on_error(result)
    }

    fn try_create_system(&mut self) -> Result<(), CoupledSystemError> {
        if self.system.is_some() {
            return Ok(());
        }
        self.registry.freeze();
        self.index_map.build(&self.comm)?;

        let (layout, pattern) = self.index_map.assemble_pattern(&self.registry)?;
        let layout = Arc::new(layout);
        let owned: Vec<usize> = layout
            .ranges()
            .iter()
            .flat_map(|range| [range.start, range.end])
            .collect();
        let rank_ranges = self
            .comm
            .all_gather_varcount(&owned)?
            .into_iter()
            .map(|bounds| {
                bounds
                    .chunks_exact(2)
                    .map(|pair| pair[0]..pair[1])
                    .collect()
            });
        let ownership = OwnershipTable::try_from_rank_ranges(layout.global_size(), rank_ranges)?;
        if !ownership.is_complete() {
            return Err(BackendError::InvalidLayout {
                reason: format!("partitions do not own all {} global rows", layout.global_size()),
            }
            .into());
        }

        let matrix = DistributedMatrix::try_from_pattern(Arc::clone(&layout), pattern)?;
        info!(
            "Created coupled system {}: {} global unknowns, {} local rows, {} local nonzeros",
            self.name,
            layout.global_size(),
            layout.num_local_rows(),
            matrix.local_nnz()
        );
        self.system = Some(GlobalSystem {
            matrix,
            rhs: DistributedVector::zeros(Arc::clone(&layout)),
            solution: DistributedVector::zeros(layout),
            ownership,
        });
        Ok(())
    }

    /// Collective on first use. Inserts an operator coupling every valid component of
    /// `col_field` to the same component of `row_field`.
    ///
    /// Both fields and the operator must be of the same element kind; mixed couplings go
    /// through [`insert_coupling`](Self::insert_coupling).
    pub fn insert_equation<Op>(
        &mut self,
        row_field: &str,
        col_field: &str,
        operator: &Op,
    ) -> Result<(), CoupledSystemError>
    where
        Op: LinearOperator + ?Sized,
    {
        let result = self.try_insert_equation(row_field, col_field, operator);
        self.poison_on_error(result)
    }

    fn try_insert_equation<Op>(
        &mut self,
        row_field: &str,
        col_field: &str,
        operator: &Op,
    ) -> Result<(), CoupledSystemError>
    where
        Op: LinearOperator + ?Sized,
    {
        self.try_create_system()?;

        let mesh_name = operator.mesh_name();
        let row = resolve(&self.registry, row_field, mesh_name)?;
        let col = resolve(&self.registry, col_field, mesh_name)?;
        let operator_kind = operator.element_kind();
        if row.kind != operator_kind || col.kind != operator_kind {
            return Err(CoupledSystemError::ComponentMismatch {
                row_field: row.name.clone(),
                row_kind: row.kind,
                col_field: col.name.clone(),
                col_kind: col.kind,
                operator_kind,
            });
        }

        let couplings: Vec<_> = row
            .valid_components
            .iter()
            .enumerate()
            .map(|(valid, &component)| ComponentCoupling::new(valid, valid, component))
            .collect();
        self.insert_validated(row_field, col_field, operator, &couplings)
    }

    /// Collective on first use. Inserts a list-form coupling between arbitrary components of
    /// two fields on the same mesh.
    pub fn insert_coupling<Op>(
        &mut self,
        row_field: &str,
        col_field: &str,
        coupling: &CouplingMatrix<Op>,
    ) -> Result<(), CoupledSystemError>
    where
        Op: LinearOperator,
    {
        let result = self.try_insert_coupling(row_field, col_field, coupling);
        self.poison_on_error(result)
    }

    fn try_insert_coupling<Op>(
        &mut self,
        row_field: &str,
        col_field: &str,
        coupling: &CouplingMatrix<Op>,
    ) -> Result<(), CoupledSystemError>
    where
        Op: LinearOperator,
    {
        self.try_create_system()?;

        let mesh_name = coupling.operator().mesh_name();
        let row = resolve(&self.registry, row_field, mesh_name)?;
        let col = resolve(&self.registry, col_field, mesh_name)?;
        for term in coupling.couplings() {
            if term.row >= row.num_valid_components() || term.col >= col.num_valid_components() {
                return Err(CoupledSystemError::InvalidCoupling {
                    reason: format!(
                        "component ({}, {}) of {} ({} valid) and {} ({} valid)",
                        term.row,
                        term.col,
                        row.name,
                        row.num_valid_components(),
                        col.name,
                        col.num_valid_components()
                    ),
                });
            }
        }
        self.insert_validated(row_field, col_field, coupling.operator(), coupling.couplings())
    }

    fn insert_validated<Op>(
        &mut self,
        row_field: &str,
        col_field: &str,
        operator: &Op,
        couplings: &[ComponentCoupling],
    ) -> Result<(), CoupledSystemError>
    where
        Op: LinearOperator + ?Sized,
    {
        let mesh_name = operator.mesh_name();
        let row = resolve(&self.registry, row_field, mesh_name)?;
        let col = resolve(&self.registry, col_field, mesh_name)?;
        let entry = self.index_map.entry(row.mesh_index);
        let components: Vec<usize> = couplings.iter().map(|term| term.component).collect();
        validate_operator(operator, entry, &components)?;

        let full = self.settings.requires_matrix_assembly(self.first_step);
        let system = self
            .system
            .as_mut()
            .expect("Internal error: global system must exist after creation");
        for term in couplings {
            let block = BlockInsertion {
                entry,
                row_bias: row.bias(term.row),
                col_bias: col.bias(term.col),
                component: term.component,
            };
            if full {
                assemble_matrix_and_vector(&mut system.matrix, &mut system.rhs, operator, &block)?;
            } else {
                assemble_vector(&mut system.rhs, operator, &block)?;
            }
        }
        debug!(
            "Inserted {} equation for {} / {} on mesh {} ({} component terms)",
            if full { "matrix and vector" } else { "vector-only" },
            row_field,
            col_field,
            mesh_name,
            couplings.len()
        );
        Ok(())
    }

    /// Collective. Agrees on failure across partitions and finalizes the matrix.
    ///
    /// Returns [`CoupledSystemError::RemoteFailure`] on every partition if any partition has
    /// failed, including this one.
    pub fn assemble(&mut self) -> Result<(&DistributedMatrix, &DistributedVector), CoupledSystemError> {
        let created = self.try_create_system();
        let failed = self.poisoned || created.is_err();
        let first_failed = self.comm.first_failed_rank(failed);
        self.poison_on_error(created)?;
        if let Some(rank) = self.poison_on_error(first_failed.map_err(CoupledSystemError::from))? {
            return self.poison_on_error(Err(CoupledSystemError::RemoteFailure { rank }));
        }

        let system = self
            .system
            .as_mut()
            .expect("Internal error: global system must exist after creation");
        system.matrix.assemble();
        Ok((&system.matrix, &system.rhs))
    }

    /// Collective. Copies the solution vector into the fields and corrects their boundary
    /// conditions.
    pub fn get_solution(&mut self) -> Result<(), CoupledSystemError> {
        let result = self.try_get_solution();
        self.poison_on_error(result)
    }

    fn try_get_solution(&mut self) -> Result<(), CoupledSystemError> {
        self.try_create_system()?;
        let system = self
            .system
            .as_ref()
            .expect("Internal error: global system must exist after creation");
        scatter_solution(
            &self.comm,
            &self.registry,
            &self.index_map,
            &system.ownership,
            &system.solution,
            &mut self.fields,
        )
    }

    /// Collective. Assembles, solves with the external solver, reads back the solution and
    /// finishes the step.
    pub fn solve_with<S>(&mut self, solver: &mut S) -> Result<(), CoupledSystemError>
    where
        S: LinearSolver + ?Sized,
    {
        self.assemble()?;
        let system = self
            .system
            .as_mut()
            .expect("Internal error: global system must exist after assembly");
        let solved = solver.solve(&system.matrix, &system.rhs, &mut system.solution);

        let first_failed = self.comm.first_failed_rank(solved.is_err());
        self.poison_on_error(solved.map_err(CoupledSystemError::Solver))?;
        if let Some(rank) = self.poison_on_error(first_failed.map_err(CoupledSystemError::from))? {
            return self.poison_on_error(Err(CoupledSystemError::RemoteFailure { rank }));
        }

        self.get_solution()?;
        self.finish_step();
        Ok(())
    }

    /// Ends a time step.
    ///
    /// Without `save_system` the global system is dropped and rebuilt on the next insertion.
    /// Otherwise the right-hand side is cleared, and the matrix too when `update_a` is set.
    pub fn finish_step(&mut self) {
        self.first_step = false;
        if !self.settings.save_system {
            self.system = None;
        } else if let Some(system) = &mut self.system {
            system.rhs.zero();
            if self.settings.update_a {
                system.matrix.zero_entries();
            }
        }
        debug!("Finished step of coupled system {}", self.name);
    }

    /// Replaces the topology of a mesh whose cells are unchanged, for example after mesh
    /// motion changed its interface weights.
    ///
    /// Exchange data is rebuilt and the global system is recreated on the next insertion, which
    /// assembles the matrix again.
    pub fn update_mesh(&mut self, mesh: Arc<FvMesh>) -> Result<(), CoupledSystemError> {
        let result = self.try_update_mesh(mesh);
        self.poison_on_error(result)
    }

    fn try_update_mesh(&mut self, mesh: Arc<FvMesh>) -> Result<(), CoupledSystemError> {
        let index = self
            .index_map
            .find_mesh(mesh.name())
            .ok_or_else(|| CoupledSystemError::MeshMismatch {
                mesh: mesh.name().to_string(),
                reason: String::from("mesh is not part of the coupled system"),
            })?;
        self.index_map.entry(index).mesh().check_same_cells(&mesh)?;

        for (variable, field) in self.registry.variables().iter().zip(&mut self.fields) {
            if variable.mesh_index == index {
                field.set_mesh(Arc::clone(&mesh));
            }
        }
        info!("Updated topology of mesh {} in coupled system {}", mesh.name(), self.name);
        self.index_map.replace_mesh(index, mesh);
        self.system = None;
        self.first_step = true;
        Ok(())
    }

    /// Logs the error and terminates every partition.
    pub fn abort(&self, err: &CoupledSystemError) -> ! {
        error!("Aborting coupled system {}: {err}", self.name);
        self.comm.abort(1)
    }
}

fn resolve<'a>(
    registry: &'a VariableRegistry,
    field: &str,
    mesh_name: &str,
) -> Result<&'a Variable, CoupledSystemError> {
    registry
        .find(field, mesh_name)
        .and_then(|index| registry.get(index))
        .ok_or_else(|| CoupledSystemError::UnknownField {
            field: field.to_string(),
            mesh: mesh_name.to_string(),
        })
}
