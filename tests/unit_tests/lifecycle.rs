use crate::{dense_matrix, dense_vector, DenseLuSolver};
use eyre::eyre;
use fvcouple::fvcouple_sparse::{DistributedMatrix, DistributedVector};
use fvcouple::mesh::procedural::{create_line_mesh, create_periodic_line_mesh};
use fvcouple::{
    CoupledSystem, CoupledSystemError, ElementKind, FvMatrix, FvMesh, LinearSolver, SystemSettings, VolField,
};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use std::error::Error;
use std::sync::Arc;
use util::assert_approx_matrix_eq;

fn line_system(settings: SystemSettings) -> (CoupledSystem, Arc<FvMesh>) {
    let mesh = Arc::new(create_line_mesh("line", 3));
    let mut system = CoupledSystem::serial("coupled", settings);
    system
        .insert_field(VolField::with_default_conditions("p", Arc::clone(&mesh), ElementKind::Scalar))
        .unwrap();
    (system, mesh)
}

/// Diagonal operator with a source and a boundary coefficient on the left patch.
fn diagonal_operator(mesh: &FvMesh, diag: f64, source: f64, left_bc: f64) -> FvMatrix {
    let mut operator = FvMatrix::zeros(mesh, ElementKind::Scalar);
    operator.diag_mut().fill(diag);
    operator.source_mut(0).fill(source);
    operator.boundary_coeffs_mut(0, 0).fill(left_bc);
    operator
}

fn diagonal(values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_diagonal(&DVector::from_column_slice(values))
}

#[test]
fn settings_from_json() {
    let settings: SystemSettings = serde_json::from_str(r#"{ "saveSystem": false }"#).unwrap();
    assert_eq!(
        settings,
        SystemSettings {
            save_system: false,
            update_a: false
        }
    );

    let settings: SystemSettings = serde_json::from_str("{}").unwrap();
    assert_eq!(settings, SystemSettings::default());
    assert!(settings.save_system);
    assert!(!settings.update_a);

    let settings: SystemSettings = serde_json::from_str(r#"{ "updateA": true }"#).unwrap();
    assert!(settings.save_system && settings.update_a);
}

#[test]
fn matrix_assembly_requirement() {
    let saved = SystemSettings::default();
    assert!(saved.requires_matrix_assembly(true));
    assert!(!saved.requires_matrix_assembly(false));

    let updated = SystemSettings {
        save_system: true,
        update_a: true,
    };
    assert!(updated.requires_matrix_assembly(false));

    let unsaved = SystemSettings {
        save_system: false,
        update_a: false,
    };
    assert!(unsaved.requires_matrix_assembly(false));
}

#[test]
fn saved_matrix_is_reused_and_only_rhs_is_rebuilt() {
    let (mut system, mesh) = line_system(SystemSettings::default());
    assert!(system.is_first_step());
    system
        .insert_equation("p", "p", &diagonal_operator(&mesh, 2.0, 1.0, 5.0))
        .unwrap();
    {
        let (matrix, rhs) = system.assemble().unwrap();
        assert_matrix_eq!(dense_matrix(matrix), diagonal(&[2.0, 2.0, 2.0]));
        assert_eq!(dense_vector(rhs), DVector::from_column_slice(&[6.0, 1.0, 1.0]));
    }

    system.finish_step();
    assert!(!system.is_first_step());
    assert!(!system.needs_matrix_assembly());
    assert!(system.rhs().unwrap().global_entries().all(|(_, v)| v == 0.0));

    // The second step only contributes sources and uncoupled boundary coefficients
    system
        .insert_equation("p", "p", &diagonal_operator(&mesh, 100.0, 3.0, 7.0))
        .unwrap();
    let (matrix, rhs) = system.assemble().unwrap();
    assert_matrix_eq!(dense_matrix(matrix), diagonal(&[2.0, 2.0, 2.0]));
    assert_eq!(dense_vector(rhs), DVector::from_column_slice(&[10.0, 3.0, 3.0]));
}

#[test]
fn updated_matrix_is_zeroed_between_steps() {
    let settings = SystemSettings {
        save_system: true,
        update_a: true,
    };
    let (mut system, mesh) = line_system(settings);
    system
        .insert_equation("p", "p", &diagonal_operator(&mesh, 2.0, 1.0, 0.0))
        .unwrap();
    system.assemble().unwrap();
    system.finish_step();

    assert!(system.matrix().unwrap().global_triplets().all(|(_, _, v)| v == 0.0));
    assert!(system.needs_matrix_assembly());
    system
        .insert_equation("p", "p", &diagonal_operator(&mesh, 3.0, 1.0, 0.0))
        .unwrap();
    let (matrix, rhs) = system.assemble().unwrap();
    assert_matrix_eq!(dense_matrix(matrix), diagonal(&[3.0, 3.0, 3.0]));
    assert_eq!(dense_vector(rhs), DVector::from_column_slice(&[1.0, 1.0, 1.0]));
}

#[test]
fn unsaved_system_is_dropped_and_fully_rebuilt() {
    // Without a saved system the matrix is assembled every step, whatever update_a says
    for update_a in [false, true] {
        let settings = SystemSettings {
            save_system: false,
            update_a,
        };
        let (mut system, mesh) = line_system(settings);
        system
            .insert_equation("p", "p", &diagonal_operator(&mesh, 2.0, 1.0, 0.0))
            .unwrap();
        system.assemble().unwrap();
        system.finish_step();

        assert!(system.matrix().is_none());
        assert!(system.rhs().is_none());
        assert!(system.needs_matrix_assembly());

        system
            .insert_equation("p", "p", &diagonal_operator(&mesh, 4.0, 2.0, 0.0))
            .unwrap();
        let (matrix, rhs) = system.assemble().unwrap();
        assert_matrix_eq!(dense_matrix(matrix), diagonal(&[4.0, 4.0, 4.0]));
        assert_eq!(dense_vector(rhs), DVector::from_column_slice(&[2.0, 2.0, 2.0]));
    }
}

#[test]
fn create_system_is_idempotent() {
    let (mut system, _) = line_system(SystemSettings::default());
    system.create_system().unwrap();
    system
        .solution_mut()
        .unwrap()
        .copy_from_local_slice(&[1.0, 2.0, 3.0])
        .unwrap();
    system.create_system().unwrap();
    assert_eq!(
        dense_vector(system.solution().unwrap()),
        DVector::from_column_slice(&[1.0, 2.0, 3.0])
    );
    assert!(system.registry().is_frozen());
}

#[test]
fn solve_with_external_solver() {
    let (mut system, mesh) = line_system(SystemSettings::default());
    let mut operator = FvMatrix::zeros(&mesh, ElementKind::Scalar);
    operator.diag_mut().fill(2.0);
    operator.upper_mut().fill(-1.0);
    operator.source_mut(0).copy_from_slice(&[0.0, 0.0, 4.0]);
    system.insert_equation("p", "p", &operator).unwrap();

    let mut solver = DenseLuSolver::default();
    system.solve_with(&mut solver).unwrap();

    assert_eq!(solver.solves, 1);
    assert!(!system.is_first_step());
    let p = DVector::from_vec(system.field("p", "line").unwrap().component(0));
    assert_approx_matrix_eq!(&p, &DVector::from_column_slice(&[1.0, 2.0, 3.0]), abstol = 1e-12);
    // Boundary values were corrected from the solution
    let right = system.field("p", "line").unwrap().patch_values(1)[(0, 0)];
    assert!((right - 3.0).abs() <= 1e-12);
}

#[derive(Debug)]
struct FailingSolver;

impl LinearSolver for FailingSolver {
    fn solve(&mut self, _: &DistributedMatrix, _: &DistributedVector, _: &mut DistributedVector) -> eyre::Result<()> {
        Err(eyre!("iteration diverged"))
    }
}

#[test]
fn solver_failure_poisons_the_system() {
    let (mut system, mesh) = line_system(SystemSettings::default());
    system
        .insert_equation("p", "p", &diagonal_operator(&mesh, 1.0, 1.0, 0.0))
        .unwrap();
    let err = system.solve_with(&mut FailingSolver).unwrap_err();
    assert!(matches!(err, CoupledSystemError::Solver(_)));
    assert!(err.source().is_some());
    assert!(system.is_poisoned());
    // The step was not finished
    assert!(system.is_first_step());
    assert_eq!(system.field("p", "line").unwrap().component(0), vec![0.0; 3]);
}

#[test]
fn mesh_update_rebuilds_coupling() {
    let (mut system, mesh) = line_system(SystemSettings::default());
    system
        .insert_equation("p", "p", &diagonal_operator(&mesh, 1.0, 0.0, 0.0))
        .unwrap();
    system.assemble().unwrap();
    system.finish_step();

    // Same cells and patch names, but the ends are now periodic
    let periodic = Arc::new(create_periodic_line_mesh("line", 3));
    system.update_mesh(Arc::clone(&periodic)).unwrap();
    assert!(system.is_first_step());
    assert!(system.matrix().is_none());
    assert!(Arc::ptr_eq(system.field("p", "line").unwrap().mesh(), &periodic));

    system
        .insert_equation("p", "p", &diagonal_operator(&periodic, 1.0, 0.0, 2.0))
        .unwrap();
    let (matrix, _) = system.assemble().unwrap();
    assert_eq!(matrix.get(0, 0), Some(1.0));
    assert_eq!(matrix.get(0, 2), Some(-2.0));
}

#[test]
fn mesh_update_rejects_changed_cells() {
    let (mut system, _) = line_system(SystemSettings::default());
    let result = system.update_mesh(Arc::new(create_line_mesh("line", 4)));
    assert!(matches!(result, Err(CoupledSystemError::MeshMismatch { .. })));

    let (mut system, _) = line_system(SystemSettings::default());
    let result = system.update_mesh(Arc::new(create_line_mesh("elsewhere", 3)));
    assert!(matches!(result, Err(CoupledSystemError::MeshMismatch { .. })));
}
