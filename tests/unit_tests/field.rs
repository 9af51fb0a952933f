use fvcouple::field::{PatchCondition, ZeroGradient};
use fvcouple::mesh::procedural::{create_line_mesh, create_periodic_line_mesh};
use fvcouple::mesh::FvMesh;
use fvcouple::{CoupledSystemError, ElementKind, PatchConditionRegistry, VolField};
use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;
use std::sync::Arc;

#[derive(Debug)]
struct Doubled;

impl PatchCondition for Doubled {
    fn type_name(&self) -> &str {
        "doubled"
    }

    fn evaluate(&self, mesh: &FvMesh, patch: usize, cells: &DMatrix<f64>, values: &mut DMatrix<f64>) {
        for (face, &cell) in mesh.patches()[patch].face_cells.iter().enumerate() {
            values.row_mut(face).copy_from(&(cells.row(cell) * 2.0));
        }
    }
}

#[test]
fn registry_selects_conditions_by_name() {
    let mut registry = PatchConditionRegistry::with_builtins();
    for name in ["fixedValue", "zeroGradient", "calculated", "cyclic"] {
        assert_eq!(registry.create(name).unwrap().type_name(), name);
    }
    assert!(matches!(
        registry.create("doubled"),
        Err(CoupledSystemError::UnknownPatchCondition { .. })
    ));

    registry.register("doubled", || Box::new(Doubled));
    assert!(registry.contains("doubled"));
    assert_eq!(registry.create("doubled").unwrap().type_name(), "doubled");
}

#[test]
fn field_requires_one_condition_per_patch() {
    let mesh = Arc::new(create_line_mesh("line", 3));
    let result = VolField::try_new("p", mesh, ElementKind::Scalar, vec![Box::new(ZeroGradient)]);
    assert!(matches!(
        result,
        Err(CoupledSystemError::SizeMismatch {
            expected: 2,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn boundary_conditions_are_evaluated_from_all_components() {
    let mut registry = PatchConditionRegistry::with_builtins();
    registry.register("doubled", || Box::new(Doubled));
    let mesh = Arc::new(create_line_mesh("line", 3));
    let mut field = VolField::from_condition_names(
        "U",
        mesh,
        ElementKind::Vector,
        &registry,
        &["zeroGradient", "doubled"],
    )
    .unwrap();

    field.set_component(0, &[1.0, 2.0, 3.0]).unwrap();
    field.set_component(1, &[4.0, 5.0, 6.0]).unwrap();
    field.correct_boundary_conditions();

    assert_matrix_eq!(field.patch_values(0).clone(), DMatrix::from_row_slice(1, 3, &[1.0, 4.0, 0.0]));
    assert_matrix_eq!(field.patch_values(1).clone(), DMatrix::from_row_slice(1, 3, &[6.0, 12.0, 0.0]));
    assert_eq!(field.component(1), vec![4.0, 5.0, 6.0]);
}

#[test]
fn cyclic_condition_averages_paired_cells() {
    let mesh = Arc::new(create_periodic_line_mesh("ring", 4));
    let mut field = VolField::with_default_conditions("T", mesh, ElementKind::Scalar);
    assert_eq!(field.patch_condition(0).type_name(), "cyclic");
    field.set_component(0, &[1.0, 0.0, 0.0, 3.0]).unwrap();
    field.correct_boundary_conditions();
    assert_eq!(field.patch_values(0)[(0, 0)], 2.0);
    assert_eq!(field.patch_values(1)[(0, 0)], 2.0);
}

#[test]
fn set_component_checks_sizes() {
    let mesh = Arc::new(create_line_mesh("line", 3));
    let mut field = VolField::with_default_conditions("p", mesh, ElementKind::Scalar);
    assert!(matches!(
        field.set_component(0, &[1.0]),
        Err(CoupledSystemError::SizeMismatch { .. })
    ));
    assert!(matches!(
        field.set_component(1, &[1.0, 2.0, 3.0]),
        Err(CoupledSystemError::SizeMismatch { .. })
    ));
}
