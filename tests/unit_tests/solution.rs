use fvcouple::fvcouple_sparse::{DistributedVector, OwnershipTable, RowLayout};
use fvcouple::mesh::procedural::{create_decomposed_line_mesh, create_line_mesh, create_rectangular_mesh};
use fvcouple::mesh::FvMesh;
use fvcouple::solution::gather_rows;
use fvcouple::{
    Communicator, CoupledSystem, CoupledSystemError, ElementKind, PatchCondition, PatchConditionRegistry,
    SerialComm, SystemSettings, ThreadComm, VolField,
};
use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;
use std::sync::{Arc, Mutex};

/// Records the cell values seen by every evaluation.
#[derive(Debug)]
struct Recorder {
    seen: Arc<Mutex<Vec<DMatrix<f64>>>>,
}

impl PatchCondition for Recorder {
    fn type_name(&self) -> &str {
        "recorder"
    }

    fn evaluate(&self, _mesh: &FvMesh, _patch: usize, cells: &DMatrix<f64>, _values: &mut DMatrix<f64>) {
        self.seen.lock().unwrap().push(cells.clone());
    }
}

fn fill_with_row_indices(x: &mut DistributedVector) {
    let rows: Vec<f64> = x.layout().global_rows().map(|row| row as f64).collect();
    x.copy_from_local_slice(&rows).unwrap();
}

#[test]
fn serial_solution_is_copied_into_fields() {
    let mesh = Arc::new(create_line_mesh("line", 3));
    let mut system = CoupledSystem::serial("coupled", SystemSettings::default());
    for name in ["p", "T"] {
        system
            .insert_field(VolField::with_default_conditions(name, Arc::clone(&mesh), ElementKind::Scalar))
            .unwrap();
    }
    system.create_system().unwrap();
    system
        .solution_mut()
        .unwrap()
        .copy_from_local_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        .unwrap();
    system.get_solution().unwrap();

    assert_eq!(system.field("p", "line").unwrap().component(0), vec![1.0, 2.0, 3.0]);
    assert_eq!(system.field("T", "line").unwrap().component(0), vec![4.0, 5.0, 6.0]);
    // Boundary values follow the new cell values
    let t = system.field("T", "line").unwrap();
    assert_eq!(t.patch_values(0)[(0, 0)], 4.0);
    assert_eq!(t.patch_values(1)[(0, 0)], 6.0);
}

#[test]
fn boundary_conditions_see_every_component() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut conditions = PatchConditionRegistry::with_builtins();
    {
        let seen = Arc::clone(&seen);
        conditions.register("recorder", move || {
            Box::new(Recorder {
                seen: Arc::clone(&seen),
            })
        });
    }

    // Two 2D cells: p at rows 0 and 1, Ux at rows 2 and 3, Uy at rows 4 and 5
    let mesh = Arc::new(create_rectangular_mesh("plate", 2, 1));
    let mut system = CoupledSystem::serial("coupled", SystemSettings::default());
    system
        .insert_field(VolField::with_default_conditions("p", Arc::clone(&mesh), ElementKind::Scalar))
        .unwrap();
    let names = vec!["recorder"; mesh.patches().len()];
    system
        .insert_field(
            VolField::from_condition_names("U", Arc::clone(&mesh), ElementKind::Vector, &conditions, &names).unwrap(),
        )
        .unwrap();
    system.create_system().unwrap();
    fill_with_row_indices(system.solution_mut().unwrap());
    system.get_solution().unwrap();

    let expected = DMatrix::from_row_slice(2, 3, &[2.0, 4.0, 0.0, 3.0, 5.0, 0.0]);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), mesh.patches().len());
    for cells in seen.iter() {
        assert_matrix_eq!(cells.clone(), expected.clone());
    }
}

#[test]
fn decomposed_solution_is_copied_into_fields() {
    let fields = ThreadComm::run(2, |comm| {
        let mesh = Arc::new(create_decomposed_line_mesh("line", 5, comm.rank(), comm.size()));
        let mut system = CoupledSystem::new("coupled", SystemSettings::default(), comm);
        for name in ["p", "T"] {
            system
                .insert_field(VolField::with_default_conditions(name, Arc::clone(&mesh), ElementKind::Scalar))
                .unwrap();
        }
        system.create_system().unwrap();
        fill_with_row_indices(system.solution_mut().unwrap());
        system.get_solution().unwrap();
        (
            system.field("p", "line").unwrap().component(0),
            system.field("T", "line").unwrap().component(0),
        )
    });

    assert_eq!(fields[0], (vec![0.0, 1.0, 2.0], vec![5.0, 6.0, 7.0]));
    assert_eq!(fields[1], (vec![3.0, 4.0], vec![8.0, 9.0]));
}

#[test]
fn rows_are_gathered_across_partitions() {
    let gathered = ThreadComm::run(2, |comm| {
        // Interleaved ownership: rank 0 owns rows 0 and 2, rank 1 owns rows 1 and 3
        let ranks = vec![vec![0..1, 2..3], vec![1..2, 3..4]];
        let ownership = OwnershipTable::try_from_rank_ranges(4, ranks.clone()).unwrap();
        let layout = RowLayout::try_new(4, ranks[comm.rank()].clone()).unwrap();
        let mut x = DistributedVector::zeros(Arc::new(layout));
        let values: Vec<f64> = x.layout().global_rows().map(|row| 10.0 * row as f64).collect();
        x.copy_from_local_slice(&values).unwrap();
        gather_rows(&comm, &ownership, &x, &[3, 0, 1, 2, 3]).unwrap()
    });

    for values in gathered {
        assert_eq!(values, vec![30.0, 0.0, 10.0, 20.0, 30.0]);
    }
}

#[test]
fn gathering_unowned_rows_fails() {
    let ownership = OwnershipTable::try_from_rank_ranges(2, vec![vec![0..2]]).unwrap();
    let x = DistributedVector::zeros(Arc::new(RowLayout::serial(2)));
    let result = gather_rows(&SerialComm, &ownership, &x, &[0, 2]);
    assert!(matches!(result, Err(CoupledSystemError::Backend(_))));
}
