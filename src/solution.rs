//! Reading the global solution back into the fields.
use crate::comm::{CommError, Communicator};
use crate::element::ElementKind;
use crate::field::VolField;
use crate::index_map::IndexMap;
use crate::registry::VariableRegistry;
use crate::CoupledSystemError;
use fvcouple_sparse::{BackendError, DistributedVector, OwnershipTable};
use log::debug;

/// Collective. Fetches the values of the given global rows, wherever they are owned.
///
/// On a single partition, rows are read directly. Otherwise the requested rows are sent to
/// their owners, which reply with the values, so every rank must call this the same number
/// of times.
pub fn gather_rows<C: Communicator>(
    comm: &C,
    ownership: &OwnershipTable,
    x: &DistributedVector,
    rows: &[usize],
) -> Result<Vec<f64>, CoupledSystemError> {
    if !comm.is_parallel() {
        return rows
            .iter()
            .map(|&row| x.get(row).ok_or(CoupledSystemError::Backend(BackendError::RowNotOwned { row })))
            .collect();
    }

    let mut requests = vec![Vec::new(); comm.size()];
    let mut positions = vec![Vec::new(); comm.size()];
    let mut unowned = None;
    for (position, &row) in rows.iter().enumerate() {
        match ownership.owner(row) {
            Some(owner) => {
                requests[owner].push(row);
                positions[owner].push(position);
            }
            None => unowned = Some(row),
        }
    }

    let incoming = comm.all_to_all(requests)?;
    let mut missing = None;
    let replies: Vec<Vec<f64>> = incoming
        .iter()
        .map(|requested| {
            requested
                .iter()
                .map(|&row| {
                    x.get(row).unwrap_or_else(|| {
                        missing = Some(row);
                        f64::NAN
                    })
                })
                .collect()
        })
        .collect();
    let values = comm.all_to_all(replies)?;

    if let Some(row) = unowned.or(missing) {
        return Err(BackendError::RowNotOwned { row }.into());
    }
    let mut gathered = vec![0.0; rows.len()];
    for (rank, (values, positions)) in values.into_iter().zip(positions).enumerate() {
        if values.len() != positions.len() {
            return Err(CommError::Malformed { peer: rank }.into());
        }
        for (value, position) in values.into_iter().zip(positions) {
            gathered[position] = value;
        }
    }
    Ok(gathered)
}

/// Collective. Copies the solution of every valid component into the fields and corrects their
/// boundary conditions.
///
/// Fields are visited by element kind, and within a kind in registration order.
pub(crate) fn scatter_solution<C: Communicator>(
    comm: &C,
    registry: &VariableRegistry,
    index_map: &IndexMap,
    ownership: &OwnershipTable,
    x: &DistributedVector,
    fields: &mut [VolField],
) -> Result<(), CoupledSystemError> {
    for kind in ElementKind::ALL {
        for (index, variable) in registry
            .variables()
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind == kind)
        {
            let ilower = index_map.entry(variable.mesh_index).ilower();
            let n_cells = variable.n_local_cells;
            let rows: Vec<usize> = (0..variable.num_valid_components())
                .flat_map(|valid| {
                    let bias = variable.bias(valid);
                    (0..n_cells).map(move |cell| ilower + cell + bias)
                })
                .collect();
            let values = gather_rows(comm, ownership, x, &rows)?;

            let field = &mut fields[index];
            for (&component, values) in variable.valid_components.iter().zip(values.chunks(n_cells.max(1))) {
                field.set_component(component, values)?;
            }
            field.correct_boundary_conditions();
            debug!("Retrieved solution of field {} on mesh {}", variable.name, variable.mesh_name);
        }
    }
    Ok(())
}
