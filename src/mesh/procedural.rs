//! Basic procedural mesh generation routines.
use crate::mesh::{BoundaryPatch, FvMesh, PatchTopology};
use std::cmp::min;

/// A line of `n_cells` cells with uncoupled `left` and `right` patches.
pub fn create_line_mesh(name: &str, n_cells: usize) -> FvMesh {
    let (lower, upper) = line_faces(n_cells);
    let patches = vec![
        BoundaryPatch::uncoupled("left", end_cell(n_cells, 0)),
        BoundaryPatch::uncoupled("right", end_cell(n_cells, n_cells.saturating_sub(1))),
    ];
    FvMesh::from_parts(name.to_string(), n_cells, lower, upper, patches)
        .with_solution_directions([true, false, false])
}

/// A line of `n_cells` cells whose ends are coupled through a pair of cyclic patches.
pub fn create_periodic_line_mesh(name: &str, n_cells: usize) -> FvMesh {
    let (lower, upper) = line_faces(n_cells);
    let patches = vec![
        BoundaryPatch::new(
            "left",
            end_cell(n_cells, 0),
            PatchTopology::Cyclic { neighbour_patch: 1 },
        ),
        BoundaryPatch::new(
            "right",
            end_cell(n_cells, n_cells.saturating_sub(1)),
            PatchTopology::Cyclic { neighbour_patch: 0 },
        ),
    ];
    FvMesh::from_parts(name.to_string(), n_cells, lower, upper, patches)
        .with_solution_directions([true, false, false])
}

/// The partition `rank` of a line of `n_global_cells` cells split into `n_ranks` contiguous
/// pieces.
///
/// Every partition carries the `left` and `right` patches (empty where they do not touch the
/// partition), followed by processor patches towards its lower and upper neighbour.
pub fn create_decomposed_line_mesh(name: &str, n_global_cells: usize, rank: usize, n_ranks: usize) -> FvMesh {
    decomposed_line(name, n_global_cells, rank, n_ranks, false)
}

/// Like [`create_decomposed_line_mesh`], but the ends of the line are coupled.
///
/// With more than one partition, the `left` patch of the first partition and the `right` patch
/// of the last partition are processor-periodic patches facing each other.
pub fn create_decomposed_periodic_line_mesh(
    name: &str,
    n_global_cells: usize,
    rank: usize,
    n_ranks: usize,
) -> FvMesh {
    if n_ranks == 1 {
        assert_eq!(rank, 0, "Rank must be smaller than the number of ranks");
        return create_periodic_line_mesh(name, n_global_cells);
    }
    decomposed_line(name, n_global_cells, rank, n_ranks, true)
}

fn decomposed_line(name: &str, n_global_cells: usize, rank: usize, n_ranks: usize, periodic: bool) -> FvMesh {
    assert!(rank < n_ranks, "Rank must be smaller than the number of ranks");
    let base = n_global_cells / n_ranks;
    let remainder = n_global_cells % n_ranks;
    let n_cells = base + usize::from(rank < remainder);

    let (lower, upper) = line_faces(n_cells);
    let end = |cells: Vec<usize>, patch_name: &str, neighbour_rank: usize| {
        if periodic && !cells.is_empty() {
            BoundaryPatch::new(
                patch_name,
                cells,
                PatchTopology::ProcessorCyclic { neighbour_rank, tag: 1 },
            )
        } else {
            BoundaryPatch::uncoupled(patch_name, cells)
        }
    };
    let first = if rank == 0 { end_cell(n_cells, 0) } else { Vec::new() };
    let last = if rank + 1 == n_ranks {
        end_cell(n_cells, n_cells.saturating_sub(1))
    } else {
        Vec::new()
    };
    let mut patches = vec![end(first, "left", n_ranks - 1), end(last, "right", 0)];
    if rank > 0 && n_cells > 0 {
        patches.push(BoundaryPatch::new(
            format!("procBoundary{}to{}", rank, rank - 1),
            vec![0],
            PatchTopology::Processor {
                neighbour_rank: rank - 1,
                tag: 0,
            },
        ));
    }
    if rank + 1 < n_ranks && n_cells > 0 {
        patches.push(BoundaryPatch::new(
            format!("procBoundary{}to{}", rank, rank + 1),
            vec![n_cells - 1],
            PatchTopology::Processor {
                neighbour_rank: rank + 1,
                tag: 0,
            },
        ));
    }
    FvMesh::from_parts(name.to_string(), n_cells, lower, upper, patches)
        .with_solution_directions([true, false, false])
}

/// A structured grid of `nx` by `ny` cells, numbered row by row, with uncoupled `left`,
/// `right`, `bottom` and `top` patches. The third direction is not solved.
pub fn create_rectangular_mesh(name: &str, nx: usize, ny: usize) -> FvMesh {
    let cell = |i: usize, j: usize| i + nx * j;
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            if i + 1 < nx {
                lower.push(cell(i, j));
                upper.push(cell(i + 1, j));
            }
            if j + 1 < ny {
                lower.push(cell(i, j));
                upper.push(cell(i, j + 1));
            }
        }
    }

    let (nx_faces, ny_faces) = (min(nx, nx * ny), min(ny, nx * ny));
    let patches = vec![
        BoundaryPatch::uncoupled("left", (0..ny_faces).map(|j| cell(0, j)).collect()),
        BoundaryPatch::uncoupled("right", (0..ny_faces).map(|j| cell(nx - 1, j)).collect()),
        BoundaryPatch::uncoupled("bottom", (0..nx_faces).map(|i| cell(i, 0)).collect()),
        BoundaryPatch::uncoupled("top", (0..nx_faces).map(|i| cell(i, ny - 1)).collect()),
    ];
    FvMesh::from_parts(name.to_string(), nx * ny, lower, upper, patches)
        .with_solution_directions([true, true, false])
}

// Faces between consecutive cells. Owners come first so that lower < upper on every face.
fn line_faces(n_cells: usize) -> (Vec<usize>, Vec<usize>) {
    let n_faces = n_cells.saturating_sub(1);
    ((0..n_faces).collect(), (1..=n_faces).collect())
}

fn end_cell(n_cells: usize, cell: usize) -> Vec<usize> {
    if n_cells > 0 {
        vec![cell]
    } else {
        Vec::new()
    }
}
