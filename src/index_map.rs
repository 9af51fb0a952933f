//! Translation of local cells and faces to global rows and columns.
//!
//! The global unknown vector is split into one block per mesh, in mesh registration order.
//! Within the block of a mesh, every valid component of every variable on the mesh owns
//! `n_global_cells` consecutive rows, and within those rows each partition owns the
//! consecutive range starting at its cell offset. The global row of local cell `c` is
//! therefore `ilower + c + bias`, where `ilower` is the mesh block start plus the partition's
//! cell offset and `bias` is the offset of the component block within the mesh block.
//!
//! Coupled patches are resolved once per topology into [`PatchStencil`]s holding, for every
//! face, the unbiased global columns the face couples to.
use crate::comm::Communicator;
use crate::mesh::{FvMesh, PatchTopology};
use crate::registry::VariableRegistry;
use crate::CoupledSystemError;
use fvcouple_sparse::nalgebra_sparse::pattern::SparsityPattern;
use fvcouple_sparse::{BackendError, RowLayout};
use log::{info, warn};
use rayon::prelude::*;
use std::sync::Arc;

/// A face of a non-conforming interface, resolved to global columns.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedFace {
    /// Unbiased global columns of the faces on the other side, with their weights.
    pub targets: Vec<(usize, f64)>,
    /// The summed weight is below the low-weight threshold. The face is treated as zero-flux.
    pub corrected: bool,
}

/// The resolved coupling of a boundary patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchStencil {
    Uncoupled,
    /// Partition boundary. The global column of the paired cell on the neighbouring partition,
    /// per face.
    Remote { columns: Vec<usize> },
    /// Periodic boundary. The global column of the paired cell, per face.
    Periodic { columns: Vec<usize> },
    Interpolated { faces: Vec<InterpolatedFace> },
    Unsupported { patch_type: String },
}

/// Global indexing data of one mesh partition.
#[derive(Debug, Clone)]
pub struct MeshEntry {
    mesh: Arc<FvMesh>,
    n_global_cells: usize,
    n_valid_components: usize,
    block_start: usize,
    cell_offset: usize,
    stencils: Vec<PatchStencil>,
    // Unbiased global columns coupled to each local cell, sorted
    cell_columns: Vec<Vec<usize>>,
    built: bool,
}

impl MeshEntry {
    fn new(mesh: Arc<FvMesh>, n_global_cells: usize) -> Self {
        Self {
            mesh,
            n_global_cells,
            n_valid_components: 0,
            block_start: 0,
            cell_offset: 0,
            stencils: Vec::new(),
            cell_columns: Vec::new(),
            built: false,
        }
    }

    pub fn mesh(&self) -> &Arc<FvMesh> {
        &self.mesh
    }

    pub fn n_global_cells(&self) -> usize {
        self.n_global_cells
    }

    /// Number of valid components of all variables on this mesh.
    pub fn n_valid_components(&self) -> usize {
        self.n_valid_components
    }

    /// Number of global unknowns on this mesh.
    pub fn block_size(&self) -> usize {
        self.n_valid_components * self.n_global_cells
    }

    /// The first global row of this partition, before adding a component bias.
    pub fn ilower(&self) -> usize {
        self.block_start + self.cell_offset
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn stencils(&self) -> &[PatchStencil] {
        &self.stencils
    }

    fn mismatch(&self, reason: String) -> CoupledSystemError {
        CoupledSystemError::MeshMismatch {
            mesh: self.mesh.name().to_string(),
            reason,
        }
    }

    /// Collective. Resolves the cell offset and every coupled patch.
    fn build<C: Communicator>(&mut self, comm: &C) -> Result<(), CoupledSystemError> {
        let mesh = Arc::clone(&self.mesh);
        self.cell_offset = comm.exclusive_prefix_sum(mesh.num_cells())?;
        let ilower = self.ilower();

        let remote = self.exchange_processor_rows(comm)?;
        let mut stencils = Vec::with_capacity(mesh.patches().len());
        for (index, (patch, remote)) in mesh.patches().iter().zip(remote).enumerate() {
            let stencil = match &patch.topology {
                PatchTopology::Uncoupled => PatchStencil::Uncoupled,
                PatchTopology::Processor { .. } | PatchTopology::ProcessorCyclic { .. } => PatchStencil::Remote {
                    columns: remote.unwrap_or_default(),
                },
                PatchTopology::Cyclic { neighbour_patch } => PatchStencil::Periodic {
                    columns: mesh.patches()[*neighbour_patch]
                        .face_cells
                        .iter()
                        .map(|&cell| ilower + cell)
                        .collect(),
                },
                PatchTopology::CyclicAmi { .. } => self.interpolated_stencil(comm, index)?,
                PatchTopology::Other { patch_type } => PatchStencil::Unsupported {
                    patch_type: patch_type.clone(),
                },
            };
            stencils.push(stencil);
        }

        self.cell_columns = cell_columns(&mesh, ilower, &stencils);
        self.stencils = stencils;
        self.built = true;
        info!(
            "Built index map for mesh {}: ilower {}, {} local cells, {} global cells",
            mesh.name(),
            ilower,
            mesh.num_cells(),
            self.n_global_cells
        );
        Ok(())
    }

    /// Swaps the global rows of processor patch face cells with the neighbouring partitions.
    ///
    /// Every partition sends, to each neighbour, a sequence of `[tag, n, rows...]` records, one
    /// per processor patch facing that neighbour. Returns the received rows per patch.
    fn exchange_processor_rows<C: Communicator>(
        &self,
        comm: &C,
    ) -> Result<Vec<Option<Vec<usize>>>, CoupledSystemError> {
        let patches = self.mesh.patches();
        let ilower = self.ilower();
        let neighbour = |topology: &PatchTopology| match *topology {
            PatchTopology::Processor { neighbour_rank, tag }
            | PatchTopology::ProcessorCyclic { neighbour_rank, tag } => Some((neighbour_rank, tag)),
            _ => None,
        };

        let mut outgoing = vec![Vec::new(); comm.size()];
        let mut invalid_rank = None;
        for patch in patches {
            if let Some((rank, tag)) = neighbour(&patch.topology) {
                match outgoing.get_mut(rank) {
                    Some(buffer) => {
                        buffer.extend([tag, patch.num_faces()]);
                        buffer.extend(patch.face_cells.iter().map(|&cell| ilower + cell));
                    }
                    None => invalid_rank = Some((patch.name.clone(), rank)),
                }
            }
        }
        let incoming = comm.all_to_all(outgoing)?;
        if let Some((patch, rank)) = invalid_rank {
            return Err(self.mismatch(format!("processor patch {patch} faces missing rank {rank}")));
        }

        let mut received: Vec<Vec<(usize, &[usize])>> = Vec::with_capacity(incoming.len());
        for (rank, buffer) in incoming.iter().enumerate() {
            let mut records = Vec::new();
            let mut rest = buffer.as_slice();
            while let [tag, n, tail @ ..] = rest {
                if tail.len() < *n {
                    return Err(self.mismatch(format!("truncated processor data from rank {rank}")));
                }
                let (rows, tail) = tail.split_at(*n);
                records.push((*tag, rows));
                rest = tail;
            }
            if !rest.is_empty() {
                return Err(self.mismatch(format!("truncated processor data from rank {rank}")));
            }
            received.push(records);
        }

        patches
            .iter()
            .map(|patch| {
                let Some((rank, tag)) = neighbour(&patch.topology) else {
                    return Ok(None);
                };
                let rows = received[rank]
                    .iter()
                    .find(|(t, _)| *t == tag)
                    .map(|(_, rows)| *rows)
                    .ok_or_else(|| {
                        self.mismatch(format!(
                            "processor patch {} has no counterpart with tag {tag} on rank {rank}",
                            patch.name
                        ))
                    })?;
                if rows.len() != patch.num_faces() {
                    return Err(self.mismatch(format!(
                        "processor patch {} has {} faces but its counterpart on rank {rank} has {}",
                        patch.name,
                        patch.num_faces(),
                        rows.len()
                    )));
                }
                Ok(Some(rows.to_vec()))
            })
            .collect()
    }

    /// Resolves one side of a non-conforming interface.
    ///
    /// Both sides use the interpolation data held by the owner side. The other side's face cells
    /// are brought to this partition through the distribution map when the interface spans
    /// partitions.
    fn interpolated_stencil<C: Communicator>(
        &self,
        comm: &C,
        index: usize,
    ) -> Result<PatchStencil, CoupledSystemError> {
        let patches = self.mesh.patches();
        let patch = &patches[index];
        let (other, coupling, this_side) = match &patch.topology {
            PatchTopology::CyclicAmi {
                neighbour_patch,
                owner: true,
                coupling: Some(coupling),
            } => (&patches[*neighbour_patch], coupling, &coupling.source),
            PatchTopology::CyclicAmi {
                neighbour_patch,
                owner: false,
                ..
            } => match &patches[*neighbour_patch].topology {
                PatchTopology::CyclicAmi {
                    coupling: Some(coupling),
                    ..
                } => (&patches[*neighbour_patch], coupling, &coupling.target),
                _ => return Err(self.mismatch(format!("interface {} has no owner side", patch.name))),
            },
            _ => return Err(self.mismatch(format!("patch {} is not an interface", patch.name))),
        };

        let ilower = self.ilower();
        let other_rows: Vec<usize> = other.face_cells.iter().map(|&cell| ilower + cell).collect();
        let constructed = match &this_side.map {
            Some(map) => map.distribute(comm, &other_rows)?,
            None => other_rows,
        };
        if patch.num_faces() == 0 || constructed.is_empty() {
            warn!(
                "Interface {} on mesh {} has an empty side on this partition",
                patch.name,
                self.mesh.name()
            );
        }

        let faces = this_side
            .addresses
            .iter()
            .zip(&this_side.weights)
            .zip(&this_side.weights_sum)
            .map(|((addresses, weights), &weights_sum)| {
                let corrected = coupling
                    .low_weight_correction
                    .map_or(false, |threshold| weights_sum < threshold);
                let targets = addresses
                    .iter()
                    .zip(weights)
                    .map(|(&address, &weight)| match constructed.get(address) {
                        Some(&column) if column != usize::MAX => Ok((column, weight)),
                        _ => Err(self.mismatch(format!(
                            "interface {} addresses face {address} outside the {} faces of {}",
                            patch.name,
                            constructed.len(),
                            other.name
                        ))),
                    })
                    .collect::<Result<_, _>>()?;
                Ok(InterpolatedFace { targets, corrected })
            })
            .collect::<Result<_, CoupledSystemError>>()?;
        Ok(PatchStencil::Interpolated { faces })
    }
}

fn cell_columns(mesh: &FvMesh, ilower: usize, stencils: &[PatchStencil]) -> Vec<Vec<usize>> {
    let mut columns: Vec<Vec<usize>> = (0..mesh.num_cells()).map(|cell| vec![ilower + cell]).collect();
    for (&l, &u) in mesh.lower_addr().iter().zip(mesh.upper_addr()) {
        columns[l].push(ilower + u);
        columns[u].push(ilower + l);
    }
    for (patch, stencil) in mesh.patches().iter().zip(stencils) {
        match stencil {
            PatchStencil::Remote { columns: remote } | PatchStencil::Periodic { columns: remote } => {
                for (&cell, &column) in patch.face_cells.iter().zip(remote) {
                    columns[cell].push(column);
                }
            }
            PatchStencil::Interpolated { faces } => {
                for (&cell, face) in patch.face_cells.iter().zip(faces) {
                    if !face.corrected {
                        columns[cell].extend(face.targets.iter().map(|&(column, _)| column));
                    }
                }
            }
            PatchStencil::Uncoupled | PatchStencil::Unsupported { .. } => {}
        }
    }
    columns.par_iter_mut().for_each(|cols| {
        cols.sort_unstable();
        cols.dedup();
    });
    columns
}

/// Global indexing data of every mesh of a coupled system, in registration order.
#[derive(Debug, Clone, Default)]
pub struct IndexMap {
    meshes: Vec<MeshEntry>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_mesh(&self, name: &str) -> Option<usize> {
        self.meshes.iter().position(|entry| entry.mesh.name() == name)
    }

    pub fn entry(&self, index: usize) -> &MeshEntry {
        &self.meshes[index]
    }

    pub fn entries(&self) -> &[MeshEntry] {
        &self.meshes
    }

    /// Total number of global unknowns.
    pub fn global_size(&self) -> usize {
        self.meshes.iter().map(MeshEntry::block_size).sum()
    }

    pub fn is_built(&self) -> bool {
        self.meshes.iter().all(MeshEntry::is_built)
    }

    /// Collective when the mesh is new. Returns the index of the mesh, registering it on first
    /// use.
    pub(crate) fn register_mesh<C: Communicator>(
        &mut self,
        comm: &C,
        mesh: &Arc<FvMesh>,
    ) -> Result<usize, CoupledSystemError> {
        if let Some(index) = self.find_mesh(mesh.name()) {
            return Ok(index);
        }
        let n_global_cells = comm.sum(mesh.num_cells())?;
        self.meshes.push(MeshEntry::new(Arc::clone(mesh), n_global_cells));
        Ok(self.meshes.len() - 1)
    }

    pub(crate) fn add_components(&mut self, index: usize, n_components: usize) {
        self.meshes[index].n_valid_components += n_components;
        self.meshes[index].built = false;
    }

    /// Replaces the topology of a registered mesh and invalidates its exchange data.
    pub(crate) fn replace_mesh(&mut self, index: usize, mesh: Arc<FvMesh>) {
        let entry = &mut self.meshes[index];
        entry.mesh = mesh;
        entry.built = false;
    }

    /// Collective. Builds the exchange data of every mesh whose topology is not yet resolved.
    pub(crate) fn build<C: Communicator>(&mut self, comm: &C) -> Result<(), CoupledSystemError> {
        let mut block_start = 0;
        for entry in &mut self.meshes {
            if entry.block_start != block_start {
                entry.block_start = block_start;
                entry.built = false;
            }
            block_start += entry.block_size();
        }
        for entry in self.meshes.iter_mut().filter(|entry| !entry.built) {
            entry.build(comm)?;
        }
        Ok(())
    }

    /// The owned rows of this partition and the sparsity pattern of the owned rows.
    ///
    /// Every pair of component blocks on a mesh is assumed to couple through the full cell
    /// stencil of the mesh.
    pub fn assemble_pattern(&self, registry: &VariableRegistry) -> Result<(RowLayout, SparsityPattern), BackendError> {
        let global_size = self.global_size();
        let mut ranges = Vec::new();
        let mut offsets = vec![0];
        let mut indices = Vec::new();

        for (mesh_index, entry) in self.meshes.iter().enumerate() {
            let mut biases = registry.biases_on_mesh(mesh_index);
            biases.sort_unstable();
            let ilower = entry.ilower();
            let n_cells = entry.mesh.num_cells();

            let rows: Vec<Vec<usize>> = entry
                .cell_columns
                .par_iter()
                .map(|cols| {
                    biases
                        .iter()
                        .flat_map(|&bias| cols.iter().map(move |&col| col + bias))
                        .collect()
                })
                .collect();

            for &bias in &biases {
                ranges.push(ilower + bias..ilower + bias + n_cells);
                for row in &rows {
                    indices.extend_from_slice(row);
                    offsets.push(indices.len());
                }
            }
        }

        let layout = RowLayout::try_new(global_size, ranges)?;
        let pattern =
            SparsityPattern::try_from_offsets_and_indices(layout.num_local_rows(), global_size, offsets, indices)
                .map_err(|err| BackendError::PatternMismatch {
                    reason: err.to_string(),
                })?;
        Ok((layout, pattern))
    }
}
