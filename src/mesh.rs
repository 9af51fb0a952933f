//! Finite-volume mesh partitions as seen by the coupled assembler.
//!
//! A mesh partition is described purely by its addressing: the number of cells, the
//! lower (owner) and upper (neighbour) cell of every internal face, and a list of boundary
//! patches, each with the cells adjacent to its faces and a coupling topology.
use crate::comm::Communicator;
use crate::CoupledSystemError;
use std::sync::Arc;

pub mod procedural;

/// How the faces of a boundary patch couple to cells elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchTopology {
    /// A physical boundary. Contributions go to the diagonal and the right-hand side.
    Uncoupled,
    /// A partition boundary. Face `i` is paired with face `i` of the patch with the same tag
    /// on `neighbour_rank`.
    Processor { neighbour_rank: usize, tag: usize },
    /// A partition boundary that is also periodic.
    ProcessorCyclic { neighbour_rank: usize, tag: usize },
    /// A periodic boundary paired face by face with another patch of the same partition.
    Cyclic { neighbour_patch: usize },
    /// A non-conforming periodic interface. Only the owner side holds the interpolation data,
    /// which is shared by both sides.
    CyclicAmi {
        neighbour_patch: usize,
        owner: bool,
        coupling: Option<Arc<AmiCoupling>>,
    },
    /// Any other coupled patch type.
    Other { patch_type: String },
}

impl PatchTopology {
    pub fn type_name(&self) -> &str {
        match self {
            Self::Uncoupled => "patch",
            Self::Processor { .. } => "processor",
            Self::ProcessorCyclic { .. } => "processorCyclic",
            Self::Cyclic { .. } => "cyclic",
            Self::CyclicAmi { .. } => "cyclicAMI",
            Self::Other { patch_type } => patch_type.as_str(),
        }
    }

    pub fn is_coupled(&self) -> bool {
        !matches!(self, Self::Uncoupled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPatch {
    pub name: String,
    pub face_cells: Vec<usize>,
    pub topology: PatchTopology,
}

impl BoundaryPatch {
    pub fn new(name: impl Into<String>, face_cells: Vec<usize>, topology: PatchTopology) -> Self {
        Self {
            name: name.into(),
            face_cells,
            topology,
        }
    }

    pub fn uncoupled(name: impl Into<String>, face_cells: Vec<usize>) -> Self {
        Self::new(name, face_cells, PatchTopology::Uncoupled)
    }

    pub fn num_faces(&self) -> usize {
        self.face_cells.len()
    }
}

/// Interpolation data of a non-conforming interface.
#[derive(Debug, Clone, PartialEq)]
pub struct AmiCoupling {
    /// Faces whose summed weight falls below the threshold are treated as zero-flux.
    pub low_weight_correction: Option<f64>,
    /// Weights of the owner-side faces onto neighbour-side faces.
    pub source: AmiWeights,
    /// Weights of the neighbour-side faces onto owner-side faces.
    pub target: AmiWeights,
}

/// Interpolation weights of one side of an interface onto the other side.
#[derive(Debug, Clone, PartialEq)]
pub struct AmiWeights {
    /// For each face of this side, indices into the list of other-side faces constructed by `map`.
    pub addresses: Vec<Vec<usize>>,
    pub weights: Vec<Vec<f64>>,
    pub weights_sum: Vec<f64>,
    /// Brings other-side face data from the partitions that own it. Without a map, the
    /// other side is local and indexed directly.
    pub map: Option<DistributeMap>,
}

impl AmiWeights {
    pub fn num_faces(&self) -> usize {
        self.addresses.len()
    }

    /// Local weights with every sum computed from the weights.
    pub fn local(addresses: Vec<Vec<usize>>, weights: Vec<Vec<f64>>) -> Self {
        let weights_sum = weights.iter().map(|w| w.iter().sum()).collect();
        Self {
            addresses,
            weights,
            weights_sum,
            map: None,
        }
    }
}

/// Redistribution of per-face data between partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributeMap {
    /// `sub_map[r]`: local entries sent to rank `r`.
    pub sub_map: Vec<Vec<usize>>,
    /// `construct_map[r]`: positions in the constructed list of the entries received from rank `r`.
    pub construct_map: Vec<Vec<usize>>,
    pub construct_size: usize,
}

impl DistributeMap {
    /// Collective. Builds the constructed list from the values held by every rank.
    pub fn distribute<C: Communicator>(
        &self,
        comm: &C,
        values: &[usize],
    ) -> Result<Vec<usize>, CoupledSystemError> {
        let size = comm.size();
        let map_error = |reason: String| CoupledSystemError::MeshMismatch {
            mesh: String::from("<distribute map>"),
            reason,
        };

        let outgoing: Vec<Vec<usize>> = (0..size)
            .map(|rank| {
                self.sub_map
                    .get(rank)
                    .map(|indices| {
                        indices
                            .iter()
                            .map(|&i| values.get(i).copied().unwrap_or(usize::MAX))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();
        let incoming = comm.all_to_all(outgoing)?;

        if self.sub_map.len() > size || self.construct_map.len() > size {
            return Err(map_error(format!("map refers to more than {size} ranks")));
        }
        if let Some(&i) = self.sub_map.iter().flatten().find(|&&i| i >= values.len()) {
            return Err(map_error(format!("sub map entry {i} exceeds {} values", values.len())));
        }

        let mut constructed = vec![usize::MAX; self.construct_size];
        for (rank, received) in incoming.into_iter().enumerate() {
            let positions = self.construct_map.get(rank).map(Vec::as_slice).unwrap_or(&[]);
            if positions.len() != received.len() {
                return Err(map_error(format!(
                    "expected {} values from rank {rank}, received {}",
                    positions.len(),
                    received.len()
                )));
            }
            for (&position, value) in positions.iter().zip(received) {
                let slot = constructed.get_mut(position).ok_or_else(|| {
                    map_error(format!(
                        "construct position {position} exceeds size {}",
                        self.construct_size
                    ))
                })?;
                *slot = value;
            }
        }
        Ok(constructed)
    }
}

/// One partition of a finite-volume mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct FvMesh {
    name: String,
    n_cells: usize,
    lower_addr: Vec<usize>,
    upper_addr: Vec<usize>,
    patches: Vec<BoundaryPatch>,
    solution_directions: [bool; 3],
}

impl FvMesh {
    /// Constructs a mesh partition, checking that all addressing is consistent.
    ///
    /// All three directions are solved. See [`FvMesh::with_solution_directions`].
    pub fn try_new(
        name: impl Into<String>,
        n_cells: usize,
        lower_addr: Vec<usize>,
        upper_addr: Vec<usize>,
        patches: Vec<BoundaryPatch>,
    ) -> Result<Self, CoupledSystemError> {
        let mesh = Self::from_parts(name.into(), n_cells, lower_addr, upper_addr, patches);
        mesh.check_addressing()?;
        Ok(mesh)
    }

    pub(crate) fn from_parts(
        name: String,
        n_cells: usize,
        lower_addr: Vec<usize>,
        upper_addr: Vec<usize>,
        patches: Vec<BoundaryPatch>,
    ) -> Self {
        Self {
            name,
            n_cells,
            lower_addr,
            upper_addr,
            patches,
            solution_directions: [true; 3],
        }
    }

    /// Restricts the directions in which vector and tensor components are solved.
    pub fn with_solution_directions(mut self, directions: [bool; 3]) -> Self {
        self.solution_directions = directions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_cells(&self) -> usize {
        self.n_cells
    }

    pub fn num_internal_faces(&self) -> usize {
        self.lower_addr.len()
    }

    pub fn lower_addr(&self) -> &[usize] {
        &self.lower_addr
    }

    pub fn upper_addr(&self) -> &[usize] {
        &self.upper_addr
    }

    pub fn patches(&self) -> &[BoundaryPatch] {
        &self.patches
    }

    pub fn find_patch(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|patch| patch.name == name)
    }

    pub fn solution_directions(&self) -> &[bool; 3] {
        &self.solution_directions
    }

    fn mismatch(&self, reason: String) -> CoupledSystemError {
        CoupledSystemError::MeshMismatch {
            mesh: self.name.clone(),
            reason,
        }
    }

    fn check_addressing(&self) -> Result<(), CoupledSystemError> {
        if self.lower_addr.len() != self.upper_addr.len() {
            return Err(self.mismatch(format!(
                "{} lower but {} upper face addresses",
                self.lower_addr.len(),
                self.upper_addr.len()
            )));
        }
        for (face, (&l, &u)) in self.lower_addr.iter().zip(&self.upper_addr).enumerate() {
            if l >= self.n_cells || u >= self.n_cells || l == u {
                return Err(self.mismatch(format!("internal face {face} has invalid cells ({l}, {u})")));
            }
        }

        for patch in &self.patches {
            if let Some(&cell) = patch.face_cells.iter().find(|&&c| c >= self.n_cells) {
                return Err(self.mismatch(format!("patch {} refers to cell {cell}", patch.name)));
            }
            match &patch.topology {
                PatchTopology::Cyclic { neighbour_patch } => {
                    let neighbour = self.neighbour(patch, *neighbour_patch)?;
                    if neighbour.num_faces() != patch.num_faces() {
                        return Err(self.mismatch(format!(
                            "cyclic patches {} and {} have different face counts",
                            patch.name, neighbour.name
                        )));
                    }
                }
                PatchTopology::CyclicAmi {
                    neighbour_patch,
                    owner,
                    coupling,
                } => {
                    let neighbour = self.neighbour(patch, *neighbour_patch)?;
                    match (&neighbour.topology, owner, coupling) {
                        (PatchTopology::CyclicAmi { owner: false, .. }, true, Some(coupling)) => {
                            self.check_ami_weights(patch, &coupling.source)?;
                            self.check_ami_weights(neighbour, &coupling.target)?;
                        }
                        (PatchTopology::CyclicAmi { owner: true, coupling: Some(_), .. }, false, _) => {}
                        _ => {
                            return Err(self.mismatch(format!(
                                "interface {} / {} needs exactly one owner side holding the coupling",
                                patch.name, neighbour.name
                            )))
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn neighbour(&self, patch: &BoundaryPatch, index: usize) -> Result<&BoundaryPatch, CoupledSystemError> {
        self.patches
            .get(index)
            .ok_or_else(|| self.mismatch(format!("patch {} refers to missing neighbour patch {index}", patch.name)))
    }

    fn check_ami_weights(&self, patch: &BoundaryPatch, weights: &AmiWeights) -> Result<(), CoupledSystemError> {
        let n = patch.num_faces();
        let consistent = weights.addresses.len() == n
            && weights.weights.len() == n
            && weights.weights_sum.len() == n
            && weights
                .addresses
                .iter()
                .zip(&weights.weights)
                .all(|(a, w)| a.len() == w.len());
        if consistent {
            Ok(())
        } else {
            Err(self.mismatch(format!("interpolation weights of patch {} do not match its {n} faces", patch.name)))
        }
    }

    /// Whether `other` can replace this partition without changing the unknowns.
    pub(crate) fn check_same_cells(&self, other: &FvMesh) -> Result<(), CoupledSystemError> {
        if self.n_cells != other.n_cells {
            return Err(self.mismatch(format!(
                "topology update changes the cell count from {} to {}",
                self.n_cells, other.n_cells
            )));
        }
        let same_patches = self.patches.len() == other.patches.len()
            && self
                .patches
                .iter()
                .zip(&other.patches)
                .all(|(a, b)| a.name == b.name);
        if !same_patches {
            return Err(self.mismatch(String::from("topology update changes the boundary patches")));
        }
        Ok(())
    }
}
