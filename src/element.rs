//! Element kinds of cell fields and their independent components.
use serde::{Deserialize, Serialize};

/// The algebraic kind of the value stored per cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementKind {
    Scalar,
    Vector,
    SymmTensor,
    Tensor,
}

const SCALAR_NAMES: [&str; 1] = [""];
const VECTOR_NAMES: [&str; 3] = ["x", "y", "z"];
const SYMM_TENSOR_NAMES: [&str; 6] = ["xx", "xy", "xz", "yy", "yz", "zz"];
const TENSOR_NAMES: [&str; 9] = ["xx", "xy", "xz", "yx", "yy", "yz", "zx", "zy", "zz"];

// Direction pairs of the stored components of a symmetric tensor
const SYMM_TENSOR_DIRECTIONS: [(usize, usize); 6] = [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)];

impl ElementKind {
    pub const ALL: [ElementKind; 4] = [Self::Scalar, Self::Vector, Self::SymmTensor, Self::Tensor];

    pub fn num_components(&self) -> usize {
        self.component_names().len()
    }

    /// Suffixes appended to a field name to name its components.
    pub fn component_names(&self) -> &'static [&'static str] {
        match self {
            Self::Scalar => &SCALAR_NAMES,
            Self::Vector => &VECTOR_NAMES,
            Self::SymmTensor => &SYMM_TENSOR_NAMES,
            Self::Tensor => &TENSOR_NAMES,
        }
    }

    /// Components that are structurally meaningful on a mesh with the given solved directions.
    ///
    /// Scalars are always valid. A vector component is valid if its direction is solved.
    /// A tensor component `(i, j)` is valid if directions `i` and `j` are either both solved or
    /// both unsolved, i.e. if the product of the direction signs is positive.
    pub fn valid_components(&self, solved: &[bool; 3]) -> Vec<usize> {
        let pair_valid = |(i, j): (usize, usize)| solved[i] == solved[j];
        match self {
            Self::Scalar => vec![0],
            Self::Vector => (0..3).filter(|&d| solved[d]).collect(),
            Self::SymmTensor => (0..6)
                .filter(|&c| pair_valid(SYMM_TENSOR_DIRECTIONS[c]))
                .collect(),
            Self::Tensor => (0..9).filter(|&c| pair_valid((c / 3, c % 3))).collect(),
        }
    }
}
