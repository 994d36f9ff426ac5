//! Tree records: strong tree ids, packed face connections, and the
//! per-tree face-neighbor table.

use crate::cmesh::eclass::EClass;
use crate::mesh_error::MeshError;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Global index of a coarse tree, drawn from `[0, num_trees)`.
///
/// The local id of a tree on rank `p` is `global - first_tree_p`; only the
/// global form appears in public APIs.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct GlobalTreeId(u64);

impl GlobalTreeId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        GlobalTreeId(raw)
    }

    /// Returns the underlying index.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for GlobalTreeId {
    #[inline]
    fn from(raw: u64) -> Self {
        GlobalTreeId(raw)
    }
}

impl From<GlobalTreeId> for u64 {
    #[inline]
    fn from(id: GlobalTreeId) -> Self {
        id.0
    }
}

impl fmt::Debug for GlobalTreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalTreeId").field(&self.0).finish()
    }
}

impl fmt::Display for GlobalTreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of bits of the packed face byte holding the neighbor face index.
const FACE_BITS: u32 = 3;
const FACE_MASK: u8 = (1 << FACE_BITS) - 1;

/// Largest representable neighbor face index plus one.
pub const MAX_FACE: u8 = 1 << FACE_BITS;
/// Largest representable orientation plus one.
pub const MAX_ORIENTATION: u8 = 1 << (8 - FACE_BITS);

/// Packed face-to-face map: the neighbor's face index in the low three
/// bits, the orientation of the vertex permutation in the high five.
///
/// The bit layout is an external contract of the mesh format; peer codes
/// read and write this byte directly.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable,
)]
#[repr(transparent)]
pub struct FaceConnection(u8);

impl FaceConnection {
    /// Pack a neighbor face index and orientation.
    pub fn new(face: u8, orientation: u8) -> Result<Self, MeshError> {
        if face >= MAX_FACE || orientation >= MAX_ORIENTATION {
            return Err(MeshError::InvalidFaceConnection { face, orientation });
        }
        Ok(FaceConnection(orientation << FACE_BITS | face))
    }

    /// Neighbor face index.
    #[inline]
    pub const fn face(self) -> u8 {
        self.0 & FACE_MASK
    }

    /// Orientation of the face-to-face vertex permutation.
    #[inline]
    pub const fn orientation(self) -> u8 {
        self.0 >> FACE_BITS
    }

    /// Reinterpret a raw byte (e.g. read from a mesh file).
    #[inline]
    pub const fn from_byte(byte: u8) -> Self {
        FaceConnection(byte)
    }

    /// The raw packed byte.
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for FaceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceConnection")
            .field("face", &self.face())
            .field("orientation", &self.orientation())
            .finish()
    }
}

/// One face-neighbor slot of a coarse tree.
///
/// A freshly inserted tree has all slots at `Boundary`; `join_faces`
/// upgrades a slot to `Joined`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceNeighbor {
    /// Domain boundary (or not yet joined).
    #[default]
    Boundary,
    /// Connected to another tree across this face.
    Joined {
        /// Global id of the neighbor tree.
        tree: GlobalTreeId,
        /// Element class of the neighbor tree.
        eclass: EClass,
        /// Packed neighbor face index and orientation.
        connection: FaceConnection,
    },
}

impl FaceNeighbor {
    #[inline]
    pub fn is_joined(&self) -> bool {
        matches!(self, FaceNeighbor::Joined { .. })
    }

    /// Global id of the neighbor tree, if joined.
    #[inline]
    pub fn tree(&self) -> Option<GlobalTreeId> {
        match self {
            FaceNeighbor::Joined { tree, .. } => Some(*tree),
            FaceNeighbor::Boundary => None,
        }
    }
}

/// Topological record of one coarse tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    id: GlobalTreeId,
    eclass: EClass,
    face_neighbors: Vec<FaceNeighbor>,
}

impl Tree {
    /// Create a tree with all face slots at the boundary default.
    pub(crate) fn new(id: GlobalTreeId, eclass: EClass) -> Self {
        Tree {
            id,
            eclass,
            face_neighbors: vec![FaceNeighbor::Boundary; eclass.num_faces()],
        }
    }

    #[inline]
    pub fn id(&self) -> GlobalTreeId {
        self.id
    }

    #[inline]
    pub fn eclass(&self) -> EClass {
        self.eclass
    }

    /// Face-neighbor slots, one per face of the tree's class.
    #[inline]
    pub fn face_neighbors(&self) -> &[FaceNeighbor] {
        &self.face_neighbors
    }

    pub(crate) fn set_face_neighbor(&mut self, face: usize, neighbor: FaceNeighbor) {
        self.face_neighbors[face] = neighbor;
    }
}
