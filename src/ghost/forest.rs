//! The forest capability consumed by ghost construction.
//!
//! The fine-element forest lives outside this crate; the ghost builder
//! reads it through [`ForestView`]. An implementation wraps a committed
//! forest whose partition and element storage must not change for the
//! duration of the build.

use crate::cmesh::cmesh::Cmesh;
use crate::cmesh::eclass::EClass;
use crate::cmesh::tree::{FaceNeighbor, GlobalTreeId};
use crate::ghost::element::{ElementBuffer, ElementScheme};
use crate::mesh_error::MeshError;

/// Read access to a committed, partitioned forest of fine elements.
///
/// Local trees are addressed by their forest-local index in
/// `[0, num_local_trees)`; elements within a tree by their storage index.
/// Element records are opaque bytes interpreted by the scheme of the
/// owning tree's class.
pub trait ForestView {
    /// The committed coarse mesh this forest refines.
    fn cmesh(&self) -> &Cmesh;

    /// Scheme for elements of the given class.
    fn scheme(&self, eclass: EClass) -> &dyn ElementScheme;

    /// Rank of this process in the forest's communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the forest's communicator.
    fn size(&self) -> usize;

    /// Global id of the first forest-local tree.
    fn first_local_tree(&self) -> GlobalTreeId;

    /// Number of forest-local trees.
    fn num_local_trees(&self) -> usize;

    /// Whether the first local tree also holds elements of other ranks.
    fn first_tree_shared(&self) -> bool;

    /// Whether the last local tree also holds elements of other ranks.
    fn last_tree_shared(&self) -> bool;

    /// Element class of a local tree.
    fn tree_class(&self, ltree: usize) -> EClass;

    /// Number of elements stored in a local tree.
    fn tree_element_count(&self, ltree: usize) -> usize;

    /// The `index`-th element record of a local tree, in storage order.
    fn tree_element(&self, ltree: usize, index: usize) -> &[u8];

    /// Coarse face-neighbor slots of a local tree.
    fn coarse_face_neighbors(&self, ltree: usize) -> &[FaceNeighbor];

    /// Map a cmesh-local tree index to the forest-local index, or `None`
    /// when the tree holds no forest-local elements.
    fn cmesh_ltree_to_forest_ltree(&self, cmesh_ltree: usize) -> Option<usize>;

    /// Element class of the tree on the other side of `face`.
    fn element_neighbor_eclass(&self, ltree: usize, elem: &[u8], face: usize) -> EClass;

    /// Construct the one-level-finer neighbor elements sharing `face`.
    ///
    /// `half_neighbors` arrives sized for the face-children count with the
    /// neighbor scheme's record size; the implementation overwrites every
    /// record. Returns the neighbor's global tree id, or `None` when the
    /// face lies on the domain boundary.
    fn element_half_face_neighbors(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        half_neighbors: &mut ElementBuffer,
    ) -> Option<GlobalTreeId>;

    /// Rank owning the given element of tree `tree`.
    fn element_find_owner(
        &self,
        tree: GlobalTreeId,
        elem: &[u8],
        eclass: EClass,
    ) -> Result<usize, MeshError>;
}
