//! The committed cmesh: an immutable, possibly partitioned store of coarse
//! trees, plus the uniform-refinement partition bounds computed from it.

use crate::cmesh::eclass::{EClass, EClassCounts};
use crate::cmesh::tree::{GlobalTreeId, Tree};
use crate::comm::Communicator;
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Committed coarse mesh. All queries are pure functions of the frozen
/// state; construction goes through
/// [`CmeshBuilder`](crate::cmesh::builder::CmeshBuilder).
///
/// Share a committed cmesh by wrapping it in `Arc`; teardown (including the
/// release of a commit-time-duplicated communicator) happens when the last
/// handle drops.
pub struct Cmesh {
    dimension: Option<u8>,
    comm: Arc<dyn Communicator>,
    do_dup: bool,
    rank: usize,
    size: usize,
    partitioned: bool,
    num_trees: u64,
    num_local_trees: u64,
    num_ghosts: u64,
    first_tree: GlobalTreeId,
    trees_per_eclass: EClassCounts,
    trees: Vec<Tree>,
    tree_offsets: Option<Vec<u64>>,
}

impl Cmesh {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        dimension: Option<u8>,
        comm: Arc<dyn Communicator>,
        do_dup: bool,
        rank: usize,
        size: usize,
        partitioned: bool,
        num_trees: u64,
        num_local_trees: u64,
        num_ghosts: u64,
        first_tree: GlobalTreeId,
        trees_per_eclass: EClassCounts,
        trees: Vec<Tree>,
        tree_offsets: Option<Vec<u64>>,
    ) -> Self {
        Cmesh {
            dimension,
            comm,
            do_dup,
            rank,
            size,
            partitioned,
            num_trees,
            num_local_trees,
            num_ghosts,
            first_tree,
            trees_per_eclass,
            trees,
            tree_offsets,
        }
    }

    /// Global number of trees.
    #[inline]
    pub fn num_trees(&self) -> u64 {
        self.num_trees
    }

    /// Number of trees stored on this rank (equals [`num_trees`](Self::num_trees)
    /// when replicated).
    #[inline]
    pub fn num_local_trees(&self) -> u64 {
        self.num_local_trees
    }

    /// Number of coarse neighbor trees owned by other ranks.
    #[inline]
    pub fn num_ghosts(&self) -> u64 {
        self.num_ghosts
    }

    /// Global id of the first tree stored on this rank (zero when
    /// replicated).
    #[inline]
    pub fn first_tree(&self) -> GlobalTreeId {
        self.first_tree
    }

    /// Topological dimension, or `None` on a partitioned rank that stores
    /// no trees.
    #[inline]
    pub fn dimension(&self) -> Option<u8> {
        self.dimension
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    /// The communicator handle and whether it was duplicated at commit.
    #[inline]
    pub fn mpicomm(&self) -> (&Arc<dyn Communicator>, bool) {
        (&self.comm, self.do_dup)
    }

    /// Number of local trees of the given class.
    #[inline]
    pub fn num_trees_of_class(&self, eclass: EClass) -> u64 {
        self.trees_per_eclass[eclass as usize]
    }

    /// Element class of a (local-range) tree.
    pub fn tree_class(&self, tree_id: GlobalTreeId) -> Result<EClass, MeshError> {
        Ok(self.tree(tree_id)?.eclass())
    }

    /// Record of a (local-range) tree.
    pub fn tree(&self, tree_id: GlobalTreeId) -> Result<&Tree, MeshError> {
        let index = self.local_index(tree_id)?;
        Ok(&self.trees[index])
    }

    /// Index of `tree_id` in local tree storage.
    fn local_index(&self, tree_id: GlobalTreeId) -> Result<usize, MeshError> {
        let first = self.first_tree.get();
        let id = tree_id.get();
        if id < first || id >= first + self.num_local_trees {
            return Err(MeshError::TreeIdOutOfRange {
                tree: tree_id,
                first: self.first_tree,
                count: self.num_local_trees,
            });
        }
        Ok((id - first) as usize)
    }

    /// Tree stored at the given local index, if any.
    #[inline]
    pub fn local_tree(&self, index: usize) -> Option<&Tree> {
        self.trees.get(index)
    }

    /// Iterate over the locally stored trees in ascending id order.
    pub fn local_trees(&self) -> impl ExactSizeIterator<Item = &Tree> {
        self.trees.iter()
    }

    /// The per-rank tree-offset table, if one was installed.
    #[inline]
    pub fn tree_offsets(&self) -> Option<&[u64]> {
        self.tree_offsets.as_deref()
    }

    /// Rank owning the given global tree.
    ///
    /// On a replicated cmesh every tree is everywhere; ownership is
    /// attributed to rank 0. On a partitioned cmesh the answer comes from
    /// the tree-offset table.
    pub fn tree_owner(&self, tree_id: GlobalTreeId) -> Result<usize, MeshError> {
        if !self.partitioned {
            return Ok(0);
        }
        let offsets = self
            .tree_offsets
            .as_deref()
            .ok_or(MeshError::MissingPartitionTable)?;
        let id = tree_id.get();
        if id >= self.num_trees {
            return Err(MeshError::TreeIdOutOfRange {
                tree: tree_id,
                first: GlobalTreeId::new(0),
                count: self.num_trees,
            });
        }
        // Largest rank whose window starts at or before `id`. Empty ranks
        // share a start offset with their successor; skip them.
        let upper = offsets.partition_point(|&first| first <= id);
        Ok(upper - 1)
    }

    /// Per-rank bounds of a uniform refinement of every tree to `level`.
    ///
    /// Children are ordered by tree, then by child index within the tree;
    /// each rank receives the fair share `[floor(G*r/P), floor(G*(r+1)/P))`
    /// of the `G = num_trees * 2^(dim*level)` global children, so adjacent
    /// ranks produce exactly-adjoining ranges.
    pub fn uniform_bounds(&self, level: u32) -> Result<UniformBounds, MeshError> {
        if self.trees_per_eclass[EClass::Pyramid as usize] > 0 {
            return Err(MeshError::PyramidPartitionUnsupported);
        }
        let dimension = self.dimension.ok_or(MeshError::DimensionUnset)?;
        let shift = dimension as u64 * level as u64;
        if shift >= 64 {
            return Err(MeshError::RefinementTooDeep { dimension, level });
        }
        let children_per_tree = 1u64 << shift;
        let global_num_children = self
            .num_trees
            .checked_mul(children_per_tree)
            .ok_or(MeshError::RefinementTooDeep { dimension, level })?;

        let rank = self.rank as u128;
        let size = self.size as u128;
        // The products can overflow u64 for large meshes; widen to u128.
        let first_global_child = if self.rank == 0 {
            0
        } else {
            (global_num_children as u128 * rank / size) as u64
        };
        let last_global_child = if self.rank != self.size - 1 {
            (global_num_children as u128 * (rank + 1) / size) as u64
        } else {
            global_num_children
        };
        crate::invariant_assert!(first_global_child <= global_num_children);
        crate::invariant_assert!(last_global_child <= global_num_children);

        let first_local_tree = first_global_child / children_per_tree;
        let child_in_tree_begin = first_global_child - first_local_tree * children_per_tree;
        let last_local_tree = if first_global_child < last_global_child {
            (last_global_child - 1) / children_per_tree
        } else {
            // Empty rank: collapse onto the first tree.
            first_local_tree
        };
        let child_in_tree_end = last_global_child - last_local_tree * children_per_tree;

        Ok(UniformBounds {
            first_local_tree: GlobalTreeId::new(first_local_tree),
            child_in_tree_begin,
            last_local_tree: GlobalTreeId::new(last_local_tree),
            child_in_tree_end,
        })
    }
}

impl fmt::Debug for Cmesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmesh")
            .field("dimension", &self.dimension)
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("partitioned", &self.partitioned)
            .field("num_trees", &self.num_trees)
            .field("num_local_trees", &self.num_local_trees)
            .field("num_ghosts", &self.num_ghosts)
            .field("first_tree", &self.first_tree)
            .field("do_dup", &self.do_dup)
            .finish_non_exhaustive()
    }
}

/// Structural equality: everything except communicator identity.
impl PartialEq for Cmesh {
    fn eq(&self, other: &Self) -> bool {
        self.dimension == other.dimension
            && self.do_dup == other.do_dup
            && self.rank == other.rank
            && self.size == other.size
            && self.partitioned == other.partitioned
            && self.num_trees == other.num_trees
            && self.num_local_trees == other.num_local_trees
            && self.num_ghosts == other.num_ghosts
            && self.first_tree == other.first_tree
            && self.trees_per_eclass == other.trees_per_eclass
            && self.trees == other.trees
            && self.tree_offsets == other.tree_offsets
    }
}

/// Result of [`Cmesh::uniform_bounds`]: the inclusive tree range of this
/// rank and the child windows within the two boundary trees.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformBounds {
    /// First tree with children on this rank.
    pub first_local_tree: GlobalTreeId,
    /// Index of the first owned child within the first tree.
    pub child_in_tree_begin: u64,
    /// Last tree with children on this rank.
    pub last_local_tree: GlobalTreeId,
    /// One past the index of the last owned child within the last tree.
    pub child_in_tree_end: u64,
}

impl UniformBounds {
    /// An empty rank collapses both windows onto the same point.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first_local_tree == self.last_local_tree
            && self.child_in_tree_begin == self.child_in_tree_end
    }

    /// Global index of the first owned child.
    #[inline]
    pub fn first_child(&self, children_per_tree: u64) -> u64 {
        self.first_local_tree.get() * children_per_tree + self.child_in_tree_begin
    }

    /// One past the global index of the last owned child.
    #[inline]
    pub fn last_child(&self, children_per_tree: u64) -> u64 {
        self.last_local_tree.get() * children_per_tree + self.child_in_tree_end
    }
}
