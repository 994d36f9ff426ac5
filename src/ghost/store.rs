//! Ghost-layer storage: ghost trees, per-rank remote bundles, and the
//! process-offset table.
//!
//! Storage follows one shape throughout: records live in contiguous `Vec`s
//! keyed by a stable id, and hash maps carry offsets into that storage.

use crate::cmesh::cmesh::Cmesh;
use crate::cmesh::eclass::EClass;
use crate::cmesh::tree::GlobalTreeId;
use crate::ghost::element::ElementBuffer;
use crate::mesh_error::MeshError;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

// Iteration order of this alias is not relied on; ordered views are
// materialized in the Vec storage next to each map.
pub(crate) type FastMap<K, V> = ahash::AHashMap<K, V>;

/// One tree that holds (or will hold) ghost elements: a tree some remote
/// rank owns whose fine elements touch this rank's domain.
#[derive(Clone, Debug)]
pub struct GhostTree {
    global_id: GlobalTreeId,
    eclass: EClass,
    elements: ElementBuffer,
}

impl GhostTree {
    pub(crate) fn new(global_id: GlobalTreeId, eclass: EClass, elem_size: usize) -> Self {
        GhostTree {
            global_id,
            eclass,
            elements: ElementBuffer::new(elem_size),
        }
    }

    #[inline]
    pub fn global_id(&self) -> GlobalTreeId {
        self.global_id
    }

    #[inline]
    pub fn eclass(&self) -> EClass {
        self.eclass
    }

    /// Ghost elements of this tree, in the order the exchange deposited
    /// them (empty until an exchange ran).
    #[inline]
    pub fn elements(&self) -> &ElementBuffer {
        &self.elements
    }

    /// Mutable element storage, for transports depositing received ghost
    /// payloads.
    #[inline]
    pub fn elements_mut(&mut self) -> &mut ElementBuffer {
        &mut self.elements
    }
}

/// A locally owned tree with the elements one remote rank needs.
#[derive(Clone, Debug)]
pub struct RemoteTree {
    global_id: GlobalTreeId,
    eclass: EClass,
    elements: ElementBuffer,
}

impl RemoteTree {
    pub(crate) fn new(global_id: GlobalTreeId, eclass: EClass, elem_size: usize) -> Self {
        RemoteTree {
            global_id,
            eclass,
            elements: ElementBuffer::new(elem_size),
        }
    }

    #[inline]
    pub fn global_id(&self) -> GlobalTreeId {
        self.global_id
    }

    #[inline]
    pub fn eclass(&self) -> EClass {
        self.eclass
    }

    /// Elements to ship, deduplicated, in ascending linear order.
    #[inline]
    pub fn elements(&self) -> &ElementBuffer {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut ElementBuffer {
        &mut self.elements
    }
}

/// Everything one remote rank will receive from this rank: remote trees in
/// ascending local-tree order.
#[derive(Clone, Debug)]
pub struct RemoteBundle {
    rank: usize,
    trees: Vec<RemoteTree>,
}

impl RemoteBundle {
    pub(crate) fn new(rank: usize, first_tree: RemoteTree) -> Self {
        RemoteBundle {
            rank,
            trees: vec![first_tree],
        }
    }

    /// The receiving rank.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Trees with elements to ship, ascending by global id.
    #[inline]
    pub fn trees(&self) -> &[RemoteTree] {
        &self.trees
    }

    /// Total number of elements across all trees of the bundle.
    pub fn num_elements(&self) -> usize {
        self.trees.iter().map(|t| t.elements().len()).sum()
    }

    pub(crate) fn trees_mut(&mut self) -> &mut Vec<RemoteTree> {
        &mut self.trees
    }
}

/// Where one remote rank's ghosts start within the ghost-tree storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOffset {
    /// The remote rank.
    pub rank: usize,
    /// Index into the ghost-tree array of that rank's first tree.
    pub tree_index: usize,
    /// Index of the rank's first element within that tree's storage.
    pub first_element: usize,
}

/// The ghost layer of one rank: remote-owned trees that border the local
/// domain, and the reciprocal send plan grouped by receiving rank.
///
/// Built once by [`build_ghost_layer`](crate::ghost::builder::build_ghost_layer)
/// against a committed forest/cmesh pair; read-only afterwards, except for
/// transports depositing received elements into ghost trees.
#[derive(Debug, Default)]
pub struct GhostLayer {
    pub(crate) ghost_trees: Vec<GhostTree>,
    pub(crate) tree_index: FastMap<GlobalTreeId, usize>,
    pub(crate) remote_bundles: Vec<RemoteBundle>,
    pub(crate) bundle_index: FastMap<usize, usize>,
    pub(crate) remote_ranks: Vec<usize>,
    process_offsets: OnceCell<Vec<ProcessOffset>>,
}

impl GhostLayer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of ghost trees.
    #[inline]
    pub fn num_ghost_trees(&self) -> usize {
        self.ghost_trees.len()
    }

    /// Ghost trees, ascending by global id.
    #[inline]
    pub fn ghost_trees(&self) -> &[GhostTree] {
        &self.ghost_trees
    }

    /// Index of a ghost tree in [`ghost_trees`](Self::ghost_trees).
    #[inline]
    pub fn ghost_tree_index(&self, global_id: GlobalTreeId) -> Option<usize> {
        self.tree_index.get(&global_id).copied()
    }

    /// Ghost tree with the given global id.
    pub fn ghost_tree_by_id(&self, global_id: GlobalTreeId) -> Option<&GhostTree> {
        self.ghost_tree_index(global_id)
            .map(|index| &self.ghost_trees[index])
    }

    /// Mutable ghost tree access, for transports depositing received
    /// elements.
    pub fn ghost_tree_mut(&mut self, index: usize) -> Option<&mut GhostTree> {
        self.ghost_trees.get_mut(index)
    }

    /// Remote ranks in the order they were discovered.
    #[inline]
    pub fn remote_ranks(&self) -> &[usize] {
        &self.remote_ranks
    }

    /// The bundle destined for `rank`, if that rank needs anything.
    pub fn bundle_for(&self, rank: usize) -> Option<&RemoteBundle> {
        self.bundle_index
            .get(&rank)
            .map(|&index| &self.remote_bundles[index])
    }

    /// Iterate over all bundles in discovery order.
    pub fn bundles(&self) -> impl ExactSizeIterator<Item = &RemoteBundle> {
        self.remote_bundles.iter()
    }

    /// Per-rank offsets into the ghost-tree storage, built on first query.
    ///
    /// One entry per rank owning at least one ghost tree, ascending by
    /// rank; ownership comes from the cmesh partition table. `first_element`
    /// counts elements already present in the entry tree when the rank's
    /// run begins (zero before any exchange deposited elements).
    pub fn process_offsets(&self, cmesh: &Cmesh) -> Result<&[ProcessOffset], MeshError> {
        let table = self.process_offsets.get_or_try_init(|| {
            let mut table: Vec<ProcessOffset> = Vec::new();
            for (tree_index, ghost_tree) in self.ghost_trees.iter().enumerate() {
                let rank = cmesh.tree_owner(ghost_tree.global_id())?;
                let needs_entry = match table.last() {
                    Some(last) if last.rank == rank => false,
                    Some(last) => {
                        crate::invariant_assert!(
                            last.rank < rank,
                            "ghost trees sorted by id must visit owners in ascending order"
                        );
                        true
                    }
                    None => true,
                };
                if needs_entry {
                    table.push(ProcessOffset {
                        rank,
                        tree_index,
                        first_element: 0,
                    });
                }
            }
            Ok(table)
        })?;
        Ok(table)
    }
}
