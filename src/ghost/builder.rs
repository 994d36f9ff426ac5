//! One-layer ghost construction.
//!
//! Follows the algorithm of p4est ("Scalable Algorithms For Parallel
//! Adaptive Mesh Refinement On Forests of Octrees", Burstedde, Wilcox,
//! Ghattas): first the coarse skeleton of candidate ghost trees, then a
//! scan over every local element that derives its half-size face neighbors,
//! resolves their owners, and records each element under every remote rank
//! that borders it.

use crate::cmesh::eclass::EClass;
use crate::cmesh::tree::{FaceNeighbor, GlobalTreeId};
use crate::ghost::element::ElementBuffer;
use crate::ghost::forest::ForestView;
use crate::ghost::store::{GhostLayer, GhostTree, RemoteBundle, RemoteTree};
use crate::mesh_error::MeshError;

/// Build the ghost layer of a committed forest.
///
/// The result contains the candidate ghost trees (a superset at the coarse
/// level: the shared first and last local trees plus every non-local coarse
/// face neighbor) and, per remote rank, the exact deduplicated set of
/// locally owned elements that rank needs, grouped by tree.
pub fn build_ghost_layer<F: ForestView + ?Sized>(forest: &F) -> Result<GhostLayer, MeshError> {
    let mut ghost = GhostLayer::new();
    fill_ghost_tree_skeleton(forest, &mut ghost);

    // Scratch storage for half-size face neighbors, regrown per face.
    let mut half_neighbors = ElementBuffer::new(1);

    for ltree in 0..forest.num_local_trees() {
        let tree_class = forest.tree_class(ltree);
        let scheme = forest.scheme(tree_class);
        let num_tree_elems = forest.tree_element_count(ltree);
        for ielem in 0..num_tree_elems {
            let elem = forest.tree_element(ltree, ielem);
            let num_faces = scheme.element_num_faces(elem);
            for face in 0..num_faces {
                let neigh_class = forest.element_neighbor_eclass(ltree, elem, face);
                let neigh_scheme = forest.scheme(neigh_class);
                let num_face_children = scheme.element_num_face_children(elem, face);
                if num_face_children == 0 {
                    continue;
                }
                half_neighbors.reconfigure(neigh_scheme.element_size(), num_face_children);
                let Some(neighbor_tree) =
                    forest.element_half_face_neighbors(ltree, elem, face, &mut half_neighbors)
                else {
                    // Domain boundary.
                    continue;
                };
                for child in 0..num_face_children {
                    let owner = forest.element_find_owner(
                        neighbor_tree,
                        half_neighbors.get(child),
                        neigh_class,
                    )?;
                    if owner >= forest.size() {
                        return Err(MeshError::OwnerOutOfRange {
                            owner,
                            size: forest.size(),
                        });
                    }
                    if owner != forest.rank() {
                        add_remote(forest, &mut ghost, owner, ltree, elem)?;
                    }
                }
            }
        }
    }

    Ok(ghost)
}

/// Phase A: seed the ghost-tree array with every coarse tree that may hold
/// ghost elements, then sort it by global id and (re)build the id index.
///
/// The shared first and last local trees always qualify; beyond those, any
/// coarse face neighbor of a local tree that is not itself forest-local.
fn fill_ghost_tree_skeleton<F: ForestView + ?Sized>(forest: &F, ghost: &mut GhostLayer) {
    let num_local_trees = forest.num_local_trees();
    if num_local_trees == 0 {
        return;
    }

    // A tree whose elements are split across ranks holds ghosts by
    // construction.
    if forest.first_tree_shared() {
        let first = forest.first_local_tree();
        add_ghost_tree(forest, ghost, first, forest.tree_class(0));
    }
    if forest.last_tree_shared() {
        let last =
            GlobalTreeId::new(forest.first_local_tree().get() + num_local_trees as u64 - 1);
        add_ghost_tree(forest, ghost, last, forest.tree_class(num_local_trees - 1));
    }

    let cmesh_first = forest.cmesh().first_tree().get();
    let cmesh_local_count = forest.cmesh().num_local_trees();
    for ltree in 0..num_local_trees {
        for slot in forest.coarse_face_neighbors(ltree) {
            let FaceNeighbor::Joined {
                tree: neighbor,
                eclass,
                ..
            } = *slot
            else {
                continue;
            };
            let forest_local = neighbor
                .get()
                .checked_sub(cmesh_first)
                .filter(|&cltree| cltree < cmesh_local_count)
                .and_then(|cltree| forest.cmesh_ltree_to_forest_ltree(cltree as usize));
            if forest_local.is_none() {
                add_ghost_tree(forest, ghost, neighbor, eclass);
            }
        }
    }

    ghost.ghost_trees.sort_by_key(GhostTree::global_id);
    // Sorting moved the entries; the id index must point at the new
    // positions.
    ghost.tree_index.clear();
    for (index, tree) in ghost.ghost_trees.iter().enumerate() {
        ghost.tree_index.insert(tree.global_id(), index);
    }
}

/// Insert a candidate ghost tree unless it is already present.
fn add_ghost_tree<F: ForestView + ?Sized>(
    forest: &F,
    ghost: &mut GhostLayer,
    global_id: GlobalTreeId,
    eclass: EClass,
) {
    if ghost.tree_index.contains_key(&global_id) {
        return;
    }
    log::debug!("adding global tree {global_id} to ghost layer");
    let elem_size = forest.scheme(eclass).element_size();
    ghost.ghost_trees.push(GhostTree::new(global_id, eclass, elem_size));
    ghost
        .tree_index
        .insert(global_id, ghost.ghost_trees.len() - 1);
}

/// Record `elem` of local tree `ltree` as needed by `remote_rank`.
///
/// Called in ascending (tree, element) order by the outer scan; that order
/// is what makes "check the last tree / last element" sufficient for both
/// grouping and deduplication. Duplicates arise when several half-face
/// neighbors of the same element resolve to the same remote rank and are
/// always consecutive.
fn add_remote<F: ForestView + ?Sized>(
    forest: &F,
    ghost: &mut GhostLayer,
    remote_rank: usize,
    ltree: usize,
    elem: &[u8],
) -> Result<(), MeshError> {
    let eclass = forest.tree_class(ltree);
    let scheme = forest.scheme(eclass);
    let global_tree = GlobalTreeId::new(forest.first_local_tree().get() + ltree as u64);

    let bundle_pos = match ghost.bundle_index.get(&remote_rank) {
        Some(&pos) => pos,
        None => {
            let first_tree = RemoteTree::new(global_tree, eclass, scheme.element_size());
            ghost
                .remote_bundles
                .push(RemoteBundle::new(remote_rank, first_tree));
            let pos = ghost.remote_bundles.len() - 1;
            ghost.bundle_index.insert(remote_rank, pos);
            ghost.remote_ranks.push(remote_rank);
            pos
        }
    };
    let bundle = &mut ghost.remote_bundles[bundle_pos];

    // The scan visits trees in ascending local order, so the tree for this
    // element is either the bundle's last entry or missing entirely.
    let last_id = bundle
        .trees()
        .last()
        .expect("bundle holds at least one tree")
        .global_id();
    if last_id != global_tree {
        crate::invariant_assert!(
            last_id < global_tree,
            "remote trees must be appended in ascending local-tree order"
        );
        bundle.trees_mut().push(RemoteTree::new(
            global_tree,
            eclass,
            scheme.element_size(),
        ));
    }
    let remote_tree = bundle
        .trees_mut()
        .last_mut()
        .expect("bundle holds at least one tree");

    let level = scheme.element_level(elem);
    let linear_id = scheme.element_linear_id(elem, level);
    let is_duplicate = remote_tree.elements().last().is_some_and(|prev| {
        let prev_level = scheme.element_level(prev);
        prev_level == level && scheme.element_linear_id(prev, prev_level) == linear_id
    });
    if !is_duplicate {
        log::debug!(
            "adding element {linear_id} of tree {global_tree} for rank {remote_rank}"
        );
        let elements = remote_tree.elements_mut();
        elements.push_copy(elem);
    }
    Ok(())
}
