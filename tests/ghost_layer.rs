//! Ghost construction on a synthetic quad forest.
//!
//! The mock forest arranges quad trees in a grid, refines every tree
//! uniformly, and numbers elements in Morton order, which is enough to
//! exercise the skeleton phase, the half-face neighbor scan, owner
//! resolution, and the dedup/ordering invariants of the remote bundles.

use bytemuck::{Pod, Zeroable};
use canopy_mesh::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

fn id(raw: u64) -> GlobalTreeId {
    GlobalTreeId::new(raw)
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
struct QuadElem {
    level: u64,
    morton: u64,
}

fn decode(bytes: &[u8]) -> QuadElem {
    // Element records sit in byte buffers with no alignment guarantee.
    bytemuck::pod_read_unaligned(bytes)
}

fn interleave(x: u64, y: u64, level: u64) -> u64 {
    let mut morton = 0;
    for bit in 0..level {
        morton |= ((x >> bit) & 1) << (2 * bit);
        morton |= ((y >> bit) & 1) << (2 * bit + 1);
    }
    morton
}

fn deinterleave(morton: u64, level: u64) -> (u64, u64) {
    let mut x = 0;
    let mut y = 0;
    for bit in 0..level {
        x |= ((morton >> (2 * bit)) & 1) << bit;
        y |= ((morton >> (2 * bit + 1)) & 1) << bit;
    }
    (x, y)
}

struct QuadScheme;

impl ElementScheme for QuadScheme {
    fn eclass(&self) -> EClass {
        EClass::Quad
    }

    fn element_size(&self) -> usize {
        std::mem::size_of::<QuadElem>()
    }

    fn element_level(&self, elem: &[u8]) -> u8 {
        decode(elem).level as u8
    }

    fn element_linear_id(&self, elem: &[u8], level: u8) -> u64 {
        let e = decode(elem);
        let own = e.level as u8;
        if level <= own {
            e.morton >> (2 * (own - level) as u64)
        } else {
            e.morton << (2 * (level - own) as u64)
        }
    }

    fn element_num_faces(&self, _elem: &[u8]) -> usize {
        4
    }

    fn element_num_face_children(&self, _elem: &[u8], _face: usize) -> usize {
        2
    }
}

type OwnerFn = Box<dyn Fn(u64, QuadElem) -> usize + Send + Sync>;

/// Uniformly refined forest over an `nx` by `ny` grid of quad trees
/// (tree id = ty * nx + tx), with contiguous whole-tree ownership unless a
/// custom owner function is installed.
struct GridForest {
    cmesh: Cmesh,
    scheme: QuadScheme,
    rank: usize,
    size: usize,
    nx: u64,
    ny: u64,
    first_local_tree: u64,
    num_local_trees: u64,
    elements: Vec<ElementBuffer>,
    neighbors: Vec<Vec<FaceNeighbor>>,
    first_shared: bool,
    last_shared: bool,
    owner: OwnerFn,
}

impl GridForest {
    /// Whole-tree contiguous partition given by `offsets` (length
    /// `size + 1`); rank `r` owns trees `[offsets[r], offsets[r+1])`.
    fn tree_partition(
        nx: u64,
        ny: u64,
        level: u64,
        offsets: Vec<u64>,
        rank: usize,
    ) -> GridForest {
        let size = offsets.len() - 1;
        let num_trees = nx * ny;
        assert_eq!(offsets[size], num_trees);
        let first = offsets[rank];
        let count = offsets[rank + 1] - first;

        let comms = ThreadComm::world(size);
        let mut builder = CmeshBuilder::new();
        builder
            .set_mpicomm(Arc::new(comms[rank].clone()), false)
            .unwrap();
        builder
            .set_partitioned(true, num_trees, id(first), 0)
            .unwrap();
        builder.set_num_trees(count).unwrap();
        builder.set_tree_offsets(offsets.clone()).unwrap();
        for i in 0..count {
            builder.set_tree(id(first + i), EClass::Quad).unwrap();
        }
        let cmesh = builder.commit().unwrap();

        let owner_offsets = offsets;
        let owner: OwnerFn = Box::new(move |gtree, _elem| {
            owner_offsets.partition_point(|&o| o <= gtree) - 1
        });

        Self::assemble(cmesh, nx, ny, level, first, count, false, false, owner, rank, size)
    }

    /// Single shared tree split between ranks by an explicit per-element
    /// owner map over the base-level Morton ids.
    fn shared_tree(
        level: u64,
        element_owners: Vec<usize>,
        rank: usize,
        size: usize,
    ) -> GridForest {
        let comms = ThreadComm::world(size);
        let mut builder = CmeshBuilder::new();
        builder
            .set_mpicomm(Arc::new(comms[rank].clone()), false)
            .unwrap();
        builder.set_num_trees(1).unwrap();
        builder.set_tree(id(0), EClass::Quad).unwrap();
        let cmesh = builder.commit().unwrap();

        let owners = element_owners.clone();
        let base_level = level;
        let owner: OwnerFn = Box::new(move |_gtree, elem| {
            let scheme = QuadScheme;
            let ancestor =
                scheme.element_linear_id(bytemuck::bytes_of(&elem), base_level as u8);
            owners[ancestor as usize]
        });

        let mut forest = Self::assemble(cmesh, 1, 1, level, 0, 1, true, true, owner, rank, size);
        // Keep only the elements this rank owns.
        let mut mine = ElementBuffer::new(std::mem::size_of::<QuadElem>());
        for (morton, &owner_rank) in element_owners.iter().enumerate() {
            if owner_rank == rank {
                mine.push_copy(bytemuck::bytes_of(&QuadElem {
                    level,
                    morton: morton as u64,
                }));
            }
        }
        forest.elements[0] = mine;
        forest
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        cmesh: Cmesh,
        nx: u64,
        ny: u64,
        level: u64,
        first_local_tree: u64,
        num_local_trees: u64,
        first_shared: bool,
        last_shared: bool,
        owner: OwnerFn,
        rank: usize,
        size: usize,
    ) -> GridForest {
        let elem_size = std::mem::size_of::<QuadElem>();
        let mut elements = Vec::new();
        let mut neighbors = Vec::new();
        for ltree in 0..num_local_trees {
            let gtree = first_local_tree + ltree;
            let mut buf = ElementBuffer::new(elem_size);
            for morton in 0..1u64 << (2 * level) {
                buf.push_copy(bytemuck::bytes_of(&QuadElem { level, morton }));
            }
            elements.push(buf);
            neighbors.push(grid_neighbors(gtree, nx, ny));
        }
        GridForest {
            cmesh,
            scheme: QuadScheme,
            rank,
            size,
            nx,
            ny,
            first_local_tree,
            num_local_trees,
            elements,
            neighbors,
            first_shared,
            last_shared,
            owner,
        }
    }
}

fn grid_neighbors(gtree: u64, nx: u64, ny: u64) -> Vec<FaceNeighbor> {
    let (tx, ty) = (gtree % nx, gtree / nx);
    let joined = |tree: u64, opposite: u8| FaceNeighbor::Joined {
        tree: id(tree),
        eclass: EClass::Quad,
        connection: FaceConnection::new(opposite, 0).unwrap(),
    };
    vec![
        if tx > 0 {
            joined(gtree - 1, 1)
        } else {
            FaceNeighbor::Boundary
        },
        if tx + 1 < nx {
            joined(gtree + 1, 0)
        } else {
            FaceNeighbor::Boundary
        },
        if ty > 0 {
            joined(gtree - nx, 3)
        } else {
            FaceNeighbor::Boundary
        },
        if ty + 1 < ny {
            joined(gtree + nx, 2)
        } else {
            FaceNeighbor::Boundary
        },
    ]
}

impl ForestView for GridForest {
    fn cmesh(&self) -> &Cmesh {
        &self.cmesh
    }

    fn scheme(&self, eclass: EClass) -> &dyn ElementScheme {
        assert_eq!(eclass, EClass::Quad);
        &self.scheme
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn first_local_tree(&self) -> GlobalTreeId {
        id(self.first_local_tree)
    }

    fn num_local_trees(&self) -> usize {
        self.num_local_trees as usize
    }

    fn first_tree_shared(&self) -> bool {
        self.first_shared
    }

    fn last_tree_shared(&self) -> bool {
        self.last_shared
    }

    fn tree_class(&self, _ltree: usize) -> EClass {
        EClass::Quad
    }

    fn tree_element_count(&self, ltree: usize) -> usize {
        self.elements[ltree].len()
    }

    fn tree_element(&self, ltree: usize, index: usize) -> &[u8] {
        self.elements[ltree].get(index)
    }

    fn coarse_face_neighbors(&self, ltree: usize) -> &[FaceNeighbor] {
        &self.neighbors[ltree]
    }

    fn cmesh_ltree_to_forest_ltree(&self, cmesh_ltree: usize) -> Option<usize> {
        let gtree = self.cmesh.first_tree().get() + cmesh_ltree as u64;
        if gtree >= self.first_local_tree && gtree < self.first_local_tree + self.num_local_trees
        {
            Some((gtree - self.first_local_tree) as usize)
        } else {
            None
        }
    }

    fn element_neighbor_eclass(&self, _ltree: usize, _elem: &[u8], _face: usize) -> EClass {
        EClass::Quad
    }

    fn element_half_face_neighbors(
        &self,
        ltree: usize,
        elem: &[u8],
        face: usize,
        half_neighbors: &mut ElementBuffer,
    ) -> Option<GlobalTreeId> {
        let e = decode(elem);
        let level = e.level;
        let side = 1u64 << level;
        let fine = 1u64 << (level + 1);
        let (x, y) = deinterleave(e.morton, level);
        let gtree = self.first_local_tree + ltree as u64;
        let (tx, ty) = (gtree % self.nx, gtree / self.nx);

        let (neighbor_tree, cells) = match face {
            0 => {
                if x > 0 {
                    (gtree, [(2 * x - 1, 2 * y), (2 * x - 1, 2 * y + 1)])
                } else if tx > 0 {
                    (gtree - 1, [(fine - 1, 2 * y), (fine - 1, 2 * y + 1)])
                } else {
                    return None;
                }
            }
            1 => {
                if x + 1 < side {
                    (gtree, [(2 * x + 2, 2 * y), (2 * x + 2, 2 * y + 1)])
                } else if tx + 1 < self.nx {
                    (gtree + 1, [(0, 2 * y), (0, 2 * y + 1)])
                } else {
                    return None;
                }
            }
            2 => {
                if y > 0 {
                    (gtree, [(2 * x, 2 * y - 1), (2 * x + 1, 2 * y - 1)])
                } else if ty > 0 {
                    (gtree - self.nx, [(2 * x, fine - 1), (2 * x + 1, fine - 1)])
                } else {
                    return None;
                }
            }
            3 => {
                if y + 1 < side {
                    (gtree, [(2 * x, 2 * y + 2), (2 * x + 1, 2 * y + 2)])
                } else if ty + 1 < self.ny {
                    (gtree + self.nx, [(2 * x, 0), (2 * x + 1, 0)])
                } else {
                    return None;
                }
            }
            _ => unreachable!("quads have four faces"),
        };

        for (i, (cx, cy)) in cells.into_iter().enumerate() {
            let child = QuadElem {
                level: level + 1,
                morton: interleave(cx, cy, level + 1),
            };
            half_neighbors
                .get_mut(i)
                .copy_from_slice(bytemuck::bytes_of(&child));
        }
        Some(id(neighbor_tree))
    }

    fn element_find_owner(
        &self,
        tree: GlobalTreeId,
        elem: &[u8],
        eclass: EClass,
    ) -> Result<usize, MeshError> {
        assert_eq!(eclass, EClass::Quad);
        Ok((self.owner)(tree.get(), decode(elem)))
    }
}

fn morton_ids(tree: &RemoteTree) -> Vec<u64> {
    tree.elements().iter().map(|e| decode(e).morton).collect()
}

#[test]
fn single_rank_forest_has_no_ghosts() {
    let forest = GridForest::tree_partition(2, 1, 1, vec![0, 2], 0);
    let ghost = build_ghost_layer(&forest).unwrap();
    assert_eq!(ghost.num_ghost_trees(), 0);
    assert!(ghost.remote_ranks().is_empty());
    assert_eq!(ghost.bundles().len(), 0);
}

#[test]
fn two_tree_strip_builds_reciprocal_plans() {
    let left = GridForest::tree_partition(2, 1, 1, vec![0, 1, 2], 0);
    let ghost_left = build_ghost_layer(&left).unwrap();
    assert_eq!(
        ghost_left
            .ghost_trees()
            .iter()
            .map(|t| t.global_id())
            .collect::<Vec<_>>(),
        vec![id(1)]
    );
    assert_eq!(ghost_left.remote_ranks(), &[1]);
    let bundle = ghost_left.bundle_for(1).unwrap();
    assert_eq!(bundle.trees().len(), 1);
    assert_eq!(bundle.trees()[0].global_id(), id(0));
    // The right column of tree 0: Morton ids 1 and 3.
    assert_eq!(morton_ids(&bundle.trees()[0]), vec![1, 3]);

    let right = GridForest::tree_partition(2, 1, 1, vec![0, 1, 2], 1);
    let ghost_right = build_ghost_layer(&right).unwrap();
    assert_eq!(
        ghost_right
            .ghost_trees()
            .iter()
            .map(|t| t.global_id())
            .collect::<Vec<_>>(),
        vec![id(0)]
    );
    let bundle = ghost_right.bundle_for(0).unwrap();
    // The left column of tree 1: Morton ids 0 and 2.
    assert_eq!(morton_ids(&bundle.trees()[0]), vec![0, 2]);
}

#[test]
fn bundles_group_trees_in_ascending_order() {
    // 2x2 grid, two ranks, split along the horizontal mid line.
    let forest = GridForest::tree_partition(2, 2, 1, vec![0, 2, 4], 0);
    let ghost = build_ghost_layer(&forest).unwrap();

    assert_eq!(
        ghost
            .ghost_trees()
            .iter()
            .map(|t| t.global_id())
            .collect::<Vec<_>>(),
        vec![id(2), id(3)]
    );
    let bundle = ghost.bundle_for(1).unwrap();
    let tree_ids: Vec<_> = bundle.trees().iter().map(|t| t.global_id()).collect();
    assert_eq!(tree_ids, vec![id(0), id(1)]);
    // The top row of each bottom tree: Morton ids 2 and 3.
    for tree in bundle.trees() {
        assert_eq!(morton_ids(tree), vec![2, 3]);
    }
    assert_eq!(bundle.num_elements(), 4);
}

#[test]
fn ghost_tree_index_matches_sorted_storage() {
    // 2x2 grid, four ranks, one tree each; rank 1 sees trees 0 and 3.
    let forest = GridForest::tree_partition(2, 2, 1, vec![0, 1, 2, 3, 4], 1);
    let ghost = build_ghost_layer(&forest).unwrap();

    let ids: Vec<_> = ghost.ghost_trees().iter().map(|t| t.global_id()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(ids, sorted, "ghost trees must be sorted and unique");
    assert_eq!(ids, vec![id(0), id(3)]);

    for (index, tree) in ghost.ghost_trees().iter().enumerate() {
        assert_eq!(ghost.ghost_tree_index(tree.global_id()), Some(index));
        assert_eq!(
            ghost.ghost_tree_by_id(tree.global_id()).unwrap().global_id(),
            tree.global_id()
        );
    }
}

#[test]
fn process_offsets_walk_ranks_monotonically() {
    let forest = GridForest::tree_partition(2, 2, 1, vec![0, 1, 2, 3, 4], 1);
    let ghost = build_ghost_layer(&forest).unwrap();
    let offsets = ghost.process_offsets(forest.cmesh()).unwrap();

    assert_eq!(
        offsets,
        &[
            ProcessOffset {
                rank: 0,
                tree_index: 0,
                first_element: 0
            },
            ProcessOffset {
                rank: 3,
                tree_index: 1,
                first_element: 0
            },
        ]
    );
}

#[test]
fn element_bordering_one_rank_twice_is_sent_once() {
    // Rank 0 owns only the bottom-left base element of a shared tree; both
    // its inner faces point at rank 1.
    let owners = vec![0, 1, 1, 1];
    let forest = GridForest::shared_tree(1, owners, 0, 2);
    let ghost = build_ghost_layer(&forest).unwrap();

    // The shared tree itself is the only ghost-tree candidate.
    assert_eq!(ghost.num_ghost_trees(), 1);
    assert_eq!(ghost.ghost_trees()[0].global_id(), id(0));

    let bundle = ghost.bundle_for(1).unwrap();
    assert_eq!(bundle.trees().len(), 1);
    assert_eq!(morton_ids(&bundle.trees()[0]), vec![0]);
    assert_eq!(bundle.num_elements(), 1);
}

proptest! {
    // P5/P6 on arbitrary grids and contiguous whole-tree partitions:
    // sorted unique ghost trees with a consistent index, bundles in
    // ascending tree order with strictly ascending element ids.
    #[test]
    fn prop_ghost_layer_invariants(
        nx in 1u64..4,
        ny in 1u64..4,
        level in 1u64..3,
        size in 2usize..4,
        rank_seed in any::<u64>(),
    ) {
        let num_trees = nx * ny;
        // Contiguous fair-share tree offsets.
        let offsets: Vec<u64> = (0..=size as u64)
            .map(|r| num_trees * r / size as u64)
            .collect();
        let rank = (rank_seed % size as u64) as usize;
        let forest = GridForest::tree_partition(nx, ny, level, offsets, rank);
        let ghost = build_ghost_layer(&forest).unwrap();

        let ids: Vec<_> = ghost.ghost_trees().iter().map(|t| t.global_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(&ids, &sorted);
        for (index, tree) in ghost.ghost_trees().iter().enumerate() {
            prop_assert_eq!(ghost.ghost_tree_index(tree.global_id()), Some(index));
        }

        for bundle in ghost.bundles() {
            prop_assert!(bundle.rank() != rank);
            let tree_ids: Vec<_> = bundle.trees().iter().map(|t| t.global_id()).collect();
            prop_assert!(
                tree_ids.windows(2).all(|w| w[0] < w[1]),
                "bundle trees not strictly ascending: {:?}", tree_ids
            );
            for tree in bundle.trees() {
                let ids = morton_ids(tree);
                prop_assert!(
                    ids.windows(2).all(|w| w[0] < w[1]),
                    "bundle elements not strictly ascending: {:?}", ids
                );
            }
        }

        if forest.cmesh().num_local_trees() > 0 {
            let table = ghost.process_offsets(forest.cmesh()).unwrap();
            prop_assert!(table.windows(2).all(|w| w[0].rank < w[1].rank));
            prop_assert!(table.windows(2).all(|w| w[0].tree_index < w[1].tree_index));
        }
    }
}

/// Serialize a bundle as (tree id, count, elements)* for the wire.
fn encode_bundle(bundle: &RemoteBundle) -> Vec<u8> {
    let mut out = Vec::new();
    for tree in bundle.trees() {
        out.extend_from_slice(&tree.global_id().get().to_le_bytes());
        out.extend_from_slice(&(tree.elements().len() as u64).to_le_bytes());
        for elem in tree.elements().iter() {
            out.extend_from_slice(elem);
        }
    }
    out
}

/// Deposit a received bundle payload into the matching ghost trees.
fn deposit_payload(ghost: &mut GhostLayer, mut payload: &[u8], elem_size: usize) {
    while !payload.is_empty() {
        let gid = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let count = u64::from_le_bytes(payload[8..16].try_into().unwrap()) as usize;
        payload = &payload[16..];
        let index = ghost
            .ghost_tree_index(id(gid))
            .expect("sender shipped a tree we did not anticipate");
        let tree = ghost.ghost_tree_mut(index).unwrap();
        for _ in 0..count {
            tree.elements_mut().push_copy(&payload[..elem_size]);
            payload = &payload[elem_size..];
        }
    }
}

#[test]
fn two_rank_exchange_fills_ghost_trees() {
    // Execute the send plan over the in-memory transport: sizes first, then
    // payloads, each rank depositing the peer's bundle into its ghost trees.
    use canopy_mesh::comm::{CommTag, GhostCommTags};

    let comms = ThreadComm::world(2);
    let elem_size = std::mem::size_of::<QuadElem>();
    let tags = GhostCommTags::from_base(CommTag::new(40));
    let handles: Vec<_> = comms
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            std::thread::spawn(move || {
                let forest = GridForest::tree_partition(2, 2, 1, vec![0, 2, 4], rank);
                let mut ghost = build_ghost_layer(&forest).unwrap();
                let peer = 1 - rank;
                let bundle = ghost.bundle_for(peer).expect("peer borders this rank");
                let payload = encode_bundle(bundle);

                let size_send = comm.isend(
                    peer,
                    tags.counts.as_u16(),
                    &(payload.len() as u64).to_le_bytes(),
                );
                let incoming = comm.irecv(peer, tags.counts.as_u16(), 8).wait().unwrap();
                size_send.wait();
                let incoming_len = u64::from_le_bytes(incoming.try_into().unwrap()) as usize;

                let send = comm.isend(peer, tags.payloads.as_u16(), &payload);
                let received = comm
                    .irecv(peer, tags.payloads.as_u16(), incoming_len)
                    .wait()
                    .expect("payload expected");
                send.wait();
                assert_eq!(received.len(), incoming_len);

                deposit_payload(&mut ghost, &received, elem_size);
                comm.barrier();

                // Each rank anticipated two ghost trees with two boundary
                // elements each.
                assert_eq!(ghost.num_ghost_trees(), 2);
                for tree in ghost.ghost_trees() {
                    assert_eq!(tree.elements().len(), 2, "tree {}", tree.global_id());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
