//! Staged construction of a cmesh.
//!
//! A [`CmeshBuilder`] is the Configuring phase of the cmesh lifecycle:
//! setters assemble communicator, partition metadata, and trees, and
//! [`commit`](CmeshBuilder::commit) consumes the builder to produce the
//! immutable [`Cmesh`]. Ownership makes the phase distinction total — there
//! is no way to mutate a committed cmesh or to query a builder for
//! rank-dependent values.
//!
//! All ranks of a communicator must execute matching setter sequences and
//! commit collectively; the builder itself performs no communication.

use crate::cmesh::cmesh::Cmesh;
use crate::cmesh::eclass::{EClass, EClassCounts};
use crate::cmesh::tree::{FaceConnection, FaceNeighbor, GlobalTreeId, Tree};
use crate::comm::{Communicator, SelfComm};
use crate::mesh_error::MeshError;
use std::sync::Arc;

/// Builder for a [`Cmesh`]; the Configuring phase of the lifecycle.
pub struct CmeshBuilder {
    comm: Arc<dyn Communicator>,
    do_dup: bool,
    comm_replaced: bool,
    partitioned: bool,
    partition_set: bool,
    num_trees: Option<u64>,
    num_local_trees: Option<u64>,
    first_tree: GlobalTreeId,
    num_ghosts: u64,
    dimension: Option<u8>,
    trees_per_eclass: EClassCounts,
    trees: Vec<Option<Tree>>,
    tree_offsets: Option<Vec<u64>>,
}

impl Default for CmeshBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CmeshBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmeshBuilder")
            .field("do_dup", &self.do_dup)
            .field("comm_replaced", &self.comm_replaced)
            .field("partitioned", &self.partitioned)
            .field("partition_set", &self.partition_set)
            .field("num_trees", &self.num_trees)
            .field("num_local_trees", &self.num_local_trees)
            .field("first_tree", &self.first_tree)
            .field("num_ghosts", &self.num_ghosts)
            .field("dimension", &self.dimension)
            .field("trees_per_eclass", &self.trees_per_eclass)
            .field("trees", &self.trees)
            .field("tree_offsets", &self.tree_offsets)
            .finish()
    }
}

impl CmeshBuilder {
    /// Start configuring an empty cmesh against the serial world-default
    /// communicator.
    pub fn new() -> Self {
        CmeshBuilder {
            comm: Arc::new(SelfComm),
            do_dup: false,
            comm_replaced: false,
            partitioned: false,
            partition_set: false,
            num_trees: None,
            num_local_trees: None,
            first_tree: GlobalTreeId::new(0),
            num_ghosts: 0,
            dimension: None,
            trees_per_eclass: [0; EClass::COUNT],
            trees: Vec::new(),
            tree_offsets: None,
        }
    }

    /// Replace the default communicator. If `do_dup` is set, commit will
    /// duplicate the handle and the cmesh will own the duplicate.
    ///
    /// Fails if a non-default communicator was already installed.
    pub fn set_mpicomm(
        &mut self,
        comm: Arc<dyn Communicator>,
        do_dup: bool,
    ) -> Result<&mut Self, MeshError> {
        if self.comm_replaced {
            return Err(MeshError::CommunicatorAlreadySet);
        }
        self.comm = comm;
        self.do_dup = do_dup;
        self.comm_replaced = true;
        Ok(self)
    }

    /// Select replicated or partitioned storage.
    ///
    /// In replicated mode (`partitioned == false`) the call is equivalent to
    /// [`set_num_trees`](Self::set_num_trees)`(num_global_trees)`;
    /// `first_local_tree` and `num_ghosts` are ignored. In partitioned mode
    /// it records the global tree count and this rank's window; the local
    /// count follows in a separate `set_num_trees` call.
    ///
    /// Fails if partition mode was already selected or trees were already
    /// configured.
    pub fn set_partitioned(
        &mut self,
        partitioned: bool,
        num_global_trees: u64,
        first_local_tree: GlobalTreeId,
        num_ghosts: u64,
    ) -> Result<&mut Self, MeshError> {
        if self.partition_set {
            return Err(MeshError::PartitionAlreadySet);
        }
        if self.num_trees.is_some() || self.num_local_trees.is_some() {
            return Err(MeshError::TreesAlreadyInserted);
        }
        self.partition_set = true;
        if !partitioned {
            // Replicated: this call just serves as set_num_trees.
            return self.set_num_trees(num_global_trees);
        }
        self.partitioned = true;
        self.num_trees = Some(num_global_trees);
        self.first_tree = first_local_tree;
        self.num_ghosts = num_ghosts;
        Ok(self)
    }

    /// Set the tree count and allocate tree storage.
    ///
    /// Replicated: sets both the global and local count (`n > 0`).
    /// Partitioned: sets the local count (`n >= 0` is allowed); the global
    /// count must already have been set positive via `set_partitioned`.
    pub fn set_num_trees(&mut self, n: u64) -> Result<&mut Self, MeshError> {
        if self.num_local_trees.is_some() {
            return Err(MeshError::NumTreesAlreadySet);
        }
        if self.partitioned {
            match self.num_trees {
                Some(global) if global > 0 => {}
                _ => return Err(MeshError::GlobalTreeCountUnset),
            }
        } else {
            if n == 0 {
                return Err(MeshError::ZeroTrees);
            }
            if self.num_trees.is_some() {
                return Err(MeshError::NumTreesAlreadySet);
            }
            self.num_trees = Some(n);
        }
        self.num_local_trees = Some(n);
        self.trees = (0..n).map(|_| None).collect();
        Ok(self)
    }

    /// Populate one tree with its element class.
    ///
    /// The id must lie in the valid local range. The first insertion fixes
    /// the cmesh dimension; later insertions must match it.
    pub fn set_tree(
        &mut self,
        tree_id: GlobalTreeId,
        eclass: EClass,
    ) -> Result<&mut Self, MeshError> {
        let index = self.local_index(tree_id)?;
        let dim = eclass.dimension();
        match self.dimension {
            None => self.dimension = Some(dim),
            Some(d) if d == dim => {}
            Some(d) => {
                return Err(MeshError::DimensionMismatch {
                    cmesh: d,
                    tree: dim,
                })
            }
        }
        if self.trees[index].is_some() {
            return Err(MeshError::TreeAlreadySet(tree_id));
        }
        self.trees_per_eclass[eclass as usize] += 1;
        self.trees[index] = Some(Tree::new(tree_id, eclass));
        Ok(self)
    }

    /// Connect two trees along the given faces.
    ///
    /// The face classes must match (a triangle face cannot be glued to a
    /// quad face). `orientation` encodes the relative permutation of the
    /// face vertices and is stored, together with the opposite face index,
    /// in the packed face byte of each slot. Both slots are written so the
    /// committed mesh is symmetric.
    ///
    /// Joining a tree outside this rank's range is unsupported in the
    /// present revision: the neighbor's element class is unknown here.
    pub fn join_faces(
        &mut self,
        tree1: GlobalTreeId,
        tree2: GlobalTreeId,
        face1: usize,
        face2: usize,
        orientation: u8,
    ) -> Result<&mut Self, MeshError> {
        let index1 = self.local_index(tree1);
        let index2 = self.local_index(tree2);
        // At least one side must be local; a remote other side is
        // unsupported because its eclass cannot be resolved.
        let (index1, index2) = match (index1, index2) {
            (Ok(i1), Ok(i2)) => (i1, i2),
            (Ok(_), Err(_)) => return Err(MeshError::RemoteJoinUnsupported(tree2)),
            (Err(_), Ok(_)) => return Err(MeshError::RemoteJoinUnsupported(tree1)),
            (Err(e), Err(_)) => return Err(e),
        };
        let class1 = self.tree_class_at(index1, tree1)?;
        let class2 = self.tree_class_at(index2, tree2)?;
        let face_class1 = class1.face_class(face1).ok_or(MeshError::FaceOutOfRange {
            tree: tree1,
            face: face1,
            num_faces: class1.num_faces(),
        })?;
        let face_class2 = class2.face_class(face2).ok_or(MeshError::FaceOutOfRange {
            tree: tree2,
            face: face2,
            num_faces: class2.num_faces(),
        })?;
        if face_class1 != face_class2 {
            return Err(MeshError::FaceClassMismatch(face_class1, face_class2));
        }
        let conn1 = FaceConnection::new(face2 as u8, orientation)?;
        let conn2 = FaceConnection::new(face1 as u8, orientation)?;
        self.trees[index1]
            .as_mut()
            .expect("tree presence checked above")
            .set_face_neighbor(
                face1,
                FaceNeighbor::Joined {
                    tree: tree2,
                    eclass: class2,
                    connection: conn1,
                },
            );
        self.trees[index2]
            .as_mut()
            .expect("tree presence checked above")
            .set_face_neighbor(
                face2,
                FaceNeighbor::Joined {
                    tree: tree1,
                    eclass: class1,
                    connection: conn2,
                },
            );
        Ok(self)
    }

    /// Install the per-rank tree-offset table: entry `r` is the global id of
    /// the first tree of rank `r`, with a final entry equal to the global
    /// tree count. Must be monotone non-decreasing; full consistency is
    /// checked at commit.
    pub fn set_tree_offsets(&mut self, offsets: Vec<u64>) -> Result<&mut Self, MeshError> {
        if self.tree_offsets.is_some() {
            return Err(MeshError::BadTreeOffsets("offsets already set".into()));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(MeshError::BadTreeOffsets(
                "offsets must be monotone non-decreasing".into(),
            ));
        }
        self.tree_offsets = Some(offsets);
        Ok(self)
    }

    /// Freeze the cmesh: duplicate the communicator if requested, query
    /// rank and size from the final handle, and hand out the immutable
    /// [`Cmesh`].
    pub fn commit(self) -> Result<Cmesh, MeshError> {
        let num_trees = match self.num_trees {
            Some(n) if n > 0 => n,
            _ => return Err(MeshError::ZeroTrees),
        };
        let num_local_trees = self.num_local_trees.unwrap_or(0);
        if self.partitioned
            && self
                .first_tree
                .get()
                .checked_add(num_local_trees)
                .map_or(true, |end| end > num_trees)
        {
            return Err(MeshError::PartitionRangeInvalid {
                first_tree: self.first_tree,
                num_local_trees,
                num_trees,
            });
        }
        let mut trees = Vec::with_capacity(self.trees.len());
        for (i, slot) in self.trees.into_iter().enumerate() {
            let gid = GlobalTreeId::new(self.first_tree.get() + i as u64);
            trees.push(slot.ok_or(MeshError::UnsetTree(gid))?);
        }

        let comm = if self.do_dup {
            self.comm.duplicate()?
        } else {
            self.comm
        };
        let rank = comm.rank();
        let size = comm.size();

        if let Some(offsets) = &self.tree_offsets {
            validate_tree_offsets(
                offsets,
                size,
                num_trees,
                self.partitioned.then_some((self.first_tree, num_local_trees, rank)),
            )?;
        }

        log::debug!(
            "committing cmesh: {} global trees, {} local, rank {}/{}",
            num_trees,
            num_local_trees,
            rank,
            size
        );

        Ok(Cmesh::from_parts(
            self.dimension,
            comm,
            self.do_dup,
            rank,
            size,
            self.partitioned,
            num_trees,
            num_local_trees,
            if self.partitioned { self.num_ghosts } else { 0 },
            self.first_tree,
            self.trees_per_eclass,
            trees,
            self.tree_offsets,
        ))
    }

    /// Index of `tree_id` in local tree storage, or an error when the id is
    /// outside the valid local range.
    fn local_index(&self, tree_id: GlobalTreeId) -> Result<usize, MeshError> {
        let count = self.num_local_trees.unwrap_or(0);
        let first = if self.partitioned {
            self.first_tree.get()
        } else {
            0
        };
        let id = tree_id.get();
        if id < first || id >= first + count {
            return Err(MeshError::TreeIdOutOfRange {
                tree: tree_id,
                first: GlobalTreeId::new(first),
                count,
            });
        }
        Ok((id - first) as usize)
    }

    fn tree_class_at(&self, index: usize, id: GlobalTreeId) -> Result<EClass, MeshError> {
        self.trees[index]
            .as_ref()
            .map(Tree::eclass)
            .ok_or(MeshError::UnsetTree(id))
    }
}

fn validate_tree_offsets(
    offsets: &[u64],
    size: usize,
    num_trees: u64,
    local_window: Option<(GlobalTreeId, u64, usize)>,
) -> Result<(), MeshError> {
    if offsets.len() != size + 1 {
        return Err(MeshError::BadTreeOffsets(format!(
            "expected {} entries for {} ranks, got {}",
            size + 1,
            size,
            offsets.len()
        )));
    }
    if offsets[size] != num_trees {
        return Err(MeshError::BadTreeOffsets(format!(
            "final offset {} does not equal the global tree count {}",
            offsets[size], num_trees
        )));
    }
    if let Some((first_tree, num_local, rank)) = local_window {
        if offsets[rank] != first_tree.get() || offsets[rank + 1] - offsets[rank] != num_local {
            return Err(MeshError::BadTreeOffsets(format!(
                "rank {} window [{}, {}) disagrees with first_tree {} and local count {}",
                rank,
                offsets[rank],
                offsets[rank + 1],
                first_tree,
                num_local
            )));
        }
    }
    Ok(())
}
