//! MeshError: unified error type for canopy-mesh public APIs.
//!
//! Every fallible operation in the crate reports through this enum so that
//! callers get robust, non-panicking error handling. Variants fall into four
//! families: contract violations (wrong phase, bad ids, mismatched
//! dimensions), configuration errors (inconsistent commit input),
//! communicator failures, and operations that are unsupported in the current
//! revision.

use crate::cmesh::eclass::EClass;
use crate::cmesh::tree::GlobalTreeId;
use thiserror::Error;

/// Unified error type for canopy-mesh operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// A non-default communicator was installed twice on one builder.
    #[error("communicator already set; a builder accepts at most one non-default communicator")]
    CommunicatorAlreadySet,
    /// The communicator backend reported a failure (dup, rank or size query).
    #[error("communicator failure: {0}")]
    CommFailure(String),
    /// `set_partitioned` was called twice.
    #[error("partition mode already selected for this builder")]
    PartitionAlreadySet,
    /// Partition mode was selected after tree storage had been configured.
    #[error("cannot select partition mode: tree counts are already configured")]
    TreesAlreadyInserted,
    /// `set_num_trees` was called twice.
    #[error("number of trees already set")]
    NumTreesAlreadySet,
    /// The local tree count was set on a partitioned builder whose global
    /// count is missing or zero.
    #[error("partitioned builder requires a positive global tree count before local counts")]
    GlobalTreeCountUnset,
    /// A replicated cmesh must contain at least one tree.
    #[error("a cmesh must contain at least one tree")]
    ZeroTrees,
    /// Tree id outside the valid local range.
    #[error("tree {tree} outside local range [{first}, {first}+{count})")]
    TreeIdOutOfRange {
        tree: GlobalTreeId,
        first: GlobalTreeId,
        count: u64,
    },
    /// `set_tree` was called twice for the same id.
    #[error("tree {0} inserted twice")]
    TreeAlreadySet(GlobalTreeId),
    /// A tree slot was never populated via `set_tree`.
    #[error("tree {0} was allocated but never set")]
    UnsetTree(GlobalTreeId),
    /// An inserted tree's dimension differs from the cmesh dimension.
    #[error("tree dimension {tree} does not match cmesh dimension {cmesh}")]
    DimensionMismatch { cmesh: u8, tree: u8 },
    /// The cmesh dimension is still unknown (no local tree was inserted).
    #[error("cmesh dimension is unset; no tree was inserted on this rank")]
    DimensionUnset,
    /// A face index is out of range for the tree's element class.
    #[error("face {face} out of range for tree {tree} with {num_faces} faces")]
    FaceOutOfRange {
        tree: GlobalTreeId,
        face: usize,
        num_faces: usize,
    },
    /// The two faces of a join have incompatible classes.
    #[error("cannot join a {0:?} face to a {1:?} face")]
    FaceClassMismatch(EClass, EClass),
    /// Face index or orientation does not fit the packed connection byte.
    #[error("face {face} / orientation {orientation} does not fit the packed face byte")]
    InvalidFaceConnection { face: u8, orientation: u8 },
    /// `join_faces` naming a tree outside the builder's local range.
    #[error("joining faces of non-local tree {0} is unsupported in this revision")]
    RemoteJoinUnsupported(GlobalTreeId),
    /// Uniform partition bounds are undefined for meshes containing pyramids.
    #[error("uniform partition bounds do not support pyramidal trees")]
    PyramidPartitionUnsupported,
    /// `dimension * level` exceeds the representable child-count range.
    #[error("refinement level {level} too deep for dimension {dimension}")]
    RefinementTooDeep { dimension: u8, level: u32 },
    /// The per-rank tree range is inconsistent with the global count.
    #[error(
        "local range [{first_tree}, {first_tree}+{num_local_trees}) exceeds {num_trees} global trees"
    )]
    PartitionRangeInvalid {
        first_tree: GlobalTreeId,
        num_local_trees: u64,
        num_trees: u64,
    },
    /// The tree-offset table is malformed or inconsistent.
    #[error("bad tree offsets: {0}")]
    BadTreeOffsets(String),
    /// A query needed the per-rank tree-offset table, which was never set.
    #[error("operation requires the tree-offset table of a partitioned cmesh")]
    MissingPartitionTable,
    /// An owner lookup produced a rank outside the communicator size.
    #[error("owner rank {owner} out of range for communicator size {size}")]
    OwnerOutOfRange { owner: usize, size: usize },
}
