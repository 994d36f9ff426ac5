//! # canopy-mesh
//!
//! canopy-mesh is the coarse-topology and ghost-layer core of a parallel
//! adaptive mesh stack. A *cmesh* describes the computational domain as a
//! collection of coarse trees (points, lines, triangles, quads, tets,
//! hexes, prisms, pyramids) glued together along faces; refining each tree
//! into fine elements is the job of an external forest, which this crate
//! consumes through small capability traits.
//!
//! ## Subsystems
//! - [`cmesh`]: staged-commit construction of a replicated or partitioned
//!   coarse mesh, committed-phase topology queries, and per-rank
//!   uniform-refinement partition bounds.
//! - [`ghost`]: given a committed forest, derive the remote-owned ghost
//!   trees bordering this rank and the per-rank bundles of locally owned
//!   elements other ranks need, ready for exchange.
//! - [`comm`]: the process-group communicator capability (serial,
//!   thread-mailbox for SPMD tests, MPI behind the `mpi-support` feature).
//!
//! The crate plans communication but never performs it: ghost construction
//! produces send/receive layouts, and transports run behind the
//! [`comm::Communicator`] interface so tests can substitute a synchronous
//! in-memory exchange.
//!
//! ## Usage
//!
//! ```
//! use canopy_mesh::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), canopy_mesh::mesh_error::MeshError> {
//! let mut builder = CmeshBuilder::new();
//! builder.set_num_trees(2)?;
//! builder.set_tree(GlobalTreeId::new(0), EClass::Quad)?;
//! builder.set_tree(GlobalTreeId::new(1), EClass::Quad)?;
//! builder.join_faces(GlobalTreeId::new(0), GlobalTreeId::new(1), 1, 0, 0)?;
//! let cmesh = builder.commit()?;
//! assert_eq!(cmesh.num_trees(), 2);
//! assert_eq!(cmesh.dimension(), Some(2));
//! # Ok(())
//! # }
//! ```

pub mod cmesh;
pub mod comm;
pub mod ghost;
mod invariants;
pub mod mesh_error;

/// A convenient prelude importing the most-used types.
pub mod prelude {
    pub use crate::cmesh::{
        Cmesh, CmeshBuilder, EClass, FaceConnection, FaceNeighbor, GlobalTreeId, Tree,
        UniformBounds,
    };
    pub use crate::comm::{Communicator, SelfComm, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::ghost::{
        build_ghost_layer, ElementBuffer, ElementScheme, ForestView, GhostLayer, GhostTree,
        ProcessOffset, RemoteBundle, RemoteTree,
    };
    pub use crate::mesh_error::MeshError;
}
