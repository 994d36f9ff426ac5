//! Canonical single-domain constructors.
//!
//! Convenience wrappers over [`CmeshBuilder`] for the unit hypercube meshed
//! with each element class.

use crate::cmesh::builder::CmeshBuilder;
use crate::cmesh::cmesh::Cmesh;
use crate::cmesh::eclass::EClass;
use crate::cmesh::tree::GlobalTreeId;
use crate::comm::Communicator;
use crate::mesh_error::MeshError;
use std::sync::Arc;

impl Cmesh {
    /// Unit hypercube of the class's dimension, meshed with
    /// [`EClass::hypercube_tree_count`] trees of that class.
    pub fn new_hypercube(
        eclass: EClass,
        comm: Arc<dyn Communicator>,
        do_dup: bool,
    ) -> Result<Cmesh, MeshError> {
        let mut builder = CmeshBuilder::new();
        builder.set_mpicomm(comm, do_dup)?;
        let n = eclass.hypercube_tree_count();
        builder.set_num_trees(n)?;
        for i in 0..n {
            builder.set_tree(GlobalTreeId::new(i), eclass)?;
        }
        builder.commit()
    }

    /// A single triangle.
    pub fn new_tri(comm: Arc<dyn Communicator>, do_dup: bool) -> Result<Cmesh, MeshError> {
        Self::new_single(EClass::Triangle, comm, do_dup)
    }

    /// A single quadrilateral.
    pub fn new_quad(comm: Arc<dyn Communicator>, do_dup: bool) -> Result<Cmesh, MeshError> {
        Self::new_single(EClass::Quad, comm, do_dup)
    }

    /// A single tetrahedron.
    pub fn new_tet(comm: Arc<dyn Communicator>, do_dup: bool) -> Result<Cmesh, MeshError> {
        Self::new_single(EClass::Tet, comm, do_dup)
    }

    /// A single hexahedron.
    pub fn new_hex(comm: Arc<dyn Communicator>, do_dup: bool) -> Result<Cmesh, MeshError> {
        Self::new_single(EClass::Hex, comm, do_dup)
    }

    fn new_single(
        eclass: EClass,
        comm: Arc<dyn Communicator>,
        do_dup: bool,
    ) -> Result<Cmesh, MeshError> {
        let mut builder = CmeshBuilder::new();
        builder.set_mpicomm(comm, do_dup)?;
        builder.set_num_trees(1)?;
        builder.set_tree(GlobalTreeId::new(0), eclass)?;
        builder.commit()
    }
}
