//! Element-class registry: the fixed set of coarse-tree shapes.
//!
//! Pure data; every query is a table lookup on the enum value.

use serde::{Deserialize, Serialize};

/// Element class of a coarse tree.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub enum EClass {
    /// 0D point.
    Vertex,
    /// 1D segment.
    Line,
    /// 2D simplex.
    Triangle,
    /// 2D tensor-product cell.
    Quad,
    /// 3D simplex.
    Tet,
    /// 3D tensor-product cell.
    Hex,
    /// 3D wedge.
    Prism,
    /// 3D pyramid.
    Pyramid,
}

impl EClass {
    /// Number of element classes.
    pub const COUNT: usize = 8;

    /// All classes, in enum order.
    pub const ALL: [EClass; Self::COUNT] = [
        EClass::Vertex,
        EClass::Line,
        EClass::Triangle,
        EClass::Quad,
        EClass::Tet,
        EClass::Hex,
        EClass::Prism,
        EClass::Pyramid,
    ];

    /// Topological dimension of the class.
    pub const fn dimension(self) -> u8 {
        match self {
            EClass::Vertex => 0,
            EClass::Line => 1,
            EClass::Triangle | EClass::Quad => 2,
            EClass::Tet | EClass::Hex | EClass::Prism | EClass::Pyramid => 3,
        }
    }

    /// Number of codimension-1 faces of the class.
    pub const fn num_faces(self) -> usize {
        match self {
            EClass::Vertex => 0,
            EClass::Line => 2,
            EClass::Triangle => 3,
            EClass::Quad => 4,
            EClass::Tet => 4,
            EClass::Hex => 6,
            EClass::Prism => 5,
            EClass::Pyramid => 5,
        }
    }

    /// Class of the given face, or `None` if the face index is out of range.
    ///
    /// Prism faces 0..3 are the quadrilateral mantle, 3..5 the triangular
    /// caps; pyramid faces 0..4 are the triangular mantle, 4 the quad base.
    pub fn face_class(self, face: usize) -> Option<EClass> {
        if face >= self.num_faces() {
            return None;
        }
        Some(match self {
            EClass::Vertex => unreachable!("vertices have no faces"),
            EClass::Line => EClass::Vertex,
            EClass::Triangle | EClass::Quad => EClass::Line,
            EClass::Tet => EClass::Triangle,
            EClass::Hex => EClass::Quad,
            EClass::Prism => {
                if face < 3 {
                    EClass::Quad
                } else {
                    EClass::Triangle
                }
            }
            EClass::Pyramid => {
                if face < 4 {
                    EClass::Triangle
                } else {
                    EClass::Quad
                }
            }
        })
    }

    /// Number of trees of this class needed to mesh the unit hypercube of
    /// the matching dimension.
    pub const fn hypercube_tree_count(self) -> u64 {
        match self {
            EClass::Vertex => 1,
            EClass::Line => 1,
            EClass::Triangle => 2,
            EClass::Quad => 1,
            EClass::Tet => 6,
            EClass::Hex => 1,
            EClass::Prism => 2,
            EClass::Pyramid => 3,
        }
    }
}

/// Per-class counters, indexed by enum discriminant.
pub type EClassCounts = [u64; EClass::COUNT];
