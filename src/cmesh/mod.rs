//! Coarse-mesh subsystem: element classes, tree records, the staged-commit
//! builder, and the committed topology store.
//!
//! A cmesh describes the domain as a collection of coarse trees glued
//! face-to-face. It is assembled through [`CmeshBuilder`] and frozen into a
//! [`Cmesh`] by `commit`; after that, only queries remain.

pub mod builder;
#[allow(clippy::module_inception)]
pub mod cmesh;
pub mod eclass;
pub mod factory;
pub mod tree;

pub use builder::CmeshBuilder;
pub use cmesh::{Cmesh, UniformBounds};
pub use eclass::{EClass, EClassCounts};
pub use tree::{FaceConnection, FaceNeighbor, GlobalTreeId, Tree};
