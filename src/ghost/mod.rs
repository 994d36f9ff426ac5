//! Ghost-layer subsystem: the remote-owned elements bordering this rank's
//! domain and the reciprocal send plan.
//!
//! [`build_ghost_layer`] derives, from a committed forest, both the
//! candidate [`GhostTree`]s (trees whose elements will arrive from remote
//! ranks) and the per-rank [`RemoteBundle`]s of locally owned elements other
//! ranks need. The actual message exchange is left to the caller; see the
//! [`Communicator`](crate::comm::Communicator) interface.

pub mod builder;
pub mod element;
pub mod forest;
pub mod store;

pub use builder::build_ghost_layer;
pub use element::{ElementBuffer, ElementScheme};
pub use forest::ForestView;
pub use store::{GhostLayer, GhostTree, ProcessOffset, RemoteBundle, RemoteTree};
