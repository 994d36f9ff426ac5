//! Communication abstraction: the process-group handle a cmesh is committed
//! against.
//!
//! The core never ships mesh payloads itself; it reads `rank`/`size` at
//! commit time, optionally duplicates the handle so the committed cmesh owns
//! an independent communicator, and leaves bulk transport to callers. The
//! non-blocking `isend`/`irecv` pair is exposed so that higher layers (and
//! tests) can run the ghost exchange through the same interface, with a
//! synchronous in-memory backend standing in for MPI.
//!
//! Wire format conventions (for higher-level protocols):
//! - All integers are LE fixed width (u32 counts/tags/ranks, u64 IDs).
//! - Receivers may truncate to their requested length; higher layers must
//!   exchange sizes first if exact lengths are required.

use crate::mesh_error::MeshError;
use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self: Box<Self>) -> Option<Vec<u8>>;
}

/// Process-group communicator handle.
///
/// Object-safe by design: a committed [`Cmesh`](crate::cmesh::Cmesh) stores
/// the handle as `Arc<dyn Communicator>` for the rest of its lifetime.
pub trait Communicator: Send + Sync {
    /// Rank of this process (0..size-1).
    fn rank(&self) -> usize;
    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Start a non-blocking send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Box<dyn Wait>;
    /// Start a non-blocking receive of up to `max_len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, max_len: usize) -> Box<dyn Wait>;

    /// Produce an independently owned handle to the same process group.
    fn duplicate(&self) -> Result<Arc<dyn Communicator>, MeshError>;

    /// Synchronization barrier (default: no-op for serial comms).
    fn barrier(&self) {}
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Safely offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// Tags for the two phases of a ghost exchange: element counts, then
/// element payloads.
#[derive(Copy, Clone, Debug)]
pub struct GhostCommTags {
    /// Tag used during the count-exchange phase.
    pub counts: CommTag,
    /// Tag used during the payload-exchange phase.
    pub payloads: CommTag,
}

impl GhostCommTags {
    /// Construct tags from a base, assigning deterministic offsets per phase.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            counts: base,
            payloads: base.offset(1),
        }
    }
}

struct NoOpHandle;

impl Wait for NoOpHandle {
    fn wait(self: Box<Self>) -> Option<Vec<u8>> {
        None
    }
}

/// Serial single-rank communicator; the world default a fresh builder
/// starts with.
#[derive(Clone, Debug, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) -> Box<dyn Wait> {
        Box::new(NoOpHandle)
    }

    fn irecv(&self, _peer: usize, _tag: u16, _max_len: usize) -> Box<dyn Wait> {
        Box::new(NoOpHandle)
    }

    fn duplicate(&self) -> Result<Arc<dyn Communicator>, MeshError> {
        Ok(Arc::new(SelfComm))
    }
}

// --- ThreadComm: intra-process SPMD simulation ---

// (world, src, dst, tag); the world id keeps concurrently running thread
// groups out of each other's mailboxes.
type Key = (u64, usize, usize, u16);

#[derive(Default)]
struct Slot {
    q: VecDeque<Vec<u8>>,
}

struct Mailbox {
    map: Mutex<HashMap<Key, Arc<(Mutex<Slot>, Condvar)>>>,
}

static MAILBOX: Lazy<Mailbox> = Lazy::new(|| Mailbox {
    map: Mutex::new(HashMap::new()),
});

static NEXT_WORLD: AtomicU64 = AtomicU64::new(0);

fn mailbox_entry(key: Key) -> Arc<(Mutex<Slot>, Condvar)> {
    let mut g = MAILBOX.map.lock().expect("MAILBOX poisoned");
    g.entry(key)
        .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
        .clone()
}

struct ThreadRecvHandle {
    cell: Arc<(Mutex<Slot>, Condvar)>,
    want_len: usize,
}

impl Wait for ThreadRecvHandle {
    fn wait(self: Box<Self>) -> Option<Vec<u8>> {
        let (lock, cv) = &*self.cell;
        let mut slot = lock.lock().expect("Slot poisoned");
        while slot.q.is_empty() {
            slot = cv.wait(slot).expect("Condvar poisoned");
        }
        let mut msg = slot.q.pop_front().expect("q non-empty");
        msg.truncate(self.want_len.min(msg.len()));
        Some(msg)
    }
}

/// Mailbox-backed communicator for running one logical rank per thread.
///
/// All ranks of one "world" share a mailbox namespace and a barrier;
/// create the whole group at once with [`ThreadComm::world`].
#[derive(Clone)]
pub struct ThreadComm {
    world: u64,
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
}

impl ThreadComm {
    /// Create one communicator per rank, all belonging to a fresh world.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let world = NEXT_WORLD.fetch_add(1, Ordering::Relaxed);
        let barrier = Arc::new(Barrier::new(size));
        (0..size)
            .map(|rank| ThreadComm {
                world,
                rank,
                size,
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("world", &self.world)
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Box<dyn Wait> {
        let entry = mailbox_entry((self.world, self.rank, peer, tag));
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("Slot poisoned");
            slot.q.push_back(buf.to_vec());
        }
        cv.notify_all();
        Box::new(NoOpHandle)
    }

    fn irecv(&self, peer: usize, tag: u16, max_len: usize) -> Box<dyn Wait> {
        Box::new(ThreadRecvHandle {
            cell: mailbox_entry((self.world, peer, self.rank, tag)),
            want_len: max_len,
        })
    }

    fn duplicate(&self) -> Result<Arc<dyn Communicator>, MeshError> {
        Ok(Arc::new(self.clone()))
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}

// --- MPI backend ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use core::ptr::NonNull;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// MPI-backed communicator. Created from the world at initialization;
    /// `duplicate` wraps `MPI_Comm_dup`.
    pub struct MpiComm {
        universe: Option<Arc<Universe>>,
        comm: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let uni = mpi::initialize().expect("MPI initialization failed");
            let comm = uni.world();
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Self {
                universe: Some(Arc::new(uni)),
                comm,
                rank,
                size,
            }
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Box<dyn Wait> {
            use mpi::request::StaticScope;
            let boxed = buf.to_vec().into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice: &[u8] = unsafe { &*raw };
            let req = self
                .comm
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            Box::new(MpiSendHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            })
        }

        fn irecv(&self, peer: usize, tag: u16, max_len: usize) -> Box<dyn Wait> {
            use mpi::request::StaticScope;
            let boxed = vec![0u8; max_len].into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice_mut: &mut [u8] = unsafe { &mut *raw };
            let req = self
                .comm
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice_mut, tag as i32);
            Box::new(MpiRecvHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
                len: max_len,
            })
        }

        fn duplicate(&self) -> Result<Arc<dyn Communicator>, MeshError> {
            let dup = self.comm.duplicate();
            Ok(Arc::new(MpiComm {
                universe: self.universe.clone(),
                comm: dup,
                rank: self.rank,
                size: self.size,
            }))
        }

        fn barrier(&self) {
            self.comm.barrier();
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self: Box<Self>) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
            None
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
                #[cfg(debug_assertions)]
                eprintln!("[MpiSendHandle::drop] send not explicitly waited");
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }

    pub struct MpiRecvHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
        len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(mut self: Box<Self>) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            let ptr = self.buf.take().expect("buffer missing");
            let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
            let mut v = Vec::from(boxed);
            v.truncate(self.len);
            Some(v)
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
                #[cfg(debug_assertions)]
                eprintln!("[MpiRecvHandle::drop] recv not explicitly waited");
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
