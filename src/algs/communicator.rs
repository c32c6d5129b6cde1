//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). Receives
//! return the whole message, so callers announce lengths up front when they
//! need to validate them (see [`crate::algs::collective`]).
//!
//! Messages between one `(src, dst, tag)` triple are delivered in the order
//! they were sent, matching MPI's non-overtaking rule.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Header records of collective operations.
    pub const COLLECTIVE_HEADER: CommTag = CommTag(0xD0B0);
    /// Payloads of collective operations.
    pub const COLLECTIVE_PAYLOAD: CommTag = CommTag(0xD0B1);
}

/// Point-to-point communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Rank of this process.
    fn rank(&self) -> usize;
    /// Number of participating processes.
    fn size(&self) -> usize;

    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    type SendHandle = C::SendHandle;
    type RecvHandle = C::RecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        (**self).isend(peer, tag, buf)
    }
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle {
        (**self).irecv(peer, tag)
    }
    fn rank(&self) -> usize {
        (**self).rank()
    }
    fn size(&self) -> usize {
        (**self).size()
    }
    fn is_no_comm(&self) -> bool {
        (**self).is_no_comm()
    }
}

/// Compile-time no-op comm for serial runs: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// In-process rank of a simulated world; every rank of one world shares a
/// mailbox. Run each rank on its own thread.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Option<Duration>,
}

impl LocalComm {
    /// Create all ranks of a world of `size` processes.
    pub fn world(size: usize) -> Vec<LocalComm> {
        Self::world_with_timeout(size, None)
    }

    /// Like [`LocalComm::world`], but receives give up after `timeout`
    /// (returning `None` from `wait`) instead of blocking forever.
    pub fn world_with_timeout(size: usize, timeout: Option<Duration>) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout,
            })
            .collect()
    }

    /// Messages posted but not yet received, across the whole world.
    pub fn pending_messages(&self) -> usize {
        self.mailbox.iter().map(|e| e.value().len()).sum()
    }
}

pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    timeout: Option<Duration>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let start = Instant::now();
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            if let Some(limit) = self.timeout {
                if start.elapsed() > limit {
                    return None;
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use crate::mesh_error::MeshDbError;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// World communicator. Sends are blocking (`MPI_Send`); receives complete
    /// eagerly, so `wait` only hands back the buffer.
    pub struct MpiComm {
        // declared before `_universe` so it is dropped before finalize
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, MeshDbError> {
            let universe = mpi::initialize().ok_or(MeshDbError::MpiInit)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    pub struct MpiRecv(Option<Vec<u8>>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            MpiRecv(Some(data))
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_comm_is_serial() {
        let comm = NoComm;
        assert!(comm.is_no_comm());
        assert_eq!((comm.rank(), comm.size()), (0, 1));
        assert!(comm.irecv(0, 1).wait().is_none());
    }

    #[test]
    fn local_roundtrip_two_ranks() {
        let world = LocalComm::world(2);
        let (c0, c1) = (&world[0], &world[1]);

        let recv = c1.irecv(0, 7);
        c0.isend(1, 7, &[1, 2, 3, 4]);

        let data = recv.wait().expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
        assert_eq!(c0.pending_messages(), 0);
    }

    #[test]
    fn local_messages_are_fifo_per_tag() {
        let world = LocalComm::world(2);
        world[0].isend(1, 3, &[1]);
        world[0].isend(1, 3, &[2]);
        world[0].isend(1, 4, &[9]);
        assert_eq!(world[1].irecv(0, 4).wait(), Some(vec![9]));
        assert_eq!(world[1].irecv(0, 3).wait(), Some(vec![1]));
        assert_eq!(world[1].irecv(0, 3).wait(), Some(vec![2]));
    }

    #[test]
    fn local_receive_times_out() {
        let world = LocalComm::world_with_timeout(2, Some(Duration::from_millis(20)));
        assert!(world[1].irecv(0, 1).wait().is_none());
    }

    #[test]
    fn worlds_do_not_share_mailboxes() {
        let a = LocalComm::world_with_timeout(2, Some(Duration::from_millis(20)));
        let b = LocalComm::world_with_timeout(2, Some(Duration::from_millis(20)));
        a[0].isend(1, 5, &[42]);
        assert!(b[1].irecv(0, 5).wait().is_none());
        assert_eq!(a[1].irecv(0, 5).wait(), Some(vec![42]));
    }
}
