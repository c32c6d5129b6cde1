//! Blocking collectives (broadcast, all-gather) over a point-to-point
//! [`Communicator`].
//!
//! Every collective is two-phase: a fixed [`WireHdr`] carrying a success
//! flag and the payload length goes out first, and the payload follows only
//! when the sender succeeded. A failure on any participant therefore reaches
//! every rank as [`MeshDbError::CollectiveFailed`] without anyone blocking on
//! a payload that will never arrive.
//!
//! All ranks must issue the same collectives in the same order. Each
//! [`Collective`] numbers its calls, and a receiver that sees a header from a
//! different kind or sequence number reports
//! [`MeshDbError::CollectiveMismatch`].
//!
//! `all_gather` is a gather to rank 0 followed by a broadcast of the result,
//! so it never forms a send cycle and is safe with blocking sends.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{self, WireHdr, kind};
use crate::mesh_error::MeshDbError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Rank that performs elected reads.
pub const ELECTED_RANK: usize = 0;

/// Sequenced collective operations over a communicator.
#[derive(Debug)]
pub struct Collective<C> {
    comm: C,
    seq: u32,
}

impl<C: Communicator> Collective<C> {
    pub fn new(comm: C) -> Self {
        Self { comm, seq: 0 }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Number of collectives issued so far.
    pub fn calls(&self) -> u32 {
        self.seq
    }

    fn next_seq(&mut self) -> u32 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }

    /// Broadcast raw bytes from `root`. Only the root's `local` is used.
    ///
    /// On the root, a local error is returned as-is after telling the other
    /// ranks; they receive `CollectiveFailed`.
    pub fn broadcast_bytes(
        &mut self,
        root: usize,
        local: Result<Vec<u8>, MeshDbError>,
    ) -> Result<Vec<u8>, MeshDbError> {
        let seq = self.next_seq();
        if self.size() <= 1 {
            return local;
        }
        if self.rank() == root {
            let payload = local.as_ref().ok().map(|b| b.as_slice());
            self.send_to_all(kind::BROADCAST, seq, payload);
            local
        } else {
            match self.recv_from(root, kind::BROADCAST, seq)? {
                Some(bytes) => Ok(bytes),
                None => Err(MeshDbError::CollectiveFailed { root }),
            }
        }
    }

    /// Gather every rank's bytes onto every rank, ordered by rank.
    pub fn all_gather_bytes(
        &mut self,
        local: Result<Vec<u8>, MeshDbError>,
    ) -> Result<Vec<Vec<u8>>, MeshDbError> {
        let seq = self.next_seq();
        let size = self.size();
        if size <= 1 {
            return local.map(|b| vec![b]);
        }
        let root = ELECTED_RANK;
        let me = self.rank();

        if me == root {
            let mut parts: Vec<Option<Vec<u8>>> = Vec::with_capacity(size);
            let mut failure = None;
            for peer in 0..size {
                if peer == root {
                    parts.push(local.as_ref().ok().cloned());
                    continue;
                }
                match self.recv_from(peer, kind::GATHER, seq) {
                    Ok(part) => parts.push(part),
                    Err(e) => {
                        log::debug!("all-gather {seq}: rank {peer} failed: {e}");
                        failure.get_or_insert(e);
                        parts.push(None);
                    }
                }
            }
            let combined: Option<Vec<Vec<u8>>> = parts.into_iter().collect();
            let encoded = match (&failure, &combined) {
                (None, Some(all)) => wire::encode(all).map(Some),
                _ => Ok(None),
            };
            // every peer gets a result header, even when the gather failed
            let result = encoded.as_ref().ok().and_then(|e| e.as_deref());
            self.send_to_all(kind::GATHER_RESULT, seq, result);
            if let Some(e) = failure {
                return Err(e);
            }
            encoded?;
            local?;
            combined.ok_or(MeshDbError::CollectiveFailed { root })
        } else {
            let payload = local.as_ref().ok().map(|b| b.as_slice());
            self.send_to(root, kind::GATHER, seq, payload);
            let result = self.recv_from(root, kind::GATHER_RESULT, seq)?;
            local?;
            match result {
                Some(bytes) => wire::decode(&bytes),
                None => Err(MeshDbError::CollectiveFailed { root }),
            }
        }
    }

    /// Typed broadcast of a serde value from `root`.
    pub fn broadcast<T>(&mut self, root: usize, local: Result<T, MeshDbError>) -> Result<T, MeshDbError>
    where
        T: Serialize + DeserializeOwned,
    {
        if self.rank() == root {
            let encoded = match &local {
                Ok(value) => wire::encode(value),
                Err(_) => Err(MeshDbError::CollectiveFailed { root }),
            };
            // participate even on failure so the other ranks are released
            let sent = self.broadcast_bytes(root, encoded);
            let value = local?;
            sent?;
            Ok(value)
        } else {
            let bytes = self.broadcast_bytes(root, Err(MeshDbError::CollectiveFailed { root }))?;
            wire::decode(&bytes)
        }
    }

    /// Typed all-gather of a serde value.
    pub fn all_gather<T>(&mut self, local: Result<T, MeshDbError>) -> Result<Vec<T>, MeshDbError>
    where
        T: Serialize + DeserializeOwned,
    {
        let bytes = local.and_then(|v| wire::encode(&v));
        let parts = self.all_gather_bytes(bytes)?;
        parts.iter().map(|p| wire::decode(p)).collect()
    }

    /// Broadcast a single scalar tag from `root`.
    pub fn broadcast_scalar(&mut self, root: usize, value: u32) -> Result<u32, MeshDbError> {
        let bytes = self.broadcast_bytes(root, Ok(value.to_le_bytes().to_vec()))?;
        wire::expect_exact_len(root, bytes.len(), 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn send_to(&self, peer: usize, kind: u16, seq: u32, payload: Option<&[u8]>) {
        let hdr = WireHdr::new(kind, seq, payload.is_some(), payload.map_or(0, <[u8]>::len));
        let h = self
            .comm
            .isend(peer, CommTag::COLLECTIVE_HEADER.as_u16(), hdr.as_bytes());
        let _ = h.wait();
        if let Some(bytes) = payload {
            let h = self
                .comm
                .isend(peer, CommTag::COLLECTIVE_PAYLOAD.as_u16(), bytes);
            let _ = h.wait();
        }
    }

    fn send_to_all(&self, kind: u16, seq: u32, payload: Option<&[u8]>) {
        let me = self.rank();
        for peer in (0..self.size()).filter(|&p| p != me) {
            self.send_to(peer, kind, seq, payload);
        }
    }

    /// Receive one header (+ payload). `Ok(None)` means the sender failed.
    fn recv_from(&self, peer: usize, kind: u16, seq: u32) -> Result<Option<Vec<u8>>, MeshDbError> {
        let raw = self
            .comm
            .irecv(peer, CommTag::COLLECTIVE_HEADER.as_u16())
            .wait()
            .ok_or_else(|| MeshDbError::CommError {
                neighbor: peer,
                source: "no collective header received".into(),
            })?;
        let hdr = WireHdr::from_bytes(peer, &raw)?;
        if hdr.kind() != kind || hdr.seq() != seq {
            return Err(MeshDbError::CollectiveMismatch {
                neighbor: peer,
                expected_kind: kind,
                expected_seq: seq,
                found_kind: hdr.kind(),
                found_seq: hdr.seq(),
            });
        }
        if !hdr.ok() {
            return Ok(None);
        }
        let data = self
            .comm
            .irecv(peer, CommTag::COLLECTIVE_PAYLOAD.as_u16())
            .wait()
            .ok_or_else(|| MeshDbError::CommError {
                neighbor: peer,
                source: "no collective payload received".into(),
            })?;
        wire::expect_exact_len(peer, data.len(), hdr.len())?;
        Ok(Some(data))
    }
}
