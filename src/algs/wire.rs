//! Fixed, versioned, little-endian wire types for collective operations.
//!
//! Every collective message is preceded by a [`WireHdr`] carrying the
//! operation kind, a per-rank sequence number, a success flag and the
//! payload length. Payloads themselves are `bincode`-encoded serde values.

use crate::mesh_error::MeshDbError;
use bytemuck::{Pod, Zeroable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use static_assertions::assert_eq_size;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Collective kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const BROADCAST: u16 = 1;
    pub const GATHER: u16 = 2;
    pub const GATHER_RESULT: u16 = 3;
}

/// All multi-byte integers in this struct are **little-endian** on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub status_le: u32, // 1 = ok, 0 = sender failed
    pub seq_le: u32,
    pub reserved_le: u32, // keep zero
    pub len_le: u64,
}

assert_eq_size!(WireHdr, [u8; 24]);

impl WireHdr {
    pub fn new(kind: u16, seq: u32, ok: bool, len: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            status_le: (ok as u32).to_le(),
            seq_le: seq.to_le(),
            reserved_le: 0,
            len_le: (len as u64).to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn ok(&self) -> bool {
        u32::from_le(self.status_le) != 0
    }
    pub fn seq(&self) -> u32 {
        u32::from_le(self.seq_le)
    }
    pub fn len(&self) -> usize {
        u64::from_le(self.len_le) as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode a header received from `neighbor`.
    pub fn from_bytes(neighbor: usize, raw: &[u8]) -> Result<Self, MeshDbError> {
        expect_exact_len(neighbor, raw.len(), std::mem::size_of::<WireHdr>())?;
        let hdr: WireHdr = bytemuck::pod_read_unaligned(raw);
        if hdr.version() != WIRE_VERSION {
            return Err(MeshDbError::CommError {
                neighbor,
                source: format!(
                    "wire version {} (expected {WIRE_VERSION})",
                    hdr.version()
                )
                .into(),
            });
        }
        Ok(hdr)
    }
}

pub fn expect_exact_len(neighbor: usize, actual: usize, expected: usize) -> Result<(), MeshDbError> {
    if actual == expected {
        Ok(())
    } else {
        Err(MeshDbError::BufferSizeMismatch {
            neighbor,
            expected,
            got: actual,
        })
    }
}

/// Encode a payload.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, MeshDbError> {
    Ok(bincode::serialize(value)?)
}

/// Decode a payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MeshDbError> {
    Ok(bincode::deserialize(bytes)?)
}
