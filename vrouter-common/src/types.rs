//! Shared identifiers and constants for the virtual router overlay.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Logical id of a virtual router, independent of its physical address.
pub type VrId = i32;

/// Sentinel value for an unset next hop.
pub const NXT_UNSET: VrId = -1;

/// Length of a content/router digest in bytes.
pub const DIGEST_LEN: usize = 20;

/// Default time-to-live of a freshly built message.
pub const DEFAULT_TTL: u16 = 64;

/// Size of a content chunk carried in a single message payload.
pub const CHUNK_LEN: usize = 1024;

/// Upper bound on a framed message, header and payload included.
pub const MAX_FRAME_LEN: usize = 128 * 1024;

/// A fixed-length digest identifying a content chunk or a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub [u8; DIGEST_LEN]);

impl ChunkId {
    /// The all-zero digest, used where no id has been assigned yet.
    pub const ZERO: ChunkId = ChunkId([0u8; DIGEST_LEN]);

    /// Derive the id of a chunk from its content bytes.
    pub fn of_chunk(chunk: &[u8]) -> Self {
        let digest = Sha256::digest(chunk);
        let mut id = [0u8; DIGEST_LEN];
        id.copy_from_slice(&digest[..DIGEST_LEN]);
        ChunkId(id)
    }

    /// Build an id from a slice.
    ///
    /// Slices longer than [`DIGEST_LEN`] are rejected; shorter slices are
    /// zero-padded on the right.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, crate::Error> {
        if bytes.len() > DIGEST_LEN {
            return Err(crate::Error::Wire(format!(
                "digest too long: {} > {}",
                bytes.len(),
                DIGEST_LEN
            )));
        }
        let mut id = [0u8; DIGEST_LEN];
        id[..bytes.len()].copy_from_slice(bytes);
        Ok(ChunkId(id))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Message types understood by the forwarding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageType {
    /// A request for a content chunk.
    Request = 0,
    /// A response carrying a content chunk.
    Response = 1,
    /// Keep-alive probe.
    Alive = 2,
    /// An evicted chunk pushed upstream by the push-caching strategy.
    Push = 3,
    /// A digest exchange message.
    Digest = 4,
    /// A serialized Bloom filter distributed to neighbours.
    BloomDistribute = 5,
    /// A neighbour-search probe for a cached chunk.
    Query = 6,
    /// The reply to a [`MessageType::Query`].
    Answer = 7,
}

impl MessageType {
    pub fn from_u32(v: u32) -> Result<Self, crate::Error> {
        Ok(match v {
            0 => MessageType::Request,
            1 => MessageType::Response,
            2 => MessageType::Alive,
            3 => MessageType::Push,
            4 => MessageType::Digest,
            5 => MessageType::BloomDistribute,
            6 => MessageType::Query,
            7 => MessageType::Answer,
            other => return Err(crate::Error::Wire(format!("unknown message type {}", other))),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Request => "REQ",
            MessageType::Response => "RSP",
            MessageType::Alive => "ALV",
            MessageType::Push => "PSH",
            MessageType::Digest => "DGS",
            MessageType::BloomDistribute => "BFB",
            MessageType::Query => "QRY",
            MessageType::Answer => "ANS",
        };
        write!(f, "{}", s)
    }
}
