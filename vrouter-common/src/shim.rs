//! SmartRE shim header codec.
//!
//! A redundancy-eliminated response carries, between the message header and
//! the (partially elided) payload, a shim listing the byte regions that were
//! removed by an upstream encoder. Each region is described by a
//! [`MatchSpec`] pointing at a previously cached packet via its header hash.

use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encoded size of one [`MatchSpec`]:
/// pathid(4) + header_hash(4) + region(2+2) + position(2).
pub const MATCH_SPEC_LEN: usize = 14;

/// Encoded size of the fixed shim prefix: pathid(4) + matches(2).
pub const SHIM_PREFIX_LEN: usize = 6;

/// Descriptor of one elided byte region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSpec {
    /// Path id of the matched (cached) packet.
    pub pathid: i32,
    /// Header hash of the matched packet, in `[0,1)`.
    pub header_hash: f32,
    /// Matched region in the cached packet, inclusive bounds.
    pub region: (u16, u16),
    /// Offset of the placeholder byte within this packet's payload.
    pub position: u16,
}

impl MatchSpec {
    /// Number of payload bytes the region stands for.
    pub fn region_len(&self) -> usize {
        (self.region.1 - self.region.0) as usize + 1
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.pathid);
        buf.put_f32(self.header_hash);
        buf.put_u16(self.region.0);
        buf.put_u16(self.region.1);
        buf.put_u16(self.position);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < MATCH_SPEC_LEN {
            return Err(Error::Wire("buffer underflow decoding match spec".into()));
        }
        let pathid = buf.get_i32();
        let header_hash = buf.get_f32();
        let start = buf.get_u16();
        let stop = buf.get_u16();
        let position = buf.get_u16();
        if stop < start {
            return Err(Error::Wire(format!("inverted match region {}..{}", start, stop)));
        }
        Ok(Self {
            pathid,
            header_hash,
            region: (start, stop),
            position,
        })
    }
}

/// The shim header carried in the payload of a SmartRE response.
#[derive(Debug, Clone, PartialEq)]
pub struct ReShim {
    /// Id of the manifest path this packet travels on.
    pub pathid: i32,
    /// Outstanding match descriptors, oldest first.
    pub matches: Vec<MatchSpec>,
    /// The payload with elided regions collapsed to placeholders.
    pub data: Bytes,
}

impl ReShim {
    pub fn new(pathid: i32, data: impl Into<Bytes>) -> Self {
        Self {
            pathid,
            matches: Vec::new(),
            data: data.into(),
        }
    }

    /// Append a descriptor for a region elided from this payload.
    pub fn add_match(&mut self, spec: MatchSpec) {
        self.matches.push(spec);
    }

    /// Drop a resolved descriptor and shift the positions of descriptors
    /// that point past it, now that the region has been spliced back in.
    ///
    /// Positions come off the wire; a crafted shim could push a shifted
    /// position past `u16::MAX`, so the shift saturates. A saturated
    /// descriptor fails the decoder's bounds check and stays unresolved.
    pub fn remove_match(&mut self, index: usize) {
        let spec = self.matches.remove(index);
        let shift = spec.region.1 - spec.region.0;
        for m in self.matches.iter_mut() {
            if m.position > spec.position {
                m.position = m.position.saturating_add(shift);
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(SHIM_PREFIX_LEN + self.matches.len() * MATCH_SPEC_LEN + self.data.len());
        buf.put_i32(self.pathid);
        buf.put_u16(self.matches.len() as u16);
        for m in &self.matches {
            m.encode(&mut buf);
        }
        buf.put_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.len() < SHIM_PREFIX_LEN {
            return Err(Error::Wire("buffer underflow decoding shim".into()));
        }
        let pathid = buf.get_i32();
        let count = buf.get_u16() as usize;
        let mut matches = Vec::with_capacity(count);
        for _ in 0..count {
            matches.push(MatchSpec::decode(&mut buf)?);
        }
        Ok(Self {
            pathid,
            matches,
            data: buf,
        })
    }
}
