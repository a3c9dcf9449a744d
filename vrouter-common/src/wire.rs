//! Binary message header codec and frame I/O.
//!
//! Every message in the overlay starts with a fixed-width header followed by
//! an opaque payload. On a byte stream, a message is framed by a 4-byte
//! big-endian length prefix covering header and payload together.

use crate::error::Error;
use crate::types::{ChunkId, MessageType, VrId, DEFAULT_TTL, DIGEST_LEN, MAX_FRAME_LEN, NXT_UNSET};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/* ---------------------------------------------------------------- *
 * Header layout
 * ---------------------------------------------------------------- */

/// Number of bytes occupied by the fixed header prefix.
///
/// type(4) + id(20) + seq(4) + control(1) + crid(20)
/// + src(4) + dst(4) + nxt(4) + ttl(2) + hit(2) + hop(2)
pub const HEADER_LEN: usize = 4 + DIGEST_LEN + 4 + 1 + DIGEST_LEN + 4 + 4 + 4 + 2 + 2 + 2;

/// Bit 4 of the control byte marks a message for admission downstream.
pub const CTRL_CACHED_BIT: u8 = 0x10;

/// The fixed-layout message header plus its variable-length payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    /// Content identifier of the requested/carried chunk.
    pub id: ChunkId,
    pub seq: u32,
    /// Control flags, accessed through the bit-mask helpers below.
    pub control: u8,
    /// Id of the router elected to cache this chunk.
    pub crid: ChunkId,
    pub src: VrId,
    pub dst: VrId,
    /// Explicit next-hop override, [`NXT_UNSET`] when routing decides.
    pub nxt: VrId,
    pub ttl: u16,
    pub hit: u16,
    pub hop: u16,
    /// Opaque payload; its length is implicit in the frame length.
    pub data: Bytes,
}

impl MessageHeader {
    /// Create a header with the defaults of a freshly built message.
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            id: ChunkId::ZERO,
            seq: 0,
            control: 0,
            crid: ChunkId::ZERO,
            src: 0,
            dst: 0,
            nxt: NXT_UNSET,
            ttl: DEFAULT_TTL,
            hit: 0,
            hop: 0,
            data: Bytes::new(),
        }
    }

    /// Total encoded size, header and payload.
    pub fn wire_size(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Encode header and payload into a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_u32(self.msg_type as u32);
        buf.put_slice(self.id.as_bytes());
        buf.put_u32(self.seq);
        buf.put_u8(self.control);
        buf.put_slice(self.crid.as_bytes());
        buf.put_i32(self.src);
        buf.put_i32(self.dst);
        buf.put_i32(self.nxt);
        buf.put_u16(self.ttl);
        buf.put_u16(self.hit);
        buf.put_u16(self.hop);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Decode a header from a buffer; all bytes past the fixed prefix
    /// become the payload.
    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Wire(format!(
                "header requires {} bytes but only {} available",
                HEADER_LEN,
                buf.len()
            )));
        }

        let msg_type = MessageType::from_u32(buf.get_u32())?;
        let mut id = [0u8; DIGEST_LEN];
        buf.copy_to_slice(&mut id);
        let seq = buf.get_u32();
        let control = buf.get_u8();
        let mut crid = [0u8; DIGEST_LEN];
        buf.copy_to_slice(&mut crid);
        let src = buf.get_i32();
        let dst = buf.get_i32();
        let nxt = buf.get_i32();
        let ttl = buf.get_u16();
        let hit = buf.get_u16();
        let hop = buf.get_u16();

        Ok(Self {
            msg_type,
            id: ChunkId(id),
            seq,
            control,
            crid: ChunkId(crid),
            src,
            dst,
            nxt,
            ttl,
            hit,
            hop,
            data: buf,
        })
    }

    /* ------------------------------------------------------------ *
     * Control byte helpers
     * ------------------------------------------------------------ */

    pub fn set_cached_bit(&mut self) {
        self.control |= CTRL_CACHED_BIT;
    }

    pub fn unset_cached_bit(&mut self) {
        self.control &= !CTRL_CACHED_BIT;
    }

    pub fn is_cached_bit_set(&self) -> bool {
        self.control & CTRL_CACHED_BIT != 0
    }

    /// Flip source and destination, turning a request path into the
    /// response path.
    pub fn swap_src_dst(&mut self) {
        std::mem::swap(&mut self.src, &mut self.dst);
    }
}

/* ---------------------------------------------------------------- *
 * Header hash
 * ---------------------------------------------------------------- */

/// Hash the routing fields of a header into the `[0,1)` interval.
///
/// The hash is over the decimal rendering of (src, dst, seq), so both ends
/// of a path derive the identical value for the same flow.
pub fn header_hash(hdr: &MessageHeader) -> f32 {
    let s = format!("{}{}{}", hdr.src, hdr.dst, hdr.seq);
    let digest = Sha256::digest(s.as_bytes());
    let mut hi = [0u8; 16];
    hi.copy_from_slice(&digest[..16]);
    let x = u128::from_be_bytes(hi);
    (x as f64 / 2f64.powi(128)) as f32
}

/* ---------------------------------------------------------------- *
 * Frame I/O
 * ---------------------------------------------------------------- */

/// Write one message as a length-prefixed frame.
pub async fn write_frame<W>(conn: &mut W, hdr: &MessageHeader) -> Result<(), Error>
where
    W: AsyncWriteExt + Unpin,
{
    let body = hdr.encode();
    conn.write_u32(body.len() as u32).await?;
    conn.write_all(&body).await?;
    Ok(())
}

/// Read one length-prefixed frame and decode it.
///
/// Blocks until the declared number of bytes has been received; a short or
/// closed read surfaces as [`Error::MalformedFrame`].
pub async fn read_frame<R>(conn: &mut R) -> Result<MessageHeader, Error>
where
    R: AsyncReadExt + Unpin,
{
    let len = conn
        .read_u32()
        .await
        .map_err(|e| Error::MalformedFrame(format!("length prefix: {}", e)))? as usize;
    if len < HEADER_LEN || len > MAX_FRAME_LEN {
        return Err(Error::MalformedFrame(format!("bad frame length {}", len)));
    }
    let mut body = vec![0u8; len];
    conn.read_exact(&mut body)
        .await
        .map_err(|e| Error::MalformedFrame(format!("short read: {}", e)))?;
    MessageHeader::decode(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> MessageHeader {
        let mut hdr = MessageHeader::new(MessageType::Request);
        hdr.id = ChunkId::of_chunk(b"some chunk");
        hdr.seq = 42;
        hdr.src = 3;
        hdr.dst = 7;
        hdr.hop = 2;
        hdr.data = Bytes::from_static(b"payload bytes");
        hdr
    }

    #[test]
    fn header_roundtrip() {
        let hdr = sample_header();
        let wire = hdr.encode();
        assert_eq!(wire.len(), HEADER_LEN + hdr.data.len());
        let back = MessageHeader::decode(wire).unwrap();
        assert_eq!(back, hdr);
    }

    #[test]
    fn decode_short_buffer_fails() {
        let err = MessageHeader::decode(Bytes::from_static(&[0u8; 10])).unwrap_err();
        assert!(matches!(err, Error::Wire(_)));
    }

    #[test]
    fn cached_bit_mask() {
        let mut hdr = MessageHeader::new(MessageType::Request);
        hdr.control = 0x01;
        assert!(!hdr.is_cached_bit_set());
        hdr.set_cached_bit();
        assert!(hdr.is_cached_bit_set());
        assert_eq!(hdr.control, 0x11);
        hdr.unset_cached_bit();
        assert!(!hdr.is_cached_bit_set());
        // Other control bits survive the mask operations.
        assert_eq!(hdr.control, 0x01);
    }

    #[test]
    fn swap_src_dst() {
        let mut hdr = sample_header();
        hdr.swap_src_dst();
        assert_eq!((hdr.src, hdr.dst), (7, 3));
    }

    #[test]
    fn digest_length_policy() {
        assert!(ChunkId::from_slice(&[0u8; 21]).is_err());
        let padded = ChunkId::from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(&padded.as_bytes()[..3], &[1, 2, 3]);
        assert_eq!(padded.as_bytes()[3..], [0u8; 17]);
    }

    #[test]
    fn header_hash_in_unit_interval() {
        let hdr = sample_header();
        let h = header_hash(&hdr);
        assert!((0.0..1.0).contains(&h));
        // Deterministic for the same routing fields.
        assert_eq!(h, header_hash(&sample_header()));
        // Sensitive to the sequence number.
        let mut other = sample_header();
        other.seq += 1;
        assert_ne!(h, header_hash(&other));
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let hdr = sample_header();
        let mut buf = Vec::new();
        write_frame(&mut buf, &hdr).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let back = read_frame(&mut cursor).await.unwrap();
        assert_eq!(back, hdr);
    }

    #[tokio::test]
    async fn truncated_frame_is_malformed() {
        let hdr = sample_header();
        let mut buf = Vec::new();
        write_frame(&mut buf, &hdr).await.unwrap();
        buf.truncate(buf.len() - 5);
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }
}
