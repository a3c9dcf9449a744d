//! Coordinated redundancy elimination over manifest paths.
//!
//! An ingress encoder elides byte regions that repeat earlier packets,
//! leaving a one-byte placeholder and a match descriptor in the shim.
//! Each interior router reconstructs the regions it holds, caches a
//! nullified image of packets whose header hash falls in its manifest
//! range, and forwards the (partially or fully) reconstructed payload.

use super::{log_event, Strategy};
use crate::cache::FifoBucketCache;
use crate::manifest::Manifest;
use crate::router::RouterHandle;
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use vrouter_common::shim::{MatchSpec, ReShim};
use vrouter_common::types::{MessageType, VrId};
use vrouter_common::wire::{header_hash, MessageHeader};

pub struct SmartRe {
    manifest: Manifest,
    cache: FifoBucketCache,
    vrid: VrId,
}

impl SmartRe {
    pub fn new(manifest: Manifest, vrid: VrId) -> Self {
        let mut cache = FifoBucketCache::new();
        cache.init_buckets(manifest.bucket_quotas(vrid));
        Self {
            manifest,
            cache,
            vrid,
        }
    }

    /// Reconstruct a payload from the shim and this router's buckets.
    ///
    /// Returns the reconstructed payload and the nullified image: the
    /// payload as it arrived, with every placeholder and every elided
    /// region replaced by zeros of the region's full length. The image is
    /// what gets cached, so the encoder can address regions of it without
    /// this router ever seeing the original bytes it did not resolve.
    fn decode(&mut self, shim: &mut ReShim) -> (Bytes, Bytes) {
        let mut nullified = Vec::with_capacity(shim.data.len());
        let mut at = 0usize;
        for m in &shim.matches {
            // Positions come off the wire; clamp instead of trusting them.
            let pos = (m.position as usize).min(shim.data.len());
            nullified.extend_from_slice(&shim.data[at.min(pos)..pos]);
            nullified.resize(nullified.len() + m.region_len(), 0);
            at = (pos + 1).min(shim.data.len());
        }
        nullified.extend_from_slice(&shim.data[at..]);

        let mut decoded = shim.data.to_vec();
        let mut i = 0;
        while i < shim.matches.len() {
            let m = shim.matches[i];
            let pos = m.position as usize;
            let resident = self
                .cache
                .find_by_hh(m.header_hash)
                .and_then(|(pathid, vrid, ix)| self.cache.get(pathid, vrid, ix))
                .filter(|cached| {
                    pos < decoded.len()
                        && m.region.0 <= m.region.1
                        && (m.region.1 as usize) < cached.len()
                });
            match resident {
                Some(cached) => {
                    let region = &cached[m.region.0 as usize..=m.region.1 as usize];
                    decoded.splice(pos..pos + 1, region.iter().copied());
                    shim.remove_match(i);
                }
                None => i += 1,
            }
        }
        (Bytes::from(decoded), Bytes::from(nullified))
    }
}

#[async_trait]
impl Strategy for SmartRe {
    async fn handle(
        &mut self,
        hdr: &mut MessageHeader,
        ctx: &RouterHandle,
    ) -> anyhow::Result<bool> {
        hdr.hop = hdr.hop.saturating_add(1);

        match hdr.msg_type {
            MessageType::Request => {
                log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 0, &hdr.id);
                Ok(false)
            }
            MessageType::Response => {
                let mut shim = ReShim::decode(hdr.data.clone())?;
                // Footprint bookkeeping: an untouched hop extends the
                // footprint, a packet still carrying matches resets it.
                hdr.hit = hdr.hit.saturating_add(1);
                if !shim.matches.is_empty() {
                    hdr.hit = 1;
                }
                log_event(
                    hdr.seq,
                    hdr.src,
                    hdr.dst,
                    "RSP",
                    shim.matches.len() as u16,
                    &hdr.id,
                );

                let (decoded, nullified) = self.decode(&mut shim);
                let hh = header_hash(hdr);
                if self.manifest.in_range(shim.pathid, self.vrid, hh) {
                    debug!(
                        "router {}: caching nullified image for path {} (hh {})",
                        ctx.vrid, shim.pathid, hh
                    );
                    self.cache.insert(shim.pathid, self.vrid, hh, nullified);
                    ctx.metrics().chunks_inserted.increment();
                }
                shim.data = decoded;
                hdr.data = shim.encode();
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

/// Elide a byte region from a shim's payload, leaving a one-byte
/// placeholder and the descriptor an interior router needs to splice the
/// region back in. `region` uses inclusive bounds into the packet cached
/// under `header_hash`.
pub fn encode_region(shim: &mut ReShim, header_hash: f32, region: (u16, u16)) {
    let start = region.0 as usize;
    let stop = region.1 as usize;
    let mut data = shim.data.to_vec();
    data.splice(start..=stop, std::iter::once(0u8));
    shim.add_match(MatchSpec {
        pathid: shim.pathid,
        header_hash,
        region,
        position: region.0,
    });
    shim.data = Bytes::from(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{PathSpec, RouterAssignment};
    use std::collections::HashMap;

    fn manifest() -> Manifest {
        let mut routers = HashMap::new();
        routers.insert(2, RouterAssignment { range: (0.0, 1.0), quota: 4 });
        let mut paths = HashMap::new();
        paths.insert(
            1,
            PathSpec {
                path: vec![0, 2, 5],
                routers,
            },
        );
        Manifest { paths }
    }

    #[test]
    fn elided_region_is_restored_from_the_cache() {
        let reference: Vec<u8> = (0u8..64).collect();
        let payload: Vec<u8> = (100u8..164).collect();

        let mut interior = SmartRe::new(manifest(), 2);
        // An earlier packet with this header hash left its image behind.
        interior
            .cache
            .insert(1, 2, 0.375, Bytes::from(reference.clone()));

        // The ingress elides bytes 10..=19, claiming they match the
        // cached packet's bytes 10..=19.
        let mut shim = ReShim::new(1, Bytes::from(payload.clone()));
        encode_region(&mut shim, 0.375, (10, 19));
        assert_eq!(shim.data.len(), payload.len() - 9);
        assert_eq!(shim.matches.len(), 1);

        let mut arrived = ReShim::decode(shim.encode()).unwrap();
        let (decoded, nullified) = interior.decode(&mut arrived);

        let mut expected = payload.clone();
        expected.splice(10..20, reference[10..20].iter().copied());
        assert_eq!(&decoded[..], &expected[..]);
        assert!(arrived.matches.is_empty());

        // The nullified image zeroes the whole region.
        assert_eq!(nullified.len(), payload.len());
        assert!(nullified[10..20].iter().all(|&b| b == 0));
        assert_eq!(&nullified[..10], &payload[..10]);
        assert_eq!(&nullified[20..], &payload[20..]);
    }

    #[test]
    fn unresolved_matches_are_left_in_the_shim() {
        let mut interior = SmartRe::new(manifest(), 2);
        let mut shim = ReShim::new(1, Bytes::from_static(b"0123456789abcdef"));
        encode_region(&mut shim, 0.625, (4, 7));

        let (decoded, _) = interior.decode(&mut shim);
        // Nothing cached under that hash: placeholder stays put.
        assert_eq!(decoded.len(), 13);
        assert_eq!(shim.matches.len(), 1);
    }
}
