//! Path-scoped circular chunk store.
//!
//! Region-based caching addresses cached payloads by position, not by
//! content id: the encoder refers to "slot N of the bucket that router R
//! keeps for path P". Each bucket is a fixed ring of slots written in FIFO
//! order, and a header-hash index lets the owner find the slot a given
//! packet landed in.

use bytes::Bytes;
use std::collections::HashMap;
use vrouter_common::types::VrId;

/// Bucket address: the path the traffic belongs to and the router whose
/// hash range the stored packets fall into.
pub type BucketKey = (i32, VrId);

struct Bucket {
    slots: Vec<Option<Bytes>>,
    cursor: usize,
}

#[derive(Default)]
pub struct FifoBucketCache {
    buckets: HashMap<BucketKey, Bucket>,
    // Header hashes are compared bit-exactly; the f32 travels the wire
    // unchanged, so its bit pattern is a stable key.
    hh2ix: HashMap<(BucketKey, u32), usize>,
    ix2hh: HashMap<(BucketKey, usize), u32>,
}

impl FifoBucketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the buckets this router is responsible for.
    pub fn init_buckets(&mut self, layout: impl IntoIterator<Item = (i32, VrId, usize)>) {
        for (pathid, vrid, quota) in layout {
            self.buckets.insert(
                (pathid, vrid),
                Bucket {
                    slots: vec![None; quota],
                    cursor: 0,
                },
            );
        }
    }

    pub fn has_bucket(&self, pathid: i32, vrid: VrId) -> bool {
        self.buckets.contains_key(&(pathid, vrid))
    }

    /// Store a payload under its header hash; returns the slot index, or
    /// `None` when no bucket exists for the key. An occupied slot is
    /// overwritten and its old hash mapping dropped.
    pub fn insert(&mut self, pathid: i32, vrid: VrId, hh: f32, data: Bytes) -> Option<usize> {
        let key = (pathid, vrid);
        let bucket = self.buckets.get_mut(&key)?;
        if bucket.slots.is_empty() {
            return None;
        }
        let ix = bucket.cursor;
        bucket.slots[ix] = Some(data);
        bucket.cursor = (ix + 1) % bucket.slots.len();
        if let Some(old) = self.ix2hh.remove(&(key, ix)) {
            self.hh2ix.remove(&(key, old));
        }
        self.hh2ix.insert((key, hh.to_bits()), ix);
        self.ix2hh.insert((key, ix), hh.to_bits());
        Some(ix)
    }

    /// Slot a packet with this header hash was stored in.
    pub fn index_by_hh(&self, pathid: i32, vrid: VrId, hh: f32) -> Option<usize> {
        self.hh2ix.get(&((pathid, vrid), hh.to_bits())).copied()
    }

    /// Search every bucket for a header hash. Content referenced on one
    /// path may have been stored under another, so the lookup is global.
    pub fn find_by_hh(&self, hh: f32) -> Option<(i32, VrId, usize)> {
        let bits = hh.to_bits();
        self.hh2ix
            .iter()
            .find(|(&((_, _), h), _)| h == bits)
            .map(|(&((pathid, vrid), _), &ix)| (pathid, vrid, ix))
    }

    /// Header hash of the packet occupying a slot.
    pub fn hh_by_index(&self, pathid: i32, vrid: VrId, ix: usize) -> Option<f32> {
        self.ix2hh
            .get(&((pathid, vrid), ix))
            .map(|&bits| f32::from_bits(bits))
    }

    pub fn get(&self, pathid: i32, vrid: VrId, ix: usize) -> Option<Bytes> {
        self.buckets
            .get(&(pathid, vrid))
            .and_then(|b| b.slots.get(ix))
            .and_then(|slot| slot.clone())
    }

    /// Payload stored for a header hash, when still resident.
    pub fn get_by_hh(&self, pathid: i32, vrid: VrId, hh: f32) -> Option<Bytes> {
        let ix = self.index_by_hh(pathid, vrid, hh)?;
        self.get(pathid, vrid, ix)
    }

    pub fn remove(&mut self, pathid: i32, vrid: VrId, ix: usize) {
        let key = (pathid, vrid);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            if let Some(slot) = bucket.slots.get_mut(ix) {
                *slot = None;
            }
        }
        if let Some(hh) = self.ix2hh.remove(&(key, ix)) {
            self.hh2ix.remove(&(key, hh));
        }
    }

    pub fn len(&self, pathid: i32, vrid: VrId) -> usize {
        self.buckets
            .get(&(pathid, vrid))
            .map(|b| b.slots.iter().filter(|s| s.is_some()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraparound_overwrites_oldest_slot() {
        let mut cache = FifoBucketCache::new();
        cache.init_buckets([(1, 3, 2)]);
        assert_eq!(cache.insert(1, 3, 0.25, Bytes::from_static(b"a")), Some(0));
        assert_eq!(cache.insert(1, 3, 0.50, Bytes::from_static(b"b")), Some(1));
        // Third insert wraps to slot 0 and displaces the first hash.
        assert_eq!(cache.insert(1, 3, 0.75, Bytes::from_static(b"c")), Some(0));
        assert!(cache.index_by_hh(1, 3, 0.25).is_none());
        assert_eq!(cache.get_by_hh(1, 3, 0.75).unwrap(), Bytes::from_static(b"c"));
        assert_eq!(cache.get(1, 3, 1).unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn missing_bucket_rejects_inserts() {
        let mut cache = FifoBucketCache::new();
        cache.init_buckets([(1, 3, 2)]);
        assert!(cache.insert(2, 3, 0.5, Bytes::from_static(b"x")).is_none());
        assert!(!cache.has_bucket(2, 3));
    }

    #[test]
    fn remove_clears_both_indices() {
        let mut cache = FifoBucketCache::new();
        cache.init_buckets([(7, 2, 4)]);
        let ix = cache.insert(7, 2, 0.125, Bytes::from_static(b"x")).unwrap();
        cache.remove(7, 2, ix);
        assert!(cache.get(7, 2, ix).is_none());
        assert!(cache.index_by_hh(7, 2, 0.125).is_none());
        assert!(cache.hh_by_index(7, 2, ix).is_none());
        assert_eq!(cache.len(7, 2), 0);
    }
}
