//! Least-frequently-used replacement.

use super::ReplacementPolicy;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use vrouter_common::types::ChunkId;

/// LFU store. Use counts are tracked per entry; ties on count are broken
/// by insertion order, so the older of two equally-used entries goes first.
pub struct Lfu {
    quota: usize,
    entries: HashMap<ChunkId, Bytes>,
    counts: HashMap<ChunkId, (u64, u64)>,
    // (use count, tick, cid), smallest first.
    order: BTreeSet<(u64, u64, ChunkId)>,
    tick: u64,
}

impl Lfu {
    pub fn new(quota: usize) -> Self {
        Self {
            quota,
            entries: HashMap::with_capacity(quota),
            counts: HashMap::with_capacity(quota),
            order: BTreeSet::new(),
            tick: 0,
        }
    }

    /// Use count of a stored chunk.
    pub fn frequency(&self, cid: &ChunkId) -> Option<u64> {
        self.counts.get(cid).map(|&(freq, _)| freq)
    }

    /// Smallest use count currently tracked.
    pub fn min_frequency(&self) -> Option<u64> {
        self.order.iter().next().map(|&(freq, _, _)| freq)
    }

    fn bump(&mut self, cid: &ChunkId) {
        if let Some(&(freq, tick)) = self.counts.get(cid) {
            self.order.remove(&(freq, tick, *cid));
            self.counts.insert(*cid, (freq + 1, tick));
            self.order.insert((freq + 1, tick, *cid));
        }
    }
}

impl ReplacementPolicy for Lfu {
    fn insert(&mut self, cid: ChunkId, data: Bytes) -> Option<(ChunkId, Bytes)> {
        if self.quota == 0 || self.entries.contains_key(&cid) {
            return None;
        }
        let evicted = if self.entries.len() >= self.quota {
            self.order.iter().next().copied().map(|victim| {
                self.order.remove(&victim);
                self.counts.remove(&victim.2);
                let data = self.entries.remove(&victim.2).unwrap_or_default();
                (victim.2, data)
            })
        } else {
            None
        };
        self.tick += 1;
        self.entries.insert(cid, data);
        self.counts.insert(cid, (1, self.tick));
        self.order.insert((1, self.tick, cid));
        evicted
    }

    fn get(&mut self, cid: &ChunkId) -> Option<Bytes> {
        let data = self.entries.get(cid).cloned()?;
        self.bump(cid);
        Some(data)
    }

    fn peek(&self, cid: &ChunkId) -> Option<Bytes> {
        self.entries.get(cid).cloned()
    }

    fn contains(&self, cid: &ChunkId) -> bool {
        self.entries.contains_key(cid)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn quota(&self) -> usize {
        self.quota
    }

    fn keys(&self) -> Vec<ChunkId> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u8) -> ChunkId {
        let mut id = [0u8; 20];
        id[0] = n;
        ChunkId(id)
    }

    #[test]
    fn overflow_evicts_least_frequent() {
        let mut cache = Lfu::new(3);
        for n in 0..3 {
            cache.insert(cid(n), Bytes::from_static(b"x"));
        }
        // Use 0 twice, 2 once; 1 stays at its insertion count.
        cache.get(&cid(0));
        cache.get(&cid(0));
        cache.get(&cid(2));
        let (victim, _) = cache.insert(cid(3), Bytes::from_static(b"x")).unwrap();
        assert_eq!(victim, cid(1));
    }

    #[test]
    fn frequency_ties_evict_older_entry() {
        let mut cache = Lfu::new(2);
        cache.insert(cid(0), Bytes::from_static(b"x"));
        cache.insert(cid(1), Bytes::from_static(b"x"));
        let (victim, _) = cache.insert(cid(2), Bytes::from_static(b"x")).unwrap();
        assert_eq!(victim, cid(0));
    }

    #[test]
    fn zero_quota_admits_nothing() {
        let mut cache = Lfu::new(0);
        assert!(cache.insert(cid(0), Bytes::from_static(b"x")).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn min_frequency_tracks_uses() {
        let mut cache = Lfu::new(2);
        cache.insert(cid(0), Bytes::from_static(b"x"));
        cache.insert(cid(1), Bytes::from_static(b"x"));
        assert_eq!(cache.min_frequency(), Some(1));
        cache.get(&cid(0));
        cache.get(&cid(1));
        assert_eq!(cache.min_frequency(), Some(2));
        assert_eq!(cache.frequency(&cid(0)), Some(2));
    }
}
