//! Least-recently-used replacement.

use super::ReplacementPolicy;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use vrouter_common::types::ChunkId;

/// LRU store: a recency list over a chunk map. Front of the list is the
/// most recently used entry, eviction takes the back.
pub struct Lru {
    quota: usize,
    entries: HashMap<ChunkId, Bytes>,
    recency: VecDeque<ChunkId>,
}

impl Lru {
    pub fn new(quota: usize) -> Self {
        Self {
            quota,
            entries: HashMap::with_capacity(quota),
            recency: VecDeque::with_capacity(quota),
        }
    }

    fn promote(&mut self, cid: &ChunkId) {
        if let Some(pos) = self.recency.iter().position(|c| c == cid) {
            self.recency.remove(pos);
            self.recency.push_front(*cid);
        }
    }
}

impl ReplacementPolicy for Lru {
    fn insert(&mut self, cid: ChunkId, data: Bytes) -> Option<(ChunkId, Bytes)> {
        if self.quota == 0 || self.entries.contains_key(&cid) {
            return None;
        }
        let evicted = if self.entries.len() >= self.quota {
            self.recency.pop_back().map(|victim| {
                let data = self.entries.remove(&victim).unwrap_or_default();
                (victim, data)
            })
        } else {
            None
        };
        self.entries.insert(cid, data);
        self.recency.push_front(cid);
        evicted
    }

    fn get(&mut self, cid: &ChunkId) -> Option<Bytes> {
        let data = self.entries.get(cid).cloned()?;
        self.promote(cid);
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
    fn overflow_evicts_least_recent() {
        let mut cache = Lru::new(3);
        for n in 0..3 {
            assert!(cache.insert(cid(n), Bytes::from_static(b"x")).is_none());
        }
        let (victim, _) = cache.insert(cid(3), Bytes::from_static(b"x")).unwrap();
        assert_eq!(victim, cid(0));
        assert!(!cache.contains(&cid(0)));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_promotes_survivor() {
        let mut cache = Lru::new(3);
        for n in 0..3 {
            cache.insert(cid(n), Bytes::from_static(b"x"));
        }
        // Touch the oldest entry, then overflow: the untouched one goes.
        assert!(cache.get(&cid(0)).is_some());
        let (victim, _) = cache.insert(cid(3), Bytes::from_static(b"x")).unwrap();
        assert_eq!(victim, cid(1));
        assert!(cache.contains(&cid(0)));
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let mut cache = Lru::new(2);
        cache.insert(cid(0), Bytes::from_static(b"old"));
        cache.insert(cid(1), Bytes::from_static(b"x"));
        assert!(cache.insert(cid(0), Bytes::from_static(b"new")).is_none());
        assert_eq!(cache.peek(&cid(0)).unwrap(), Bytes::from_static(b"old"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_quota_admits_nothing() {
        let mut cache = Lru::new(0);
        assert!(cache.insert(cid(0), Bytes::from_static(b"x")).is_none());
        assert_eq!(cache.len(), 0);
        assert!(!cache.contains(&cid(0)));
    }

    #[test]
    fn peek_does_not_promote() {
        let mut cache = Lru::new(2);
        cache.insert(cid(0), Bytes::from_static(b"x"));
        cache.insert(cid(1), Bytes::from_static(b"x"));
        assert!(cache.peek(&cid(0)).is_some());
        let (victim, _) = cache.insert(cid(2), Bytes::from_static(b"x")).unwrap();
        assert_eq!(victim, cid(0));
    }
}
