//! LFU with dynamic aging.
//!
//! Plain LFU lets a once-popular chunk squat in the cache long after its
//! popularity is gone. Here every insertion and every use adds the current
//! age clock to the entry's score, and the clock advances to the victim's
//! score on eviction, so stale high scores are eventually overtaken.

use super::ReplacementPolicy;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use vrouter_common::types::ChunkId;

pub struct Lfuda {
    quota: usize,
    entries: HashMap<ChunkId, Bytes>,
    scores: HashMap<ChunkId, (u64, u64)>,
    // (score, tick, cid), smallest first.
    order: BTreeSet<(u64, u64, ChunkId)>,
    clock: u64,
    tick: u64,
}

impl Lfuda {
    pub fn new(quota: usize) -> Self {
        Self {
            quota,
            entries: HashMap::with_capacity(quota),
            scores: HashMap::with_capacity(quota),
            order: BTreeSet::new(),
            clock: 0,
            tick: 0,
        }
    }

    /// Current value of the age clock.
    pub fn clock(&self) -> u64 {
        self.clock
    }
}

impl ReplacementPolicy for Lfuda {
    fn insert(&mut self, cid: ChunkId, data: Bytes) -> Option<(ChunkId, Bytes)> {
        if self.quota == 0 || self.entries.contains_key(&cid) {
            return None;
        }
        let evicted = if self.entries.len() >= self.quota {
            self.order.iter().next().copied().map(|victim| {
                self.order.remove(&victim);
                self.scores.remove(&victim.2);
                // The victim's score becomes the new age floor.
                self.clock = victim.0;
                let data = self.entries.remove(&victim.2).unwrap_or_default();
                (victim.2, data)
            })
        } else {
            None
        };
        self.tick += 1;
        let score = self.clock + 1;
        self.entries.insert(cid, data);
        self.scores.insert(cid, (score, self.tick));
        self.order.insert((score, self.tick, cid));
        evicted
    }

    fn get(&mut self, cid: &ChunkId) -> Option<Bytes> {
        let data = self.entries.get(cid).cloned()?;
        if let Some(&(score, tick)) = self.scores.get(cid) {
            self.order.remove(&(score, tick, *cid));
            let score = score + self.clock + 1;
            self.scores.insert(*cid, (score, tick));
            self.order.insert((score, tick, *cid));
        }
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
