//! Most-frequently-requested admission.
//!
//! Each router counts request hits per content. Once the cache fills up,
//! a new chunk is only admitted when its frequency is at least that of
//! the least-frequently-requested entry currently tracked, so one-hit
//! wonders stop churning the cache.

use super::{answer_from_cache, log_event, Strategy};
use crate::cache::ReplacementPolicy;
use crate::router::RouterHandle;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use vrouter_common::types::{ChunkId, MessageType};
use vrouter_common::wire::MessageHeader;

pub struct Mfr {
    cache: Box<dyn ReplacementPolicy>,
    freq: HashMap<ChunkId, u64>,
    // (frequency, cid), least frequent first.
    ranked: BTreeSet<(u64, ChunkId)>,
}

impl Mfr {
    pub fn new(cache: Box<dyn ReplacementPolicy>) -> Self {
        Self {
            cache,
            freq: HashMap::new(),
            ranked: BTreeSet::new(),
        }
    }

    fn bump(&mut self, cid: ChunkId) {
        let count = self.freq.entry(cid).or_insert(0);
        if *count > 0 {
            self.ranked.remove(&(*count, cid));
        }
        *count += 1;
        self.ranked.insert((*count, cid));
    }

    fn track(&mut self, cid: ChunkId, count: u64) {
        self.freq.insert(cid, count);
        self.ranked.insert((count, cid));
    }

    fn untrack(&mut self, cid: &ChunkId) {
        if let Some(count) = self.freq.remove(cid) {
            self.ranked.remove(&(count, *cid));
        }
    }

    fn least_tracked(&self) -> Option<u64> {
        self.ranked.iter().next().map(|&(count, _)| count)
    }
}

#[async_trait]
impl Strategy for Mfr {
    async fn handle(
        &mut self,
        hdr: &mut MessageHeader,
        ctx: &RouterHandle,
    ) -> anyhow::Result<bool> {
        hdr.hop = hdr.hop.saturating_add(1);

        match hdr.msg_type {
            MessageType::Request => {
                if let Some(data) = self.cache.get(&hdr.id) {
                    log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 1, &hdr.id);
                    self.bump(hdr.id);
                    answer_from_cache(hdr, data, ctx).await?;
                    return Ok(true);
                }
                log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 0, &hdr.id);
                ctx.metrics().cache_misses.increment();
                Ok(false)
            }
            MessageType::Response => {
                log_event(hdr.seq, hdr.src, hdr.dst, "RSP", 0, &hdr.id);
                if self.cache.contains(&hdr.id) {
                    return Ok(false);
                }
                if !self.cache.is_full() {
                    self.cache.insert(hdr.id, hdr.data.clone());
                    self.track(hdr.id, 1);
                    ctx.metrics().chunks_inserted.increment();
                    ctx.metrics().cache_size.set(self.cache.len() as u64);
                    log_event(hdr.seq, hdr.src, hdr.dst, "ADD", 0, &hdr.id);
                } else if self.least_tracked().map_or(true, |least| 1 >= least) {
                    if let Some((victim, _)) = self.cache.insert(hdr.id, hdr.data.clone()) {
                        self.untrack(&victim);
                        ctx.metrics().chunks_evicted.increment();
                        log_event(hdr.seq, hdr.src, hdr.dst, "DEL", 0, &victim);
                    }
                    self.track(hdr.id, 1);
                    ctx.metrics().chunks_inserted.increment();
                    ctx.metrics().cache_size.set(self.cache.len() as u64);
                    log_event(hdr.seq, hdr.src, hdr.dst, "ADD", 0, &hdr.id);
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}
