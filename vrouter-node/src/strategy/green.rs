//! Measurement-driven variants of the election scheme.
//!
//! Instead of trusting the routing tables, the marking probability is
//! derived from hop counts observed on live traffic, so it adapts when
//! the forwarding distance differs from the computed path.

use super::{answer_from_cache, log_event, Strategy};
use crate::cache::ReplacementPolicy;
use crate::router::RouterHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use vrouter_common::types::{MessageType, VrId, DEFAULT_TTL};
use vrouter_common::wire::MessageHeader;

pub struct GreenCachedBit {
    cache: Box<dyn ReplacementPolicy>,
    /// Last hop count observed per (src, dst) flow.
    hopch: HashMap<(VrId, VrId), u16>,
}

impl GreenCachedBit {
    pub fn new(cache: Box<dyn ReplacementPolicy>) -> Self {
        Self {
            cache,
            hopch: HashMap::new(),
        }
    }

    /// Record the hop count this message arrived with. Cache-answered
    /// responses took a shortcut, so they are not representative.
    fn update_hopch(&mut self, hdr: &MessageHeader) {
        let hops = hdr.hop - 1;
        if hops == 0 || hdr.hit == 1 {
            return;
        }
        self.hopch.insert((hdr.src, hdr.dst), hops);
    }

    /// 1/distance from observed hop counts. With only the forward
    /// direction seen the distance to here is used directly; with both
    /// directions the full path length is reconstructed from their sum.
    fn save_prob(&self, src: VrId, dst: VrId) -> f64 {
        let s2d = self.hopch.get(&(src, dst)).map(|&h| h as f64).unwrap_or(-1.0);
        let d2s = self.hopch.get(&(dst, src)).map(|&h| h as f64).unwrap_or(-1.0);
        if d2s <= 0.0 {
            1.0 / s2d
        } else {
            1.0 / ((s2d + d2s) / 2.0 - 1.0)
        }
    }
}

#[async_trait]
impl Strategy for GreenCachedBit {
    async fn handle(
        &mut self,
        hdr: &mut MessageHeader,
        ctx: &RouterHandle,
    ) -> anyhow::Result<bool> {
        hdr.hop = hdr.hop.saturating_add(1);
        if hdr.hop > DEFAULT_TTL {
            ctx.metrics().messages_dropped.increment();
            return Ok(true);
        }
        self.update_hopch(hdr);

        match hdr.msg_type {
            MessageType::Request => {
                if let Some(data) = self.cache.get(&hdr.id) {
                    log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 1, &hdr.id);
                    answer_from_cache(hdr, data, ctx).await?;
                    return Ok(true);
                }
                log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 0, &hdr.id);
                ctx.metrics().cache_misses.increment();
                // With no usable observation save_prob is negative and the
                // draw can never succeed.
                if !hdr.is_cached_bit_set()
                    && rand::random::<f64>() <= self.save_prob(hdr.src, hdr.dst)
                {
                    hdr.set_cached_bit();
                    hdr.crid = ctx.rid;
                }
                Ok(false)
            }
            MessageType::Response => {
                log_event(hdr.seq, hdr.src, hdr.dst, "RSP", 0, &hdr.id);
                if !self.cache.contains(&hdr.id)
                    && hdr.is_cached_bit_set()
                    && hdr.crid == ctx.rid
                {
                    if let Some((victim, _)) = self.cache.insert(hdr.id, hdr.data.clone()) {
                        ctx.metrics().chunks_evicted.increment();
                        log_event(hdr.seq, hdr.src, hdr.dst, "DEL", 0, &victim);
                    }
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

/// Baseline for the measurement-driven family: admit everything, let the
/// replacement policy sort it out.
pub struct GreenLru {
    cache: Box<dyn ReplacementPolicy>,
}

impl GreenLru {
    pub fn new(cache: Box<dyn ReplacementPolicy>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Strategy for GreenLru {
    async fn handle(
        &mut self,
        hdr: &mut MessageHeader,
        ctx: &RouterHandle,
    ) -> anyhow::Result<bool> {
        hdr.hop = hdr.hop.saturating_add(1);
        if hdr.hop > DEFAULT_TTL {
            ctx.metrics().messages_dropped.increment();
            return Ok(true);
        }

        match hdr.msg_type {
            MessageType::Request => {
                if let Some(data) = self.cache.get(&hdr.id) {
                    log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 1, &hdr.id);
                    answer_from_cache(hdr, data, ctx).await?;
                    return Ok(true);
                }
                log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 0, &hdr.id);
                ctx.metrics().cache_misses.increment();
                Ok(false)
            }
            MessageType::Response => {
                log_event(hdr.seq, hdr.src, hdr.dst, "RSP", 0, &hdr.id);
                if !self.cache.contains(&hdr.id) {
                    if let Some((victim, _)) = self.cache.insert(hdr.id, hdr.data.clone()) {
                        ctx.metrics().chunks_evicted.increment();
                        log_event(hdr.seq, hdr.src, hdr.dst, "DEL", 0, &victim);
                    }
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
