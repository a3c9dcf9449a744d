//! Coordinated en-route caching with an election bit.
//!
//! On the request path one interior router elects itself by setting the
//! cached bit and stamping its instance id into `crid`; on the response
//! path only the elected router admits the chunk. In expectation exactly
//! one copy lands on each request path.

use super::{answer_from_cache, distance_save_prob, log_event, Strategy};
use crate::cache::ReplacementPolicy;
use crate::router::RouterHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use vrouter_common::types::{MessageType, VrId};
use vrouter_common::wire::MessageHeader;

pub struct CachedBit {
    cache: Box<dyn ReplacementPolicy>,
}

impl CachedBit {
    pub fn new(cache: Box<dyn ReplacementPolicy>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Strategy for CachedBit {
    async fn handle(
        &mut self,
        hdr: &mut MessageHeader,
        ctx: &RouterHandle,
    ) -> anyhow::Result<bool> {
        hdr.hop = hdr.hop.saturating_add(1);
        handle_with_prob(&mut self.cache, hdr, ctx, distance_save_prob).await
    }
}

/// Core of the election scheme, parameterised over the marking
/// probability so the rank-weighted variant can reuse it.
async fn handle_with_prob<F>(
    cache: &mut Box<dyn ReplacementPolicy>,
    hdr: &mut MessageHeader,
    ctx: &RouterHandle,
    save_prob: F,
) -> anyhow::Result<bool>
where
    F: Fn(&RouterHandle, VrId, VrId) -> f64,
{
    match hdr.msg_type {
        MessageType::Request => {
            if let Some(data) = cache.get(&hdr.id) {
                log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 1, &hdr.id);
                answer_from_cache(hdr, data, ctx).await?;
                return Ok(true);
            }
            log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 0, &hdr.id);
            ctx.metrics().cache_misses.increment();
            if !hdr.is_cached_bit_set() && rand::random::<f64>() <= save_prob(ctx, hdr.src, hdr.dst)
            {
                hdr.set_cached_bit();
                hdr.crid = ctx.rid;
            }
            Ok(false)
        }
        MessageType::Response => {
            log_event(hdr.seq, hdr.src, hdr.dst, "RSP", 0, &hdr.id);
            if !cache.contains(&hdr.id) && hdr.is_cached_bit_set() && hdr.crid == ctx.rid {
                if let Some((victim, _)) = cache.insert(hdr.id, hdr.data.clone()) {
                    ctx.metrics().chunks_evicted.increment();
                    log_event(hdr.seq, hdr.src, hdr.dst, "DEL", 0, &victim);
                }
                ctx.metrics().chunks_inserted.increment();
                ctx.metrics().cache_size.set(cache.len() as u64);
                log_event(hdr.seq, hdr.src, hdr.dst, "ADD", 0, &hdr.id);
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

/// Rank-weighted variant: instead of the uniform 1/(L-2), a router's
/// marking probability falls off as 1/position along the path, normalised
/// over the interior. Routers close to the requester are favoured.
pub struct PCachedBit {
    cache: Box<dyn ReplacementPolicy>,
    // Memoised per flow; paths are static for the process lifetime.
    probs: HashMap<(VrId, VrId), f64>,
}

impl PCachedBit {
    pub fn new(cache: Box<dyn ReplacementPolicy>) -> Self {
        Self {
            cache,
            probs: HashMap::new(),
        }
    }

    fn rank_save_prob(&mut self, ctx: &RouterHandle, src: VrId, dst: VrId) -> f64 {
        if let Some(&p) = self.probs.get(&(src, dst)) {
            return p;
        }
        let interior = ctx
            .path(src, dst)
            .map(|p| p.len() as i64 - 2)
            .unwrap_or(1)
            .max(1);
        let norm: f64 = (1..=interior).map(|x| 1.0 / x as f64).sum();
        let pos = ctx
            .path(src, dst)
            .and_then(|p| p.iter().position(|&v| v == ctx.vrid))
            .unwrap_or(1)
            .max(1);
        let p = (1.0 / pos as f64) / norm;
        self.probs.insert((src, dst), p);
        p
    }
}

#[async_trait]
impl Strategy for PCachedBit {
    async fn handle(
        &mut self,
        hdr: &mut MessageHeader,
        ctx: &RouterHandle,
    ) -> anyhow::Result<bool> {
        hdr.hop = hdr.hop.saturating_add(1);
        let p = self.rank_save_prob(ctx, hdr.src, hdr.dst);
        handle_with_prob(&mut self.cache, hdr, ctx, move |_, _, _| p).await
    }
}
