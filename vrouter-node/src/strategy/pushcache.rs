//! Edge caching with upstream eviction push.
//!
//! The edge router next to the requester admits everything; when its
//! cache overflows the victim is not discarded but pushed one hop
//! upstream along the path it originally travelled, draining popular
//! content toward the network edge and spare capacity toward the core.

use super::{answer_from_cache, distance_save_prob, log_event, Strategy};
use crate::cache::ReplacementPolicy;
use crate::router::RouterHandle;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use vrouter_common::types::{ChunkId, MessageType, VrId};
use vrouter_common::wire::MessageHeader;

pub struct PushCache {
    cache: Box<dyn ReplacementPolicy>,
    /// Flow each cached chunk arrived on, kept so an eviction knows which
    /// path to push along. Stored as (requester, origin server).
    pathcache: HashMap<ChunkId, (VrId, VrId)>,
    /// Additionally admit with 1/(L-2) at every router, not just the edge.
    probabilistic: bool,
}

impl PushCache {
    pub fn new(cache: Box<dyn ReplacementPolicy>, probabilistic: bool) -> Self {
        Self {
            cache,
            pathcache: HashMap::new(),
            probabilistic,
        }
    }

    /// Admit a chunk for the given flow; an eviction victim is pushed one
    /// hop upstream instead of being dropped.
    async fn admit(
        &mut self,
        cid: ChunkId,
        data: Bytes,
        flow: (VrId, VrId),
        ctx: &RouterHandle,
    ) -> anyhow::Result<Option<ChunkId>> {
        self.pathcache.insert(cid, flow);
        let evicted = self.cache.insert(cid, data);
        ctx.metrics().chunks_inserted.increment();
        ctx.metrics().cache_size.set(self.cache.len() as u64);
        if let Some((victim, chunk)) = evicted {
            ctx.metrics().chunks_evicted.increment();
            if let Some(flow) = self.pathcache.remove(&victim) {
                self.push_upstream(victim, chunk, flow, ctx).await?;
            }
            return Ok(Some(victim));
        }
        Ok(None)
    }

    /// Forward a victim one hop toward the origin server, unless the next
    /// hop already is the server.
    async fn push_upstream(
        &self,
        cid: ChunkId,
        chunk: Bytes,
        (requester, server): (VrId, VrId),
        ctx: &RouterHandle,
    ) -> anyhow::Result<()> {
        let upstream = ctx.path(requester, server).and_then(|path| {
            let pos = path.iter().position(|&v| v == ctx.vrid)?;
            path.get(pos + 1).copied()
        });
        if let Some(upstream) = upstream {
            if upstream != server {
                let mut push = MessageHeader::new(MessageType::Push);
                push.id = cid;
                push.src = requester;
                push.dst = server;
                push.nxt = upstream;
                push.data = chunk;
                ctx.forward(push).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for PushCache {
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
                    answer_from_cache(hdr, data, ctx).await?;
                    return Ok(true);
                }
                log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 0, &hdr.id);
                ctx.metrics().cache_misses.increment();
                if ctx.is_edge(hdr.src, hdr.dst) {
                    hdr.set_cached_bit();
                    hdr.crid = ctx.rid;
                }
                Ok(false)
            }
            MessageType::Response => {
                log_event(hdr.seq, hdr.src, hdr.dst, "RSP", 0, &hdr.id);
                let elected = hdr.is_cached_bit_set() && hdr.crid == ctx.rid;
                let drawn = self.probabilistic
                    && rand::random::<f64>() <= distance_save_prob(ctx, hdr.src, hdr.dst);
                if (elected || drawn) && !self.cache.contains(&hdr.id) {
                    // src/dst are flipped on the way back.
                    let flow = (hdr.dst, hdr.src);
                    let (seq, src, dst, id) = (hdr.seq, hdr.src, hdr.dst, hdr.id);
                    if let Some(victim) = self.admit(id, hdr.data.clone(), flow, ctx).await? {
                        log_event(seq, src, dst, "DEL", 0, &victim);
                    }
                    log_event(seq, src, dst, "ADD", 0, &id);
                }
                Ok(false)
            }
            MessageType::Push => {
                let flow = (hdr.src, hdr.dst);
                if !self.cache.contains(&hdr.id) {
                    self.admit(hdr.id, hdr.data.clone(), flow, ctx).await?;
                } else {
                    self.pathcache.insert(hdr.id, flow);
                }
                // Push frames never travel further on their own.
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{build_policy, PolicyKind};
    use crate::router::{Router, RouterConfig};
    use crate::topology::Topology;

    fn ctx_at(vrid: VrId) -> (Router, RouterHandle) {
        let topo = Topology::parse("0 -> 1\n1 -> 2\n2 -> 3").unwrap();
        let router =
            Router::new(RouterConfig::new(vrid, topo, "127.0.0.1:0".parse().unwrap())).unwrap();
        let handle = router.handle();
        (router, handle)
    }

    fn response(cid_seed: &[u8], elected_by: Option<&RouterHandle>) -> MessageHeader {
        let mut hdr = MessageHeader::new(MessageType::Response);
        hdr.id = ChunkId::of_chunk(cid_seed);
        hdr.src = 3;
        hdr.dst = 0;
        hdr.data = Bytes::from_static(b"payload");
        if let Some(ctx) = elected_by {
            hdr.set_cached_bit();
            hdr.crid = ctx.rid;
        }
        hdr
    }

    #[tokio::test]
    async fn only_the_edge_router_marks_requests() {
        let (_router, ctx) = ctx_at(1);
        let mut pc = PushCache::new(build_policy(PolicyKind::Lru, 4).unwrap(), false);
        let mut req = MessageHeader::new(MessageType::Request);
        req.id = ChunkId::of_chunk(b"a");
        req.src = 0;
        req.dst = 3;
        assert!(!pc.handle(&mut req, &ctx).await.unwrap());
        assert!(req.is_cached_bit_set());
        assert_eq!(req.crid, ctx.rid);

        // An interior router leaves the election to the edge.
        let (_router2, ctx2) = ctx_at(2);
        let mut pc2 = PushCache::new(build_policy(PolicyKind::Lru, 4).unwrap(), false);
        let mut req2 = MessageHeader::new(MessageType::Request);
        req2.id = ChunkId::of_chunk(b"a");
        req2.src = 0;
        req2.dst = 3;
        assert!(!pc2.handle(&mut req2, &ctx2).await.unwrap());
        assert!(!req2.is_cached_bit_set());
    }

    #[tokio::test]
    async fn eviction_pushes_the_victim_one_hop_upstream() {
        let (mut router, ctx) = ctx_at(1);
        let mut egress = router.take_egress();
        let mut pc = PushCache::new(build_policy(PolicyKind::Lru, 1).unwrap(), false);

        pc.handle(&mut response(b"a", Some(&ctx)), &ctx).await.unwrap();
        pc.handle(&mut response(b"b", Some(&ctx)), &ctx).await.unwrap();

        let push = egress.try_recv().unwrap();
        assert_eq!(push.msg_type, MessageType::Push);
        assert_eq!(push.id, ChunkId::of_chunk(b"a"));
        assert_eq!(push.nxt, 2);
        assert_eq!(push.src, 0);
        assert_eq!(push.dst, 3);
        assert_eq!(&push.data[..], b"payload");
        assert!(pc.cache.contains(&ChunkId::of_chunk(b"b")));
        assert!(!pc.cache.contains(&ChunkId::of_chunk(b"a")));
    }

    #[tokio::test]
    async fn a_push_stops_beside_the_origin() {
        let (mut router, ctx) = ctx_at(2);
        let mut egress = router.take_egress();
        let mut pc = PushCache::new(build_policy(PolicyKind::Lru, 1).unwrap(), false);

        pc.handle(&mut response(b"a", Some(&ctx)), &ctx).await.unwrap();
        pc.handle(&mut response(b"b", Some(&ctx)), &ctx).await.unwrap();

        // Upstream of router 2 on path 0..3 is the origin itself.
        assert!(egress.try_recv().is_err());
    }

    #[tokio::test]
    async fn pushed_chunks_are_admitted_and_consumed() {
        let (_router, ctx) = ctx_at(2);
        let mut pc = PushCache::new(build_policy(PolicyKind::Lru, 4).unwrap(), false);
        let mut push = MessageHeader::new(MessageType::Push);
        push.id = ChunkId::of_chunk(b"a");
        push.src = 0;
        push.dst = 3;
        push.data = Bytes::from_static(b"payload");
        assert!(pc.handle(&mut push, &ctx).await.unwrap());
        assert!(pc.cache.contains(&push.id));
        assert_eq!(pc.pathcache.get(&push.id), Some(&(0, 3)));
    }
}
