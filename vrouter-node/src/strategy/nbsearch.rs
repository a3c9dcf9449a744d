//! Neighbour search with Bloom-filter summaries.
//!
//! Routers advertise their cache contents to direct neighbours as Bloom
//! snapshots, refreshed once a second. A miss then probes the neighbours
//! whose filter claims the chunk before falling back to the origin: the
//! request is held back while a TTL-bounded QUERY fans out, and the first
//! ANSWER carrying data releases it as a response. Filters lie at the
//! configured false-positive rate, so a hold-back that nobody answers is
//! re-released toward the origin after a timeout.

use super::{answer_from_cache, distance_save_prob, log_event, Strategy};
use crate::bloom::BloomFilter;
use crate::cache::ReplacementPolicy;
use crate::router::RouterHandle;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use vrouter_common::types::{ChunkId, MessageType, VrId};
use vrouter_common::wire::MessageHeader;

/// Search radius in hops.
const DEFAULT_RADIUS: u16 = 1;
/// How often cache snapshots are pushed to neighbours.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);
/// A hold-back nobody answered within this window goes to the origin.
const HOLDBACK_TIMEOUT: Duration = Duration::from_secs(2);
/// False-positive rate both sides size their filters with.
const ERROR_RATE: f64 = 0.01;

type Holdback = HashMap<(ChunkId, u32), (MessageHeader, Instant)>;

pub struct NbSearch {
    cache: Arc<Mutex<Box<dyn ReplacementPolicy>>>,
    /// Latest snapshot received from each neighbour.
    filters: HashMap<VrId, BloomFilter>,
    holdback: Arc<Mutex<Holdback>>,
    radius: u16,
    tasks_started: bool,
}

impl NbSearch {
    pub fn new(cache: Box<dyn ReplacementPolicy>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
            filters: HashMap::new(),
            holdback: Arc::new(Mutex::new(HashMap::new())),
            radius: DEFAULT_RADIUS,
            tasks_started: false,
        }
    }

    /// Periodic snapshot distribution and hold-back expiry, spawned once
    /// the first message supplies a pipeline handle.
    fn start_tasks(&mut self, ctx: &RouterHandle) {
        let cache = Arc::clone(&self.cache);
        let snapshot_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                let (quota, keys) = {
                    let cache = cache.lock().await;
                    (cache.quota(), cache.keys())
                };
                let mut filter = BloomFilter::with_capacity(quota, ERROR_RATE);
                for cid in keys {
                    filter.insert(cid.as_bytes());
                }
                let snapshot = Bytes::from(filter.to_bytes());
                for nb in snapshot_ctx.neighbours() {
                    let mut hdr = MessageHeader::new(MessageType::BloomDistribute);
                    hdr.src = snapshot_ctx.vrid;
                    hdr.dst = nb;
                    hdr.data = snapshot.clone();
                    if snapshot_ctx.forward(hdr).await.is_err() {
                        return;
                    }
                }
            }
        });

        let holdback = Arc::clone(&self.holdback);
        let expire_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HOLDBACK_TIMEOUT / 4);
            loop {
                ticker.tick().await;
                let expired: Vec<MessageHeader> = {
                    let mut holdback = holdback.lock().await;
                    let now = Instant::now();
                    let keys: Vec<_> = holdback
                        .iter()
                        .filter(|(_, (_, since))| now.duration_since(*since) > HOLDBACK_TIMEOUT)
                        .map(|(k, _)| *k)
                        .collect();
                    keys.iter()
                        .filter_map(|k| holdback.remove(k))
                        .map(|(hdr, _)| hdr)
                        .collect()
                };
                for hdr in expired {
                    debug!(
                        "router {}: search for {} timed out, releasing to origin",
                        expire_ctx.vrid, hdr.id
                    );
                    if expire_ctx.forward(hdr).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    /// Neighbours whose snapshot claims the chunk. The next hop toward the
    /// origin is excluded: the request would pass it anyway.
    fn candidates(&self, cid: &ChunkId, next_hop: Option<VrId>) -> Vec<VrId> {
        self.filters
            .iter()
            .filter(|(&nb, filter)| Some(nb) != next_hop && filter.may_contain(cid.as_bytes()))
            .map(|(&nb, _)| nb)
            .collect()
    }

    async fn send_query(
        &self,
        ctx: &RouterHandle,
        hdr: &MessageHeader,
        nb: VrId,
        ttl: u16,
    ) -> anyhow::Result<()> {
        let mut query = MessageHeader::new(MessageType::Query);
        query.id = hdr.id;
        query.seq = hdr.seq;
        query.ttl = ttl;
        query.src = ctx.vrid;
        query.dst = nb;
        ctx.forward(query).await
    }
}

#[async_trait]
impl Strategy for NbSearch {
    async fn handle(
        &mut self,
        hdr: &mut MessageHeader,
        ctx: &RouterHandle,
    ) -> anyhow::Result<bool> {
        if !self.tasks_started {
            self.start_tasks(ctx);
            self.tasks_started = true;
        }
        hdr.hop = hdr.hop.saturating_add(1);

        match hdr.msg_type {
            MessageType::Request => {
                if let Some(data) = self.cache.lock().await.get(&hdr.id) {
                    log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 1, &hdr.id);
                    answer_from_cache(hdr, data, ctx).await?;
                    return Ok(true);
                }
                log_event(hdr.seq, hdr.src, hdr.dst, "REQ", 0, &hdr.id);
                ctx.metrics().cache_misses.increment();

                let next = ctx.next_hop(hdr.dst).await;
                let candidates = self.candidates(&hdr.id, next);
                if candidates.is_empty() {
                    if !hdr.is_cached_bit_set()
                        && rand::random::<f64>() <= distance_save_prob(ctx, hdr.src, hdr.dst)
                    {
                        hdr.set_cached_bit();
                        hdr.crid = ctx.rid;
                    }
                    return Ok(false);
                }
                self.holdback
                    .lock()
                    .await
                    .insert((hdr.id, hdr.seq), (hdr.clone(), Instant::now()));
                for nb in candidates {
                    self.send_query(ctx, hdr, nb, self.radius).await?;
                }
                Ok(true)
            }
            MessageType::Response => {
                log_event(hdr.seq, hdr.src, hdr.dst, "RSP", 0, &hdr.id);
                let mut cache = self.cache.lock().await;
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
            MessageType::Query => {
                let cached = self.cache.lock().await.get(&hdr.id);
                if let Some(data) = cached {
                    let mut answer = MessageHeader::new(MessageType::Answer);
                    answer.id = hdr.id;
                    answer.seq = hdr.seq;
                    answer.src = ctx.vrid;
                    answer.dst = hdr.src;
                    answer.data = data;
                    ctx.forward(answer).await?;
                } else if hdr.ttl > 1 {
                    // Not here; widen the search while the budget lasts.
                    let origin = hdr.src;
                    for nb in self.candidates(&hdr.id, None) {
                        if nb == origin {
                            continue;
                        }
                        let mut query = hdr.clone();
                        query.ttl = hdr.ttl - 1;
                        query.dst = nb;
                        ctx.forward(query).await?;
                    }
                }
                Ok(true)
            }
            MessageType::Answer => {
                let held = self.holdback.lock().await.remove(&(hdr.id, hdr.seq));
                if let Some((mut original, _)) = held {
                    if hdr.data.is_empty() {
                        // Negative answer: fall through to the origin.
                        ctx.forward(original).await?;
                    } else {
                        original.msg_type = MessageType::Response;
                        original.swap_src_dst();
                        original.hit = 1;
                        original.data = hdr.data.clone();
                        ctx.metrics().cache_hits.increment();
                        ctx.dispatch(original).await?;
                    }
                }
                Ok(true)
            }
            MessageType::BloomDistribute => {
                let quota = self.cache.lock().await.quota();
                match BloomFilter::from_bytes(quota, ERROR_RATE, &hdr.data) {
                    Ok(filter) => {
                        self.filters.insert(hdr.src, filter);
                    }
                    Err(e) => {
                        warn!(
                            "router {}: unusable snapshot from {}: {}",
                            ctx.vrid, hdr.src, e
                        );
                    }
                }
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
    use tokio::sync::mpsc;

    fn star_ctx() -> (Router, RouterHandle) {
        let topo = Topology::parse("0 -> 1\n1 -> 2\n1 -> 3").unwrap();
        let router =
            Router::new(RouterConfig::new(1, topo, "127.0.0.1:0".parse().unwrap())).unwrap();
        let handle = router.handle();
        (router, handle)
    }

    fn snapshot_from(nb: VrId, quota: usize, cid: &ChunkId) -> MessageHeader {
        let mut filter = BloomFilter::with_capacity(quota, ERROR_RATE);
        filter.insert(cid.as_bytes());
        let mut hdr = MessageHeader::new(MessageType::BloomDistribute);
        hdr.src = nb;
        hdr.dst = 1;
        hdr.data = Bytes::from(filter.to_bytes());
        hdr
    }

    fn request(cid: ChunkId, seq: u32) -> MessageHeader {
        let mut hdr = MessageHeader::new(MessageType::Request);
        hdr.id = cid;
        hdr.seq = seq;
        hdr.src = 0;
        hdr.dst = 2;
        hdr
    }

    /// Own snapshot refreshes run in the background; skip their frames.
    async fn next_search_frame(rx: &mut mpsc::Receiver<MessageHeader>) -> MessageHeader {
        loop {
            let hdr = tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("no egress frame in time")
                .expect("egress closed");
            if hdr.msg_type != MessageType::BloomDistribute {
                return hdr;
            }
        }
    }

    #[tokio::test]
    async fn a_miss_queries_the_advertising_neighbour_and_holds_the_request() {
        let (mut router, ctx) = star_ctx();
        let mut egress = router.take_egress();
        let mut ns = NbSearch::new(build_policy(PolicyKind::Lru, 8).unwrap());
        let cid = ChunkId::of_chunk(b"needle");

        // Neighbour 3 advertises the chunk; 2 is the next hop toward the
        // origin and never advertised, so 3 is the only candidate.
        assert!(ns
            .handle(&mut snapshot_from(3, 8, &cid), &ctx)
            .await
            .unwrap());

        assert!(ns.handle(&mut request(cid, 5), &ctx).await.unwrap());
        assert!(ns.holdback.lock().await.contains_key(&(cid, 5)));

        let query = next_search_frame(&mut egress).await;
        assert_eq!(query.msg_type, MessageType::Query);
        assert_eq!(query.dst, 3);
        assert_eq!(query.src, 1);
        assert_eq!(query.id, cid);
        assert_eq!(query.ttl, DEFAULT_RADIUS);
    }

    #[tokio::test]
    async fn the_first_answer_releases_the_holdback_as_a_hit() {
        let (mut router, ctx) = star_ctx();
        let mut egress = router.take_egress();
        let mut ns = NbSearch::new(build_policy(PolicyKind::Lru, 8).unwrap());
        let cid = ChunkId::of_chunk(b"needle");

        ns.holdback
            .lock()
            .await
            .insert((cid, 7), (request(cid, 7), Instant::now()));

        let mut answer = MessageHeader::new(MessageType::Answer);
        answer.id = cid;
        answer.seq = 7;
        answer.src = 3;
        answer.dst = 1;
        answer.data = Bytes::from_static(b"payload");
        assert!(ns.handle(&mut answer, &ctx).await.unwrap());
        assert!(ns.holdback.lock().await.is_empty());

        let rsp = next_search_frame(&mut egress).await;
        assert_eq!(rsp.msg_type, MessageType::Response);
        assert_eq!(rsp.dst, 0);
        assert_eq!(rsp.hit, 1);
        assert_eq!(&rsp.data[..], b"payload");
        assert_eq!(ctx.metrics().cache_hits.value(), 1);
    }

    #[tokio::test]
    async fn unanswered_holdbacks_go_to_the_origin_after_the_timeout() {
        let (mut router, ctx) = star_ctx();
        let mut egress = router.take_egress();
        let mut ns = NbSearch::new(build_policy(PolicyKind::Lru, 8).unwrap());
        let cid = ChunkId::of_chunk(b"needle");

        ns.holdback.lock().await.insert(
            (cid, 9),
            (request(cid, 9), Instant::now() - HOLDBACK_TIMEOUT * 2),
        );

        // Any traffic starts the background sweeper.
        ns.handle(&mut MessageHeader::new(MessageType::Alive), &ctx)
            .await
            .unwrap();

        let released = next_search_frame(&mut egress).await;
        assert_eq!(released.msg_type, MessageType::Request);
        assert_eq!(released.id, cid);
        assert_eq!(released.dst, 2);
        assert!(ns.holdback.lock().await.is_empty());
    }
}
