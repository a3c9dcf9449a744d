//! Cooperative caching strategies.
//!
//! A strategy is one handler in the router's chain. It sees every message
//! the router receives, may mutate it in place, and returns `true` when it
//! has fully consumed the message (answered it from cache, held it back,
//! absorbed a control frame). Returning `false` passes the message on; the
//! chain ends in the router's fixed local/transit classifier.

mod cachedbit;
mod green;
mod mfr;
mod nbsearch;
mod pushcache;
mod smartre;

pub use cachedbit::{CachedBit, PCachedBit};
pub use green::{GreenCachedBit, GreenLru};
pub use mfr::Mfr;
pub use nbsearch::NbSearch;
pub use pushcache::PushCache;
pub use smartre::SmartRe;

use crate::cache::{build_policy, PolicyKind};
use crate::manifest::Manifest;
use crate::router::RouterHandle;
use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use std::str::FromStr;
use vrouter_common::types::{ChunkId, MessageType, VrId};
use vrouter_common::wire::MessageHeader;
use vrouter_common::Error;

/// One handler in the forwarding chain.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Process a message. `Ok(true)` consumes it; `Ok(false)` lets the
    /// chain continue. An error skips this handler for this message.
    async fn handle(&mut self, hdr: &mut MessageHeader, ctx: &RouterHandle)
        -> anyhow::Result<bool>;
}

/// Strategies selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    CachedBit,
    PCachedBit,
    Green,
    GreenLru,
    PushCache,
    PushProb,
    NbSearch,
    Mfr,
    SmartRe,
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "cachedbit" => Ok(StrategyKind::CachedBit),
            "pcachedbit" => Ok(StrategyKind::PCachedBit),
            "green" => Ok(StrategyKind::Green),
            "greenlru" => Ok(StrategyKind::GreenLru),
            "pushcache" => Ok(StrategyKind::PushCache),
            "pushprob" => Ok(StrategyKind::PushProb),
            "nbsearch" => Ok(StrategyKind::NbSearch),
            "mfr" => Ok(StrategyKind::Mfr),
            "smartre" => Ok(StrategyKind::SmartRe),
            other => Err(Error::UnknownName {
                kind: "caching strategy",
                name: other.to_string(),
            }),
        }
    }
}

/// Build a strategy with its backing store.
///
/// Region-based caching is the odd one out: it needs the bucketed store
/// and a placement manifest instead of a chunk-keyed policy.
pub fn build_strategy(
    kind: StrategyKind,
    policy: PolicyKind,
    cache_size: usize,
    manifest: Option<Manifest>,
    vrid: VrId,
) -> Result<Box<dyn Strategy>, Error> {
    match kind {
        StrategyKind::SmartRe => {
            if policy != PolicyKind::FifoBucket {
                return Err(Error::UnknownName {
                    kind: "policy for smartre (requires fifobucket)",
                    name: policy.to_string(),
                });
            }
            let manifest = manifest.ok_or_else(|| {
                Error::Manifest("smartre requires a placement manifest".to_string())
            })?;
            Ok(Box::new(SmartRe::new(manifest, vrid)))
        }
        _ if policy == PolicyKind::FifoBucket => Err(Error::UnknownName {
            kind: "chunk-keyed cache policy",
            name: policy.to_string(),
        }),
        StrategyKind::CachedBit => Ok(Box::new(CachedBit::new(build_policy(policy, cache_size)?))),
        StrategyKind::PCachedBit => {
            Ok(Box::new(PCachedBit::new(build_policy(policy, cache_size)?)))
        }
        StrategyKind::Green => Ok(Box::new(GreenCachedBit::new(build_policy(
            policy, cache_size,
        )?))),
        StrategyKind::GreenLru => Ok(Box::new(GreenLru::new(build_policy(policy, cache_size)?))),
        StrategyKind::PushCache => Ok(Box::new(PushCache::new(
            build_policy(policy, cache_size)?,
            false,
        ))),
        StrategyKind::PushProb => Ok(Box::new(PushCache::new(
            build_policy(policy, cache_size)?,
            true,
        ))),
        StrategyKind::NbSearch => Ok(Box::new(NbSearch::new(build_policy(policy, cache_size)?))),
        StrategyKind::Mfr => Ok(Box::new(Mfr::new(build_policy(policy, cache_size)?))),
    }
}

/* ---------------------------------------------------------------- *
 * Shared helpers
 * ---------------------------------------------------------------- */

/// Tab-separated cache-event record, one line per observed message.
pub(crate) fn log_event(seq: u32, src: VrId, dst: VrId, kind: &str, hit: u16, cid: &ChunkId) {
    info!(target: "event", "{}\t{}\t{}\t{}\t{}\t{}", seq, src, dst, kind, hit, cid);
}

/// Marking probability 1/(L-2) over the interior of path(src, dst), so in
/// expectation one interior router admits each chunk.
pub(crate) fn distance_save_prob(ctx: &RouterHandle, src: VrId, dst: VrId) -> f64 {
    let interior = ctx
        .path(src, dst)
        .map(|p| p.len() as i64 - 2)
        .unwrap_or(1)
        .max(1);
    1.0 / interior as f64
}

/// Turn a request into the response answered from this router's cache and
/// hand it back to the pipeline.
pub(crate) async fn answer_from_cache(
    hdr: &mut MessageHeader,
    data: Bytes,
    ctx: &RouterHandle,
) -> anyhow::Result<()> {
    hdr.msg_type = MessageType::Response;
    hdr.swap_src_dst();
    hdr.hit = 1;
    hdr.data = data;
    ctx.metrics().cache_hits.increment();
    ctx.dispatch(hdr.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_parse() {
        assert_eq!(
            "CachedBit".parse::<StrategyKind>().unwrap(),
            StrategyKind::CachedBit
        );
        assert_eq!(
            "pushprob".parse::<StrategyKind>().unwrap(),
            StrategyKind::PushProb
        );
        assert!("oracle".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn smartre_requires_bucketed_store() {
        let err = build_strategy(StrategyKind::SmartRe, PolicyKind::Lru, 16, None, 1);
        assert!(err.is_err());
        let err = build_strategy(StrategyKind::CachedBit, PolicyKind::FifoBucket, 16, None, 1);
        assert!(err.is_err());
    }
}
