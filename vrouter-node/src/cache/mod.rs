//! In-router content store with pluggable replacement policies.

mod fifo_bucket;
mod lfu;
mod lfuda;
mod lru;

pub use fifo_bucket::FifoBucketCache;
pub use lfu::Lfu;
pub use lfuda::Lfuda;
pub use lru::Lru;

use bytes::Bytes;
use std::str::FromStr;
use vrouter_common::types::ChunkId;
use vrouter_common::{Error, Result};

/// A fixed-quota chunk store.
///
/// `insert` returns the evicted entry when the quota forces one out, so a
/// strategy can relocate the victim instead of losing it. Inserting a key
/// already present leaves the store untouched.
pub trait ReplacementPolicy: Send + Sync {
    fn insert(&mut self, cid: ChunkId, data: Bytes) -> Option<(ChunkId, Bytes)>;

    /// Look up a chunk and record the access as a use event.
    fn get(&mut self, cid: &ChunkId) -> Option<Bytes>;

    /// Look up without recording a use event.
    fn peek(&self, cid: &ChunkId) -> Option<Bytes>;

    fn contains(&self, cid: &ChunkId) -> bool;

    fn len(&self) -> usize;

    fn quota(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= self.quota()
    }

    /// Currently stored chunk ids, in no particular order.
    fn keys(&self) -> Vec<ChunkId>;
}

/// Replacement policies selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Lru,
    Lfu,
    Lfuda,
    /// Path-scoped circular store, usable only with region-based caching.
    FifoBucket,
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(PolicyKind::Lru),
            "lfu" => Ok(PolicyKind::Lfu),
            "lfuda" => Ok(PolicyKind::Lfuda),
            "fifobucket" | "fifo-bucket" => Ok(PolicyKind::FifoBucket),
            other => Err(Error::UnknownName {
                kind: "cache policy",
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyKind::Lru => "lru",
            PolicyKind::Lfu => "lfu",
            PolicyKind::Lfuda => "lfuda",
            PolicyKind::FifoBucket => "fifobucket",
        };
        f.write_str(s)
    }
}

/// Construct a chunk store of the given kind and quota.
///
/// The bucketed store is not a chunk-id keyed policy, so it cannot be built
/// here; strategies that need it construct a [`FifoBucketCache`] directly.
pub fn build_policy(kind: PolicyKind, quota: usize) -> Result<Box<dyn ReplacementPolicy>> {
    match kind {
        PolicyKind::Lru => Ok(Box::new(Lru::new(quota))),
        PolicyKind::Lfu => Ok(Box::new(Lfu::new(quota))),
        PolicyKind::Lfuda => Ok(Box::new(Lfuda::new(quota))),
        PolicyKind::FifoBucket => Err(Error::UnknownName {
            kind: "chunk-keyed cache policy",
            name: "fifobucket".to_string(),
        }),
    }
}
