//! Virtual router engine for the in-network caching simulator.
//!
//! A [`router::Router`] forwards content requests and responses along
//! shortest paths over a topology of simulated links, while a pluggable
//! caching strategy intercepts traffic to serve from, or populate, a local
//! cache. Links model bandwidth, delay and loss; all flows of control are
//! tokio tasks coupled through bounded channels.

pub mod bloom;
pub mod cache;
pub mod link;
pub mod manifest;
pub mod router;
pub mod strategy;
pub mod topology;

pub use router::{Router, RouterConfig, RouterHandle, RoutingMode};
pub use topology::Topology;

/// Default capacity of the pipeline queues (messages).
pub const DEFAULT_QUEUE_SIZE: usize = 15_000;

/// How long the pipeline stalls when a bandwidth budget is exhausted.
pub const SHAPING_STALL_MS: u64 = 10;
