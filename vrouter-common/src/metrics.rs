//! Metrics collection for the router core.
//!
//! Counters are plain atomics so every pipeline task can bump them without
//! locking; a periodic reporter or a test reads them out at its leisure.

use std::sync::atomic::{AtomicU64, Ordering};

/* ---------------------------------------------------------------- *
 * Simple Counter
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        let c = Counter::new();
        c.value
            .store(self.value.load(Ordering::Relaxed), Ordering::Relaxed);
        c
    }
}

/* ---------------------------------------------------------------- *
 * Gauge
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        let g = Gauge::new();
        g.value
            .store(self.value.load(Ordering::Relaxed), Ordering::Relaxed);
        g
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate metrics for one router
 * ---------------------------------------------------------------- */

#[derive(Debug, Default, Clone)]
pub struct RouterMetrics {
    // Request path
    pub requests_seen: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,

    // Response path
    pub responses_seen: Counter,
    pub chunks_inserted: Counter,
    pub chunks_evicted: Counter,

    // Pipeline
    pub messages_forwarded: Counter,
    pub messages_delivered: Counter,
    pub messages_dropped: Counter,
    pub routing_failures: Counter,
    pub handler_errors: Counter,

    // Link layer
    pub frames_in: Counter,
    pub frames_out: Counter,
    pub bytes_in: Counter,
    pub bytes_out: Counter,
    pub frames_lost: Counter,

    // Cache occupancy
    pub cache_size: Gauge,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hit ratio over everything this router has seen so far.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.value();
        let total = hits + self.cache_misses.value();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basics() {
        let c = Counter::new();
        c.increment();
        c.add(4);
        assert_eq!(c.value(), 5);
        c.reset();
        assert_eq!(c.value(), 0);
    }

    #[test]
    fn hit_ratio() {
        let m = RouterMetrics::new();
        assert_eq!(m.hit_ratio(), 0.0);
        m.cache_hits.add(3);
        m.cache_misses.add(1);
        assert!((m.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
