//! Optional per-ring counters.
//!
//! Updated with relaxed atomics and only when [`Config::enable_metrics`]
//! is set, so the disabled path costs a single branch on a ring-local field.
//!
//! [`Config::enable_metrics`]: crate::Config::enable_metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by a ring. Read through [`Metrics::snapshot`].
#[derive(Debug, Default)]
pub struct Metrics {
    items_produced: AtomicU64,
    items_consumed: AtomicU64,
    batches_produced: AtomicU64,
    batches_consumed: AtomicU64,
    /// Reserve calls that refreshed the head cache and still found no room.
    full_misses: AtomicU64,
}

impl Metrics {
    pub(crate) const fn new() -> Self {
        Self {
            items_produced: AtomicU64::new(0),
            items_consumed: AtomicU64::new(0),
            batches_produced: AtomicU64::new(0),
            batches_consumed: AtomicU64::new(0),
            full_misses: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_commit(&self, items: u64) {
        self.items_produced.fetch_add(items, Ordering::Relaxed);
        self.batches_produced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_drain(&self, items: u64) {
        self.items_consumed.fetch_add(items, Ordering::Relaxed);
        self.batches_consumed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_full_miss(&self) {
        self.full_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters into a plain value.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_produced: self.items_produced.load(Ordering::Relaxed),
            items_consumed: self.items_consumed.load(Ordering::Relaxed),
            batches_produced: self.batches_produced.load(Ordering::Relaxed),
            batches_consumed: self.batches_consumed.load(Ordering::Relaxed),
            full_misses: self.full_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one ring's counters, or the sum over a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub items_produced: u64,
    pub items_consumed: u64,
    pub batches_produced: u64,
    pub batches_consumed: u64,
    pub full_misses: u64,
}

impl MetricsSnapshot {
    pub(crate) fn merge(&mut self, other: &MetricsSnapshot) {
        self.items_produced += other.items_produced;
        self.items_consumed += other.items_consumed;
        self.batches_produced += other.batches_produced;
        self.batches_consumed += other.batches_consumed;
        self.full_misses += other.full_misses;
    }
}
