//! MPSC fan-in over dedicated SPSC rings.
//!
//! The channel never makes producers share a ring: registration hands each
//! producer its own [`Ring`], and the single consumer sweeps the rings in
//! fixed index order. Producer/producer contention is gone by construction;
//! the only cross-core traffic left is each ring's producer/consumer pair.

use crate::{Config, MetricsSnapshot, Reservation, Ring};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Failures surfaced by channel operations. Full and empty rings are not
/// errors; they come back as `None` / zero counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Every producer slot is taken.
    #[error("producer slots exhausted (max: {max})")]
    AtCapacity {
        /// Configured producer limit.
        max: usize,
    },
    /// The channel was closed before the call.
    #[error("channel is closed")]
    Closed,
}

struct Shared<T> {
    /// One ring per producer slot, built up front. Contiguous so the
    /// consumer sweep walks memory in order.
    rings: Box<[Ring<T>]>,
    /// Hands out ring indices at registration; the only producer/producer
    /// synchronisation in the whole channel.
    registered: CachePadded<AtomicUsize>,
    closed: CachePadded<AtomicBool>,
    config: Config,
}

impl<T> Shared<T> {
    /// `registered` can transiently overshoot while a failed registration
    /// rolls back its increment; clamp before indexing.
    #[inline]
    fn active_rings(&self) -> &[Ring<T>] {
        let n = self
            .registered
            .load(Ordering::Acquire)
            .min(self.rings.len());
        &self.rings[..n]
    }
}

/// Multi-producer single-consumer channel.
///
/// Cloning is cheap and shares the same channel. Producers come from
/// [`register`](Channel::register); consumption must stay on one thread at
/// a time.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    /// Builds the channel and all `config.max_producers` rings. No further
    /// allocation happens after construction.
    pub fn new(config: Config) -> Self {
        let mut rings = Vec::with_capacity(config.max_producers);
        rings.resize_with(config.max_producers, || Ring::new(config));

        Self {
            shared: Arc::new(Shared {
                rings: rings.into_boxed_slice(),
                registered: CachePadded::new(AtomicUsize::new(0)),
                closed: CachePadded::new(AtomicBool::new(false)),
                config,
            }),
        }
    }

    /// Claims a producer slot and binds its ring.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] after [`close`](Channel::close), or
    /// [`ChannelError::AtCapacity`] once all slots are bound.
    pub fn register(&self) -> Result<Producer<T>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let id = self.shared.registered.fetch_add(1, Ordering::SeqCst);
        if id >= self.shared.config.max_producers {
            self.shared.registered.fetch_sub(1, Ordering::SeqCst);
            return Err(ChannelError::AtCapacity {
                max: self.shared.config.max_producers,
            });
        }

        self.shared.rings[id].set_active();

        Ok(Producer {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    /// Copies available items into `out`, sweeping the rings in index order
    /// until `out` is full or a whole sweep moves nothing.
    ///
    /// Sweep order is fixed, so heavily loaded low-index rings can delay
    /// (not starve: every sweep visits every ring) the higher ones.
    pub fn recv(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let mut total = 0;
        loop {
            let before = total;
            for ring in self.shared.active_rings() {
                if total == out.len() {
                    return total;
                }
                total += ring.copy_into(&mut out[total..]);
            }
            if total == before {
                return total;
            }
        }
    }

    /// One zero-copy sweep: batch-drains every ring through `handler`.
    /// Returns the total item count; 0 means every ring was empty.
    pub fn consume_all<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut total = 0;
        for ring in self.shared.active_rings() {
            total += ring.consume_batch(&mut handler);
        }
        total
    }

    /// Ownership-transferring sweep, for payloads that should not be
    /// cloned out of the buffer.
    pub fn consume_all_owned<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut total = 0;
        for ring in self.shared.active_rings() {
            total += ring.consume_batch_owned(&mut handler);
        }
        total
    }

    /// Sweep capped at `max_total` items, favouring lower ring indices.
    /// Bounds the time spent in one call when handlers are slow.
    pub fn consume_all_up_to<F>(&self, max_total: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut total = 0;
        for ring in self.shared.active_rings() {
            if total >= max_total {
                break;
            }
            total += ring.consume_up_to(max_total - total, &mut handler);
        }
        total
    }

    /// Ownership-transferring variant of
    /// [`consume_all_up_to`](Channel::consume_all_up_to).
    pub fn consume_all_up_to_owned<F>(&self, max_total: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut total = 0;
        for ring in self.shared.active_rings() {
            if total >= max_total {
                break;
            }
            total += ring.consume_up_to_owned(max_total - total, &mut handler);
        }
        total
    }

    /// Closes the channel and every ring, bound or not. Idempotent.
    /// Producers see reserve failures; the consumer drains the remainder
    /// and terminates on `is_closed() && is_empty()`.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        for ring in self.shared.rings.iter() {
            ring.close();
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// True when no ring holds an item.
    pub fn is_empty(&self) -> bool {
        self.shared.rings.iter().all(Ring::is_empty)
    }

    /// Currently bound producer count.
    pub fn producer_count(&self) -> usize {
        self.shared
            .registered
            .load(Ordering::Acquire)
            .min(self.shared.config.max_producers)
    }

    /// Borrow of one ring, for dedicated-consumer setups that bypass the
    /// sweep. `None` past the configured producer limit.
    pub fn ring(&self, id: usize) -> Option<&Ring<T>> {
        self.shared.rings.get(id)
    }

    /// Counters summed over every ring. All zeros unless the config
    /// enabled metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut sum = MetricsSnapshot::default();
        for ring in self.shared.rings.iter() {
            sum.merge(&ring.metrics());
        }
        sum
    }
}

/// Write half bound to one ring of a [`Channel`].
///
/// Deliberately not `Clone`: a second handle to the same ring would mean
/// two writers on a single-producer protocol. Move it to the producing
/// thread instead.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    id: usize,
}

impl<T> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").field("id", &self.id).finish()
    }
}

impl<T> Producer<T> {
    /// Ring index this producer is bound to. Diagnostics only.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    fn ring(&self) -> &Ring<T> {
        &self.shared.rings[self.id]
    }

    /// See [`Ring::reserve`].
    #[inline]
    pub fn reserve(&self, want: usize) -> Option<Reservation<'_, T>> {
        self.ring().reserve(want)
    }

    /// See [`Ring::reserve_spinning`].
    #[inline]
    pub fn reserve_spinning(&self, want: usize) -> Option<Reservation<'_, T>> {
        self.ring().reserve_spinning(want)
    }

    /// See [`Ring::push`].
    #[inline]
    pub fn push(&self, item: T) -> bool {
        self.ring().push(item)
    }

    /// See [`Ring::send`].
    #[inline]
    pub fn send(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        self.ring().send(items)
    }

    /// Closes only this producer's ring.
    #[inline]
    pub fn close(&self) {
        self.ring().close();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring().is_closed()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring().capacity()
    }
}
