//! [`Channel`](crate::Channel) with every ring embedded in the object.
//!
//! `InlineChannel<T, N, P>` is `P` [`InlineRing<T, N>`]s plus two atomics:
//! a single object with no internal heap at all, const-constructible so it
//! can live in a `static`. Producers borrow the channel, so threads want
//! either `std::thread::scope` or a `'static` channel.

use crate::inline_ring::InlineRing;
use crate::{ChannelError, Reservation};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const fn assert_producers<const P: usize>() {
    assert!(P > 0, "channel needs at least one producer slot");
    assert!(P <= 128, "producer slots capped at 128");
}

/// Fully embedded MPSC channel: `P` producer slots, `N` slots per ring.
///
/// Mind the size: `InlineChannel<u64, 4096, 16>` is ~530KB. Large
/// configurations belong in a `Box` or a `static`, not on a thread stack.
#[repr(C)]
pub struct InlineChannel<T, const N: usize, const P: usize> {
    registered: CachePadded<AtomicUsize>,
    closed: CachePadded<AtomicBool>,
    rings: [InlineRing<T, N>; P],
}

// SAFETY: same argument as Channel<T>; each ring's protocol serialises its
// producer/consumer pair and registration is a bare atomic counter.
unsafe impl<T: Send, const N: usize, const P: usize> Send for InlineChannel<T, N, P> {}
unsafe impl<T: Send, const N: usize, const P: usize> Sync for InlineChannel<T, N, P> {}

impl<T, const N: usize, const P: usize> InlineChannel<T, N, P> {
    /// Const-constructible empty channel. Compile fails on a zero or
    /// non-power-of-two `N`, or a `P` outside `1..=128`.
    pub const fn new() -> Self {
        assert_producers::<P>();
        Self {
            registered: CachePadded::new(AtomicUsize::new(0)),
            closed: CachePadded::new(AtomicBool::new(false)),
            rings: [const { InlineRing::new() }; P],
        }
    }

    #[inline]
    pub const fn ring_capacity(&self) -> usize {
        N
    }

    #[inline]
    pub const fn max_producers(&self) -> usize {
        P
    }

    /// Currently bound producer count.
    #[inline]
    pub fn producer_count(&self) -> usize {
        self.registered.load(Ordering::Acquire).min(P)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True when no ring holds an item.
    pub fn is_empty(&self) -> bool {
        self.rings.iter().all(InlineRing::is_empty)
    }

    /// Rings bound so far, clamped against a transient overshoot from a
    /// failed registration racing its rollback.
    #[inline]
    fn active_rings(&self) -> &[InlineRing<T, N>] {
        &self.rings[..self.producer_count()]
    }

    /// Claims a producer slot and binds its ring.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] after [`close`](InlineChannel::close),
    /// [`ChannelError::AtCapacity`] once all `P` slots are bound.
    pub fn register(&self) -> Result<InlineProducer<'_, T, N, P>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let id = self.registered.fetch_add(1, Ordering::SeqCst);
        if id >= P {
            self.registered.fetch_sub(1, Ordering::SeqCst);
            return Err(ChannelError::AtCapacity { max: P });
        }

        self.rings[id].set_active();

        Ok(InlineProducer { channel: self, id })
    }

    /// Copy-based receive; sweeps rings in index order until `out` is full
    /// or a whole sweep moves nothing.
    pub fn recv(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let mut total = 0;
        loop {
            let before = total;
            for ring in self.active_rings() {
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

    /// One zero-copy sweep over every bound ring.
    pub fn consume_all<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut total = 0;
        for ring in self.active_rings() {
            total += ring.consume_batch(&mut handler);
        }
        total
    }

    /// Ownership-transferring sweep.
    pub fn consume_all_owned<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut total = 0;
        for ring in self.active_rings() {
            total += ring.consume_batch_owned(&mut handler);
        }
        total
    }

    /// Sweep capped at `max_total` items, favouring lower ring indices.
    pub fn consume_all_up_to<F>(&self, max_total: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut total = 0;
        for ring in self.active_rings() {
            if total >= max_total {
                break;
            }
            total += ring.consume_up_to(max_total - total, &mut handler);
        }
        total
    }

    /// Closes the channel and every ring. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for ring in &self.rings {
            ring.close();
        }
    }

    /// Borrow of one ring for dedicated-consumer setups.
    pub fn ring(&self, id: usize) -> Option<&InlineRing<T, N>> {
        self.rings.get(id)
    }
}

impl<T, const N: usize, const P: usize> Default for InlineChannel<T, N, P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half bound to one ring of an [`InlineChannel`].
///
/// Not `Clone`; one handle is the one writer its ring gets.
pub struct InlineProducer<'a, T, const N: usize, const P: usize> {
    channel: &'a InlineChannel<T, N, P>,
    id: usize,
}

impl<T, const N: usize, const P: usize> std::fmt::Debug for InlineProducer<'_, T, N, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineProducer").field("id", &self.id).finish()
    }
}

// SAFETY: the handle only touches its own ring's producer side, which
// tolerates exactly one thread at a time; moving the handle moves that role.
unsafe impl<T: Send, const N: usize, const P: usize> Send for InlineProducer<'_, T, N, P> {}

impl<T, const N: usize, const P: usize> InlineProducer<'_, T, N, P> {
    /// Bound ring index. Diagnostics only.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    fn ring(&self) -> &InlineRing<T, N> {
        &self.channel.rings[self.id]
    }

    /// See [`InlineRing::reserve`].
    #[inline]
    pub fn reserve(&self, want: usize) -> Option<Reservation<'_, T>> {
        self.ring().reserve(want)
    }

    /// See [`InlineRing::reserve_spinning`].
    #[inline]
    pub fn reserve_spinning(&self, want: usize) -> Option<Reservation<'_, T>> {
        self.ring().reserve_spinning(want)
    }

    /// See [`InlineRing::push`].
    #[inline]
    pub fn push(&self, item: T) -> bool {
        self.ring().push(item)
    }

    /// See [`InlineRing::send`].
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
}
