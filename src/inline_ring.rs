//! [`Ring`](crate::Ring) with the buffer embedded in the struct.
//!
//! Capacity is a const generic, so slot math constant-folds and the buffer
//! needs no pointer chase: one object, no heap at all. The index protocol,
//! orderings and layout discipline are identical to the heap
//! [`Ring`](crate::Ring); its module documentation covers both.
//!
//! Mind the object size: `InlineRing<u64, 4096>` is ~33KB and fine on a
//! thread stack, `InlineRing<u64, 65536>` is ~525KB and belongs in a `Box`
//! or a `static`.

use crate::invariants::{
    debug_assert_head_le_tail, debug_assert_in_window, debug_assert_monotonic,
};
use crate::ring::{ColdState, ConsumerEdge, ProducerEdge, Slot};
use crate::{Backoff, Reservation};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;

const fn assert_capacity<const N: usize>() {
    assert!(N > 0, "inline ring capacity must be non-zero");
    assert!(
        N.is_power_of_two(),
        "inline ring capacity must be a power of two"
    );
}

/// Bounded SPSC ring with compile-time capacity and an embedded buffer.
///
/// Same producer/consumer contract as [`Ring`](crate::Ring): one writer,
/// one reader, reserve/commit on the way in, batched drains on the way out.
#[repr(C)]
pub struct InlineRing<T, const N: usize> {
    produce: ProducerEdge,
    consume: ConsumerEdge,
    state: ColdState,
    slots: [Slot<T>; N],
}

// SAFETY: identical argument to Ring<T>: the index protocol serialises all
// slot access between the one producer and the one consumer.
unsafe impl<T: Send, const N: usize> Send for InlineRing<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for InlineRing<T, N> {}

impl<T, const N: usize> InlineRing<T, N> {
    const MASK: usize = N - 1;

    /// Const-constructible empty ring. Compile fails if `N` is not a
    /// power of two.
    pub const fn new() -> Self {
        assert_capacity::<N>();
        Self {
            produce: ProducerEdge::new(),
            consume: ConsumerEdge::new(),
            state: ColdState::new(),
            slots: [const { Slot::empty() }; N],
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.produce.tail.load(Ordering::Relaxed);
        let head = self.consume.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        let tail = self.produce.tail.load(Ordering::Acquire);
        let head = self.consume.head.load(Ordering::Acquire);
        head == tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self) {
        self.state.active.store(true, Ordering::Release);
    }

    /// Stops further production; draining continues until empty.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    #[inline]
    fn slot_ptr(&self, idx: usize) -> *mut MaybeUninit<T> {
        debug_assert!(idx < N);
        // SAFETY: idx is in bounds; raw_get forms no reference to the slot.
        unsafe { UnsafeCell::raw_get(self.slots.as_ptr().add(idx).cast()) }
    }

    // -----------------------------------------------------------------
    // producer side
    // -----------------------------------------------------------------

    /// Reserves up to `want` contiguous slots. Same contract as
    /// [`Ring::reserve`](crate::Ring::reserve): the grant stops at the
    /// wrap boundary.
    pub fn reserve(&self, want: usize) -> Option<Reservation<'_, T>> {
        if want == 0 || want > N || self.is_closed() {
            return None;
        }

        let tail = self.produce.tail.load(Ordering::Relaxed);

        // SAFETY: cached_head is written by this producer thread only.
        let mut head = unsafe { *self.produce.cached_head.get() };

        if tail.wrapping_sub(head) as usize + want > N {
            head = self.consume.head.load(Ordering::Acquire);
            // SAFETY: as above, single writer.
            unsafe { *self.produce.cached_head.get() = head };

            if tail.wrapping_sub(head) as usize + want > N {
                return None;
            }
        }

        let idx = (tail as usize) & Self::MASK;
        let granted = want.min(N - idx);

        // SAFETY: same argument as Ring::reserve; the grant lies outside
        // the initialised window and inside the buffer.
        let window = unsafe { std::slice::from_raw_parts_mut(self.slot_ptr(idx), granted) };

        Some(Reservation::new(
            window,
            &self.produce.tail,
            &self.consume.head,
            N,
            None,
        ))
    }

    /// [`reserve`](InlineRing::reserve) under the adaptive backoff loop.
    pub fn reserve_spinning(&self, want: usize) -> Option<Reservation<'_, T>> {
        let mut backoff = Backoff::new();
        while !backoff.is_exhausted() {
            if let Some(r) = self.reserve(want) {
                return Some(r);
            }
            if self.is_closed() {
                return None;
            }
            backoff.snooze();
        }
        None
    }

    /// Single-item convenience. `false` when full or closed.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        match self.reserve(1) {
            Some(mut r) => {
                r.write(0, item);
                r.commit();
                true
            }
            None => false,
        }
    }

    /// Copies in as many of `items` as fit. Returns the count sent.
    pub fn send(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        let mut sent = 0;
        while sent < items.len() {
            let Some(mut r) = self.reserve(items.len() - sent) else {
                break;
            };
            let n = r.len();
            for (slot, item) in r.as_mut_slice().iter_mut().zip(&items[sent..sent + n]) {
                slot.write(*item);
            }
            r.commit();
            sent += n;
        }
        sent
    }

    // -----------------------------------------------------------------
    // consumer side
    // -----------------------------------------------------------------

    /// Contiguous readable run, or `None` when empty. Pair with
    /// [`advance`](InlineRing::advance).
    pub fn readable(&self) -> Option<&[T]> {
        let head = self.consume.head.load(Ordering::Relaxed);

        // SAFETY: cached_tail is written by this consumer thread only.
        let mut tail = unsafe { *self.consume.cached_tail.get() };
        if tail == head {
            tail = self.produce.tail.load(Ordering::Acquire);
            // SAFETY: as above, single writer.
            unsafe { *self.consume.cached_tail.get() = tail };
            if tail == head {
                return None;
            }
        }

        let avail = tail.wrapping_sub(head) as usize;
        let idx = (head as usize) & Self::MASK;
        let run = avail.min(N - idx);

        // SAFETY: [head, tail) is published; see Ring::readable.
        Some(unsafe {
            std::slice::from_raw_parts(self.slot_ptr(idx).cast::<T>().cast_const(), run)
        })
    }

    /// Retires `n` items observed through [`readable`](InlineRing::readable).
    pub fn advance(&self, n: usize) {
        let head = self.consume.head.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);
        debug_assert_head_le_tail!(new_head, self.produce.tail.load(Ordering::Relaxed));
        debug_assert_monotonic!("head", head, new_head);

        self.consume.head.store(new_head, Ordering::Release);
    }

    fn consume_inner<F>(&self, max: usize, mut sink: F) -> usize
    where
        F: FnMut(T),
    {
        if max == 0 {
            return 0;
        }

        let head = self.consume.head.load(Ordering::Relaxed);

        // SAFETY: cached_tail is written by this consumer thread only.
        let mut tail = unsafe { *self.consume.cached_tail.get() };
        if tail == head {
            tail = self.produce.tail.load(Ordering::Acquire);
            // SAFETY: as above, single writer.
            unsafe { *self.consume.cached_tail.get() = tail };
            if tail == head {
                return 0;
            }
        }

        let take = (tail.wrapping_sub(head) as usize).min(max);

        for i in 0..take {
            let seq = head.wrapping_add(i as u64);
            debug_assert_in_window!(seq, head, tail);
            let idx = (seq as usize) & Self::MASK;
            // SAFETY: seq is inside [head, tail); see Ring::consume_inner.
            let item = unsafe { self.slot_ptr(idx).read().assume_init() };
            sink(item);
        }

        let new_head = head.wrapping_add(take as u64);
        debug_assert_head_le_tail!(new_head, tail);
        self.consume.head.store(new_head, Ordering::Release);

        take
    }

    /// Drains everything available in FIFO order; items drop after the
    /// handler returns.
    pub fn consume_batch<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        self.consume_inner(usize::MAX, |item| handler(&item))
    }

    /// Ownership-transferring drain.
    pub fn consume_batch_owned<F>(&self, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.consume_inner(usize::MAX, handler)
    }

    /// Drains at most `max` items.
    pub fn consume_up_to<F>(&self, max: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        self.consume_inner(max, |item| handler(&item))
    }

    /// Ownership-transferring capped drain.
    pub fn consume_up_to_owned<F>(&self, max: usize, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.consume_inner(max, handler)
    }

    /// Copies up to `out.len()` items into `out` and retires them.
    pub fn copy_into(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        match self.readable() {
            Some(run) => {
                let n = run.len().min(out.len());
                out[..n].copy_from_slice(&run[..n]);
                self.advance(n);
                n
            }
            None => 0,
        }
    }
}

impl<T, const N: usize> Default for InlineRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for InlineRing<T, N> {
    fn drop(&mut self) {
        let head = *self.consume.head.get_mut();
        let tail = *self.produce.tail.get_mut();

        let mut seq = head;
        while seq != tail {
            let idx = (seq as usize) & Self::MASK;
            // SAFETY: window slots are initialised; &mut self is exclusive.
            unsafe { std::ptr::drop_in_place(self.slot_ptr(idx).cast::<T>()) };
            seq = seq.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn layout_keeps_groups_apart_and_buffer_aligned() {
        let produce = offset_of!(InlineRing<u64, 16>, produce);
        let consume = offset_of!(InlineRing<u64, 16>, consume);
        let state = offset_of!(InlineRing<u64, 16>, state);
        let slots = offset_of!(InlineRing<u64, 16>, slots);

        assert_eq!(produce, 0);
        assert!(consume - produce >= 128);
        assert!(state - consume >= 128);
        assert_eq!(slots % 64, 0, "buffer must start 64-byte aligned");
    }

    #[test]
    fn fill_and_drain_cycles() {
        let ring: InlineRing<u64, 8> = InlineRing::new();

        for round in 0..4u64 {
            let base = round * 8;
            for i in 0..8 {
                assert!(ring.push(base + i));
            }
            assert!(ring.is_full());
            assert!(ring.reserve(1).is_none());

            let mut expected = base;
            assert_eq!(
                ring.consume_batch(|v| {
                    assert_eq!(*v, expected);
                    expected += 1;
                }),
                8
            );
        }
    }

    #[test]
    fn grant_stops_at_wrap_boundary() {
        let ring: InlineRing<u64, 16> = InlineRing::new();
        for i in 0..14 {
            assert!(ring.push(i));
        }
        assert_eq!(ring.consume_batch(|_| {}), 14);

        let r = ring.reserve(8).unwrap();
        assert_eq!(r.len(), 2);
        drop(r);
        let r = ring.reserve(6).unwrap();
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn close_stops_reserve_but_not_drain() {
        let ring: InlineRing<u64, 8> = InlineRing::new();
        assert!(ring.push(1));
        ring.close();
        assert!(!ring.push(2));
        assert!(ring.reserve(1).is_none());

        let mut seen = Vec::new();
        ring.consume_batch(|v| seen.push(*v));
        assert_eq!(seen, [1]);
    }

    #[test]
    fn drop_releases_window_items() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROPS.store(0, Ordering::SeqCst);
        {
            let ring: InlineRing<Tracked, 8> = InlineRing::new();
            for _ in 0..3 {
                ring.push(Tracked);
            }
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn owned_consumption() {
        let ring: InlineRing<String, 8> = InlineRing::new();
        assert!(ring.push("a".into()));
        assert!(ring.push("b".into()));

        let mut out = Vec::new();
        ring.consume_batch_owned(|s| out.push(s));
        assert_eq!(out, ["a", "b"]);
    }
}
