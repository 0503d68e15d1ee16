//! The SPSC building block.
//!
//! # Index protocol
//!
//! `head` and `tail` are unbounded u64 sequence numbers; a slot is addressed
//! as `seq & (capacity - 1)`. Keeping the counters monotonic instead of
//! wrapping them sidesteps ABA entirely and makes every window computation a
//! single subtraction. The initialised window is `[head, tail)`: the producer
//! owns slots at and past `tail`, the consumer owns the window.
//!
//! Synchronisation is two release/acquire pairs:
//!
//! - producer publishes with a release store of `tail`; the consumer's
//!   acquire load of `tail` makes the slot writes visible;
//! - consumer reclaims with a release store of `head`; the producer's
//!   acquire load of `head` makes the slots reusable.
//!
//! Each side also keeps a private shadow of the other side's counter
//! (`cached_head` for the producer, `cached_tail` for the consumer) and only
//! touches the shared atomic when the shadow says it must. A stale shadow is
//! always conservative: it can report less space or fewer items than really
//! exist, never more.
//!
//! # Memory layout
//!
//! The producer-facing counters, the consumer-facing counters, and the cold
//! lifecycle state live in three separate 128-byte-aligned groups. 64 bytes
//! is not enough: adjacent-line prefetching on current x86-64 parts pulls
//! cache lines in pairs, so two groups 64 bytes apart still ping-pong.
//! The layout test below pins the offsets.

use crate::invariants::{
    debug_assert_head_le_tail, debug_assert_in_window, debug_assert_monotonic,
};
use crate::{Backoff, Config, Metrics, MetricsSnapshot, Reservation};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One buffer slot. `UnsafeCell` because the producer writes through a
/// shared reference; `MaybeUninit` because slots outside `[head, tail)`
/// hold garbage.
#[repr(transparent)]
pub(crate) struct Slot<T>(pub(crate) UnsafeCell<MaybeUninit<T>>);

impl<T> Slot<T> {
    pub(crate) const fn empty() -> Self {
        Self(UnsafeCell::new(MaybeUninit::uninit()))
    }
}

/// Owning slot buffer for the heap ring, allocated with the alignment
/// bumped to at least 64 bytes so the buffer starts on a cache-line
/// boundary regardless of `T`.
struct SlotBuffer<T> {
    ptr: NonNull<Slot<T>>,
    layout: Layout,
}

impl<T> SlotBuffer<T> {
    const MIN_ALIGN: usize = 64;

    /// Allocates `len` uninitialised slots. The slots need no writes up
    /// front: `MaybeUninit` makes fresh allocation a valid state.
    fn new(len: usize) -> Self {
        let layout = Layout::array::<Slot<T>>(len)
            .and_then(|layout| layout.align_to(Self::MIN_ALIGN))
            .expect("ring buffer layout overflows");

        if layout.size() == 0 {
            // Zero-sized T: nothing to allocate, a dangling pointer serves.
            return Self {
                ptr: NonNull::dangling(),
                layout,
            };
        }

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(raw.cast::<Slot<T>>()) else {
            handle_alloc_error(layout)
        };

        Self { ptr, layout }
    }

    #[inline]
    fn as_ptr(&self) -> *const Slot<T> {
        self.ptr.as_ptr()
    }
}

impl<T> Drop for SlotBuffer<T> {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            // SAFETY: allocated in new() with this exact layout. Slot
            // contents are dropped by the ring before it drops the buffer.
            unsafe { dealloc(self.ptr.as_ptr().cast(), self.layout) };
        }
    }
}

/// Producer-hot group: the producer's own counter plus its shadow of the
/// consumer's. The consumer reads `tail` from here, so the shadow refresh
/// (rare) is the only producer write that can dirty a line the consumer
/// needs.
#[repr(C, align(128))]
pub(crate) struct ProducerEdge {
    /// Next sequence to write. Producer stores (release), consumer loads
    /// (acquire).
    pub(crate) tail: AtomicU64,
    /// Producer-private lower bound on `head`. Refreshed only when the ring
    /// looks full.
    pub(crate) cached_head: UnsafeCell<u64>,
}

impl ProducerEdge {
    pub(crate) const fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            cached_head: UnsafeCell::new(0),
        }
    }
}

/// Consumer-hot group, mirror of [`ProducerEdge`].
#[repr(C, align(128))]
pub(crate) struct ConsumerEdge {
    /// Next sequence to read. Consumer stores (release), producer loads
    /// (acquire).
    pub(crate) head: AtomicU64,
    /// Consumer-private lower bound on `tail`. Refreshed only when the ring
    /// looks empty.
    pub(crate) cached_tail: UnsafeCell<u64>,
}

impl ConsumerEdge {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicU64::new(0),
            cached_tail: UnsafeCell::new(0),
        }
    }
}

/// Rarely-touched lifecycle state, kept off both hot groups.
#[repr(C, align(128))]
pub(crate) struct ColdState {
    /// Set once a producer identity is bound to this ring.
    pub(crate) active: AtomicBool,
    /// Set once, never cleared. Reserve fails afterwards; draining continues
    /// until the window is empty.
    pub(crate) closed: AtomicBool,
    pub(crate) metrics: Metrics,
}

impl ColdState {
    pub(crate) const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            metrics: Metrics::new(),
        }
    }
}

/// Bounded single-producer single-consumer ring with a zero-copy
/// reserve/commit write path and batched drains.
///
/// One thread may produce and one thread may consume at a time; the
/// [`Channel`](crate::Channel) enforces this by handing each registered
/// producer its own ring and draining from a single consumer.
#[repr(C)]
pub struct Ring<T> {
    produce: ProducerEdge,
    consume: ConsumerEdge,
    state: ColdState,
    config: Config,
    /// One 64-byte-aligned allocation at construction, none afterwards.
    slots: SlotBuffer<T>,
}

// SAFETY: the index protocol above serialises all slot access between the
// single producer and the single consumer, so the ring is safe to share as
// long as items can move between threads.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates an empty ring with `config.capacity()` slots.
    pub fn new(config: Config) -> Self {
        Self {
            produce: ProducerEdge::new(),
            consume: ConsumerEdge::new(),
            state: ColdState::new(),
            config,
            slots: SlotBuffer::new(config.capacity()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    /// Items currently in the ring. Racy by nature when the other side is
    /// running; exact when quiescent.
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
        self.len() >= self.capacity()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// True once a producer has been bound to this ring.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self) {
        self.state.active.store(true, Ordering::Release);
    }

    /// Stops further production. Idempotent; the consumer keeps draining
    /// whatever was committed before the close.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    /// Counter snapshot. All zeros unless the config enabled metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }

    #[inline]
    fn counters(&self) -> Option<&Metrics> {
        self.config.enable_metrics.then(|| &self.state.metrics)
    }

    /// Raw pointer to slot `idx`, derived from the whole-buffer pointer and
    /// routed through `UnsafeCell::raw_get` so no intermediate reference to
    /// the slot is formed. Required for pointers that cover several slots.
    #[inline]
    fn slot_ptr(&self, idx: usize) -> *mut MaybeUninit<T> {
        debug_assert!(idx < self.capacity());
        // SAFETY: idx is in bounds, so the offset stays inside the buffer.
        unsafe { UnsafeCell::raw_get(self.slots.as_ptr().add(idx).cast()) }
    }

    // -----------------------------------------------------------------
    // producer side
    // -----------------------------------------------------------------

    /// Reserves up to `want` contiguous slots for writing.
    ///
    /// Returns `None` when the ring is full or closed, or when `want` is 0
    /// or exceeds the capacity. A full ring is a steady-state condition,
    /// not an error; callers back off and retry.
    ///
    /// The grant stops at the wrap boundary, so it may be shorter than
    /// `want` even with plenty of free space. Write against
    /// [`Reservation::len`], and reserve again for the remainder.
    ///
    /// At most one reservation may be outstanding per ring: commit or drop
    /// it before reserving again. Overlapping reservations alias the same
    /// slots and are not checked for.
    pub fn reserve(&self, want: usize) -> Option<Reservation<'_, T>> {
        if want == 0 || want > self.capacity() || self.is_closed() {
            return None;
        }

        let capacity = self.capacity();
        let tail = self.produce.tail.load(Ordering::Relaxed);

        // Fast path: decide against the shadow. A stale shadow only
        // under-reports free space, so a hit here needs no shared load.
        // SAFETY: cached_head is written by this producer thread only.
        let mut head = unsafe { *self.produce.cached_head.get() };

        if tail.wrapping_sub(head) as usize + want > capacity {
            // Slow path: refresh the shadow from the consumer's counter.
            // The acquire pairs with the consumer's release in advance,
            // making reclaimed slots writable here.
            head = self.consume.head.load(Ordering::Acquire);
            // SAFETY: as above, single writer.
            unsafe { *self.produce.cached_head.get() = head };

            if tail.wrapping_sub(head) as usize + want > capacity {
                if let Some(counters) = self.counters() {
                    counters.record_full_miss();
                }
                return None;
            }
        }

        let idx = (tail as usize) & self.mask();
        let granted = want.min(capacity - idx);

        // SAFETY: [tail, tail + granted) lies outside the initialised
        // window, the consumer never touches it before the commit moves
        // tail, and this thread is the ring's only producer. The range
        // stays inside the buffer because granted <= capacity - idx.
        let window = unsafe { std::slice::from_raw_parts_mut(self.slot_ptr(idx), granted) };

        Some(Reservation::new(
            window,
            &self.produce.tail,
            &self.consume.head,
            capacity,
            self.counters(),
        ))
    }

    /// [`reserve`](Ring::reserve) wrapped in the adaptive [`Backoff`] loop.
    ///
    /// Retries through the spin, yield and park phases, giving up with
    /// `None` once the backoff is exhausted or the ring closes.
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

    /// Single-item convenience over reserve/commit. Returns `false` when
    /// full or closed.
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

    /// Copies as many of `items` in as currently fit, reserving across the
    /// wrap boundary as needed. Returns the count actually sent.
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

    /// The contiguous readable run starting at `head`, or `None` when the
    /// ring looks empty. Zero-copy; pair with [`advance`](Ring::advance).
    ///
    /// Stops at the wrap boundary: after consuming the run there may be
    /// more items starting at slot 0.
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
        let idx = (head as usize) & self.mask();
        let run = avail.min(self.capacity() - idx);

        // SAFETY: [head, tail) was published by the producer's release
        // store of tail, which a (current or earlier) acquire load here
        // synchronised with. The producer will not overwrite these slots
        // until head moves past them.
        Some(unsafe { std::slice::from_raw_parts(self.slot_ptr(idx).cast::<T>().cast_const(), run) })
    }

    /// Retires `n` items previously observed through
    /// [`readable`](Ring::readable). One release store reclaims the whole
    /// batch for the producer.
    pub fn advance(&self, n: usize) {
        let head = self.consume.head.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);
        debug_assert_head_le_tail!(new_head, self.produce.tail.load(Ordering::Relaxed));
        debug_assert_monotonic!("head", head, new_head);

        self.consume.head.store(new_head, Ordering::Release);

        if let Some(counters) = self.counters() {
            counters.record_drain(n as u64);
        }
    }

    /// Core drain loop. Reads items out of the window in sequence order,
    /// hands them to `sink` by value, then retires the whole batch with a
    /// single release store of `head`.
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
        let mask = self.mask();

        for i in 0..take {
            let seq = head.wrapping_add(i as u64);
            debug_assert_in_window!(seq, head, tail);
            let idx = (seq as usize) & mask;
            // SAFETY: seq is inside [head, tail), so the slot holds an
            // initialised item published by the producer. Reading it out
            // moves ownership; the slot reverts to garbage once head
            // passes it.
            let item = unsafe { self.slot_ptr(idx).read().assume_init() };
            sink(item);
        }

        let new_head = head.wrapping_add(take as u64);
        debug_assert_head_le_tail!(new_head, tail);
        self.consume.head.store(new_head, Ordering::Release);

        if let Some(counters) = self.counters() {
            counters.record_drain(take as u64);
        }

        take
    }

    /// Drains every available item, invoking `handler` on a reference to
    /// each in FIFO order. Items are dropped after the handler returns.
    /// Returns the count; 0 means the ring was empty.
    pub fn consume_batch<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        self.consume_inner(usize::MAX, |item| handler(&item))
    }

    /// Like [`consume_batch`](Ring::consume_batch) but transfers ownership
    /// of each item to the handler. Preferred for payloads that are
    /// expensive to clone.
    pub fn consume_batch_owned<F>(&self, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.consume_inner(usize::MAX, handler)
    }

    /// Drains at most `max` items. Caps the time spent inside one call when
    /// handlers are slow.
    pub fn consume_up_to<F>(&self, max: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        self.consume_inner(max, |item| handler(&item))
    }

    /// Ownership-transferring variant of [`consume_up_to`](Ring::consume_up_to).
    pub fn consume_up_to_owned<F>(&self, max: usize, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.consume_inner(max, handler)
    }

    /// Copies up to `out.len()` items into `out` and retires them.
    /// Returns the count written; stops at the wrap boundary, so a second
    /// call may produce more.
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

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Whatever is still inside [head, tail) was never consumed.
        let head = *self.consume.head.get_mut();
        let tail = *self.produce.tail.get_mut();
        let mask = self.mask();

        let mut seq = head;
        while seq != tail {
            let idx = (seq as usize) & mask;
            // SAFETY: slots inside the window are initialised and owned by
            // the ring at this point; &mut self excludes all other access.
            unsafe { std::ptr::drop_in_place(self.slot_ptr(idx).cast::<T>()) };
            seq = seq.wrapping_add(1);
        }
    }
}
