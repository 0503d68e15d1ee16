use crate::invariants::debug_assert_monotonic;
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_occupancy;
use crate::Metrics;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// A writable window of ring slots obtained from `reserve`.
///
/// The producer fills the slice, then calls [`commit`](Reservation::commit)
/// to publish. Nothing is visible to the consumer before the commit, and a
/// reservation dropped without committing leaves the ring untouched.
///
/// The window may be shorter than the count passed to `reserve`: a
/// reservation never crosses the wrap boundary of the buffer, so callers
/// must write against [`len`](Reservation::len), not against what they
/// asked for.
///
/// One reservation at a time per ring. The ring does not track outstanding
/// windows, so a second `reserve` before this one is committed or dropped
/// would hand out the same slots again.
pub struct Reservation<'a, T> {
    slots: &'a mut [MaybeUninit<T>],
    tail: &'a AtomicU64,
    #[cfg(debug_assertions)]
    head: &'a AtomicU64,
    #[cfg(debug_assertions)]
    capacity: usize,
    counters: Option<&'a Metrics>,
}

impl<'a, T> Reservation<'a, T> {
    /// Both ring families hand out reservations over their own buffers; the
    /// tail reference is where the commit publishes.
    #[allow(unused_variables)]
    pub(crate) fn new(
        slots: &'a mut [MaybeUninit<T>],
        tail: &'a AtomicU64,
        head: &'a AtomicU64,
        capacity: usize,
        counters: Option<&'a Metrics>,
    ) -> Self {
        Self {
            slots,
            tail,
            #[cfg(debug_assertions)]
            head,
            #[cfg(debug_assertions)]
            capacity,
            counters,
        }
    }

    /// The granted slots, ready for writing.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [MaybeUninit<T>] {
        self.slots
    }

    /// Number of granted slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Writes `item` into slot `i` of the window.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    #[inline]
    pub fn write(&mut self, i: usize, item: T) {
        self.slots[i].write(item);
    }

    /// Publishes every slot in the window.
    ///
    /// All `len()` slots must have been written; the consumer will read
    /// them as initialised values.
    #[inline]
    pub fn commit(self) {
        let n = self.slots.len();
        self.commit_first(n);
    }

    /// Publishes only the first `n` written slots.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the granted length.
    pub fn commit_first(self, n: usize) {
        assert!(n <= self.slots.len(), "commit of {n} exceeds grant");

        // The producer is the only writer of tail, so the relaxed read is
        // this thread's own last store. The release store pairs with the
        // consumer's acquire load of tail and publishes the slot writes.
        let tail = self.tail.load(Ordering::Relaxed);
        let new_tail = tail.wrapping_add(n as u64);

        #[cfg(debug_assertions)]
        {
            let head = self.head.load(Ordering::Relaxed);
            debug_assert_occupancy!(new_tail.wrapping_sub(head) as usize, self.capacity);
        }
        debug_assert_monotonic!("tail", tail, new_tail);

        self.tail.store(new_tail, Ordering::Release);

        if let Some(counters) = self.counters {
            counters.record_commit(n as u64);
        }
    }
}
