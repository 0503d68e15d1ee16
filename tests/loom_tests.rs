//! Exhaustive interleaving checks of the index protocol under loom.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! The production types use `std` atomics directly, so the protocol is
//! modelled here in miniature with loom's atomics: same counters, same
//! orderings, tiny capacity to keep the state space tractable. What loom
//! proves about this model is exactly the release/acquire argument the
//! real rings rely on.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

const CAP: usize = 2;

/// Minimal SPSC ring: monotonic head/tail, release/acquire publication,
/// data through an UnsafeCell exactly like the real slots.
struct Model {
    tail: AtomicU64,
    head: AtomicU64,
    closed: AtomicBool,
    slots: UnsafeCell<[u64; CAP]>,
}

unsafe impl Send for Model {}
unsafe impl Sync for Model {}

impl Model {
    fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            head: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            slots: UnsafeCell::new([0; CAP]),
        }
    }

    fn push(&self, value: u64) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if (tail - head) as usize == CAP {
            return false;
        }

        // SAFETY: the slot at tail is outside [head, tail); only this
        // producer writes it until the tail store below publishes it.
        unsafe { (*self.slots.get())[tail as usize % CAP] = value };
        self.tail.store(tail + 1, Ordering::Release);
        true
    }

    fn pop(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        // SAFETY: [head, tail) is published by the acquire load above.
        let value = unsafe { (*self.slots.get())[head as usize % CAP] };
        self.head.store(head + 1, Ordering::Release);
        Some(value)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Two pushes, concurrent pops: every interleaving yields both values in
/// order, with the slot writes fully visible.
#[test]
fn loom_spsc_publishes_in_order() {
    loom::model(|| {
        let ring = Arc::new(Model::new());
        let producer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            assert!(producer_ring.push(11));
            assert!(producer_ring.push(22));
        });

        // Bounded concurrent pops, then drain the rest after the join so
        // loom's search space stays finite.
        let mut seen = Vec::new();
        for _ in 0..8 {
            if let Some(v) = ring.pop() {
                seen.push(v);
            }
            if seen.len() == 2 {
                break;
            }
            thread::yield_now();
        }
        producer.join().unwrap();
        while seen.len() < 2 {
            seen.push(ring.pop().expect("both pushes visible after join"));
        }
        assert_eq!(seen, [11, 22]);
    });
}

/// Backpressure: with capacity 2, a third push fails until the consumer
/// frees a slot, and the freed slot is reusable without tearing.
#[test]
fn loom_full_ring_refuses_then_recovers() {
    loom::model(|| {
        let ring = Arc::new(Model::new());
        let consumer_ring = Arc::clone(&ring);

        let consumer = thread::spawn(move || consumer_ring.pop());

        assert!(ring.push(1));
        assert!(ring.push(2));
        // Ring full: this either fails or succeeds only after the
        // concurrent pop retired an item.
        let third = ring.push(3);
        let popped = consumer.join().unwrap();
        if third {
            assert_eq!(popped, Some(1));
        }
    });
}

/// Shutdown: items committed before the close are all drained after it.
#[test]
fn loom_close_loses_nothing() {
    loom::model(|| {
        let ring = Arc::new(Model::new());
        let producer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            let mut committed = 0;
            if producer_ring.push(1) {
                committed += 1;
            }
            producer_ring.close();
            committed
        });

        let mut drained = 0;
        loop {
            if ring.pop().is_some() {
                drained += 1;
            } else if ring.is_closed() {
                break;
            } else {
                thread::yield_now();
            }
        }
        // One more look after observing the close.
        if ring.pop().is_some() {
            drained += 1;
        }

        let committed = producer.join().unwrap();
        assert_eq!(drained, committed);
    });
}
