//! Property-based checks of the index-protocol invariants.
//!
//! Single-threaded op sequences are enough here: the invariants are about
//! the window arithmetic, which the cross-thread tests then stress under
//! real interleavings.

use proptest::prelude::*;
use ringfan::{Channel, Config, InlineRing, Ring};

/// Producer/consumer steps a generated trace can take.
#[derive(Debug, Clone, Copy)]
enum Op {
    Reserve { want: usize, commit: usize },
    Drain { max: usize },
}

fn op_strategy(capacity: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (1..=capacity, 0..=capacity).prop_map(|(want, commit)| Op::Reserve { want, commit }),
        (0..=capacity * 2).prop_map(|max| Op::Drain { max }),
    ]
}

proptest! {
    /// Occupancy stays within `0..=capacity` across arbitrary traces, and
    /// reservation grants never exceed request, free space, or the run to
    /// the wrap boundary.
    #[test]
    fn occupancy_and_grants_stay_bounded(
        ops in prop::collection::vec(op_strategy(32), 1..200),
    ) {
        let ring = Ring::<u64>::new(Config::new(5, 1, false));
        let capacity = ring.capacity();

        // Model state: sequence numbers mirrored outside the ring.
        let mut head = 0u64;
        let mut tail = 0u64;

        for op in ops {
            match op {
                Op::Reserve { want, commit } => {
                    let free = capacity - (tail - head) as usize;
                    let to_end = capacity - (tail as usize % capacity);

                    match ring.reserve(want) {
                        Some(mut grant) => {
                            prop_assert!(grant.len() >= 1);
                            prop_assert!(grant.len() <= want.min(free).min(to_end),
                                "grant {} exceeds min(want {want}, free {free}, to_end {to_end})",
                                grant.len());

                            let n = commit.min(grant.len());
                            for i in 0..n {
                                grant.write(i, tail + i as u64);
                            }
                            grant.commit_first(n);
                            tail += n as u64;
                        }
                        None => {
                            // Refusal is only legal when the request could
                            // not have been satisfied in full.
                            prop_assert!(want > free,
                                "reserve({want}) refused with {free} slots free");
                        }
                    }
                }
                Op::Drain { max } => {
                    let mut expected = head;
                    let n = ring.consume_up_to(max, |v| {
                        assert_eq!(*v, expected);
                        expected += 1;
                    });
                    prop_assert!(n <= max);
                    prop_assert!(n <= (tail - head) as usize);
                    head += n as u64;
                }
            }

            prop_assert!((tail - head) as usize <= capacity);
            prop_assert_eq!(ring.len(), (tail - head) as usize);
        }
    }

    /// After any trace, draining everything yields exactly the committed
    /// sequence: nothing lost, nothing duplicated, order intact.
    #[test]
    fn full_drain_conserves_the_committed_sequence(
        ops in prop::collection::vec(op_strategy(16), 1..100),
    ) {
        let ring = Ring::<u64>::new(Config::new(4, 1, false));
        let mut committed = 0u64;
        let mut drained = 0u64;

        let mut drain_in_order = |drained: &mut u64| {
            ring.consume_batch(|v| {
                assert_eq!(*v, *drained);
                *drained += 1;
            });
        };

        for op in ops {
            match op {
                Op::Reserve { want, commit } => {
                    if let Some(mut grant) = ring.reserve(want) {
                        let n = commit.min(grant.len());
                        for i in 0..n {
                            grant.write(i, committed + i as u64);
                        }
                        grant.commit_first(n);
                        committed += n as u64;
                    }
                }
                Op::Drain { .. } => drain_in_order(&mut drained),
            }
        }

        drain_in_order(&mut drained);
        prop_assert_eq!(committed, drained);
        prop_assert!(ring.is_empty());
    }

    /// The inline ring obeys the same grant bounds as the heap ring.
    #[test]
    fn inline_ring_grants_stay_bounded(
        ops in prop::collection::vec(op_strategy(16), 1..100),
    ) {
        let ring: InlineRing<u64, 16> = InlineRing::new();
        let mut head = 0u64;
        let mut tail = 0u64;

        for op in ops {
            match op {
                Op::Reserve { want, commit } => {
                    let free = 16 - (tail - head) as usize;
                    let to_end = 16 - (tail as usize % 16);
                    if let Some(mut grant) = ring.reserve(want) {
                        prop_assert!(grant.len() <= want.min(free).min(to_end));
                        let n = commit.min(grant.len());
                        for i in 0..n {
                            grant.write(i, tail + i as u64);
                        }
                        grant.commit_first(n);
                        tail += n as u64;
                    } else {
                        prop_assert!(want > free);
                    }
                }
                Op::Drain { max } => {
                    let n = ring.consume_up_to(max, |_| {});
                    prop_assert!(n <= (tail - head) as usize);
                    head += n as u64;
                }
            }
            prop_assert!((tail - head) as usize <= 16);
        }
    }

    /// Sweep-order consumption preserves each producer's own order no
    /// matter how sends interleave.
    #[test]
    fn channel_sweep_preserves_per_producer_order(
        sends in prop::collection::vec((0usize..3, 1usize..8), 1..50),
    ) {
        let channel = Channel::<(usize, u64)>::new(Config::new(6, 3, false));
        let producers = [
            channel.register().unwrap(),
            channel.register().unwrap(),
            channel.register().unwrap(),
        ];
        let mut sent = [0u64; 3];

        for (who, burst) in sends {
            for _ in 0..burst {
                if producers[who].push((who, sent[who])) {
                    sent[who] += 1;
                }
            }
        }

        let mut next = [0u64; 3];
        channel.consume_all(|(who, i)| {
            assert_eq!(*i, next[*who]);
            next[*who] += 1;
        });
        prop_assert_eq!(next, sent);
    }
}
