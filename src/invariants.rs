//! Debug-only checks for the index protocol.
//!
//! Active in debug builds, fully compiled out in release. Each macro states
//! one condition the sequence counters must satisfy at the point of use.

/// Occupancy never exceeds capacity: `tail - head <= capacity`.
///
/// Checked when a commit is about to advance `tail`.
macro_rules! debug_assert_occupancy {
    ($occupied:expr, $capacity:expr) => {
        debug_assert!(
            $occupied <= $capacity,
            "ring overfilled: {} items in a {}-slot ring",
            $occupied,
            $capacity
        )
    };
}

/// Sequence counters only move forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

/// The consumer never advances past the producer: `head <= tail`.
macro_rules! debug_assert_head_le_tail {
    ($head:expr, $tail:expr) => {
        debug_assert!(
            $head <= $tail,
            "head {} advanced past tail {}",
            $head,
            $tail
        )
    };
}

/// Reads happen only inside the initialised window `[head, tail)`.
macro_rules! debug_assert_in_window {
    ($seq:expr, $head:expr, $tail:expr) => {
        debug_assert!(
            $seq >= $head && $seq < $tail,
            "read at seq {} outside initialised window [{}, {})",
            $seq,
            $head,
            $tail
        )
    };
}

pub(crate) use debug_assert_head_le_tail;
pub(crate) use debug_assert_in_window;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_occupancy;
