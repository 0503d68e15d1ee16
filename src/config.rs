/// Sizing knobs shared by [`Ring`](crate::Ring) and [`Channel`](crate::Channel).
///
/// Capacity is always a power of two so slot lookup is a mask, not a modulo.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Per-ring capacity exponent: each ring holds `2^ring_bits` slots.
    pub ring_bits: u8,
    /// Number of producer slots (one dedicated ring each).
    pub max_producers: usize,
    /// Collect per-ring counters. Off by default; adds two relaxed
    /// atomic increments per committed or drained batch.
    pub enable_metrics: bool,
}

impl Config {
    /// Builds a configuration, validating the bounds at compile time when
    /// used in const context.
    ///
    /// # Panics
    ///
    /// Panics if `ring_bits` is 0 or above 20 (1M slots), or if
    /// `max_producers` is 0 or above 128.
    pub const fn new(ring_bits: u8, max_producers: usize, enable_metrics: bool) -> Self {
        assert!(
            ring_bits >= 1 && ring_bits <= 20,
            "ring_bits must be in 1..=20"
        );
        assert!(
            max_producers >= 1 && max_producers <= 128,
            "max_producers must be in 1..=128"
        );
        Self {
            ring_bits,
            max_producers,
            enable_metrics,
        }
    }

    /// Slots per ring.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.ring_bits
    }

    /// Wrap mask, `capacity - 1`.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for Config {
    /// 64K slots per ring, 16 producers, metrics off.
    fn default() -> Self {
        Self {
            ring_bits: 16,
            max_producers: 16,
            enable_metrics: false,
        }
    }
}

/// 4K slots per ring. Small enough to stay L1-resident for word-sized items.
pub const LOW_LATENCY_CONFIG: Config = Config::new(12, 16, false);

/// 256K slots per ring, 32 producer slots. Trades cache residency for
/// tolerance to consumer stalls.
pub const HIGH_THROUGHPUT_CONFIG: Config = Config::new(18, 32, false);
