//! Lock-free ring-decomposed MPSC channel.
//!
//! Every registered producer gets a private bounded SPSC ring; one consumer
//! sweeps the rings and drains them in batches. Producers never contend
//! with each other, and each ring's producer/consumer pair synchronises
//! with exactly two release/acquire index pairs. Items are written in place
//! through a reserve/commit window and read in place during the drain, so
//! the fast path moves no bytes it does not have to.
//!
//! Two families with the same protocol:
//!
//! - [`Ring`]/[`Channel`]: capacity and producer count from a runtime
//!   [`Config`], buffers allocated once at construction;
//! - [`InlineRing`]/[`InlineChannel`]: const-generic capacity, buffers
//!   embedded in the object, const-constructible for `static` use.
//!
//! Ordering guarantees: strict FIFO per producer, none across producers.
//! Full rings and empty sweeps are steady-state conditions handled with the
//! adaptive [`Backoff`], not errors.
//!
//! # Example
//!
//! ```
//! use ringfan::{Channel, Config};
//! use std::thread;
//!
//! let channel = Channel::<u64>::new(Config::default());
//!
//! let producer = channel.register().unwrap();
//! let writer = thread::spawn(move || {
//!     // Zero-copy path: reserve a window, fill it, publish once.
//!     let mut remaining = 1000u64;
//!     while remaining > 0 {
//!         if let Some(mut grant) = producer.reserve(remaining as usize) {
//!             let n = grant.len();
//!             for (i, slot) in grant.as_mut_slice().iter_mut().enumerate() {
//!                 slot.write(1000 - remaining + i as u64);
//!             }
//!             grant.commit();
//!             remaining -= n as u64;
//!         }
//!     }
//! });
//!
//! let mut received = 0;
//! while received < 1000 {
//!     received += channel.consume_all(|_item: &u64| {});
//! }
//! writer.join().unwrap();
//! ```

mod backoff;
mod channel;
mod config;
mod inline_channel;
mod inline_ring;
mod invariants;
mod metrics;
mod reservation;
mod ring;

pub use backoff::Backoff;
pub use channel::{Channel, ChannelError, Producer};
pub use config::{Config, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG};
pub use inline_channel::{InlineChannel, InlineProducer};
pub use inline_ring::InlineRing;
pub use metrics::{Metrics, MetricsSnapshot};
pub use reservation::Reservation;
pub use ring::Ring;
