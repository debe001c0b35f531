//! # Diretta Core
//!
//! Realtime-safe foundations for the Diretta renderer workspace:
//! the lock-free wire ring buffer with push-side format transforms,
//! the canonical bit-reversal table, and the protocol cycle calculator.

pub mod bitrev;
pub mod cycle;
pub mod ring;

pub use bitrev::BIT_REVERSE;
pub use cycle::{FRAME_OVERHEAD_BYTES, MAX_CYCLE_US, MIN_CYCLE_US, cycle_us};
pub use ring::WireRing;
