//! # Diretta Link
//!
//! The sink-facing model of the renderer: audio and wire format
//! descriptions, sink capability negotiation, target discovery, and the
//! trait seam behind which the cycle-synchronous transport lives.
//!
//! The transport itself is a vendor concern; this crate specifies its
//! surface ([`transport::Transport`]) and ships an in-process loopback
//! implementation ([`loopback`]) used by the test suites and the sandbox.

pub mod error;
pub mod finder;
pub mod format;
pub mod loopback;
pub mod negotiate;
pub mod transport;

pub use error::{LinkError, Result};
pub use finder::{Finder, Target, select_target};
pub use format::{AudioFormat, BitOrder, DsdSubformat, Endianness, SampleKind, TransformSet, WireFormat, WireKind};
pub use negotiate::{SinkCaps, negotiate};
pub use transport::{CycleSupplier, ThreadMode, TransferMode, Transport, TransportOptions};
