//! # Diretta Engine
//!
//! The sync engine of the renderer: once a playback format is known and a
//! target DAC has been discovered, this crate negotiates a wire format,
//! marshals the decoded sample stream through the lock-free wire ring, and
//! supplies the transport's protocol cycles with exactly one wire frame
//! each, orchestrating open, close, format-change and drain sequences so
//! the DAC never sees malformed or truncated audio.

pub mod config;
pub mod engine;
pub mod error;
pub mod state;
mod stream;

pub use config::{EngineConfig, RetryTuning, SilenceTuning};
pub use engine::SyncEngine;
pub use error::{EngineError, OpenStage, Result};
pub use state::EngineState;
