//! Engine connection states.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of the sync engine.
///
/// ```text
/// Disabled → Enabled → Opening → Playing ⇄ Paused
///                         ↑          │
///                     Reopening ←────┤ (format change)
///                         Draining → Closing → Enabled
/// any → Disabled (teardown)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Disabled = 0,
    Enabled = 1,
    Opening = 2,
    Playing = 3,
    Paused = 4,
    Reopening = 5,
    Draining = 6,
    Closing = 7,
}

impl EngineState {
    /// Whether a stream is open (playing or paused).
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, EngineState::Playing | EngineState::Paused)
    }
}

/// Atomic cell holding an [`EngineState`], shared between control threads
/// and observers.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: EngineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> EngineState {
        match self.0.load(Ordering::Acquire) {
            1 => EngineState::Enabled,
            2 => EngineState::Opening,
            3 => EngineState::Playing,
            4 => EngineState::Paused,
            5 => EngineState::Reopening,
            6 => EngineState::Draining,
            7 => EngineState::Closing,
            _ => EngineState::Disabled,
        }
    }

    pub(crate) fn store(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_states() {
        let cell = StateCell::new(EngineState::Disabled);
        for state in [
            EngineState::Disabled,
            EngineState::Enabled,
            EngineState::Opening,
            EngineState::Playing,
            EngineState::Paused,
            EngineState::Reopening,
            EngineState::Draining,
            EngineState::Closing,
        ] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn test_open_states() {
        assert!(EngineState::Playing.is_open());
        assert!(EngineState::Paused.is_open());
        assert!(!EngineState::Enabled.is_open());
        assert!(!EngineState::Draining.is_open());
    }
}
