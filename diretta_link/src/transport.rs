//! The cycle-synchronous transport seam.
//!
//! The vendor library owns the cadence: once a sink is assigned and
//! playback starts, it calls the registered cycle supplier exactly once
//! per protocol cycle and expects one fixed-size wire frame back. This
//! module defines the surface the engine drives; implementations live
//! behind it ([`crate::loopback`] in-process, the vendor SDK in
//! deployment).

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{error::Result, format::AudioFormat, negotiate::SinkCaps};

/// Vendor thread model selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    /// The transport drives cycles from its own dedicated worker thread.
    #[default]
    Dedicated,
    /// Cycles are driven by the embedding application (tests, tooling).
    Manual,
}

/// Frame transfer pacing mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Resolve per stream: conservative pacing for low-bitrate PCM and
    /// DSD, maximum-rate variable pacing otherwise.
    #[default]
    Auto,
    FixAuto,
    VarAuto,
    VarMax,
}

impl TransferMode {
    /// Resolves `Auto` against the stream being opened; explicit modes
    /// pass through.
    pub fn resolve(self, format: &AudioFormat) -> TransferMode {
        match self {
            TransferMode::Auto => {
                if format.is_dsd() || format.is_low_bitrate_pcm() {
                    TransferMode::VarAuto
                } else {
                    TransferMode::VarMax
                }
            }
            explicit => explicit,
        }
    }
}

/// Options handed to [`Transport::open`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Friendly identifier presented to the peer.
    pub name: String,
    pub thread_mode: ThreadMode,
    /// Cycle period hint for the worker; the per-sink period is set later
    /// via [`Transport::set_sink`].
    pub cycle_time_us: u32,
    /// Millisecond-granular timing mode of the vendor scheduler.
    pub ms_timing: bool,
}

/// The per-cycle frame supplier.
///
/// Invoked from the transport's cycle worker with the frame to fill. The
/// return value signals whether more audio can follow; after a shutdown
/// drain the supplier returns `false` and the transport may stop calling.
/// Implementations must not block or allocate.
pub type CycleSupplier = Box<dyn FnMut(&mut [u8]) -> bool + Send>;

/// Control surface of the cycle-synchronous transport.
///
/// Call sequence for one session: `open` → `set_sink` →
/// `set_transfer_mode` → `start_cycles` → `connect_prepare` → `connect` →
/// `connect_wait` → `play`; then `stop` → `disconnect` → `close` to tear
/// down. All methods are control-plane and may sleep; none are called
/// from the cycle worker.
pub trait Transport: Send {
    fn open(&mut self, opts: &TransportOptions) -> Result<()>;

    /// Closes the transport and joins the cycle worker.
    fn close(&mut self);

    /// Assigns the sink this transport streams to, with the negotiated
    /// cycle period and the measured path MTU.
    fn set_sink(&mut self, address: SocketAddr, cycle_time_us: u32, loopback: bool, mtu: u32) -> Result<()>;

    /// Queries the wire formats the assigned sink advertises.
    fn inquire_sink(&mut self) -> Result<SinkCaps>;

    fn set_transfer_mode(&mut self, mode: TransferMode) -> Result<()>;

    /// Registers the cycle supplier and the wire frame size it must fill.
    /// Replaces any previously registered supplier.
    fn start_cycles(&mut self, bytes_per_cycle: usize, supplier: CycleSupplier) -> Result<()>;

    fn connect_prepare(&mut self) -> Result<()>;

    fn connect(&mut self) -> Result<()>;

    fn connect_wait(&mut self) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn disconnect(&mut self, wait: bool);

    /// Whether the sink currently reports the stream online.
    fn is_online(&self) -> bool;

    /// Whether the cycle worker is actively supplying frames.
    fn is_worker_active(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DsdSubformat;

    #[test]
    fn test_auto_resolution() {
        let cd = AudioFormat::pcm(44_100, 16, 2);
        let hires = AudioFormat::pcm(192_000, 24, 2);
        let dsd = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dsf);

        assert_eq!(TransferMode::Auto.resolve(&cd), TransferMode::VarAuto);
        assert_eq!(TransferMode::Auto.resolve(&dsd), TransferMode::VarAuto);
        assert_eq!(TransferMode::Auto.resolve(&hires), TransferMode::VarMax);
    }

    #[test]
    fn test_explicit_mode_overrides() {
        let dsd = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dsf);
        assert_eq!(TransferMode::FixAuto.resolve(&dsd), TransferMode::FixAuto);
        assert_eq!(TransferMode::VarMax.resolve(&dsd), TransferMode::VarMax);
    }
}
