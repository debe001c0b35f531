//! The sync engine: connection lifecycle and control surface.
//!
//! One `SyncEngine` exists per process. `enable` brackets the vendor
//! transport's lifetime, `open`/`close` bracket one logical stream, and a
//! format change performs a narrow reopen that preserves discovery state.
//! Control operations sleep deliberately (settle delays, silence drains,
//! bounded retries) and are only ever called from a control thread; the
//! audio hot paths never wait on them.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use diretta_core::cycle::cycle_us;
use diretta_link::{
    error::LinkError,
    finder::{Finder, Target, select_target},
    format::AudioFormat,
    negotiate::{SinkCaps, negotiate},
    transport::{Transport, TransportOptions},
};

use crate::{
    config::EngineConfig,
    error::{EngineError, OpenStage, Result},
    state::{EngineState, StateCell},
    stream::StreamState,
};

/// Poll interval for bounded waits (silence drains, worker exit, online).
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Locks a mutex, ignoring poisoning: the guarded state stays consistent
/// because every critical section is a plain field update.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn transport_err(e: LinkError) -> EngineError {
    EngineError::Transport(e.to_string())
}

/// Runs `op` up to `attempts` times with `delay` between failures,
/// logging each failed attempt.
fn retry<T, E: fmt::Display>(
    attempts: u32,
    delay: Duration,
    what: &str,
    mut op: impl FnMut() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                warn!("{what} failed (attempt {attempt}/{attempts}): {e}");
                return Err(e);
            }
            Err(e) => {
                warn!("{what} failed (attempt {attempt}/{attempts}): {e}");
                attempt += 1;
                thread::sleep(delay);
            }
        }
    }
}

/// The Diretta sync engine.
///
/// Shared across threads behind an `Arc`; all operations take `&self`.
/// The producer calls [`send_audio`](Self::send_audio), control points
/// drive the lifecycle, and the transport's cycle worker runs the
/// supplier registered at open time.
pub struct SyncEngine {
    config: EngineConfig,
    state: StateCell,
    finder: Mutex<Box<dyn Finder>>,
    transport: Mutex<Box<dyn Transport>>,
    /// Config mutex: guards the current stream snapshot. The cycle
    /// supplier never takes it; it owns an `Arc` captured at open.
    stream: Mutex<Option<Arc<StreamState>>>,
    /// Serializes producer calls.
    push_lock: Mutex<()>,
    target: Mutex<Option<Target>>,
    caps: Mutex<Option<SinkCaps>>,
    last_format: Mutex<Option<AudioFormat>>,
    connected: AtomicBool,
    mtu: AtomicU32,
    cycle_time_us: AtomicU32,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, finder: Box<dyn Finder>, transport: Box<dyn Transport>) -> Self {
        let cycle_time_us = config.cycle_time_us;
        Self {
            config,
            state: StateCell::new(EngineState::Disabled),
            finder: Mutex::new(finder),
            transport: Mutex::new(transport),
            stream: Mutex::new(None),
            push_lock: Mutex::new(()),
            target: Mutex::new(None),
            caps: Mutex::new(None),
            last_format: Mutex::new(None),
            connected: AtomicBool::new(false),
            mtu: AtomicU32::new(0),
            cycle_time_us: AtomicU32::new(cycle_time_us),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state.load()
    }

    /// Underruns counted since the current stream opened.
    pub fn underruns(&self) -> u64 {
        lock(&self.stream).as_ref().map_or(0, |s| s.underruns.load(Ordering::Relaxed))
    }

    /// Current ring occupancy in `[0, 1]`; 0 with no open stream.
    pub fn buffer_level(&self) -> f32 {
        lock(&self.stream).as_ref().map_or(0.0, |s| s.occupancy())
    }

    /// Discovers a target, measures the path MTU, opens the vendor
    /// transport and inquires sink capabilities.
    pub fn enable(&self) -> Result<()> {
        let state = self.state.load();
        if state != EngineState::Disabled {
            return Err(EngineError::InvalidState(state));
        }
        match self.try_enable() {
            Ok(()) => {
                self.state.store(EngineState::Enabled);
                info!("engine enabled");
                Ok(())
            }
            Err(e) => {
                self.state.store(EngineState::Disabled);
                Err(e)
            }
        }
    }

    fn try_enable(&self) -> Result<()> {
        let r = &self.config.retry;
        let index = usize::try_from(self.config.target_index).ok();

        let target = {
            let mut finder = lock(&self.finder);
            let name_filter = self.config.target_name.as_deref();
            retry(
                r.transport_open_attempts,
                Duration::from_millis(r.transport_open_delay_ms),
                "target discovery",
                || {
                    finder.open()?;
                    let targets = finder.list_targets()?;
                    select_target(&targets, name_filter, index).cloned()
                },
            )
            .map_err(|_| EngineError::NoTarget)?
        };
        info!("target {} at {} (product {:#06x})", target.name, target.address, target.product_id);

        let mtu = if self.config.mtu != 0 {
            self.config.mtu
        } else {
            match lock(&self.finder).measure_mtu(target.address) {
                Ok(mtu) if mtu > 0 => mtu,
                _ => {
                    warn!("path MTU probe failed; assuming {}", self.config.mtu_fallback);
                    self.config.mtu_fallback
                }
            }
        };
        self.mtu.store(mtu, Ordering::Relaxed);
        debug!("path MTU {mtu}");

        let opts = self.transport_options();
        let mut transport = lock(&self.transport);
        retry(
            r.transport_open_attempts,
            Duration::from_millis(r.transport_open_delay_ms),
            "transport open",
            || transport.open(&opts),
        )
        .map_err(|e| EngineError::EnableFailed(e.to_string()))?;

        let caps = transport.inquire_sink().map_err(|e| EngineError::EnableFailed(e.to_string()))?;
        drop(transport);

        *lock(&self.caps) = Some(caps);
        *lock(&self.target) = Some(target);
        Ok(())
    }

    /// Opens a stream for `format`.
    ///
    /// Reopening with the unchanged format takes the fast-resume path: the
    /// ring is cleared and playback restarts without touching the sink. A
    /// different format while open performs the full format-change reopen
    /// first.
    pub fn open(&self, format: AudioFormat) -> Result<()> {
        match self.state.load() {
            EngineState::Disabled => Err(EngineError::NotEnabled),
            state if state.is_open() => {
                if *lock(&self.last_format) == Some(format) {
                    self.fast_resume()
                } else {
                    self.reopen_for_format_change(&format)?;
                    self.open_stream(&format, true)
                }
            }
            EngineState::Enabled => self.open_stream(&format, false),
            other => Err(EngineError::InvalidState(other)),
        }
    }

    fn fast_resume(&self) -> Result<()> {
        let Some(stream) = lock(&self.stream).clone() else {
            return Err(EngineError::InvalidState(self.state.load()));
        };
        info!("fast resume: format unchanged, sink kept");
        stream.prefill_complete.store(false, Ordering::Release);
        // Let an in-flight cycle retire before resetting the ring; with
        // prefill cleared the supplier has parked on silence.
        thread::sleep(Duration::from_micros(2 * self.cycle_time_us.load(Ordering::Relaxed) as u64));
        stream.ring.clear();
        stream.stop_requested.store(false, Ordering::Release);
        lock(&self.transport).play().map_err(transport_err)?;
        self.state.store(EngineState::Playing);
        Ok(())
    }

    fn open_stream(&self, format: &AudioFormat, reopen: bool) -> Result<()> {
        self.state.store(EngineState::Opening);
        match self.do_open_stream(format, reopen) {
            Ok(()) => {
                self.state.store(EngineState::Playing);
                Ok(())
            }
            Err(e) => {
                warn!("open failed: {e}");
                self.state.store(EngineState::Enabled);
                Err(e)
            }
        }
    }

    fn do_open_stream(&self, format: &AudioFormat, reopen: bool) -> Result<()> {
        let caps = lock(&self.caps).clone().ok_or(EngineError::NotEnabled)?;
        let (wire, transforms) = negotiate(format, &caps).map_err(|_| EngineError::FormatUnsupported)?;
        info!("negotiated {:?} at {} Hz x{}", wire.kind, wire.sample_rate, wire.channels);

        let mtu = self.mtu.load(Ordering::Relaxed);
        let cycle = if self.config.cycle_time_auto {
            cycle_us(wire.sample_rate, wire.channels as u32, wire.bits_per_sample(), mtu)
        } else {
            self.config.cycle_time_us
        };
        self.cycle_time_us.store(cycle, Ordering::Relaxed);
        debug!("cycle period {cycle} us");

        let stream = Arc::new(StreamState::new(wire, transforms, format, cycle, &self.config.silence));

        // Give the DAC a moment to prepare for the new format.
        let settle = if reopen { self.config.settle_reopen_ms } else { self.config.settle_fresh_ms };
        thread::sleep(Duration::from_millis(settle));

        let target = lock(&self.target).clone().ok_or(EngineError::NotEnabled)?;
        let r = &self.config.retry;
        let (attempts, delay_ms) = if reopen {
            (r.reopen_set_sink_attempts, r.reopen_set_sink_delay_ms)
        } else {
            (r.set_sink_attempts, r.set_sink_delay_ms)
        };

        let mut transport = lock(&self.transport);
        retry(attempts, Duration::from_millis(delay_ms), "sink assignment", || {
            transport.set_sink(target.address, cycle, false, mtu)
        })
        .map_err(|_| EngineError::OpenFailed { stage: OpenStage::SetSink })?;

        let mode = self.config.transfer_mode.resolve(format);
        transport.set_transfer_mode(mode).map_err(transport_err)?;
        debug!("transfer mode {mode:?}");

        let supplier_stream = Arc::clone(&stream);
        transport
            .start_cycles(stream.bytes_per_cycle, Box::new(move |out: &mut [u8]| supplier_stream.fill_cycle(out)))
            .map_err(transport_err)?;

        if !self.connected.load(Ordering::Acquire) {
            transport
                .connect_prepare()
                .map_err(|_| EngineError::OpenFailed { stage: OpenStage::ConnectPrepare })?;
            retry(r.connect_attempts, Duration::from_millis(r.connect_delay_ms), "connect", || {
                transport.connect()
            })
            .map_err(|_| EngineError::OpenFailed { stage: OpenStage::Connect })?;
            if transport.connect_wait().is_err() {
                transport.disconnect(true);
                return Err(EngineError::OpenFailed { stage: OpenStage::ConnectWait });
            }
            self.connected.store(true, Ordering::Release);
        }

        stream.reset_for_start();
        *lock(&self.stream) = Some(Arc::clone(&stream));

        transport.play().map_err(transport_err)?;

        let deadline = Instant::now() + Duration::from_millis(self.config.online_wait_ms);
        while !transport.is_online() {
            if Instant::now() >= deadline {
                warn!("sink not online after {} ms; continuing", self.config.online_wait_ms);
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        drop(transport);

        *lock(&self.last_format) = Some(*format);
        info!("stream open ({} bytes/cycle)", stream.bytes_per_cycle);
        Ok(())
    }

    /// Drains the running stream, tears the transport down, and brings it
    /// back up for a new format. The caller continues with the normal open
    /// sequence.
    fn reopen_for_format_change(&self, new_format: &AudioFormat) -> Result<()> {
        self.state.store(EngineState::Reopening);
        info!("format change: reopening transport");
        let t = &self.config.silence;

        if let Some(stream) = lock(&self.stream).clone() {
            let cycles = if new_format.is_dsd() { t.shutdown_dsd } else { t.shutdown_pcm };
            stream.request_silence(cycles);
            if !self.wait_silence_drained(&stream, t.shutdown_drain_ms) {
                warn!("shutdown silence incomplete after {} ms", t.shutdown_drain_ms);
            }
        }

        let mut transport = lock(&self.transport);
        transport.stop();
        transport.disconnect(true);
        self.connected.store(false, Ordering::Release);
        transport.close();
        *lock(&self.stream) = None;

        thread::sleep(Duration::from_millis(self.config.format_switch_delay_ms));

        let r = &self.config.retry;
        let opts = self.transport_options();
        retry(
            r.rediscover_attempts,
            Duration::from_millis(r.rediscover_delay_ms),
            "transport reopen",
            || transport.open(&opts),
        )
        .map_err(transport_err)?;

        let index = usize::try_from(self.config.target_index).ok();
        let name_filter = self.config.target_name.as_deref();
        let target = retry(
            r.rediscover_attempts,
            Duration::from_millis(r.rediscover_delay_ms),
            "sink rediscovery",
            || {
                let mut finder = lock(&self.finder);
                let targets = finder.list_targets()?;
                select_target(&targets, name_filter, index).cloned()
            },
        )
        .map_err(|_| EngineError::NoTarget)?;
        *lock(&self.target) = Some(target);

        let caps = transport.inquire_sink().map_err(transport_err)?;
        *lock(&self.caps) = Some(caps);
        Ok(())
    }

    /// Drains and closes the current stream, returning to `Enabled`.
    pub fn close(&self) -> Result<()> {
        let state = self.state.load();
        if !state.is_open() {
            return Err(EngineError::InvalidState(state));
        }
        self.state.store(EngineState::Draining);
        let t = &self.config.silence;

        if let Some(stream) = lock(&self.stream).clone() {
            let cycles = if stream.wire.is_dsd() { t.close_dsd } else { t.close_pcm };
            // Arm the abort flag together with the drain request so no
            // buffered audio can slip out after the last silence cycle.
            stream.stop_requested.store(true, Ordering::Release);
            stream.request_silence(cycles);
            if !self.wait_silence_drained(&stream, t.close_drain_ms) {
                warn!("close drain incomplete after {} ms", t.close_drain_ms);
            }
        }

        self.state.store(EngineState::Closing);
        let mut transport = lock(&self.transport);
        transport.stop();
        transport.disconnect(true);
        self.connected.store(false, Ordering::Release);
        if !self.wait_worker_exit(transport.as_ref(), t.worker_exit_ms) {
            warn!("cycle worker still active after {} ms", t.worker_exit_ms);
        }
        drop(transport);

        *lock(&self.stream) = None;
        *lock(&self.last_format) = None;
        self.state.store(EngineState::Enabled);
        info!("stream closed");
        Ok(())
    }

    /// Drains a short silence window and halts the cycle cadence; the ring
    /// keeps its audio for `resume`.
    pub fn pause(&self) -> Result<()> {
        let state = self.state.load();
        if state != EngineState::Playing {
            return Err(EngineError::InvalidState(state));
        }
        let t = &self.config.silence;
        if let Some(stream) = lock(&self.stream).clone() {
            let cycles = if stream.wire.is_dsd() { t.pause_dsd } else { t.pause_pcm };
            stream.request_silence(cycles);
            self.wait_silence_drained(&stream, t.pause_drain_ms);
        }
        lock(&self.transport).stop();
        self.state.store(EngineState::Paused);
        info!("paused");
        Ok(())
    }

    /// Restarts the cycle cadence; the ring still holds audio, so there is
    /// no prefill.
    pub fn resume(&self) -> Result<()> {
        let state = self.state.load();
        if state != EngineState::Paused {
            return Err(EngineError::InvalidState(state));
        }
        lock(&self.transport).play().map_err(transport_err)?;
        self.state.store(EngineState::Playing);
        info!("resumed");
        Ok(())
    }

    /// Tears everything down. Idempotent and callable from any state.
    pub fn disable(&self) {
        let state = self.state.load();
        if state == EngineState::Disabled {
            return;
        }
        if state.is_open() {
            let _ = self.close();
        }
        let mut transport = lock(&self.transport);
        transport.stop();
        transport.disconnect(true);
        transport.close();
        drop(transport);
        self.connected.store(false, Ordering::Release);
        *lock(&self.stream) = None;
        *lock(&self.last_format) = None;
        self.state.store(EngineState::Disabled);
        info!("engine disabled");
    }

    /// Producer entry point: pushes decoded input bytes through the
    /// latched transforms into the wire ring.
    ///
    /// Returns the number of input bytes accepted; `0` means the ring is
    /// full (retry later with the same bytes) or no stream is open. Safe
    /// to call from any thread; concurrent producers serialize on the push
    /// mutex, which is never held across I/O.
    pub fn send_audio(&self, bytes: &[u8]) -> usize {
        let _push = lock(&self.push_lock);
        if !self.state.load().is_open() {
            return 0;
        }
        let Some(stream) = lock(&self.stream).clone() else {
            return 0;
        };
        if stream.stop_requested.load(Ordering::Acquire) {
            return 0;
        }
        stream.push_audio(bytes)
    }

    fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            name: self.config.name.clone(),
            thread_mode: self.config.thread_mode,
            cycle_time_us: self.config.cycle_time_us,
            ms_timing: true,
        }
    }

    fn wait_silence_drained(&self, stream: &StreamState, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while stream.silence_remaining.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        true
    }

    fn wait_worker_exit(&self, transport: &dyn Transport, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while transport.is_worker_active() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use diretta_link::loopback::{LoopbackFinder, LoopbackTransport, local_target};

    use super::*;

    fn quick_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.thread_mode = diretta_link::transport::ThreadMode::Manual;
        cfg.settle_fresh_ms = 0;
        cfg.settle_reopen_ms = 0;
        cfg.format_switch_delay_ms = 0;
        cfg.online_wait_ms = 20;
        cfg.retry.transport_open_delay_ms = 1;
        cfg.retry.set_sink_delay_ms = 1;
        cfg.retry.connect_delay_ms = 1;
        cfg.retry.rediscover_delay_ms = 1;
        cfg.silence.shutdown_drain_ms = 10;
        cfg.silence.close_drain_ms = 10;
        cfg.silence.pause_drain_ms = 10;
        cfg.silence.worker_exit_ms = 10;
        cfg
    }

    #[test]
    fn test_open_requires_enable() {
        let engine = SyncEngine::new(
            quick_config(),
            Box::new(LoopbackFinder::new(vec![local_target("DAC")])),
            Box::new(LoopbackTransport::new()),
        );
        assert_eq!(engine.open(AudioFormat::pcm(44_100, 16, 2)), Err(EngineError::NotEnabled));
        assert_eq!(engine.send_audio(&[0u8; 16]), 0);
        assert_eq!(engine.buffer_level(), 0.0);
    }

    #[test]
    fn test_enable_twice_is_invalid() {
        let engine = SyncEngine::new(
            quick_config(),
            Box::new(LoopbackFinder::new(vec![local_target("DAC")])),
            Box::new(LoopbackTransport::new()),
        );
        engine.enable().unwrap();
        assert_eq!(engine.enable(), Err(EngineError::InvalidState(EngineState::Enabled)));
    }

    #[test]
    fn test_set_sink_budget_exhaustion() {
        let mut transport = LoopbackTransport::new();
        transport.inject_set_sink_failures(u32::MAX);
        let mut cfg = quick_config();
        cfg.retry.set_sink_attempts = 2;
        let engine = SyncEngine::new(
            cfg,
            Box::new(LoopbackFinder::new(vec![local_target("DAC")])),
            Box::new(transport),
        );
        engine.enable().unwrap();
        assert_eq!(
            engine.open(AudioFormat::pcm(44_100, 16, 2)),
            Err(EngineError::OpenFailed { stage: OpenStage::SetSink })
        );
        assert_eq!(engine.state(), EngineState::Enabled);
    }

    #[test]
    fn test_disable_is_idempotent() {
        let engine = SyncEngine::new(
            quick_config(),
            Box::new(LoopbackFinder::new(vec![local_target("DAC")])),
            Box::new(LoopbackTransport::new()),
        );
        engine.disable();
        engine.enable().unwrap();
        engine.disable();
        engine.disable();
        assert_eq!(engine.state(), EngineState::Disabled);
    }
}
