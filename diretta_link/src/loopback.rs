//! In-process transport and finder.
//!
//! Implements the [`Transport`](crate::transport::Transport) and
//! [`Finder`](crate::finder::Finder) seams without a network or vendor
//! SDK: frames produced by the cycle supplier are captured in memory, sink
//! capabilities and discovery results are configurable, and control
//! primitives can be made to fail a set number of times. The engine's
//! integration tests and the sandbox binary run against this pair.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::debug;

use crate::{
    error::{LinkError, Result},
    finder::{Finder, Target},
    negotiate::SinkCaps,
    transport::{CycleSupplier, ThreadMode, Transport, TransportOptions},
};

/// A plausible local target for tests and demos.
pub fn local_target(name: &str) -> Target {
    Target {
        address: "192.168.7.20:4804".parse().expect("static address"),
        name: name.to_string(),
        product_id: 0x0d17,
    }
}

struct SupplierSlot {
    frame: Vec<u8>,
    supplier: CycleSupplier,
}

struct LoopbackShared {
    supplier: Mutex<Option<SupplierSlot>>,
    captured: Mutex<Vec<u8>>,
    opened: AtomicBool,
    sink_set: AtomicBool,
    connected: AtomicBool,
    playing: AtomicBool,
    online: AtomicBool,
    shutdown: AtomicBool,
    cycle_time_us: AtomicU32,
    cycles: AtomicU64,
    open_calls: AtomicU32,
    set_sink_calls: AtomicU32,
    connect_calls: AtomicU32,
    play_calls: AtomicU32,
}

impl LoopbackShared {
    fn new() -> Self {
        Self {
            supplier: Mutex::new(None),
            captured: Mutex::new(Vec::new()),
            opened: AtomicBool::new(false),
            sink_set: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            online: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            cycle_time_us: AtomicU32::new(1_000),
            cycles: AtomicU64::new(0),
            open_calls: AtomicU32::new(0),
            set_sink_calls: AtomicU32::new(0),
            connect_calls: AtomicU32::new(0),
            play_calls: AtomicU32::new(0),
        }
    }

    /// Runs one protocol cycle if playback is active. Returns whether a
    /// frame was produced.
    fn run_cycle(&self) -> bool {
        if !self.playing.load(Ordering::Acquire) {
            return false;
        }
        let mut slot = self.supplier.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = slot.as_mut() else {
            return false;
        };
        slot.frame.fill(0);
        (slot.supplier)(&mut slot.frame);
        self.captured.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(&slot.frame);
        self.cycles.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Observer handle for a [`LoopbackTransport`], valid after the transport
/// has been handed to the engine.
#[derive(Clone)]
pub struct LoopbackProbe {
    shared: Arc<LoopbackShared>,
}

impl LoopbackProbe {
    /// Drives up to `n` cycles synchronously; returns how many ran.
    /// Cycles only run while playback is active.
    pub fn pump(&self, n: u64) -> u64 {
        let mut ran = 0;
        for _ in 0..n {
            if !self.shared.run_cycle() {
                break;
            }
            ran += 1;
        }
        ran
    }

    /// All wire bytes delivered so far.
    pub fn captured(&self) -> Vec<u8> {
        self.shared.captured.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Takes and clears the captured wire bytes.
    pub fn take_captured(&self) -> Vec<u8> {
        std::mem::take(&mut *self.shared.captured.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn cycle_count(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    pub fn open_calls(&self) -> u32 {
        self.shared.open_calls.load(Ordering::Relaxed)
    }

    pub fn set_sink_calls(&self) -> u32 {
        self.shared.set_sink_calls.load(Ordering::Relaxed)
    }

    pub fn connect_calls(&self) -> u32 {
        self.shared.connect_calls.load(Ordering::Relaxed)
    }

    pub fn play_calls(&self) -> u32 {
        self.shared.play_calls.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }
}

/// In-process [`Transport`] capturing every wire frame.
pub struct LoopbackTransport {
    shared: Arc<LoopbackShared>,
    caps: SinkCaps,
    thread_mode: ThreadMode,
    report_online: bool,
    fail_set_sink: u32,
    fail_connect: u32,
    worker: Option<JoinHandle<()>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::with_caps(SinkCaps::default())
    }

    pub fn with_caps(caps: SinkCaps) -> Self {
        Self {
            shared: Arc::new(LoopbackShared::new()),
            caps,
            thread_mode: ThreadMode::Dedicated,
            report_online: true,
            fail_set_sink: 0,
            fail_connect: 0,
            worker: None,
        }
    }

    /// Observer handle that stays valid after the transport moves into
    /// the engine.
    pub fn probe(&self) -> LoopbackProbe {
        LoopbackProbe { shared: Arc::clone(&self.shared) }
    }

    /// Makes the next `n` `set_sink` calls fail.
    pub fn inject_set_sink_failures(&mut self, n: u32) {
        self.fail_set_sink = n;
    }

    /// Makes the next `n` `connect` calls fail.
    pub fn inject_connect_failures(&mut self, n: u32) {
        self.fail_connect = n;
    }

    /// Never report the stream online, exercising the online-wait path.
    pub fn suppress_online(&mut self) {
        self.report_online = false;
    }

    fn spawn_worker(&mut self) {
        if self.worker.is_some() || self.thread_mode != ThreadMode::Dedicated {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.worker = Some(thread::spawn(move || {
            while !shared.shutdown.load(Ordering::Acquire) {
                if shared.run_cycle() {
                    let period = shared.cycle_time_us.load(Ordering::Relaxed);
                    thread::sleep(Duration::from_micros(period as u64));
                } else {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }));
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self, opts: &TransportOptions) -> Result<()> {
        self.thread_mode = opts.thread_mode;
        self.shared.cycle_time_us.store(opts.cycle_time_us.max(1), Ordering::Relaxed);
        self.shared.shutdown.store(false, Ordering::Release);
        self.shared.opened.store(true, Ordering::Release);
        self.shared.open_calls.fetch_add(1, Ordering::Relaxed);
        self.spawn_worker();
        debug!("loopback transport open as {:?} ({:?})", opts.name, opts.thread_mode);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.online.store(false, Ordering::Release);
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // Drop the supplier so nothing from the closed session survives.
        *self.shared.supplier.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.shared.sink_set.store(false, Ordering::Release);
        self.shared.opened.store(false, Ordering::Release);
    }

    fn set_sink(&mut self, address: SocketAddr, cycle_time_us: u32, _loopback: bool, mtu: u32) -> Result<()> {
        if !self.shared.opened.load(Ordering::Acquire) {
            return Err(LinkError::TransportClosed);
        }
        if self.fail_set_sink > 0 {
            self.fail_set_sink -= 1;
            return Err(LinkError::SinkRejected);
        }
        self.shared.cycle_time_us.store(cycle_time_us.max(1), Ordering::Relaxed);
        self.shared.sink_set.store(true, Ordering::Release);
        self.shared.set_sink_calls.fetch_add(1, Ordering::Relaxed);
        debug!("loopback sink {address} assigned, cycle {cycle_time_us} us, mtu {mtu}");
        Ok(())
    }

    fn inquire_sink(&mut self) -> Result<SinkCaps> {
        if !self.shared.opened.load(Ordering::Acquire) {
            return Err(LinkError::TransportClosed);
        }
        Ok(self.caps.clone())
    }

    fn set_transfer_mode(&mut self, _mode: crate::transport::TransferMode) -> Result<()> {
        Ok(())
    }

    fn start_cycles(&mut self, bytes_per_cycle: usize, supplier: CycleSupplier) -> Result<()> {
        if !self.shared.opened.load(Ordering::Acquire) {
            return Err(LinkError::TransportClosed);
        }
        let slot = SupplierSlot { frame: vec![0; bytes_per_cycle], supplier };
        *self.shared.supplier.lock().unwrap_or_else(|e| e.into_inner()) = Some(slot);
        Ok(())
    }

    fn connect_prepare(&mut self) -> Result<()> {
        if !self.shared.sink_set.load(Ordering::Acquire) {
            return Err(LinkError::SinkRejected);
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        if self.fail_connect > 0 {
            self.fail_connect -= 1;
            return Err(LinkError::SinkRejected);
        }
        self.shared.connected.store(true, Ordering::Release);
        self.shared.connect_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn connect_wait(&mut self) -> Result<()> {
        if self.shared.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(LinkError::Timeout)
        }
    }

    fn play(&mut self) -> Result<()> {
        if !self.shared.opened.load(Ordering::Acquire) {
            return Err(LinkError::TransportClosed);
        }
        self.shared.playing.store(true, Ordering::Release);
        self.shared.play_calls.fetch_add(1, Ordering::Relaxed);
        if self.report_online {
            self.shared.online.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.online.store(false, Ordering::Release);
    }

    fn disconnect(&mut self, _wait: bool) {
        self.shared.connected.store(false, Ordering::Release);
        self.shared.online.store(false, Ordering::Release);
    }

    fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::Acquire)
    }

    fn is_worker_active(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire) && !self.shared.shutdown.load(Ordering::Acquire)
    }
}

/// In-process [`Finder`] with a configurable target list.
pub struct LoopbackFinder {
    targets: Vec<Target>,
    mtu: u32,
    fail_opens: u32,
    list_calls: Arc<AtomicU32>,
}

impl LoopbackFinder {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets, mtu: 1_500, fail_opens: 0, list_calls: Arc::new(AtomicU32::new(0)) }
    }

    /// A finder that discovers nothing.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Makes the next `n` `open` calls fail.
    pub fn inject_open_failures(&mut self, n: u32) {
        self.fail_opens = n;
    }

    /// Counter of `list_targets` calls, observable after the finder moves
    /// into the engine.
    pub fn list_call_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.list_calls)
    }
}

impl Finder for LoopbackFinder {
    fn open(&mut self) -> Result<()> {
        if self.fail_opens > 0 {
            self.fail_opens -= 1;
            return Err(LinkError::FinderOpenFailed);
        }
        Ok(())
    }

    fn list_targets(&mut self) -> Result<Vec<Target>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.targets.clone())
    }

    fn measure_mtu(&mut self, _address: SocketAddr) -> Result<u32> {
        if self.mtu == 0 {
            return Err(LinkError::Timeout);
        }
        Ok(self.mtu)
    }
}
