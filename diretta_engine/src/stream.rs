//! Per-open stream state and the cycle supply policy.
//!
//! A `StreamState` is rebuilt at every `open` and shared three ways: the
//! engine keeps it under the config mutex, the producer path reaches it
//! through a brief snapshot, and the cycle supplier closure owns its own
//! `Arc` so it never touches an engine lock while audio is flowing.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use log::debug;

use diretta_core::ring::WireRing;
use diretta_link::format::{AudioFormat, TransformSet, WireFormat};

use crate::config::SilenceTuning;

pub(crate) struct StreamState {
    pub(crate) ring: WireRing,
    pub(crate) wire: WireFormat,
    pub(crate) transforms: TransformSet,
    pub(crate) bytes_per_cycle: usize,
    pub(crate) prefill_target: usize,
    post_online_buffers: u32,

    pub(crate) prefill_complete: AtomicBool,
    pub(crate) post_online_done: AtomicBool,
    pub(crate) stabilization_count: AtomicU32,
    pub(crate) silence_remaining: AtomicI32,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) underruns: AtomicU64,
}

impl StreamState {
    pub(crate) fn new(
        wire: WireFormat,
        transforms: TransformSet,
        format: &AudioFormat,
        cycle_us: u32,
        tuning: &SilenceTuning,
    ) -> Self {
        let capacity = wire.ring_capacity();
        let bytes_per_cycle = wire.bytes_per_cycle(cycle_us);
        let prefill_target =
            ((wire.bytes_per_second() as f64 * format.prefill_fraction()) as usize).min(capacity / 4);
        Self {
            ring: WireRing::new(capacity, wire.silence_byte()),
            wire,
            transforms,
            bytes_per_cycle,
            prefill_target,
            post_online_buffers: tuning.post_online_buffers,
            prefill_complete: AtomicBool::new(false),
            post_online_done: AtomicBool::new(tuning.post_online_buffers == 0),
            stabilization_count: AtomicU32::new(0),
            silence_remaining: AtomicI32::new(0),
            stop_requested: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        }
    }

    /// Resets the per-open counters and drops any buffered bytes. Called
    /// from the control thread before playback starts (or restarts).
    pub(crate) fn reset_for_start(&self) {
        self.prefill_complete.store(false, Ordering::Release);
        self.post_online_done.store(self.post_online_buffers == 0, Ordering::Release);
        self.stabilization_count.store(0, Ordering::Release);
        self.silence_remaining.store(0, Ordering::Release);
        self.stop_requested.store(false, Ordering::Release);
        self.ring.clear();
    }

    /// Requests `cycles` fully-silent frames before anything else is
    /// supplied.
    pub(crate) fn request_silence(&self, cycles: u32) {
        self.silence_remaining.store(cycles as i32, Ordering::Release);
    }

    /// Current ring occupancy in `[0, 1]`.
    pub(crate) fn occupancy(&self) -> f32 {
        self.ring.available() as f32 / self.ring.capacity() as f32
    }

    /// Producer path: applies the latched transforms and accounts for
    /// prefill. Returns input bytes accepted.
    pub(crate) fn push_audio(&self, bytes: &[u8]) -> usize {
        let accepted = if self.transforms.dsd_planar_interleave {
            self.ring.push_dsd_planar(
                bytes,
                self.wire.channels as usize,
                self.transforms.dsd_bit_reverse,
                self.transforms.dsd_byte_swap,
            )
        } else if self.transforms.widen16_to_32 {
            // The widening push reports samples; the producer contract is
            // input bytes.
            self.ring.push_16_to_32(bytes) * 2
        } else if self.transforms.pack24_in_32 {
            self.ring.push_24_packed(bytes)
        } else {
            self.ring.push(bytes)
        };

        if accepted > 0
            && !self.prefill_complete.load(Ordering::Relaxed)
            && self.ring.available() >= self.prefill_target
        {
            self.prefill_complete.store(true, Ordering::Release);
            debug!("prefill complete at {} wire bytes", self.ring.available());
        }
        accepted
    }

    /// Consumer path, invoked by the transport once per protocol cycle.
    ///
    /// Fills `out` with exactly one wire frame. Silence is supplied while
    /// a drain is pending, a stop was requested, prefill has not finished,
    /// or the post-online stabilization window is still running; a starved
    /// ring yields a silence frame and counts an underrun. Returns `false`
    /// only once a requested stop has fully drained.
    pub(crate) fn fill_cycle(&self, out: &mut [u8]) -> bool {
        let silence = self.wire.silence_byte();

        let pending = self.silence_remaining.load(Ordering::Acquire);
        if pending > 0 {
            out.fill(silence);
            self.silence_remaining.store(pending - 1, Ordering::Release);
            return true;
        }

        if self.stop_requested.load(Ordering::Acquire) {
            out.fill(silence);
            return false;
        }

        if !self.prefill_complete.load(Ordering::Acquire) {
            out.fill(silence);
            return true;
        }

        if !self.post_online_done.load(Ordering::Acquire) {
            out.fill(silence);
            let count = self.stabilization_count.fetch_add(1, Ordering::AcqRel) + 1;
            if count >= self.post_online_buffers {
                self.post_online_done.store(true, Ordering::Release);
            }
            return true;
        }

        if self.ring.available() < out.len() {
            out.fill(silence);
            let total = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("cycle underrun #{total}: {} of {} bytes buffered", self.ring.available(), out.len());
            return true;
        }

        let popped = self.ring.pop(out);
        debug_assert_eq!(popped, out.len());
        true
    }
}

#[cfg(test)]
mod tests {
    use diretta_link::format::{DsdSubformat, WireKind};

    use super::*;

    fn pcm_stream(post_online: u32) -> StreamState {
        let format = AudioFormat::pcm(44_100, 16, 2);
        let wire = WireFormat { kind: WireKind::Pcm { bits: 32 }, sample_rate: 44_100, channels: 2 };
        let transforms = TransformSet { widen16_to_32: true, ..TransformSet::default() };
        let tuning = SilenceTuning { post_online_buffers: post_online, ..SilenceTuning::default() };
        StreamState::new(wire, transforms, &format, 1_000, &tuning)
    }

    #[test]
    fn test_prefill_target_is_capped_at_quarter_capacity() {
        // Low-bitrate PCM asks for 0.75 s but the cap is capacity / 4,
        // which is half a second of a two-second ring.
        let stream = pcm_stream(50);
        assert_eq!(stream.ring.capacity(), 705_600);
        assert_eq!(stream.prefill_target, 176_400);
    }

    #[test]
    fn test_dsd_prefill_target() {
        let format = AudioFormat::dsd(2_822_400, 2, DsdSubformat::Dsf);
        let wire = WireFormat {
            kind: WireKind::Dsd { bit_order: diretta_link::format::BitOrder::Lsb, endianness: diretta_link::format::Endianness::Big },
            sample_rate: 2_822_400,
            channels: 2,
        };
        let transforms = TransformSet { dsd_planar_interleave: true, ..TransformSet::default() };
        let stream = StreamState::new(wire, transforms, &format, 1_000, &SilenceTuning::default());
        // A quarter of one second, which equals capacity / 4 exactly.
        assert_eq!(stream.prefill_target, 176_400);
    }

    #[test]
    fn test_supply_policy_order() {
        let stream = pcm_stream(2);
        let mut frame = vec![0xFFu8; stream.bytes_per_cycle];

        // Before prefill: silence.
        assert!(stream.fill_cycle(&mut frame));
        assert!(frame.iter().all(|&b| b == 0x00));

        // Complete prefill with real audio.
        let chunk = vec![0x11u8; 4096];
        let mut pushed = 0;
        while !stream.prefill_complete.load(Ordering::Relaxed) {
            pushed += stream.push_audio(&chunk);
            assert!(pushed <= stream.ring.capacity());
        }

        // Two stabilization cycles of silence, then audio.
        assert!(stream.fill_cycle(&mut frame));
        assert!(frame.iter().all(|&b| b == 0x00));
        assert!(stream.fill_cycle(&mut frame));
        assert!(frame.iter().all(|&b| b == 0x00));
        assert!(stream.fill_cycle(&mut frame));
        // Widened 0x1111 samples: every second half-word carries 0x11.
        assert!(frame.chunks_exact(4).all(|w| w == [0x00, 0x00, 0x11, 0x11]));
    }

    #[test]
    fn test_requested_silence_preempts_audio() {
        let stream = pcm_stream(0);
        let chunk = vec![0x22u8; 4096];
        while !stream.prefill_complete.load(Ordering::Relaxed) {
            stream.push_audio(&chunk);
        }
        let mut frame = vec![0u8; stream.bytes_per_cycle];
        assert!(stream.fill_cycle(&mut frame));
        assert!(frame.chunks_exact(4).all(|w| w == [0x00, 0x00, 0x22, 0x22]));

        stream.request_silence(3);
        for _ in 0..3 {
            assert!(stream.fill_cycle(&mut frame));
            assert!(frame.iter().all(|&b| b == 0x00));
        }
        // Drained; audio resumes.
        assert!(stream.fill_cycle(&mut frame));
        assert!(frame.chunks_exact(4).all(|w| w == [0x00, 0x00, 0x22, 0x22]));
    }

    #[test]
    fn test_stop_supplies_silence_and_signals_end() {
        let stream = pcm_stream(0);
        stream.stop_requested.store(true, Ordering::Release);
        let mut frame = vec![0xFFu8; stream.bytes_per_cycle];
        assert!(!stream.fill_cycle(&mut frame));
        assert!(frame.iter().all(|&b| b == 0x00));
    }

    #[test]
    fn test_underrun_counts_and_silences() {
        let stream = pcm_stream(0);
        // Force prefill without enough buffered for a full frame.
        stream.prefill_complete.store(true, Ordering::Release);
        stream.push_audio(&[0x33; 8]);
        let mut frame = vec![0xFFu8; stream.bytes_per_cycle];
        assert!(stream.fill_cycle(&mut frame));
        assert!(frame.iter().all(|&b| b == 0x00));
        assert_eq!(stream.underruns.load(Ordering::Relaxed), 1);

        // The buffered bytes are still intact for the next full frame.
        assert_eq!(stream.ring.available(), 16);
    }

    #[test]
    fn test_send_zero_when_full() {
        let stream = pcm_stream(0);
        let big = vec![0u8; stream.ring.capacity() * 2];
        let first = stream.push_audio(&big);
        assert!(first > 0);
        // Ring full (modulo widening granularity): nothing more fits.
        assert_eq!(stream.push_audio(&big), 0);
    }
}
