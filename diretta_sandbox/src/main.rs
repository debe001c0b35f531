//! Streams a synthesized sine wave through the sync engine and the
//! in-process loopback transport, printing the ring level once a second.
//! Ctrl-C drains and closes the stream.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use diretta_engine::{EngineConfig, SyncEngine};
use diretta_link::{
    format::AudioFormat,
    loopback::{LoopbackFinder, LoopbackTransport, local_target},
};

const SAMPLE_RATE: u32 = 44_100;
const TONE_HZ: f32 = 440.0;

fn main() {
    let transport = LoopbackTransport::new();
    let probe = transport.probe();
    let finder = LoopbackFinder::new(vec![local_target("Loopback DAC")]);

    let engine = Arc::new(SyncEngine::new(EngineConfig::default(), Box::new(finder), Box::new(transport)));
    engine.enable().expect("enable failed");
    engine.open(AudioFormat::pcm(SAMPLE_RATE, 16, 2)).expect("open failed");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)).expect("Ctrl-C handler");
    }

    let producer = {
        let engine = Arc::clone(&engine);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut phase = 0.0f32;
            let mut chunk = vec![0u8; 4096];
            while running.load(Ordering::SeqCst) {
                for frame in chunk.chunks_exact_mut(4) {
                    let sample = (phase.sin() * 0.4 * i16::MAX as f32) as i16;
                    let bytes = sample.to_le_bytes();
                    frame[0] = bytes[0];
                    frame[1] = bytes[1];
                    frame[2] = bytes[0];
                    frame[3] = bytes[1];
                    phase += TONE_HZ / SAMPLE_RATE as f32 * std::f32::consts::TAU;
                    if phase > std::f32::consts::TAU {
                        phase -= std::f32::consts::TAU;
                    }
                }
                let mut offset = 0;
                while offset < chunk.len() && running.load(Ordering::SeqCst) {
                    let accepted = engine.send_audio(&chunk[offset..]);
                    offset += accepted;
                    if accepted == 0 {
                        thread::sleep(Duration::from_millis(2));
                    }
                }
            }
        })
    };

    println!("streaming a {TONE_HZ} Hz tone; Ctrl-C to stop");
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));
        let delivered = probe.take_captured().len();
        println!(
            "ring {:>5.1} % | {} wire bytes this second | {} cycles | {} underruns",
            engine.buffer_level() * 100.0,
            delivered,
            probe.cycle_count(),
            engine.underruns(),
        );
    }

    producer.join().expect("producer thread panicked");
    engine.close().expect("close failed");
    engine.disable();
    println!("stopped after {} cycles", probe.cycle_count());
}
