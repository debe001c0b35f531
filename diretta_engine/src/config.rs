//! Engine configuration surface.

use serde::{Deserialize, Serialize};

use diretta_link::transport::{ThreadMode, TransferMode};

/// Configuration for the sync engine.
///
/// Defaults match a renderer on a standard home network; deployments
/// override individual fields (all fields deserialize with defaults, so a
/// partial configuration file is enough).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Friendly identifier presented to the transport.
    pub name: String,
    /// Protocol cycle period when `cycle_time_auto` is off.
    pub cycle_time_us: u32,
    /// Derive the cycle period from the wire format and path MTU.
    pub cycle_time_auto: bool,
    /// Link MTU; 0 measures the path MTU at enable time.
    pub mtu: u32,
    /// MTU assumed when the probe fails (9000 with jumbo frames).
    pub mtu_fallback: u32,
    pub thread_mode: ThreadMode,
    pub transfer_mode: TransferMode,
    /// How long to wait for the sink to report online after play; elapsing
    /// is a warning, not a failure.
    pub online_wait_ms: u64,
    /// Pause between tearing down and re-opening the transport on a format
    /// change.
    pub format_switch_delay_ms: u64,
    /// Which target to bind when several are present (0-indexed; negative
    /// picks the first).
    pub target_index: i32,
    /// Optional case-insensitive name filter applied before index
    /// selection.
    pub target_name: Option<String>,
    /// Settle delay before sink assignment on a fresh connect.
    pub settle_fresh_ms: u64,
    /// Settle delay before sink assignment after a format-change reopen.
    pub settle_reopen_ms: u64,
    pub retry: RetryTuning,
    pub silence: SilenceTuning,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "DirettaRenderer".to_string(),
            cycle_time_us: 1_000,
            cycle_time_auto: true,
            mtu: 0,
            mtu_fallback: 1_500,
            thread_mode: ThreadMode::default(),
            transfer_mode: TransferMode::default(),
            online_wait_ms: 2_000,
            format_switch_delay_ms: 1_000,
            target_index: -1,
            target_name: None,
            settle_fresh_ms: 500,
            settle_reopen_ms: 200,
            retry: RetryTuning::default(),
            silence: SilenceTuning::default(),
        }
    }
}

/// Retry budgets for the control primitives. Attempt counts are the
/// contract with the sink; the delays are tightened by tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryTuning {
    pub transport_open_attempts: u32,
    pub transport_open_delay_ms: u64,
    pub set_sink_attempts: u32,
    pub set_sink_delay_ms: u64,
    pub reopen_set_sink_attempts: u32,
    pub reopen_set_sink_delay_ms: u64,
    pub connect_attempts: u32,
    pub connect_delay_ms: u64,
    pub rediscover_attempts: u32,
    pub rediscover_delay_ms: u64,
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            transport_open_attempts: 3,
            transport_open_delay_ms: 500,
            set_sink_attempts: 20,
            set_sink_delay_ms: 500,
            reopen_set_sink_attempts: 15,
            reopen_set_sink_delay_ms: 300,
            connect_attempts: 3,
            connect_delay_ms: 500,
            rediscover_attempts: 10,
            rediscover_delay_ms: 500,
        }
    }
}

/// Silence-drain cycle counts and bounded drain waits.
///
/// DSD DACs need longer drains than PCM before control transitions; the
/// post-online count covers the sink's PLL lock after it reports online.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceTuning {
    /// Silence cycles supplied after the sink reports online, before real
    /// audio starts.
    pub post_online_buffers: u32,
    pub shutdown_dsd: u32,
    pub shutdown_pcm: u32,
    pub shutdown_drain_ms: u64,
    pub close_dsd: u32,
    pub close_pcm: u32,
    pub close_drain_ms: u64,
    pub pause_dsd: u32,
    pub pause_pcm: u32,
    pub pause_drain_ms: u64,
    /// Bounded wait for the cycle worker to go idle during close.
    pub worker_exit_ms: u64,
}

impl Default for SilenceTuning {
    fn default() -> Self {
        Self {
            post_online_buffers: 50,
            shutdown_dsd: 100,
            shutdown_pcm: 30,
            shutdown_drain_ms: 300,
            close_dsd: 50,
            close_pcm: 20,
            close_drain_ms: 150,
            pause_dsd: 30,
            pause_pcm: 10,
            pause_drain_ms: 100,
            worker_exit_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.name, "DirettaRenderer");
        assert_eq!(cfg.cycle_time_us, 1_000);
        assert!(cfg.cycle_time_auto);
        assert_eq!(cfg.mtu, 0);
        assert_eq!(cfg.mtu_fallback, 1_500);
        assert_eq!(cfg.online_wait_ms, 2_000);
        assert_eq!(cfg.format_switch_delay_ms, 1_000);
        assert_eq!(cfg.target_index, -1);
        assert_eq!(cfg.retry.set_sink_attempts, 20);
        assert_eq!(cfg.retry.reopen_set_sink_attempts, 15);
        assert_eq!(cfg.silence.post_online_buffers, 50);
        assert_eq!(cfg.silence.shutdown_dsd, 100);
        assert_eq!(cfg.silence.close_pcm, 20);
    }
}
