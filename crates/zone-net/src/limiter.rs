//! Per-peer bandwidth limiter: a token-bucket shaper where higher-priority
//! traffic is cheaper to send, retry adjustment is multiplicative
//! decrease, and ack adjustment is additive increase with a fixed floor
//! and ceiling.

use std::time::{Duration, Instant};

use zone_proto::Priority;

/// Floor and ceiling for the estimated effective bandwidth, in bytes/sec.
pub const MIN_RATE_BPS: f64 = 2_000.0;
pub const MAX_RATE_BPS: f64 = 200_000.0;

/// Default starting rate for a freshly connected peer.
pub const DEFAULT_RATE_BPS: f64 = 10_000.0;

/// Additive-increase step applied on every acked reliable packet.
const ACK_STEP_BPS: f64 = 200.0;

/// Multiplicative-decrease factor applied on every retry.
const RETRY_DECAY: f64 = 0.5;

/// Largest number of bytes the bucket may accumulate between ticks, as a
/// multiple of the current rate — bounds burstiness without starving a
/// peer that hasn't sent in a while.
const MAX_BURST_SECONDS: f64 = 0.25;

/// Priorities are charged a fraction of their byte size as "credits";
/// urgent/ack traffic is intentionally cheap so it is rarely refused.
fn credit_cost(size_bytes: usize, priority: Priority) -> f64 {
    let scale = match priority {
        Priority::Ack => 0.25,
        Priority::Reliable => 0.5,
        Priority::UnreliableHigh => 0.75,
        Priority::Unreliable => 1.0,
        Priority::UnreliableLow => 1.25,
    };
    size_bytes as f64 * scale
}

pub struct BandwidthLimiter {
    rate_bps: f64,
    bucket: f64,
    last_tick: Instant,
}

impl BandwidthLimiter {
    pub fn new(now: Instant) -> Self {
        Self { rate_bps: DEFAULT_RATE_BPS, bucket: 0.0, last_tick: now }
    }

    /// Advance credit accumulation since the last tick.
    pub fn tick(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.bucket += self.rate_bps * elapsed.as_secs_f64();
        let max_burst = self.rate_bps * MAX_BURST_SECONDS;
        if self.bucket > max_burst {
            self.bucket = max_burst;
        }
    }

    /// Would a send of `size_bytes` at `priority` be within budget? If so,
    /// the credits are spent immediately.
    pub fn check(&mut self, size_bytes: usize, priority: Priority) -> bool {
        let cost = credit_cost(size_bytes, priority);
        if self.bucket >= cost {
            self.bucket -= cost;
            true
        } else {
            false
        }
    }

    /// Widen the estimated effective bandwidth — additive increase.
    pub fn adjust_for_ack(&mut self) {
        self.rate_bps = (self.rate_bps + ACK_STEP_BPS).min(MAX_RATE_BPS);
    }

    /// Narrow the estimated effective bandwidth — multiplicative decrease.
    pub fn adjust_for_retry(&mut self) {
        self.rate_bps = (self.rate_bps * RETRY_DECAY).max(MIN_RATE_BPS);
    }

    /// How many reliable packets past the last-acked sequence number may be
    /// queued right now, scaled by the current rate estimate.
    pub fn can_buffer_reliable_ahead(&self) -> i32 {
        const ASSUMED_PACKET_BYTES: f64 = 256.0;
        const MAX_AHEAD: i32 = 32;
        ((self.rate_bps / ASSUMED_PACKET_BYTES) as i32).clamp(1, MAX_AHEAD)
    }

    pub fn current_rate_bps(&self) -> f64 {
        self.rate_bps
    }
}
