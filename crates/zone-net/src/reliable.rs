//! Reliable delivery: outbound retransmission queue and inbound reorder
//! window, together the "reliable" side of a connection.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use zone_proto::DEFAULT_RELIABLE_WINDOW;

/// A reliable packet sent but not yet acked.
pub struct Outstanding {
    pub seqnum: u32,
    pub payload: Vec<u8>,
    pub tries: u32,
    pub last_sent: Instant,
}

/// Smoothed RTT estimator, Jacobson/Karels style, used here to drive the
/// retransmission timeout rather than a displayed ping number.
pub struct RttEstimator {
    srtt_ms: f64,
    rttvar_ms: f64,
    initialized: bool,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self { srtt_ms: 200.0, rttvar_ms: 100.0, initialized: false }
    }
}

impl RttEstimator {
    pub fn sample(&mut self, measured_ms: f64) {
        if !self.initialized {
            self.srtt_ms = measured_ms;
            self.rttvar_ms = measured_ms / 2.0;
            self.initialized = true;
            return;
        }
        let delta = measured_ms - self.srtt_ms;
        self.srtt_ms += delta / 8.0;
        self.rttvar_ms += (delta.abs() - self.rttvar_ms) / 4.0;
    }

    /// Retransmission timeout: smoothed RTT plus four deviations, clamped to
    /// a sane range so a single bad sample can't stall retries for minutes
    /// or fire them in a tight busy loop.
    pub fn rto_ms(&self) -> f64 {
        (self.srtt_ms + 4.0 * self.rttvar_ms).clamp(250.0, 2_000.0)
    }
}

/// Outbound side of a reliable channel: assigns sequence numbers, tracks
/// what's outstanding, and retires entries as acks arrive.
#[derive(Default)]
pub struct ReliableOutlist {
    next_seqnum: u32,
    outstanding: VecDeque<Outstanding>,
}

impl ReliableOutlist {
    pub fn new() -> Self {
        Self { next_seqnum: 0, outstanding: VecDeque::new() }
    }

    /// Assign the next sequence number and record the packet as outstanding.
    pub fn send(&mut self, payload: Vec<u8>, now: Instant) -> u32 {
        let seqnum = self.next_seqnum;
        self.next_seqnum = self.next_seqnum.wrapping_add(1);
        self.outstanding.push_back(Outstanding { seqnum, payload, tries: 1, last_sent: now });
        seqnum
    }

    /// Acknowledge a sequence number. Returns `true` if this was the first
    /// ack for it — a duplicate ack for an already-retired seqnum is a
    /// no-op.
    pub fn ack(&mut self, seqnum: u32) -> bool {
        if let Some(pos) = self.outstanding.iter().position(|o| o.seqnum == seqnum) {
            self.outstanding.remove(pos);
            true
        } else {
            false
        }
    }

    /// Packets whose retransmission timeout has elapsed, oldest first.
    /// Bumps their `tries` counter and `last_sent` timestamp as a side
    /// effect of being selected for retry. The wait grows linearly with
    /// the try count, so a peer that's gone quiet gets backed off rather
    /// than hammered at a fixed rate.
    pub fn due_for_retry(&mut self, now: Instant, rto_ms: f64) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        for entry in self.outstanding.iter_mut() {
            let threshold = Duration::from_secs_f64(rto_ms * entry.tries as f64 / 1000.0);
            if now.saturating_duration_since(entry.last_sent) >= threshold {
                entry.tries += 1;
                entry.last_sent = now;
                due.push(entry.payload.clone());
            }
        }
        due
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    pub fn max_tries_exceeded(&self, limit: u32) -> bool {
        self.outstanding.iter().any(|o| o.tries > limit)
    }
}

/// Outcome of feeding a packet into a [`ReorderWindow`].
#[derive(Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Accepted (buffered, or newly in order); payloads now ready for
    /// delivery, in order — possibly empty if this filled a gap but the
    /// next slot in sequence is still missing.
    Accepted(Vec<Vec<u8>>),
    /// `seqnum` was below the expected sequence number: a retransmit of
    /// something already delivered. Still needs to be re-acked, but
    /// carries no new data and should be counted as a duplicate.
    Duplicate,
}

/// Inbound reorder window: buffers reliable packets that arrive ahead of
/// the expected sequence number and releases them in order as gaps fill.
pub struct ReorderWindow {
    expected: u32,
    window: VecDeque<Option<Vec<u8>>>,
}

impl ReorderWindow {
    pub fn new() -> Self {
        Self { expected: 0, window: VecDeque::from(vec![None; DEFAULT_RELIABLE_WINDOW]) }
    }

    /// Accept an inbound reliable packet.
    pub fn accept(&mut self, seqnum: u32, payload: Vec<u8>) -> AcceptOutcome {
        if seqnum < self.expected {
            return AcceptOutcome::Duplicate;
        }
        let offset = (seqnum - self.expected) as usize;
        if offset >= self.window.len() {
            // Far future: arrival rate outran the window; drop it, the
            // sender will retry until it lands inside the window.
            return AcceptOutcome::Accepted(Vec::new());
        }
        if self.window[offset].is_none() {
            self.window[offset] = Some(payload);
        }

        let mut ready = Vec::new();
        while let Some(slot) = self.window.front() {
            match slot {
                Some(_) => {
                    let payload = self.window.pop_front().unwrap().unwrap();
                    ready.push(payload);
                    self.window.push_back(None);
                    self.expected = self.expected.wrapping_add(1);
                }
                None => break,
            }
        }
        AcceptOutcome::Accepted(ready)
    }
}

impl Default for ReorderWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_arrival_releases_immediately() {
        let mut window = ReorderWindow::new();
        assert_eq!(window.accept(0, vec![1]), AcceptOutcome::Accepted(vec![vec![1]]));
        assert_eq!(window.accept(1, vec![2]), AcceptOutcome::Accepted(vec![vec![2]]));
    }

    #[test]
    fn out_of_order_arrival_buffers_until_gap_fills() {
        // packets arrive out of order: seqnum 2, then 0, then 1.
        let mut window = ReorderWindow::new();
        assert_eq!(window.accept(2, vec![2]), AcceptOutcome::Accepted(vec![]));
        let ready = window.accept(0, vec![0]);
        assert_eq!(ready, AcceptOutcome::Accepted(vec![vec![0]]));
        let ready = window.accept(1, vec![1]);
        assert_eq!(ready, AcceptOutcome::Accepted(vec![vec![1], vec![2]]));
    }

    #[test]
    fn retransmit_of_an_already_delivered_packet_is_flagged_duplicate() {
        let mut window = ReorderWindow::new();
        assert_eq!(window.accept(0, vec![1]), AcceptOutcome::Accepted(vec![vec![1]]));
        assert_eq!(window.accept(0, vec![1]), AcceptOutcome::Duplicate);
    }

    #[test]
    fn duplicate_ack_is_a_no_op() {
        let mut outlist = ReliableOutlist::new();
        let now = Instant::now();
        let seq = outlist.send(vec![1, 2, 3], now);
        assert!(outlist.ack(seq));
        assert!(!outlist.ack(seq));
    }

    #[test]
    fn retry_only_fires_after_timeout_elapses() {
        let mut outlist = ReliableOutlist::new();
        let t0 = Instant::now();
        outlist.send(vec![9], t0);
        assert!(outlist.due_for_retry(t0, 100.0).is_empty());
        let later = t0 + std::time::Duration::from_millis(150);
        assert_eq!(outlist.due_for_retry(later, 100.0).len(), 1);
    }

    #[test]
    fn retry_backoff_grows_linearly_with_try_count() {
        let mut outlist = ReliableOutlist::new();
        let t0 = Instant::now();
        outlist.send(vec![9], t0);

        // first retry: due after 1 * rto.
        let t1 = t0 + std::time::Duration::from_millis(100);
        assert_eq!(outlist.due_for_retry(t1, 100.0).len(), 1);

        // second retry: needs 2 * rto since the retry above reset last_sent.
        let too_soon = t1 + std::time::Duration::from_millis(150);
        assert!(outlist.due_for_retry(too_soon, 100.0).is_empty());
        let t2 = t1 + std::time::Duration::from_millis(200);
        assert_eq!(outlist.due_for_retry(t2, 100.0).len(), 1);
    }

    #[test]
    fn rto_widens_after_a_high_variance_sample() {
        let mut rtt = RttEstimator::default();
        rtt.sample(50.0);
        let first = rtt.rto_ms();
        rtt.sample(500.0);
        assert!(rtt.rto_ms() > first);
    }
}
