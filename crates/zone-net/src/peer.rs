//! Per-peer connection state: everything the transport tracks for one
//! connected client.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use zone_proto::Priority;

use crate::limiter::BandwidthLimiter;
use crate::reliable::{ReliableOutlist, ReorderWindow, RttEstimator};

/// Monotonic counters a peer accumulates over its lifetime. Exposed to the
/// `?ping` responder and to diagnostics callbacks; never reset.
#[derive(Default)]
pub struct PeerStats {
    pub packets_sent: AtomicU64,
    pub packets_recv: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_recv: AtomicU64,
    pub reliable_retries: AtomicU64,
    pub duplicate_acks: AtomicU64,
    pub duplicate_reliable: AtomicU64,
    pub packets_dropped: AtomicU64,
}

impl PeerStats {
    pub fn note_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn note_recv(&self, bytes: usize) {
        self.packets_recv.fetch_add(1, Ordering::Relaxed);
        self.bytes_recv.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// A buffer under active (re)construction from `BigData`/`Sized` chunks,
/// capped hard so a malicious or buggy peer can't force unbounded growth.
pub struct IncomingAssembly {
    pub bytes: Vec<u8>,
    pub expected_total: Option<u32>,
}

impl IncomingAssembly {
    pub fn new() -> Self {
        Self { bytes: Vec::new(), expected_total: None }
    }
}

impl Default for IncomingAssembly {
    fn default() -> Self {
        Self::new()
    }
}

/// Fills a requested byte range of a sized send's payload on demand, so the
/// whole thing never has to sit buffered in memory at once. Called with
/// `(offset, 0)` exactly once, when the send finishes or is flushed by a
/// cancel, to let the caller release whatever it was streaming from.
pub type SizedDataSource = Box<dyn FnMut(usize, usize) -> Vec<u8> + Send>;

/// A queued sized-send: total length plus a data source pulled from under
/// bandwidth control, rather than a payload sitting fully materialized.
pub struct SizedSend {
    pub total_len: u32,
    pub offset: usize,
    source: SizedDataSource,
    finished: bool,
}

impl SizedSend {
    pub fn new(total_len: u32, source: SizedDataSource) -> Self {
        Self { total_len, offset: 0, source, finished: false }
    }

    /// Pull up to `max_len` bytes from the current offset and advance past
    /// them. Returns `None` once the whole payload has been pulled.
    pub fn pull(&mut self, max_len: usize) -> Option<Vec<u8>> {
        let total_len = self.total_len as usize;
        if self.offset >= total_len {
            return None;
        }
        let len = (total_len - self.offset).min(max_len);
        let bytes = (self.source)(self.offset, len);
        self.offset += bytes.len();
        Some(bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.offset >= self.total_len as usize
    }

    /// Signal completion to the data source, idempotently — normal
    /// end-of-stream and a cancel-flushed queue head both route through
    /// here so the callback only ever fires once.
    pub fn finish(&mut self) {
        if !self.finished {
            (self.source)(0, 0);
            self.finished = true;
        }
    }
}

/// The locked mutable state of one peer, grouped so that the three
/// independent concerns (outbound queues, big/sized transfers, reliable
/// bookkeeping) can be locked without ever needing more than one of these
/// three guards held at a time.
pub struct OutboundState {
    pub queues: [VecDeque<Vec<u8>>; 5],
}

impl OutboundState {
    fn new() -> Self {
        Self { queues: Default::default() }
    }

    pub fn push(&mut self, priority: Priority, payload: Vec<u8>) {
        self.queues[priority_index(priority)].push_back(payload);
    }

    /// Drain ready datagrams highest-priority-first, each within budget as
    /// reported by `limiter`. Stops the moment the limiter refuses a send.
    pub fn drain_within_budget(&mut self, limiter: &mut BandwidthLimiter) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for priority in Priority::ALL_HIGH_TO_LOW {
            let queue = &mut self.queues[priority_index(priority)];
            while let Some(front) = queue.front() {
                if limiter.check(front.len(), priority) {
                    out.push(queue.pop_front().unwrap());
                } else {
                    break;
                }
            }
        }
        out
    }
}

fn priority_index(priority: Priority) -> usize {
    match priority {
        Priority::UnreliableLow => 0,
        Priority::Unreliable => 1,
        Priority::UnreliableHigh => 2,
        Priority::Reliable => 3,
        Priority::Ack => 4,
    }
}

pub struct BigSizedState {
    pub incoming: IncomingAssembly,
    pub sized_recv: IncomingAssembly,
    pub sized_send_queue: VecDeque<SizedSend>,
}

impl BigSizedState {
    fn new() -> Self {
        Self { incoming: IncomingAssembly::new(), sized_recv: IncomingAssembly::new(), sized_send_queue: VecDeque::new() }
    }
}

pub struct ReliableState {
    pub outlist: ReliableOutlist,
    pub reorder: ReorderWindow,
    pub rtt: RttEstimator,
}

impl ReliableState {
    fn new() -> Self {
        Self { outlist: ReliableOutlist::new(), reorder: ReorderWindow::new(), rtt: RttEstimator::default() }
    }
}

/// One connected peer: a client socket address bound to one listener, with
/// all the transport-level bookkeeping the server needs to talk to it —
/// sequence numbers, queued outbound data, reliable retransmission state,
/// and its bandwidth estimate.
pub struct Peer {
    pub addr: SocketAddr,
    pub listener_index: usize,
    pub s2cn: AtomicU64,
    pub c2sn: AtomicU64,
    pub connected_at: Instant,
    pub last_packet_recv: Mutex<Instant>,
    pub stats: PeerStats,
    pub outbound: Mutex<OutboundState>,
    pub big_sized: Mutex<BigSizedState>,
    pub reliable: Mutex<ReliableState>,
    pub limiter: Mutex<BandwidthLimiter>,
    pub encryption_key: Mutex<Option<Vec<u8>>>,
    pub disconnecting: std::sync::atomic::AtomicBool,
}

impl Peer {
    pub fn new(addr: SocketAddr, listener_index: usize, now: Instant) -> Self {
        Self {
            addr,
            listener_index,
            s2cn: AtomicU64::new(0),
            c2sn: AtomicU64::new(0),
            connected_at: now,
            last_packet_recv: Mutex::new(now),
            stats: PeerStats::default(),
            outbound: Mutex::new(OutboundState::new()),
            big_sized: Mutex::new(BigSizedState::new()),
            reliable: Mutex::new(ReliableState::new()),
            limiter: Mutex::new(BandwidthLimiter::new(now)),
            encryption_key: Mutex::new(None),
            disconnecting: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn touch(&self, now: Instant) {
        *self.last_packet_recv.lock() = now;
    }

    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(*self.last_packet_recv.lock())
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::Relaxed)
    }

    pub fn mark_disconnecting(&self) {
        self.disconnecting.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn sized_send_pulls_in_order_and_completes_once() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let finish_calls = Arc::new(AtomicUsize::new(0));
        let counter = finish_calls.clone();
        let mut send = SizedSend::new(payload.len() as u32, {
            let payload = payload.clone();
            Box::new(move |offset, len| {
                if len == 0 {
                    counter.fetch_add(1, Ordering::SeqCst);
                    return Vec::new();
                }
                payload[offset..offset + len].to_vec()
            })
        });

        let first = send.pull(3).unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert!(!send.is_complete());

        let second = send.pull(3).unwrap();
        assert_eq!(second, vec![4, 5]);
        assert!(send.is_complete());
        assert!(send.pull(3).is_none());

        send.finish();
        send.finish();
        assert_eq!(finish_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sized_send_cancel_flushes_head_and_finishes_once() {
        let finish_calls = Arc::new(AtomicUsize::new(0));
        let counter = finish_calls.clone();
        let mut send = SizedSend::new(1_048_576, Box::new(move |offset, len| {
            if len == 0 {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            vec![0u8; len]
        }));

        let _ = send.pull(200 * 1024).unwrap();
        assert!(!send.is_complete());

        // A cancel flushes the queue head without it ever reaching completion.
        send.finish();
        assert_eq!(finish_calls.load(Ordering::SeqCst), 1);
    }
}
