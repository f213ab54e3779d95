//! The UDP transport: listener sockets, per-peer send/receive scheduling,
//! reliable retransmission, and packet dispatch to application handlers
//! looked up through the broker.
//!
//! Each listener gets its own blocking-with-timeout receive thread, decoded
//! application packets are handed off over a `crossbeam` channel so a slow
//! handler never stalls a socket read, and a fixed-interval sweep thread
//! does all outbound work across per-peer priority queues.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use zone_broker::Broker;
use zone_proto::{
    encode_ack, encode_big_data, encode_cancel_sized_ack, encode_disconnect, encode_grouped, encode_reliable,
    encode_sized, encode_time_sync_response, CorePacket, ParsedPacket, Priority, ProtoError, MAX_BIG_PACKET,
    MAX_DATAGRAM,
};

use crate::limiter::BandwidthLimiter;
use crate::peer::{Peer, SizedDataSource, SizedSend};
use crate::reliable::AcceptOutcome;

/// Handles one application packet type. Looked up by the first byte of a
/// non-core datagram; registered per type id, not through the broker's
/// type-erased interface table, since the hot dispatch path needs a flat
/// array/hashmap lookup rather than a downcast.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, peer: &Arc<Peer>, type_id: u8, payload: &[u8]);
}

/// Wraps a [`PacketHandler`] so it can also be published through the
/// broker's interface table for code that wants to discover "whoever is
/// handling packet type N" generically rather than via direct injection.
pub struct HandlerRegistration(pub Arc<dyn PacketHandler>);

#[derive(Clone)]
pub struct TransportConfig {
    pub drop_timeout: Duration,
    pub max_outlist_size: usize,
    pub max_retries: u32,
    pub per_packet_overhead: usize,
    pub reliable_threads: usize,
    pub send_sweep_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            drop_timeout: Duration::from_secs(10),
            max_outlist_size: 500,
            max_retries: 20,
            per_packet_overhead: 28,
            reliable_threads: 1,
            send_sweep_interval: Duration::from_millis(10),
        }
    }
}

struct InboundEvent {
    peer: Arc<Peer>,
    type_id: u8,
    payload: Vec<u8>,
}

struct Listener {
    socket: Arc<UdpSocket>,
}

/// The live transport: owns every listener socket and every connected
/// peer's state, and drives the background threads that move bytes.
pub struct Transport {
    config: TransportConfig,
    listeners: Vec<Listener>,
    peers: RwLock<HashMap<SocketAddr, Arc<Peer>>>,
    handlers: RwLock<HashMap<u8, Arc<dyn PacketHandler>>>,
    broker: Arc<Broker>,
    shutdown: Arc<AtomicBool>,
    inbound_tx: Sender<InboundEvent>,
    inbound_rx: Receiver<InboundEvent>,
    started_at: Instant,
}

impl Transport {
    pub fn bind(
        config: TransportConfig,
        addrs: &[SocketAddr],
        broker: Arc<Broker>,
    ) -> std::io::Result<Arc<Transport>> {
        let mut listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match UdpSocket::bind(addr) {
                Ok(socket) => {
                    socket.set_read_timeout(Some(Duration::from_millis(200)))?;
                    listeners.push(Listener { socket: Arc::new(socket) });
                    info!(%addr, "listener bound");
                }
                Err(err) => {
                    // A secondary listener that fails to bind is skipped
                    // with a log, not fatal; the caller decides whether
                    // zero bound listeners should be treated as fatal.
                    warn!(%addr, %err, "listener failed to bind, skipping");
                }
            }
        }
        let (inbound_tx, inbound_rx) = channel::unbounded();
        Ok(Arc::new(Transport {
            config,
            listeners,
            peers: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            broker,
            shutdown: Arc::new(AtomicBool::new(false)),
            inbound_tx,
            inbound_rx,
            started_at: Instant::now(),
        }))
    }

    pub fn register_handler(&self, type_id: u8, handler: Arc<dyn PacketHandler>) {
        self.broker.register_interface(Arc::new(HandlerRegistration(handler.clone())), None);
        self.handlers.write().insert(type_id, handler);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn peer(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.read().get(addr).cloned()
    }

    pub fn peer_or_insert(&self, addr: SocketAddr, listener_index: usize, now: Instant) -> Arc<Peer> {
        if let Some(peer) = self.peers.read().get(&addr) {
            return peer.clone();
        }
        let mut table = self.peers.write();
        table
            .entry(addr)
            .or_insert_with(|| Arc::new(Peer::new(addr, listener_index, now)))
            .clone()
    }

    pub fn drop_peer(&self, addr: &SocketAddr) {
        self.peers.write().remove(addr);
    }

    /// Queue an unreliable/ack payload for `peer` at `priority`. The bytes
    /// go out on the next send sweep, grouped with other small packets
    /// where possible.
    pub fn send(&self, peer: &Arc<Peer>, priority: Priority, payload: Vec<u8>) {
        peer.outbound.lock().push(priority, payload);
    }

    /// Wrap `inner` in a reliable envelope, assign it a sequence number,
    /// and queue it for send and retry until acked.
    pub fn send_reliable(&self, peer: &Arc<Peer>, inner: &[u8]) {
        let now = Instant::now();
        let mut reliable = peer.reliable.lock();
        if reliable.outlist.outstanding_count() >= self.config.max_outlist_size {
            warn!(addr = %peer.addr, "reliable outlist full, dropping send");
            return;
        }
        let seqnum = reliable.outlist.send(inner.to_vec(), now);
        drop(reliable);
        let wire = encode_reliable(seqnum, inner);
        peer.outbound.lock().push(Priority::Reliable, wire);
    }

    /// Queue a large server-to-client push (e.g. a map file) to be pulled
    /// from `source` and sent as `Sized` chunks under bandwidth control,
    /// so it never starves interactive traffic. `source` is invoked once
    /// with `(0, 0)` when the transfer finishes or is cancelled.
    pub fn send_sized(&self, peer: &Arc<Peer>, total_len: u32, source: SizedDataSource) {
        peer.big_sized.lock().sized_send_queue.push_back(SizedSend::new(total_len, source));
    }

    /// Queue an oversized payload to be sent eagerly as a `BigData`
    /// continuation sequence ending in a final chunk.
    pub fn send_big(&self, peer: &Arc<Peer>, payload: &[u8]) {
        let chunk_cap = MAX_DATAGRAM - 2;
        let mut outbound = peer.outbound.lock();
        if payload.is_empty() {
            outbound.push(Priority::Unreliable, encode_big_data(true, &[]));
            return;
        }
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + chunk_cap).min(payload.len());
            let is_final = end == payload.len();
            outbound.push(Priority::Unreliable, encode_big_data(is_final, &payload[offset..end]));
            offset = end;
        }
    }

    /// Pull one chunk from the peer's sized-send queue head if bandwidth
    /// permits, retiring the send once it's fully pulled.
    fn pump_sized_send(&self, peer: &Arc<Peer>, limiter: &mut BandwidthLimiter) -> Option<Vec<u8>> {
        let chunk_cap = MAX_DATAGRAM - 6;
        let mut state = peer.big_sized.lock();
        if state.sized_send_queue.is_empty() {
            return None;
        }
        if !limiter.check(chunk_cap, Priority::UnreliableLow) {
            return None;
        }
        let send = state.sized_send_queue.front_mut().unwrap();
        let total_len = send.total_len;
        let bytes = send.pull(chunk_cap)?;
        let packet = encode_sized(total_len, &bytes);
        if send.is_complete() {
            send.finish();
            state.sized_send_queue.pop_front();
        }
        Some(packet)
    }

    /// Spawn the receive, dispatch, send-sweep, and reliable-retry threads.
    /// Returns join handles the caller should keep until shutdown.
    pub fn spawn_threads(self: &Arc<Self>, dispatch_workers: usize) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for (index, listener) in self.listeners.iter().enumerate() {
            let transport = self.clone();
            let socket = listener.socket.clone();
            let shutdown = self.shutdown.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("zone-net-recv-{index}"))
                    .spawn(move || transport.receive_loop(index, socket, shutdown))
                    .expect("spawn receive thread"),
            );
        }

        for worker in 0..dispatch_workers.max(1) {
            let transport = self.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("zone-net-dispatch-{worker}"))
                    .spawn(move || transport.dispatch_loop())
                    .expect("spawn dispatch thread"),
            );
        }

        {
            let transport = self.clone();
            let shutdown = self.shutdown.clone();
            handles.push(
                std::thread::Builder::new()
                    .name("zone-net-send".into())
                    .spawn(move || transport.send_sweep_loop(shutdown))
                    .expect("spawn send sweep thread"),
            );
        }

        for thread_index in 0..self.config.reliable_threads.max(1) {
            let transport = self.clone();
            let shutdown = self.shutdown.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("zone-net-reliable-{thread_index}"))
                    .spawn(move || transport.reliable_retry_loop(shutdown))
                    .expect("spawn reliable retry thread"),
            );
        }

        handles
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn receive_loop(self: Arc<Self>, listener_index: usize, socket: Arc<UdpSocket>, shutdown: Arc<AtomicBool>) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while !shutdown.load(Ordering::Relaxed) {
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(err) => {
                    warn!(%err, "receive error");
                    continue;
                }
            };
            let now = Instant::now();
            let peer = self.peer_or_insert(from, listener_index, now);
            peer.touch(now);
            peer.stats.note_recv(len);

            match zone_proto::parse_datagram(&buf[..len]) {
                Ok(ParsedPacket::Application { type_id, payload }) => {
                    let _ = self.inbound_tx.send(InboundEvent { peer, type_id, payload: payload.to_vec() });
                }
                Ok(ParsedPacket::Core(core)) => self.handle_core_packet(&peer, core),
                Err(err) => {
                    debug!(addr = %from, %err, "dropped malformed datagram");
                    peer.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn handle_core_packet(&self, peer: &Arc<Peer>, core: CorePacket<'_>) {
        match core {
            CorePacket::Ack { seqnum } => {
                let mut reliable = peer.reliable.lock();
                let first = reliable.outlist.ack(seqnum);
                if first {
                    let mut limiter = peer.limiter.lock();
                    limiter.adjust_for_ack();
                } else {
                    peer.stats.duplicate_acks.fetch_add(1, Ordering::Relaxed);
                }
            }
            CorePacket::Reliable { seqnum, inner } => {
                let outcome = {
                    let mut reliable = peer.reliable.lock();
                    reliable.reorder.accept(seqnum, inner.to_vec())
                };
                // A duplicate still gets re-acked; the sender hasn't seen
                // our first ack yet or it was lost in flight.
                peer.outbound.lock().push(Priority::Ack, encode_ack(seqnum));
                match outcome {
                    AcceptOutcome::Duplicate => {
                        peer.stats.duplicate_reliable.fetch_add(1, Ordering::Relaxed);
                    }
                    AcceptOutcome::Accepted(ready) => {
                        for payload in ready {
                            self.dispatch_inner_application(peer, &payload);
                        }
                    }
                }
            }
            CorePacket::Disconnect => {
                peer.mark_disconnecting();
            }
            CorePacket::Grouped(elements) => {
                for element in elements {
                    if let Ok(ParsedPacket::Application { type_id, payload }) = zone_proto::parse_datagram(element) {
                        self.dispatch_application(peer, type_id, payload);
                    } else if let Ok(ParsedPacket::Core(inner)) = zone_proto::parse_datagram(element) {
                        self.handle_core_packet(peer, inner);
                    }
                }
            }
            CorePacket::BigData { is_final, bytes } => self.handle_big_data(peer, is_final, bytes),
            CorePacket::Sized { total_len, bytes } => self.handle_sized(peer, total_len, bytes),
            CorePacket::CancelSizedRequest => {
                let head = peer.big_sized.lock().sized_send_queue.pop_front();
                if let Some(mut send) = head {
                    send.finish();
                }
                self.send_reliable(peer, &encode_cancel_sized_ack());
            }
            CorePacket::CancelSizedAck => {}
            CorePacket::KeyInit(_) | CorePacket::KeyResponse(_) | CorePacket::ContinuumKeyResponse(_) => {
                debug!(addr = %peer.addr, "key exchange packet received; encryption handshake not yet wired");
            }
            CorePacket::TimeSyncRequest { time, .. } => {
                let server_time = Instant::now().saturating_duration_since(self.started_at).as_millis() as u32;
                let reply = encode_time_sync_response(time, server_time);
                peer.outbound.lock().push(Priority::Ack, reply);
            }
            CorePacket::TimeSyncResponse(_) => {}
        }
    }

    fn handle_big_data(&self, peer: &Arc<Peer>, is_final: bool, bytes: &[u8]) {
        let assembled = {
            let mut state = peer.big_sized.lock();
            state.incoming.bytes.extend_from_slice(bytes);
            if state.incoming.bytes.len() > MAX_BIG_PACKET {
                warn!(addr = %peer.addr, "big packet exceeded size cap, dropping");
                state.incoming = crate::peer::IncomingAssembly::new();
                return;
            }
            if is_final {
                Some(std::mem::take(&mut state.incoming).bytes)
            } else {
                None
            }
        };
        if let Some(payload) = assembled {
            self.dispatch_inner_application(peer, &payload);
        }
    }

    fn handle_sized(&self, peer: &Arc<Peer>, total_len: u32, bytes: &[u8]) {
        let assembled = {
            let mut state = peer.big_sized.lock();
            if state.sized_recv.expected_total.is_none() {
                state.sized_recv.expected_total = Some(total_len);
            }
            state.sized_recv.bytes.extend_from_slice(bytes);
            if state.sized_recv.bytes.len() as u32 >= total_len {
                Some(std::mem::take(&mut state.sized_recv).bytes)
            } else {
                None
            }
        };
        if let Some(payload) = assembled {
            self.dispatch_inner_application(peer, &payload);
        }
    }

    /// Dispatch a payload that was itself wrapped (reliable, big, sized) and
    /// so still needs its own application-packet framing parsed.
    fn dispatch_inner_application(&self, peer: &Arc<Peer>, payload: &[u8]) {
        match zone_proto::parse_datagram(payload) {
            Ok(ParsedPacket::Application { type_id, payload }) => {
                self.dispatch_application(peer, type_id, payload);
            }
            Ok(ParsedPacket::Core(core)) => self.handle_core_packet(peer, core),
            Err(err) => debug!(addr = %peer.addr, %err, "dropped malformed wrapped payload"),
        }
    }

    fn dispatch_application(&self, peer: &Arc<Peer>, type_id: u8, payload: &[u8]) {
        let _ = self.inbound_tx.send(InboundEvent { peer: peer.clone(), type_id, payload: payload.to_vec() });
    }

    fn dispatch_loop(self: Arc<Self>) {
        while let Ok(event) = self.inbound_rx.recv() {
            let handler = self.handlers.read().get(&event.type_id).cloned();
            match handler {
                Some(handler) => handler.handle(&event.peer, event.type_id, &event.payload),
                None => debug!(type_id = event.type_id, "no handler registered for packet type"),
            }
        }
    }

    fn send_sweep_loop(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(self.config.send_sweep_interval);
            let now = Instant::now();
            let peers: Vec<Arc<Peer>> = self.peers.read().values().cloned().collect();

            // One peer's drain touches only its own locks; fan the sweep out
            // across peers with `rayon`, then apply the actual socket
            // writes serially.
            let ready: Vec<(Arc<Peer>, Vec<Vec<u8>>)> = peers
                .par_iter()
                .map(|peer| {
                    peer.limiter.lock().tick(now);
                    let mut limiter = peer.limiter.lock();
                    let mut drained = {
                        let mut outbound = peer.outbound.lock();
                        outbound.drain_within_budget(&mut limiter)
                    };
                    if let Some(chunk) = self.pump_sized_send(peer, &mut limiter) {
                        drained.push(chunk);
                    }
                    (peer.clone(), drained)
                })
                .collect();

            for (peer, datagrams) in ready {
                if datagrams.is_empty() {
                    continue;
                }
                self.flush_grouped(&peer, datagrams);
            }

            self.reap_idle_peers(now);
        }
    }

    /// Coalesce small datagrams into grouped envelopes up to the MTU, then
    /// write each resulting datagram to the peer's listener socket.
    fn flush_grouped(&self, peer: &Arc<Peer>, datagrams: Vec<Vec<u8>>) {
        let socket = match self.listeners.get(peer.listener_index) {
            Some(listener) => listener.socket.clone(),
            None => return,
        };

        let mut batch: Vec<&[u8]> = Vec::new();
        let mut batch_len = 2usize;
        let mut send_batch = |batch: &[&[u8]]| {
            if batch.is_empty() {
                return;
            }
            if batch.len() == 1 {
                let _ = socket.send_to(batch[0], peer.addr);
                peer.stats.note_sent(batch[0].len());
                return;
            }
            if let Ok(grouped) = encode_grouped(batch) {
                let _ = socket.send_to(&grouped, peer.addr);
                peer.stats.note_sent(grouped.len());
            }
        };

        for datagram in &datagrams {
            if datagram.len() > MAX_DATAGRAM {
                // Oversized singletons bypass grouping entirely.
                send_batch(&batch);
                batch.clear();
                batch_len = 2;
                let _ = socket.send_to(datagram, peer.addr);
                peer.stats.note_sent(datagram.len());
                continue;
            }
            let element_cost = 1 + datagram.len();
            if batch_len + element_cost > MAX_DATAGRAM && !batch.is_empty() {
                send_batch(&batch);
                batch.clear();
                batch_len = 2;
            }
            batch.push(datagram.as_slice());
            batch_len += element_cost;
        }
        send_batch(&batch);
    }

    fn reap_idle_peers(&self, now: Instant) {
        let mut lag_timeouts = Vec::new();
        let mut already_disconnecting = Vec::new();
        for (addr, peer) in self.peers.read().iter() {
            if peer.idle_for(now) > self.config.drop_timeout {
                lag_timeouts.push(peer.clone());
            } else if peer.is_disconnecting() && peer.idle_for(now) > Duration::from_secs(1) {
                already_disconnecting.push(*addr);
            }
        }

        for peer in &lag_timeouts {
            self.kick_for_lag(peer);
        }

        let mut to_drop = already_disconnecting;
        to_drop.extend(lag_timeouts.iter().map(|peer| peer.addr));
        if !to_drop.is_empty() {
            let mut table = self.peers.write();
            for addr in to_drop {
                if table.remove(&addr).is_some() {
                    info!(%addr, "peer reaped");
                }
            }
        }
    }

    /// Tell a peer it's being dropped for lag before freeing it: an
    /// unreliable user-visible notice, then the disconnect packet.
    fn kick_for_lag(&self, peer: &Arc<Peer>) {
        let socket = match self.listeners.get(peer.listener_index) {
            Some(listener) => listener.socket.clone(),
            None => return,
        };
        const LAG_MESSAGE: &[u8] = b"You have been disconnected because of lag";
        let _ = socket.send_to(LAG_MESSAGE, peer.addr);
        let disconnect = encode_disconnect();
        let _ = socket.send_to(&disconnect, peer.addr);
        peer.stats.note_sent(LAG_MESSAGE.len() + disconnect.len());
    }

    fn reliable_retry_loop(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(50));
            let now = Instant::now();
            let peers: Vec<Arc<Peer>> = self.peers.read().values().cloned().collect();
            for peer in peers {
                let due = {
                    let mut reliable = peer.reliable.lock();
                    if reliable.outlist.max_tries_exceeded(self.config.max_retries) {
                        peer.mark_disconnecting();
                        continue;
                    }
                    let rto = reliable.rtt.rto_ms();
                    reliable.outlist.due_for_retry(now, rto)
                };
                if due.is_empty() {
                    continue;
                }
                peer.limiter.lock().adjust_for_retry();
                peer.stats.reliable_retries.fetch_add(due.len() as u64, Ordering::Relaxed);
                let mut outbound = peer.outbound.lock();
                for payload in due {
                    outbound.push(Priority::Reliable, payload);
                }
            }
        }
    }
}

/// Reported errors that surface at transport construction, kept separate
/// from the per-datagram [`ProtoError`] path so callers can tell a fatal
/// bind failure from a routine malformed-packet drop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no listener could be bound")]
    NoListenersBound,
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;
    use zone_proto::CoreSubtype;

    struct CountingHandler(Arc<AtomicUsize>);
    impl PacketHandler for CountingHandler {
        fn handle(&self, _peer: &Arc<Peer>, _type_id: u8, _payload: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn bind_succeeds_for_an_ephemeral_port() {
        let broker = Broker::new_global();
        let good = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
        let transport = Transport::bind(TransportConfig::default(), &[good], broker).unwrap();
        assert_eq!(transport.listeners.len(), 1);
    }

    #[test]
    fn bind_skips_a_listener_that_collides_with_another() {
        let broker = Broker::new_global();
        let first = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let taken = first.local_addr().unwrap();
        let transport = Transport::bind(TransportConfig::default(), &[taken], broker).unwrap();
        assert!(transport.listeners.is_empty());
    }

    #[test]
    fn cancel_sized_request_flushes_queue_head_and_acks_reliably() {
        let broker = Broker::new_global();
        let transport =
            Transport::bind(TransportConfig::default(), &[SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)], broker)
                .unwrap();
        let peer = transport.peer_or_insert(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9999), 0, Instant::now());

        let finish_calls = Arc::new(AtomicUsize::new(0));
        let counter = finish_calls.clone();
        transport.send_sized(
            &peer,
            1_048_576,
            Box::new(move |_offset, len| {
                if len == 0 {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                vec![0u8; len]
            }),
        );
        {
            // simulate 200 KiB already having been pulled before the cancel arrives
            let mut state = peer.big_sized.lock();
            let send = state.sized_send_queue.front_mut().unwrap();
            let _ = send.pull(200 * 1024);
        }

        transport.handle_core_packet(&peer, CorePacket::CancelSizedRequest);

        assert!(peer.big_sized.lock().sized_send_queue.is_empty());
        assert_eq!(finish_calls.load(Ordering::SeqCst), 1);
        assert_eq!(peer.reliable.lock().outlist.outstanding_count(), 1);
    }

    #[test]
    fn duplicate_reliable_packet_is_counted_and_still_acked() {
        let broker = Broker::new_global();
        let transport =
            Transport::bind(TransportConfig::default(), &[SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)], broker)
                .unwrap();
        let peer = transport.peer_or_insert(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9998), 0, Instant::now());

        transport.handle_core_packet(&peer, CorePacket::Reliable { seqnum: 0, inner: &[0x01] });
        transport.handle_core_packet(&peer, CorePacket::Reliable { seqnum: 0, inner: &[0x01] });

        assert_eq!(peer.stats.duplicate_reliable.load(Ordering::SeqCst), 1);
        // Both arrivals, including the duplicate, still get acked.
        let ack_count = peer.outbound.lock().queues[4].len();
        assert_eq!(ack_count, 2);
    }

    #[test]
    fn time_sync_response_reflects_elapsed_server_time() {
        let broker = Broker::new_global();
        let transport =
            Transport::bind(TransportConfig::default(), &[SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)], broker)
                .unwrap();
        let peer = transport.peer_or_insert(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9997), 0, Instant::now());

        std::thread::sleep(Duration::from_millis(20));
        transport.handle_core_packet(&peer, CorePacket::TimeSyncRequest { time: 42, pkt_sent: 0, pkt_recvd: 0 });

        let reply = peer.outbound.lock().queues[4].pop_front().unwrap();
        let server_time = u32::from_le_bytes(reply[6..10].try_into().unwrap());
        assert!(server_time >= 20);
    }

    #[test]
    fn registered_handler_is_reachable_by_type_id() {
        let broker = Broker::new_global();
        let transport =
            Transport::bind(TransportConfig::default(), &[SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)], broker)
                .unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        transport.register_handler(0x09, Arc::new(CountingHandler(count.clone())));
        assert!(transport.handlers.read().contains_key(&0x09));
    }

    #[test]
    fn send_big_chunks_an_oversized_payload_into_continuations_and_a_final() {
        let broker = Broker::new_global();
        let transport =
            Transport::bind(TransportConfig::default(), &[SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)], broker)
                .unwrap();
        let peer = transport.peer_or_insert(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9996), 0, Instant::now());

        let payload = vec![7u8; MAX_DATAGRAM * 2 + 10];
        transport.send_big(&peer, &payload);

        // index 1 is the `Unreliable` queue (see `OutboundState`'s priority ordering).
        let queued: Vec<_> = peer.outbound.lock().queues[1].drain(..).collect();
        assert!(queued.len() >= 3);
        for chunk in &queued[..queued.len() - 1] {
            assert_eq!(chunk[1], CoreSubtype::BigDataContinue as u8);
        }
        assert_eq!(queued.last().unwrap()[1], CoreSubtype::BigDataFinal as u8);
    }

    #[test]
    fn idle_peer_gets_a_lag_notice_and_disconnect_before_being_reaped() {
        let broker = Broker::new_global();
        let transport =
            Transport::bind(TransportConfig::default(), &[SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)], broker)
                .unwrap();
        let client_socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        client_socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let client_addr = client_socket.local_addr().unwrap();

        let long_ago = Instant::now() - Duration::from_secs(60);
        let _peer = transport.peer_or_insert(client_addr, 0, long_ago);

        transport.reap_idle_peers(Instant::now());

        let mut buf = [0u8; 512];
        let (len, _) = client_socket.recv_from(&mut buf).expect("lag notice");
        assert_eq!(&buf[..len], b"You have been disconnected because of lag");
        let (len, _) = client_socket.recv_from(&mut buf).expect("disconnect packet");
        assert_eq!(&buf[..len], &encode_disconnect()[..]);
        assert!(transport.peer(&client_addr).is_none());
    }
}
