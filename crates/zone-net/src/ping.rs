//! Ping responder: a tiny dedicated listener on `game_port + 1` that
//! answers connectionless "how many players/how loaded is this zone"
//! queries without touching the game transport's own socket.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

/// Counters the responder reports back, refreshed by the caller on
/// whatever cadence `Net:PingDataRefreshTime` configures — the responder
/// itself never computes these, only serves the latest snapshot.
#[derive(Default)]
pub struct PingCounters {
    pub total_players: AtomicU32,
}

pub struct PingResponder {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PingResponder {
    pub fn spawn(socket: UdpSocket, counters: Arc<PingCounters>) -> std::io::Result<Self> {
        socket.set_read_timeout(Some(std::time::Duration::from_millis(200)))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();

        let handle = std::thread::Builder::new()
            .name("zone-net-ping".into())
            .spawn(move || {
                let mut buf = [0u8; 4];
                while !thread_shutdown.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, from)) => {
                            if len < 4 {
                                continue;
                            }
                            let players = counters.total_players.load(Ordering::Relaxed);
                            let mut reply = [0u8; 8];
                            reply[0..4].copy_from_slice(&players.to_le_bytes());
                            reply[4..8].copy_from_slice(&buf[0..4]);
                            if let Err(err) = socket.send_to(&reply, from) {
                                debug!(%from, %err, "ping reply send failed");
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                        Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(err) => {
                            warn!(%err, "ping responder socket error");
                        }
                    }
                }
            })?;

        Ok(Self { shutdown, handle: Some(handle) })
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
