mod cli;
mod config;
mod logging;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use zone_broker::{Broker, SlotRegistry};
use zone_core::{ArenaRegistry, ConnectionOrchestrator, Mainloop, PlayerRegistry};
use zone_net::{PingCounters, PingResponder, Transport, TransportConfig};
use zone_proto::ExitCode;

use crate::cli::Cli;
use crate::config::{RawConfig, ZoneConfig};

fn main() {
    logging::init();
    let cli = Cli::parse();

    let raw = match RawConfig::load(&cli.config) {
        Ok(raw) => raw,
        Err(err) => {
            error!(%err, "falling back to defaults: could not read config file");
            RawConfig::parse("")
        }
    };

    let mut zone_config = match ZoneConfig::from_raw(&raw) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "fatal configuration error");
            std::process::exit(ExitCode::General.code());
        }
    };

    if let Some(port) = cli.port {
        if let Some(primary) = zone_config.listeners.first_mut() {
            primary.port = port;
        }
    }

    let exit_code = run(zone_config, cli.dry_run);
    std::process::exit(exit_code.code());
}

fn run(zone_config: ZoneConfig, dry_run: bool) -> ExitCode {
    let global_broker = Broker::new_global();
    let player_extra_slots = Arc::new(SlotRegistry::new());
    let arena_extra_slots = Arc::new(SlotRegistry::new());

    let players = Arc::new(PlayerRegistry::new(player_extra_slots));
    let arenas = Arc::new(ArenaRegistry::new(global_broker.clone(), arena_extra_slots));
    // Packet handlers that drive the orchestrator are registered with
    // `transport` by the game-logic layer; this crate wires the transport
    // and scheduling plumbing the orchestrator depends on.
    let _orchestrator = Arc::new(ConnectionOrchestrator::new(players.clone(), arenas.clone(), global_broker.clone()));

    let listener_addrs: Vec<SocketAddr> = zone_config
        .listeners
        .iter()
        .map(|l| SocketAddr::new(l.bind_address, l.port))
        .collect();

    let transport_config = TransportConfig {
        drop_timeout: Duration::from_millis(zone_config.net.drop_timeout_ms),
        max_outlist_size: zone_config.net.max_outlist_size as usize,
        max_retries: zone_config.net.max_retries as u32,
        per_packet_overhead: zone_config.net.per_packet_overhead as usize,
        reliable_threads: zone_config.net.reliable_threads as usize,
        send_sweep_interval: Duration::from_millis(10),
    };

    let transport = match Transport::bind(transport_config, &listener_addrs, global_broker.clone()) {
        Ok(transport) => transport,
        Err(err) => {
            error!(%err, "failed to bind transport");
            return ExitCode::General;
        }
    };

    if transport.peer_count() == 0 {
        info!("transport has no connected peers at startup (expected)");
    }

    let ping_counters = Arc::new(PingCounters::default());
    let ping_responder = zone_config.listeners.first().and_then(|primary| {
        let ping_addr = SocketAddr::new(primary.bind_address, primary.port + 1);
        match std::net::UdpSocket::bind(ping_addr) {
            Ok(socket) => PingResponder::spawn(socket, ping_counters.clone()).ok(),
            Err(err) => {
                error!(%ping_addr, %err, "could not bind ping responder port");
                None
            }
        }
    });

    let _net_threads = transport.spawn_threads(zone_config.net.reliable_threads.max(1) as usize);

    let mut mainloop = Mainloop::new();
    let quitter = mainloop.quitter();

    {
        let arenas = arenas.clone();
        mainloop.add_timer(Duration::from_millis(20), Duration::from_millis(20), move || {
            arenas.tick_all();
            true
        });
    }
    {
        let arenas = arenas.clone();
        let players = players.clone();
        mainloop.add_timer(Duration::from_millis(1700), Duration::from_millis(1700), move || {
            let players = players.clone();
            arenas.reap(move |arena_name| {
                let mut entering = false;
                players.for_each(|p| {
                    if p.arena.lock().as_deref() == Some(arena_name) {
                        entering = true;
                    }
                });
                entering
            });
            true
        });
    }
    {
        let ping_counters = ping_counters.clone();
        let players = players.clone();
        mainloop.add_timer(Duration::from_millis(200), Duration::from_millis(200), move || {
            ping_counters.total_players.store(players.len() as u32, std::sync::atomic::Ordering::Relaxed);
            true
        });
    }

    if dry_run {
        let _ = quitter.send(ExitCode::None);
    } else {
        info!(listeners = listener_addrs.len(), "zone server running");
    }

    let code = mainloop.run_loop();

    transport.request_shutdown();
    if let Some(responder) = ping_responder {
        responder.shutdown();
    }

    code
}
