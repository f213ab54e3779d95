//! Connection Orchestrator (C7): owns the endpoint→player uniqueness map
//! and drives every player through its lifecycle, consulting external
//! authentication, persistence, and the arena registry as it goes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use zone_broker::Broker;
use zone_proto::PlayerFlags;

use crate::arena_registry::ArenaRegistry;
use crate::player::Player;
use crate::player_registry::PlayerRegistry;
use crate::player_state::{leave_request, PlayerState};

/// Outcome of authenticating a player, reported by an external
/// authenticator component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    RetryAllowed,
    Fatal,
}

/// Drives connections from first packet through teardown. Holds no
/// transport state itself — it is handed players and endpoints by the
/// transport layer and by packet handlers.
pub struct ConnectionOrchestrator {
    endpoint_to_player: RwLock<HashMap<SocketAddr, u32>>,
    players: Arc<PlayerRegistry>,
    arenas: Arc<ArenaRegistry>,
    broker: Arc<Broker>,
}

impl ConnectionOrchestrator {
    pub fn new(players: Arc<PlayerRegistry>, arenas: Arc<ArenaRegistry>, broker: Arc<Broker>) -> Self {
        Self { endpoint_to_player: RwLock::new(HashMap::new()), players, arenas, broker }
    }

    /// A transport "new peer" event: return the existing player if this
    /// endpoint is already known and still `Connected`, force-kick it if it
    /// reappears from a later state, or allocate a fresh player.
    pub fn on_new_peer(&self, endpoint: SocketAddr) -> Arc<Player> {
        if let Some(&id) = self.endpoint_to_player.read().get(&endpoint) {
            if let Some(existing) = self.players.get(id) {
                let state = *existing.state.lock();
                if state == PlayerState::Connected {
                    return existing;
                }
                warn!(%endpoint, ?state, "peer reappeared mid-session; force-kicking prior player");
                self.force_kick(&existing);
            }
        }

        let player = self.players.allocate(endpoint);
        *player.state.lock() = PlayerState::Connected;
        self.endpoint_to_player.write().insert(endpoint, player.id);
        info!(%endpoint, id = player.id, "player connected");
        player
    }

    pub fn on_first_login_packet(&self, player: &Arc<Player>) {
        let mut state = player.state.lock();
        if *state == PlayerState::Connected {
            *state = PlayerState::NeedAuth;
        }
    }

    /// Called once an authenticator has been asked to validate the player
    /// (`WaitAuth`) and has produced an outcome.
    pub fn on_auth_result(&self, player: &Arc<Player>, outcome: AuthOutcome) {
        let mut state = player.state.lock();
        *state = match outcome {
            AuthOutcome::Success => {
                player.set_flag(PlayerFlags::AUTHENTICATED);
                PlayerState::NeedGlobalSync
            }
            AuthOutcome::RetryAllowed => PlayerState::Connected,
            AuthOutcome::Fatal => PlayerState::LeavingZone,
        };
    }

    pub fn begin_auth(&self, player: &Arc<Player>) {
        let mut state = player.state.lock();
        if *state == PlayerState::NeedAuth {
            *state = PlayerState::WaitAuth;
        }
    }

    /// Drive the purely-internal transitions that don't wait on an
    /// external system: `NeedGlobalSync → WaitGlobalSync1`,
    /// `DoGlobalCallbacks → WaitConnectHolds` (firing "player connect"
    /// callbacks), and — once holds clear — `SendLoginResponse → LoggedIn`.
    pub fn pump(&self, player: &Arc<Player>) {
        let mut state = player.state.lock();
        match *state {
            PlayerState::NeedGlobalSync => *state = PlayerState::WaitGlobalSync1,
            PlayerState::WaitGlobalSync1 => *state = PlayerState::DoGlobalCallbacks,
            PlayerState::DoGlobalCallbacks => {
                drop(state);
                self.broker.invoke_callback(&PlayerConnected { player: player.clone() });
                *player.state.lock() = PlayerState::WaitConnectHolds;
            }
            PlayerState::WaitConnectHolds => {
                if player.holds() == 0 {
                    *state = PlayerState::SendLoginResponse;
                }
            }
            PlayerState::SendLoginResponse => *state = PlayerState::LoggedIn,
            PlayerState::WaitDisconnectHolds => {
                if player.holds() == 0 {
                    *state = PlayerState::WaitGlobalSync2;
                }
            }
            PlayerState::WaitGlobalSync2 => *state = PlayerState::TimeWait,
            PlayerState::LeavingZone => *state = PlayerState::WaitDisconnectHolds,
            PlayerState::LeavingArena => *state = PlayerState::DoArenaSync2,
            PlayerState::DoArenaSync2 => *state = PlayerState::WaitArenaSync2,
            PlayerState::WaitArenaSync2 => {
                *player.arena.lock() = None;
                player.clear_flag(PlayerFlags::SENT_POSITION | PlayerFlags::SENT_WEAPON | PlayerFlags::IS_DEAD);
                *state = PlayerState::LoggedIn;
            }
            PlayerState::TimeWait => {
                drop(state);
                self.finish_timewait(player);
            }
            _ => {}
        }
    }

    /// A player in `LoggedIn` requests to enter `arena_name`.
    pub fn request_arena(&self, player: &Arc<Player>, arena_name: &str) {
        let mut state = player.state.lock();
        if *state != PlayerState::LoggedIn {
            return;
        }
        *state = PlayerState::DoFreqAndArenaSync;
        *player.arena.lock() = Some(arena_name.to_string());
        self.arenas.find_or_create(arena_name).player_count.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    /// Drive the arena-entry sub-sequence forward one step. `ArenaRespAndCBS`
    /// is a fixed point here: it only advances to `Playing` on the first
    /// position packet, via [`ConnectionOrchestrator::on_first_position_packet`].
    pub fn pump_arena_entry(&self, player: &Arc<Player>) {
        let mut state = player.state.lock();
        match *state {
            PlayerState::DoFreqAndArenaSync => *state = PlayerState::WaitArenaSync1,
            PlayerState::WaitArenaSync1 => *state = PlayerState::ArenaRespAndCBS,
            _ => {}
        }
    }

    /// First position packet received while entering an arena: completes
    /// entry and fires `EnterGame`.
    pub fn on_first_position_packet(&self, player: &Arc<Player>) {
        let mut state = player.state.lock();
        if *state == PlayerState::ArenaRespAndCBS {
            *state = PlayerState::Playing;
            drop(state);
            player.set_flag(PlayerFlags::SENT_POSITION);
            self.broker.invoke_callback(&EnterGame { player: player.clone() });
        }
    }

    /// Request that `player` leave (its current arena, or the zone
    /// entirely if not in one). Applies the leave-while-entering rewind
    /// table; a `None` result means the request must be deferred until the
    /// in-flight wait resolves.
    pub fn request_leave(&self, player: &Arc<Player>) -> bool {
        let mut state = player.state.lock();
        if !state.arena_is_valid() {
            *state = PlayerState::LeavingZone;
            return true;
        }
        match leave_request(*state) {
            Some(outcome) => {
                *state = outcome.new_state;
                true
            }
            None => false,
        }
    }

    fn force_kick(&self, player: &Arc<Player>) {
        *player.state.lock() = PlayerState::LeavingZone;
    }

    fn finish_timewait(&self, player: &Arc<Player>) {
        self.endpoint_to_player.write().remove(&player.endpoint);
        self.players.retire(player.id);
        info!(id = player.id, "player retired after TimeWait");
    }
}

/// Fired via the broker once a player completes global sync, before
/// `WaitConnectHolds` — the general "a player connected" notification.
pub struct PlayerConnected {
    pub player: Arc<Player>,
}

/// Fired via the broker when a player's first position packet lands.
pub struct EnterGame {
    pub player: Arc<Player>,
}
