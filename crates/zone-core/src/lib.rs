//! Player and arena lifecycle management: the Player Registry (C4), the
//! Arena Registry & Scheduler (C5), the mainloop (C6), and the Connection
//! Orchestrator (C7) that ties them together.

mod arena;
mod arena_registry;
mod arena_state;
mod mainloop;
mod orchestrator;
mod player;
mod player_registry;
mod player_state;

pub use arena::Arena;
pub use arena_registry::ArenaRegistry;
pub use arena_state::{conf_changed_applies, ArenaAction, ArenaState};
pub use mainloop::{Mainloop, WorkPoster};
pub use orchestrator::{AuthOutcome, ConnectionOrchestrator, EnterGame, PlayerConnected};
pub use player::{Player, PlayerId, MAX_NAME_LEN};
pub use player_registry::PlayerRegistry;
pub use player_state::{leave_request, LeaveOutcome, PlayerState};
