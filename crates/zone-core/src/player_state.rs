//! Player lifecycle states and the leave-while-entering rewind rule
//! (the Connection Orchestrator's core state machine).

/// A player's position in its connect → play → disconnect lifecycle.
/// Transitions are driven by the connection orchestrator; every variant
/// here corresponds to one named state in the canonical progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    Uninitialized,
    Connected,
    NeedAuth,
    WaitAuth,
    NeedGlobalSync,
    WaitGlobalSync1,
    DoGlobalCallbacks,
    WaitConnectHolds,
    SendLoginResponse,
    LoggedIn,
    DoFreqAndArenaSync,
    WaitArenaSync1,
    ArenaRespAndCBS,
    Playing,
    LeavingArena,
    DoArenaSync2,
    WaitArenaSync2,
    LeavingZone,
    WaitDisconnectHolds,
    WaitGlobalSync2,
    TimeWait,
}

impl PlayerState {
    /// Whether `player.arena` is a meaningful value in this state — only
    /// true from arena-entry start through arena-leave completion.
    pub fn arena_is_valid(self) -> bool {
        matches!(
            self,
            PlayerState::DoFreqAndArenaSync
                | PlayerState::WaitArenaSync1
                | PlayerState::ArenaRespAndCBS
                | PlayerState::Playing
                | PlayerState::LeavingArena
                | PlayerState::DoArenaSync2
                | PlayerState::WaitArenaSync2
        )
    }

    /// States whose advancement is gated on an external hold counter
    /// reaching zero.
    pub fn is_hold_gated(self) -> bool {
        matches!(self, PlayerState::WaitConnectHolds | PlayerState::WaitDisconnectHolds)
    }
}

/// Outcome of requesting that a player leave while mid arena-entry: the new
/// state to move to, and whether peers in the (partially entered) arena
/// should be notified of the departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub new_state: PlayerState,
    pub notify_peers: bool,
}

/// A leave request arrived mid-flight; mark that the player should leave
/// the arena as soon as its current wait completes, rather than rewinding
/// immediately (used for `WaitArenaSync1`, which cannot be safely
/// interrupted once started).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredLeave;

/// Apply the leave-while-entering rewind table to a leave request issued
/// while `current` holds. `None` means the leave cannot rewind this state
/// immediately and instead must be recorded as a deferred flag — the
/// caller is expected to check `current == PlayerState::WaitArenaSync1`
/// when this returns `None`.
pub fn leave_request(current: PlayerState) -> Option<LeaveOutcome> {
    match current {
        PlayerState::LoggedIn | PlayerState::DoFreqAndArenaSync => {
            Some(LeaveOutcome { new_state: PlayerState::LoggedIn, notify_peers: false })
        }
        PlayerState::WaitArenaSync1 => None,
        PlayerState::ArenaRespAndCBS => {
            Some(LeaveOutcome { new_state: PlayerState::DoArenaSync2, notify_peers: false })
        }
        PlayerState::Playing => {
            Some(LeaveOutcome { new_state: PlayerState::LeavingArena, notify_peers: true })
        }
        PlayerState::LeavingArena
        | PlayerState::DoArenaSync2
        | PlayerState::WaitArenaSync2
        | PlayerState::LeavingZone
        | PlayerState::WaitDisconnectHolds
        | PlayerState::WaitGlobalSync2
        | PlayerState::TimeWait => None,
        other => Some(LeaveOutcome { new_state: other, notify_peers: false }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_from_logged_in_states_is_a_no_op_rewind() {
        let outcome = leave_request(PlayerState::LoggedIn).unwrap();
        assert_eq!(outcome, LeaveOutcome { new_state: PlayerState::LoggedIn, notify_peers: false });
    }

    #[test]
    fn leave_during_wait_arena_sync1_must_be_deferred() {
        assert_eq!(leave_request(PlayerState::WaitArenaSync1), None);
    }

    #[test]
    fn leave_from_arena_resp_and_cbs_rewinds_to_arena_sync2() {
        let outcome = leave_request(PlayerState::ArenaRespAndCBS).unwrap();
        assert_eq!(outcome.new_state, PlayerState::DoArenaSync2);
        assert!(!outcome.notify_peers);
    }

    #[test]
    fn leave_while_playing_notifies_peers() {
        let outcome = leave_request(PlayerState::Playing).unwrap();
        assert_eq!(outcome.new_state, PlayerState::LeavingArena);
        assert!(outcome.notify_peers);
    }

    #[test]
    fn leave_after_leaving_arena_has_already_started_does_not_change() {
        assert_eq!(leave_request(PlayerState::LeavingArena), None);
        assert_eq!(leave_request(PlayerState::WaitGlobalSync2), None);
    }

    #[test]
    fn arena_only_valid_during_entry_through_leave() {
        assert!(!PlayerState::LoggedIn.arena_is_valid());
        assert!(PlayerState::DoFreqAndArenaSync.arena_is_valid());
        assert!(PlayerState::Playing.arena_is_valid());
        assert!(!PlayerState::TimeWait.arena_is_valid());
    }
}
