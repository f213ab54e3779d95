//! Arena lifecycle states and the broker action events fired at fixed
//! points along the way.

/// An arena's position in its create → run → destroy lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaState {
    Uninitialized,
    DoInit0,
    WaitHolds0,
    DoInit1,
    WaitHolds1,
    DoInit2,
    WaitSync1,
    Running,
    Closing,
    DoWriteData,
    WaitSync2,
    DoDestroy1,
    WaitHolds2,
    DoDestroy2,
    Destroyed,
}

impl ArenaState {
    pub fn is_hold_gated(self) -> bool {
        matches!(self, ArenaState::WaitHolds0 | ArenaState::WaitHolds1 | ArenaState::WaitHolds2)
    }

    /// The state an arena moves to once its holds clear, for states where
    /// that's the only way forward.
    pub fn next_after_holds(self) -> Option<ArenaState> {
        match self {
            ArenaState::WaitHolds0 => Some(ArenaState::DoInit1),
            ArenaState::WaitHolds1 => Some(ArenaState::DoInit2),
            ArenaState::WaitHolds2 => Some(ArenaState::DoDestroy2),
            _ => None,
        }
    }
}

/// A broker-wide event fired at a fixed point in the arena lifecycle. The
/// orchestrator invokes `Broker::invoke_callback` with one of these at the
/// point named in its doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaAction {
    /// Between `DoInit0` and `WaitHolds0`.
    PreCreate,
    /// On a config file change notification, only while `Running`.
    ConfChanged,
    /// Between `DoInit1` and `WaitHolds1`.
    Create,
    /// Between `DoDestroy1` and `WaitHolds2`.
    Destroy,
    /// After `DoDestroy2`, whether or not the arena is about to recycle.
    PostDestroy,
}

/// Whether `ConfChanged` may fire given the arena's current state —
/// config-reload notifications outside `Running` are dropped, not queued.
pub fn conf_changed_applies(state: ArenaState) -> bool {
    state == ArenaState::Running
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_gated_states_resolve_to_the_right_successor() {
        assert_eq!(ArenaState::WaitHolds0.next_after_holds(), Some(ArenaState::DoInit1));
        assert_eq!(ArenaState::WaitHolds1.next_after_holds(), Some(ArenaState::DoInit2));
        assert_eq!(ArenaState::WaitHolds2.next_after_holds(), Some(ArenaState::DoDestroy2));
        assert_eq!(ArenaState::Running.next_after_holds(), None);
    }

    #[test]
    fn conf_changed_only_applies_while_running() {
        assert!(conf_changed_applies(ArenaState::Running));
        assert!(!conf_changed_applies(ArenaState::Closing));
        assert!(!conf_changed_applies(ArenaState::DoInit2));
    }
}
