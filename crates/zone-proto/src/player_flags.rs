//! The player status bitset carried in player-info updates.

bitflags::bitflags! {
    /// Per-player status bits, sent to other clients as part of player-info
    /// updates. Named after what each bit gates, not its wire position.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PlayerFlags: u16 {
        const AUTHENTICATED              = 1 << 0;
        const DURING_CHANGE               = 1 << 1;
        const WANT_ALL_LVZ                = 1 << 2;
        const DURING_QUERY                = 1 << 3;
        const NO_SHIP                     = 1 << 4;
        const NO_FLAGS_BALLS              = 1 << 5;
        const SENT_POSITION               = 1 << 6;
        const SENT_WEAPON                 = 1 << 7;
        const SEE_ALL_POSITIONS           = 1 << 8;
        const SEE_OWN_POSITION            = 1 << 9;
        const LEAVE_ARENA_WHEN_DONE_WAITING = 1 << 10;
        const OBSCENITY_FILTER            = 1 << 11;
        const IS_DEAD                     = 1 << 12;
    }
}
