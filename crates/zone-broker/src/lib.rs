//! The process-wide component broker and the typed extra-data slot
//! allocator it shares with the player and arena registries.

mod broker;
mod extradata;

pub use broker::{Broker, Handle, RegistrationToken, UnregisterResult};
pub use extradata::{ExtraDataSlots, Key, SlotRegistry};
