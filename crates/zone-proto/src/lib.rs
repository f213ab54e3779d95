//! Wire format for the zone server's UDP protocol.
//!
//! This crate is pure data and parsing: it knows how to tell a core packet
//! from an application packet, how to decode each core subtype's payload,
//! and how to parse/format arena names. It performs no I/O and holds no
//! connection state — that lives in `zone-net` and `zone-core`.

mod arena_name;
mod core_packet;
mod cursor;
mod exit_code;
mod player_flags;
mod priority;

pub use arena_name::{create_arena_name, parse_arena_name, ArenaNameError, PUBLIC_ARENA_BASE};
pub use core_packet::{
    encode_ack, encode_big_data, encode_cancel_sized_ack, encode_cancel_sized_request, encode_disconnect,
    encode_grouped, encode_reliable, encode_sized, encode_time_sync_response, parse_datagram, CorePacket,
    CoreSubtype, ParsedPacket, ProtoError,
};
pub use exit_code::ExitCode;
pub use player_flags::PlayerFlags;
pub use priority::Priority;

/// Largest datagram the transport will ever send or accept.
pub const MAX_DATAGRAM: usize = 520;

/// Largest payload a single element of a grouped packet may carry.
pub const MAX_GROUPED_ELEMENT: usize = 255;

/// Default size of the reliable reorder window, `W`.
pub const DEFAULT_RELIABLE_WINDOW: usize = 32;

/// Hard cap on a reassembled big-packet buffer.
pub const MAX_BIG_PACKET: usize = 256 * 1024;

/// Maximum length of an arena name, including any trailing digit run.
pub const MAX_ARENA_NAME: usize = 16;

/// First byte of every core packet.
pub const CORE_PACKET_MARKER: u8 = 0x00;
