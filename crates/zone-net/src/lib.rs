//! The reliable UDP transport: bandwidth shaping, per-peer connection
//! state, and the listener/dispatch threads that move bytes between the
//! wire (`zone_proto`) and application handlers.

mod limiter;
mod peer;
mod ping;
mod reliable;
mod transport;

pub use limiter::{BandwidthLimiter, DEFAULT_RATE_BPS, MAX_RATE_BPS, MIN_RATE_BPS};
pub use peer::{BigSizedState, IncomingAssembly, OutboundState, Peer, PeerStats, ReliableState, SizedDataSource, SizedSend};
pub use ping::{PingCounters, PingResponder};
pub use reliable::{AcceptOutcome, ReliableOutlist, ReorderWindow, RttEstimator};
pub use transport::{HandlerRegistration, PacketHandler, Transport, TransportConfig, TransportError};
