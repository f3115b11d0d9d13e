//! The connection abstraction and its five concrete implementations: the
//! uniform send/receive/status/quality contract every transport honors, and
//! the liveness-probe machinery shared across all of them.

pub mod connection;
pub mod direct_stream;
pub mod factory;
pub mod lan_broadcast;
pub mod polling;
pub mod probe;
pub mod relayed_media;
pub mod rendezvous;
pub mod stun;
pub mod stun_media;
pub mod types;

pub use connection::{Connection, ConnectionState, IncomingSlot, SharedConnection, INBOUND_CHANNEL_CAPACITY};
pub use direct_stream::{DirectStreamConnection, DirectStreamFactory};
pub use factory::Factory;
pub use lan_broadcast::{LanBroadcastConnection, LanBroadcastFactory};
pub use polling::{PollingConnection, PollingFactory};
pub use relayed_media::{RelayedMediaConnection, RelayedMediaFactory};
pub use rendezvous::{NullRendezvous, RendezvousChannel};
pub use stun_media::{StunMediaConnection, StunMediaFactory};
pub use types::{ConnectionStatus, ConnectionType};
