use std::fmt;

use serde::{Deserialize, Serialize};

/// The five connection families the layered manager arbitrates between.
/// Fixed priorities per the specification: higher wins the stagger race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    StunMedia,
    RelayedMedia,
    DirectStream,
    Polling,
    LanBroadcast,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 5] = [
        ConnectionType::StunMedia,
        ConnectionType::RelayedMedia,
        ConnectionType::DirectStream,
        ConnectionType::Polling,
        ConnectionType::LanBroadcast,
    ];

    /// Fixed priority per §3: higher values are attempted first and with
    /// no stagger delay.
    pub fn priority(self) -> i32 {
        match self {
            ConnectionType::StunMedia => 100,
            ConnectionType::RelayedMedia => 80,
            ConnectionType::DirectStream => 60,
            ConnectionType::Polling => 40,
            ConnectionType::LanBroadcast => 20,
        }
    }

    /// Liveness-probe cadence per §5.
    pub fn probe_interval(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            ConnectionType::StunMedia => Duration::from_secs(5),
            ConnectionType::RelayedMedia => Duration::from_secs(15),
            ConnectionType::DirectStream => Duration::from_secs(5),
            ConnectionType::Polling => Duration::from_secs(10),
            ConnectionType::LanBroadcast => Duration::from_secs(10),
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionType::StunMedia => "stun-media",
            ConnectionType::RelayedMedia => "relayed-media",
            ConnectionType::DirectStream => "direct-stream",
            ConnectionType::Polling => "polling",
            ConnectionType::LanBroadcast => "lan-broadcast",
        };
        f.write_str(name)
    }
}

/// The lifecycle every connection publishes. `Failed` is terminal and
/// implies the outgoing side is closed; `Disconnected` is reachable from
/// cancellation and is not terminal in the sense of ruling out a future
/// promotion, but a disconnected connection is never reused — the manager
/// simply drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Failed)
    }
}
