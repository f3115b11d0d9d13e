//! Manager-internal per-peer state: the current primary, any retained
//! backups, and the rolling quality/latency history the health monitor
//! appends to every tick.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use meshline_connection::{ConnectionType, SharedConnection};
use meshline_core::Timestamp;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Fixed-size ring depth for quality/latency history per §9 design notes.
const HISTORY_DEPTH: usize = 10;

pub struct PeerConnection {
    pub peer_id: String,
    pub primary: RwLock<Option<SharedConnection>>,
    pub backups: DashMap<ConnectionType, SharedConnection>,
    pub last_message_at: RwLock<Option<Timestamp>>,
    pub quality_history: RwLock<VecDeque<u8>>,
    pub latency_history: RwLock<VecDeque<Duration>>,
    /// Cancels this peer's health monitor; fired by `close()` so a closed
    /// peer's monitor doesn't fire a second `on_disconnect`.
    pub cancel: CancellationToken,
}

impl PeerConnection {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            primary: RwLock::new(None),
            backups: DashMap::new(),
            last_message_at: RwLock::new(None),
            quality_history: RwLock::new(VecDeque::with_capacity(HISTORY_DEPTH)),
            latency_history: RwLock::new(VecDeque::with_capacity(HISTORY_DEPTH)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.primary.read().is_some()
    }

    pub fn record_message(&self) {
        *self.last_message_at.write() = Some(Timestamp::now());
    }

    /// Appends a history sample, trimming to the last [`HISTORY_DEPTH`].
    pub fn record_history(&self, quality: u8, latency: Duration) {
        let mut qualities = self.quality_history.write();
        qualities.push_back(quality);
        if qualities.len() > HISTORY_DEPTH {
            qualities.pop_front();
        }
        let mut latencies = self.latency_history.write();
        latencies.push_back(latency);
        if latencies.len() > HISTORY_DEPTH {
            latencies.pop_front();
        }
    }

    /// Replaces any existing backup of the same type, returning the
    /// displaced connection so the caller can close it.
    pub fn insert_backup(&self, conn: SharedConnection) -> Option<SharedConnection> {
        self.backups.insert(conn.connection_type(), conn)
    }

    pub fn highest_quality_backup(&self) -> Option<SharedConnection> {
        self.backups.iter().max_by_key(|entry| entry.value().quality()).map(|entry| entry.value().clone())
    }

    pub fn remove_backup(&self, conn_type: ConnectionType) -> Option<SharedConnection> {
        self.backups.remove(&conn_type).map(|(_, conn)| conn)
    }
}
