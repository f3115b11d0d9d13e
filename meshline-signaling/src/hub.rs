//! Room-scoped fan-out: a mapping from room name to the set of currently
//! connected clients, each identified by an application-supplied
//! `peer_id`. Rooms are created on first join and deleted on last leave.

use std::sync::Arc;

use dashmap::DashMap;
use meshline_core::SignalingError;
use meshline_storage::PersistentMessageLog;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, ServerNotification};

/// Bounded, lossy per-client outbound queue: a stalled client drops
/// messages (and is disconnected by its writer task) rather than blocking
/// the hub.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Outbound frames pushed to a client's writer task: either a relayed
/// envelope or a server notification, both serialized to a single text
/// frame.
pub type OutboundSender = mpsc::Sender<String>;

struct Room {
    members: DashMap<String, OutboundSender>,
}

impl Room {
    fn new() -> Self {
        Self { members: DashMap::new() }
    }
}

pub struct SignalingHub {
    rooms: DashMap<String, Arc<Room>>,
    log: Arc<PersistentMessageLog>,
}

impl SignalingHub {
    pub fn new(log: Arc<PersistentMessageLog>) -> Self {
        Self { rooms: DashMap::new(), log }
    }

    /// Registers `peer_id` in `room`, returning the receiving half of its
    /// outbound queue. Pre-existing members are immediately notified of
    /// the join; the new peer is not told about them.
    pub fn join(&self, room: &str, peer_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let room_handle = self.rooms.entry(room.to_string()).or_insert_with(|| Arc::new(Room::new())).clone();

        let notification = ServerNotification::PeerJoined { peer_id: peer_id.to_string(), room: room.to_string() };
        let Ok(encoded) = serde_json::to_string(&notification) else {
            warn!(room, peer_id, "failed to encode peer_joined notification");
            room_handle.members.insert(peer_id.to_string(), tx);
            return rx;
        };

        for existing in room_handle.members.iter() {
            if existing.try_send(encoded.clone()).is_err() {
                warn!(room, peer_id = existing.key(), "dropping peer_joined: outbound buffer full");
            }
        }

        room_handle.members.insert(peer_id.to_string(), tx);
        info!(room, peer_id, members = room_handle.members.len(), "peer joined signaling room");
        rx
    }

    /// Removes `peer_id` from `room`; deletes the room if it becomes
    /// empty.
    pub fn leave(&self, room: &str, peer_id: &str) {
        if let Some(room_handle) = self.rooms.get(room) {
            room_handle.members.remove(peer_id);
            let now_empty = room_handle.members.is_empty();
            drop(room_handle);
            if now_empty {
                self.rooms.remove(room);
            }
        }
        info!(room, peer_id, "peer left signaling room");
    }

    /// Persists the envelope with `type="signal"`, then routes it: to a
    /// single target if `target_peer_id` is set, otherwise fanned out to
    /// every other room member. A full target buffer is logged and the
    /// target is disconnected (its entry removed); the hub itself never
    /// blocks on a stalled client.
    pub fn relay(&self, room: &str, envelope: &Envelope) -> Result<(), SignalingError> {
        let payload = serde_json::to_vec(envelope)?;
        self.log.append(room, &envelope.peer_id, "signal", &payload, None).map_err(SignalingError::Log)?;

        let Some(room_handle) = self.rooms.get(room) else {
            debug!(room, peer_id = %envelope.peer_id, "relay for unknown room, dropping");
            return Ok(());
        };

        let Ok(encoded) = serde_json::to_string(envelope) else {
            return Ok(());
        };

        match &envelope.target_peer_id {
            Some(target) => {
                if let Some(sender) = room_handle.members.get(target) {
                    if sender.try_send(encoded).is_err() {
                        warn!(room, target, "dropping targeted envelope: outbound buffer full");
                        drop(sender);
                        room_handle.members.remove(target);
                    }
                } else {
                    debug!(room, target, "targeted envelope for unknown peer, dropping");
                }
            }
            None => {
                let mut overflowed = Vec::new();
                for member in room_handle.members.iter() {
                    if member.key() == &envelope.peer_id {
                        continue;
                    }
                    if member.try_send(encoded.clone()).is_err() {
                        overflowed.push(member.key().clone());
                    }
                }
                for peer_id in overflowed {
                    warn!(room, peer_id, "disconnecting peer: outbound buffer full during broadcast");
                    room_handle.members.remove(&peer_id);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_hub() -> (SignalingHub, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(PersistentMessageLog::open(dir.path()).unwrap());
        (SignalingHub::new(log), dir)
    }

    fn envelope(peer_id: &str, target: Option<&str>) -> Envelope {
        Envelope { peer_id: peer_id.to_string(), target_peer_id: target.map(str::to_string), msg_type: "offer".to_string(), payload: "x".to_string() }
    }

    #[tokio::test]
    async fn join_notifies_only_pre_existing_members() {
        let (hub, _dir) = temp_hub();
        let mut a_rx = hub.join("room", "a");
        let mut b_rx = hub.join("room", "b");

        // a is notified of b's join; b receives nothing about its own join.
        let a_msg = a_rx.try_recv().unwrap();
        assert!(a_msg.contains("peer_joined"));
        assert!(a_msg.contains("\"peer_id\":\"b\""));
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn targeted_relay_reaches_only_target() {
        let (hub, _dir) = temp_hub();
        let mut a_rx = hub.join("room", "a");
        let mut b_rx = hub.join("room", "b");
        let mut c_rx = hub.join("room", "c");
        a_rx.try_recv().ok();
        a_rx.try_recv().ok();
        b_rx.try_recv().ok();

        hub.relay("room", &envelope("a", Some("b"))).unwrap();

        let received = b_rx.try_recv().unwrap();
        assert!(received.contains("\"peer_id\":\"a\""));
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let (hub, _dir) = temp_hub();
        let mut a_rx = hub.join("room", "a");
        let mut b_rx = hub.join("room", "b");
        a_rx.try_recv().ok();

        hub.relay("room", &envelope("a", None)).unwrap();

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn leave_empties_and_removes_room() {
        let (hub, _dir) = temp_hub();
        let _rx = hub.join("room", "a");
        hub.leave("room", "a");
        assert!(hub.rooms.is_empty());
    }
}
