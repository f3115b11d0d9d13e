//! Wire types for the signaling relay's JSON text-frame protocol. The hub
//! never interprets `payload`; it only reads `peer_id` and
//! `target_peer_id` to route.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: String,
}

/// Server-generated notifications. Currently just `peer_joined`, announced
/// to every pre-existing room member when a new client registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerNotification {
    #[serde(rename = "peer_joined")]
    PeerJoined { peer_id: String, room: String },
}
