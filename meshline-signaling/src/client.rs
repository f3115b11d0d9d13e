//! A [`RendezvousChannel`] backed by this crate's own signaling relay: the
//! piece that actually realizes "the signaling relay bootstraps media
//! connections" (§2) by letting the STUN-media and relayed-media factories
//! exchange their offer/answer strings as ordinary signaling envelopes.
//!
//! Both sides of a pair join the same deterministically-named room and
//! immediately publish their own offer targeted at the other peer, then
//! wait for the other side's matching envelope — a simultaneous-open
//! exchange rather than a strict initiator/responder handshake, since
//! nothing in the connection layer designates either side as the caller.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use meshline_connection::RendezvousChannel;
use meshline_core::{ConnectionError, ErrorKind};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::envelope::Envelope;

/// Tag carried on rendezvous envelopes so the relay's log and any other
/// consumer can distinguish these from chat/discovery signaling traffic.
const RENDEZVOUS_TYPE: &str = "rendezvous";

/// How long a single `exchange` waits for the peer's answering envelope
/// before giving up, per the `Transient` error policy (a caller retries at
/// a higher level — the supervisor simply tries the next factory).
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(8);

pub struct SignalingRendezvousClient {
    base_ws_url: String,
    own_id: String,
}

impl SignalingRendezvousClient {
    /// `base_ws_url` is the signaling relay's websocket base, e.g.
    /// `ws://127.0.0.1:9000`.
    pub fn new(base_ws_url: impl Into<String>, own_id: impl Into<String>) -> Self {
        Self { base_ws_url: base_ws_url.into(), own_id: own_id.into() }
    }
}

/// A room name both sides of a pair compute identically regardless of who
/// dials first, so the rendezvous exchange lands in the same room.
fn pair_room(a: &str, b: &str) -> String {
    if a <= b {
        format!("rendezvous-{a}-{b}")
    } else {
        format!("rendezvous-{b}-{a}")
    }
}

#[async_trait]
impl RendezvousChannel for SignalingRendezvousClient {
    async fn exchange(&self, peer_id: &str, local_offer: &str) -> Result<String, ConnectionError> {
        let room = pair_room(&self.own_id, peer_id);
        let url = format!("{}/?room={}&peer_id={}", self.base_ws_url.trim_end_matches('/'), room, self.own_id);

        let (ws_stream, _) = tokio::time::timeout(EXCHANGE_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| ConnectionError::kind(ErrorKind::Transient, "rendezvous connect timed out"))?
            .map_err(|e| ConnectionError::kind(ErrorKind::Transient, format!("rendezvous connect failed: {e}")))?;
        let (mut sink, mut stream) = ws_stream.split();

        let outgoing = Envelope {
            peer_id: self.own_id.clone(),
            target_peer_id: Some(peer_id.to_string()),
            msg_type: RENDEZVOUS_TYPE.to_string(),
            payload: local_offer.to_string(),
        };
        let encoded = serde_json::to_string(&outgoing)?;
        sink.send(WsMessage::Text(encoded))
            .await
            .map_err(|e| ConnectionError::kind(ErrorKind::Transient, format!("rendezvous publish failed: {e}")))?;

        let wait = async {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(room, peer_id, error = %e, "rendezvous socket error");
                        continue;
                    }
                };
                let WsMessage::Text(text) = frame else { continue };
                let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
                    debug!(room, peer_id, "ignoring non-envelope rendezvous frame");
                    continue;
                };
                if envelope.peer_id == peer_id && envelope.msg_type == RENDEZVOUS_TYPE {
                    return Some(envelope.payload);
                }
            }
            None
        };

        match tokio::time::timeout(EXCHANGE_TIMEOUT, wait).await {
            Ok(Some(answer)) => Ok(answer),
            Ok(None) => Err(ConnectionError::kind(ErrorKind::Transient, "rendezvous socket closed before an answer arrived")),
            Err(_) => Err(ConnectionError::kind(ErrorKind::Transient, "rendezvous exchange timed out waiting for peer's offer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_room_is_order_independent() {
        assert_eq!(pair_room("alice", "bob"), pair_room("bob", "alice"));
    }
}
