//! Axum WebSocket upgrade endpoint: extracts `room`/`peer_id`, registers
//! the client with the hub, and splits the connection into a reader task
//! (drives relay) and a writer task (drains the outbound queue and sends a
//! periodic keepalive ping).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use meshline_core::SignalingError;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::hub::SignalingHub;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    room: Option<String>,
    peer_id: Option<String>,
}

pub async fn upgrade(State(hub): State<Arc<SignalingHub>>, Query(query): Query<UpgradeQuery>, ws: WebSocketUpgrade) -> Response {
    let room = match query.room {
        Some(room) => room,
        None => return (StatusCode::BAD_REQUEST, SignalingError::MissingParameter("room").to_string()).into_response(),
    };
    let peer_id = match query.peer_id {
        Some(peer_id) => peer_id,
        None => return (StatusCode::BAD_REQUEST, SignalingError::MissingParameter("peer_id").to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, hub, room, peer_id)).into_response()
}

async fn handle_socket(socket: WebSocket, hub: Arc<SignalingHub>, room: String, peer_id: String) {
    let outbound_rx = hub.join(&room, &peer_id);
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(run_writer(sink, outbound_rx));
    run_reader(stream, &hub, &room, &peer_id).await;

    hub.leave(&room, &peer_id);
    writer.abort();
}

async fn run_reader(mut stream: futures::stream::SplitStream<WebSocket>, hub: &SignalingHub, room: &str, peer_id: &str) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(room, peer_id, error = %err, "signaling socket read error");
                break;
            }
        };

        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(room, peer_id, error = %err, "dropping malformed signaling envelope");
                continue;
            }
        };

        if let Err(err) = hub.relay(room, &envelope) {
            warn!(room, peer_id, error = %err, "relay failed");
        }
    }
}

async fn run_writer(mut sink: futures::stream::SplitSink<WebSocket, WsMessage>, mut outbound_rx: tokio::sync::mpsc::Receiver<String>) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(text) => {
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = keepalive.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}
