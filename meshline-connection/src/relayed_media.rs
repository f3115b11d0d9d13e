//! Relayed media connection: routes through a credentialed TURN-like relay
//! server over TCP instead of negotiating a direct path. Trades initial
//! quality for robustness against hostile NATs — no peer-address rendezvous
//! is needed since the relay server demultiplexes by peer id itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshline_core::config::{RelayedMediaConfig, TurnServer};
use meshline_core::{ConnectionError, ErrorKind, Message, NatType, NetworkInfo};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionState, IncomingSlot, SharedConnection, INBOUND_CHANNEL_CAPACITY};
use crate::factory::Factory;
use crate::probe;
use crate::types::{ConnectionStatus, ConnectionType};

const SEND_CHANNEL_CAPACITY: usize = 64;

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RelayFrame {
    Register { peer_id: String, target: String, user: String, pass: String },
    RegisterOk,
    RegisterErr { reason: String },
    Forward { to: String, msg: Message },
    Deliver { from: String, msg: Message },
}

pub struct RelayedMediaConnection {
    peer_id: String,
    state: Arc<ConnectionState>,
    incoming: IncomingSlot,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl RelayedMediaConnection {
    async fn establish(own_id: String, peer_id: String, server: TurnServer) -> Result<Arc<Self>, ConnectionError> {
        let stream = TcpStream::connect(&server.url).await.map_err(ConnectionError::Io)?;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let register = RelayFrame::Register {
            peer_id: own_id.clone(),
            target: peer_id.clone(),
            user: server.user,
            pass: server.pass,
        };
        write_line(&mut write_half, &register).await?;

        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(ConnectionError::Io)?;
        match serde_json::from_str::<RelayFrame>(line.trim()) {
            Ok(RelayFrame::RegisterOk) => {}
            Ok(RelayFrame::RegisterErr { reason }) => {
                return Err(ConnectionError::kind(ErrorKind::Fatal, format!("relay registration rejected: {reason}")))
            }
            Ok(_) => return Err(ConnectionError::kind(ErrorKind::Fatal, "unexpected relay handshake response")),
            Err(e) => return Err(ConnectionError::kind(ErrorKind::Fatal, format!("malformed relay handshake: {e}"))),
        }

        let state = Arc::new(ConnectionState::new(ConnectionStatus::Connecting));
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        state.set_status(ConnectionStatus::Connected);
        state.set_quality(75);

        spawn_writer(write_half, peer_id.clone(), outbound_rx, cancel.clone());
        spawn_reader(reader, own_id.clone(), state.clone(), incoming_tx, outbound_tx.clone(), cancel.clone());
        probe::spawn_probe_loop(
            cancel.clone(),
            ConnectionType::RelayedMedia.probe_interval(),
            own_id,
            peer_id.clone(),
            outbound_tx.clone(),
        );

        Ok(Arc::new(Self {
            peer_id,
            state,
            incoming: IncomingSlot::new(incoming_rx),
            outbound_tx,
            cancel,
        }))
    }
}

async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &RelayFrame) -> Result<(), ConnectionError> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await.map_err(ConnectionError::Io)
}

fn spawn_writer(
    mut write_half: tokio::io::WriteHalf<TcpStream>,
    target: String,
    mut outbound_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let frame = RelayFrame::Forward { to: target.clone(), msg };
                    if write_line(&mut write_half, &frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn spawn_reader(
    mut reader: BufReader<tokio::io::ReadHalf<TcpStream>>,
    own_id: String,
    state: Arc<ConnectionState>,
    incoming_tx: mpsc::Sender<Message>,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut line = String::new();
        loop {
            line.clear();
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read_line(&mut line) => {
                    match read {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "relayed-media read failed");
                            break;
                        }
                    }
                    let msg = match serde_json::from_str::<RelayFrame>(line.trim()) {
                        Ok(RelayFrame::Deliver { msg, .. }) => msg,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed relay frame");
                            continue;
                        }
                    };
                    if let Some(forward) = probe::intercept_probe(msg, &own_id, ConnectionType::RelayedMedia, &state, &outbound_tx).await {
                        if incoming_tx.send(forward).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        state.set_status(ConnectionStatus::Disconnected);
    });
}

#[async_trait]
impl Connection for RelayedMediaConnection {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::RelayedMedia
    }

    async fn send(&self, msg: Message) -> Result<(), ConnectionError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| ConnectionError::kind(ErrorKind::ConnectionFailed, "relayed-media connection closed"))
    }

    fn take_incoming(&self) -> Option<mpsc::Receiver<Message>> {
        self.incoming.take()
    }

    fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    fn quality(&self) -> u8 {
        self.state.quality()
    }

    fn latency(&self) -> Duration {
        self.state.latency()
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.state.set_status(ConnectionStatus::Disconnected);
    }
}

pub struct RelayedMediaFactory {
    config: RelayedMediaConfig,
}

impl RelayedMediaFactory {
    pub fn new(config: RelayedMediaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Factory for RelayedMediaFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::RelayedMedia
    }

    fn estimate_success(&self, _peer_id: &str, info: &NetworkInfo) -> u8 {
        match info.nat_type {
            NatType::Open => 85,
            NatType::Cone => 90,
            NatType::Symmetric => 95,
            NatType::Blocked => 85,
            NatType::Unknown => 90,
        }
    }

    async fn create(&self, own_id: &str, peer_id: &str, _info: &NetworkInfo) -> Result<SharedConnection, ConnectionError> {
        let server = self
            .config
            .turn_servers
            .first()
            .cloned()
            .ok_or_else(|| ConnectionError::kind(ErrorKind::Fatal, "no turn_servers configured"))?;
        debug!(peer_id, server = %server.url, "creating relayed-media connection");
        let conn = RelayedMediaConnection::establish(own_id.to_string(), peer_id.to_string(), server).await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_success_favors_hostile_nats() {
        let factory = RelayedMediaFactory::new(RelayedMediaConfig::default());
        let mut info = NetworkInfo::new();
        info.nat_type = NatType::Symmetric;
        let symmetric = factory.estimate_success("peer", &info);
        info.nat_type = NatType::Cone;
        let cone = factory.estimate_success("peer", &info);
        assert!(symmetric > cone, "symmetric NAT should score higher than cone for the relay");
    }
}
