//! Direct stream-oriented TCP connection: dials the peer's IP across an
//! ordered candidate port list until one accepts, performs a short upgrade
//! handshake, then exchanges newline-delimited JSON [`Message`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshline_core::config::DirectStreamConfig;
use meshline_core::{ConnectionError, ErrorKind, Message, NetworkInfo, NetworkType};
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
enum UpgradeFrame {
    Upgrade { peer_id: String },
    UpgradeOk,
}

pub struct DirectStreamConnection {
    peer_id: String,
    state: Arc<ConnectionState>,
    incoming: IncomingSlot,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl DirectStreamConnection {
    async fn establish(own_id: String, peer_id: String, peer_ip: String, ports: Vec<u16>) -> Result<Arc<Self>, ConnectionError> {
        if ports.is_empty() {
            return Err(ConnectionError::kind(ErrorKind::Fatal, "no direct_ports configured"));
        }

        let mut stream = None;
        let mut last_err = None;
        for port in &ports {
            match TcpStream::connect((peer_ip.as_str(), *port)).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            ConnectionError::kind(
                ErrorKind::Transient,
                format!("no candidate port accepted a connection: {}", last_err.map(|e| e.to_string()).unwrap_or_default()),
            )
        })?;

        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let mut upgrade = serde_json::to_vec(&UpgradeFrame::Upgrade { peer_id: own_id.clone() })?;
        upgrade.push(b'\n');
        write_half.write_all(&upgrade).await.map_err(ConnectionError::Io)?;

        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(ConnectionError::Io)?;
        match serde_json::from_str::<UpgradeFrame>(line.trim()) {
            Ok(UpgradeFrame::UpgradeOk) => {}
            _ => return Err(ConnectionError::kind(ErrorKind::Fatal, "direct-stream upgrade rejected")),
        }

        let state = Arc::new(ConnectionState::new(ConnectionStatus::Connecting));
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        state.set_status(ConnectionStatus::Connected);
        state.set_quality(85);

        spawn_writer(write_half, outbound_rx, cancel.clone());
        spawn_reader(reader, own_id.clone(), state.clone(), incoming_tx, outbound_tx.clone(), cancel.clone());
        probe::spawn_probe_loop(
            cancel.clone(),
            ConnectionType::DirectStream.probe_interval(),
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

fn spawn_writer(mut write_half: tokio::io::WriteHalf<TcpStream>, mut outbound_rx: mpsc::Receiver<Message>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let encoded = match serde_json::to_vec(&msg) {
                        Ok(mut bytes) => { bytes.push(b'\n'); bytes }
                        Err(e) => { warn!(error = %e, "failed to encode direct-stream message"); continue; }
                    };
                    if write_half.write_all(&encoded).await.is_err() {
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
                            warn!(error = %e, "direct-stream read failed");
                            break;
                        }
                    }
                    let msg: Message = match serde_json::from_str(line.trim()) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed direct-stream line");
                            continue;
                        }
                    };
                    if let Some(forward) = probe::intercept_probe(msg, &own_id, ConnectionType::DirectStream, &state, &outbound_tx).await {
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
impl Connection for DirectStreamConnection {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::DirectStream
    }

    async fn send(&self, msg: Message) -> Result<(), ConnectionError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| ConnectionError::kind(ErrorKind::ConnectionFailed, "direct-stream connection closed"))
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

pub struct DirectStreamFactory {
    config: DirectStreamConfig,
}

impl DirectStreamFactory {
    pub fn new(config: DirectStreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Factory for DirectStreamFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::DirectStream
    }

    fn estimate_success(&self, _peer_id: &str, info: &NetworkInfo) -> u8 {
        match info.network_type {
            NetworkType::Lan => 85,
            NetworkType::Internet => 40,
            _ if info.peer_ip.is_some() => 65,
            _ => 20,
        }
    }

    async fn create(&self, own_id: &str, peer_id: &str, info: &NetworkInfo) -> Result<SharedConnection, ConnectionError> {
        let peer_ip = info
            .peer_ip
            .clone()
            .ok_or_else(|| ConnectionError::kind(ErrorKind::Fatal, "direct-stream requires a known peer_ip"))?;
        debug!(peer_id, %peer_ip, "creating direct-stream connection");
        let conn = DirectStreamConnection::establish(own_id.to_string(), peer_id.to_string(), peer_ip, self.config.direct_ports.clone()).await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_success_matches_network_table() {
        let factory = DirectStreamFactory::new(DirectStreamConfig::default());
        let mut info = NetworkInfo::new();
        info.network_type = NetworkType::Lan;
        assert_eq!(factory.estimate_success("peer", &info), 85);
        info.network_type = NetworkType::Internet;
        assert_eq!(factory.estimate_success("peer", &info), 40);
        info.network_type = NetworkType::Unknown;
        info.peer_ip = Some("203.0.113.1".to_string());
        assert_eq!(factory.estimate_success("peer", &info), 65);
        info.peer_ip = None;
        assert_eq!(factory.estimate_success("peer", &info), 20);
    }
}
