//! Unrelayed direct media connection: discovers our reflexive address via
//! STUN, exchanges it with the peer over an injected [`RendezvousChannel`],
//! then exchanges JSON-framed [`Message`]s directly over the resulting UDP
//! socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshline_core::config::StunMediaConfig;
use meshline_core::{ConnectionError, ErrorKind, Message, NatType, NetworkInfo};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionState, IncomingSlot, SharedConnection, INBOUND_CHANNEL_CAPACITY};
use crate::factory::Factory;
use crate::probe;
use crate::rendezvous::RendezvousChannel;
use crate::stun;
use crate::types::{ConnectionStatus, ConnectionType};

const SEND_CHANNEL_CAPACITY: usize = 64;
const MAX_DATAGRAM_BYTES: usize = 1400;

pub struct StunMediaConnection {
    peer_id: String,
    state: Arc<ConnectionState>,
    incoming: IncomingSlot,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl StunMediaConnection {
    async fn establish(
        own_id: String,
        peer_id: String,
        config: StunMediaConfig,
        rendezvous: Arc<dyn RendezvousChannel>,
    ) -> Result<Arc<Self>, ConnectionError> {
        let server_name = config
            .stun_servers
            .first()
            .ok_or_else(|| ConnectionError::kind(ErrorKind::Fatal, "no stun_servers configured"))?;
        let stun_server: SocketAddr = tokio::net::lookup_host(server_name)
            .await
            .map_err(ConnectionError::Io)?
            .next()
            .ok_or_else(|| ConnectionError::kind(ErrorKind::Fatal, format!("could not resolve {server_name}")))?;

        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await.map_err(ConnectionError::Io)?);
        let reflexive = stun::discover_reflexive_address(&socket, stun_server).await?;

        let answer = rendezvous.exchange(&peer_id, &reflexive.to_string()).await?;
        let peer_addr: SocketAddr = answer
            .parse()
            .map_err(|_| ConnectionError::kind(ErrorKind::Fatal, format!("malformed rendezvous answer: {answer}")))?;

        let state = Arc::new(ConnectionState::new(ConnectionStatus::Connecting));
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        state.set_status(ConnectionStatus::Connected);
        state.set_quality(90);

        spawn_writer(socket.clone(), peer_addr, outbound_rx, cancel.clone());
        spawn_reader(
            socket,
            own_id.clone(),
            peer_addr,
            state.clone(),
            incoming_tx,
            outbound_tx.clone(),
            cancel.clone(),
        );
        probe::spawn_probe_loop(
            cancel.clone(),
            ConnectionType::StunMedia.probe_interval(),
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

fn spawn_writer(socket: Arc<UdpSocket>, peer_addr: SocketAddr, mut outbound_rx: mpsc::Receiver<Message>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    match serde_json::to_vec(&msg) {
                        Ok(bytes) if bytes.len() <= MAX_DATAGRAM_BYTES => {
                            if let Err(e) = socket.send_to(&bytes, peer_addr).await {
                                warn!(error = %e, "stun-media send failed");
                            }
                        }
                        Ok(bytes) => warn!(len = bytes.len(), "stun-media message exceeds MTU budget, dropped"),
                        Err(e) => warn!(error = %e, "failed to encode stun-media message"),
                    }
                }
            }
        }
    });
}

fn spawn_reader(
    socket: Arc<UdpSocket>,
    own_id: String,
    peer_addr: SocketAddr,
    state: Arc<ConnectionState>,
    incoming_tx: mpsc::Sender<Message>,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_DATAGRAM_BYTES + 64];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "stun-media recv failed");
                            continue;
                        }
                    };
                    if from != peer_addr {
                        trace!(%from, %peer_addr, "dropping datagram from unexpected source");
                        continue;
                    }
                    let msg: Message = match serde_json::from_slice(&buf[..len]) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed stun-media datagram");
                            continue;
                        }
                    };
                    if let Some(forward) = probe::intercept_probe(msg, &own_id, ConnectionType::StunMedia, &state, &outbound_tx).await {
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
impl Connection for StunMediaConnection {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::StunMedia
    }

    async fn send(&self, msg: Message) -> Result<(), ConnectionError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| ConnectionError::kind(ErrorKind::ConnectionFailed, "stun-media connection closed"))
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

pub struct StunMediaFactory {
    config: StunMediaConfig,
    rendezvous: Arc<dyn RendezvousChannel>,
}

impl StunMediaFactory {
    pub fn new(config: StunMediaConfig, rendezvous: Arc<dyn RendezvousChannel>) -> Self {
        Self { config, rendezvous }
    }
}

#[async_trait]
impl Factory for StunMediaFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::StunMedia
    }

    fn estimate_success(&self, _peer_id: &str, info: &NetworkInfo) -> u8 {
        match info.nat_type {
            NatType::Open => 95,
            NatType::Cone => 85,
            NatType::Symmetric => 40,
            NatType::Blocked => 10,
            NatType::Unknown => 70,
        }
    }

    async fn create(&self, own_id: &str, peer_id: &str, _info: &NetworkInfo) -> Result<SharedConnection, ConnectionError> {
        debug!(peer_id, "creating stun-media connection");
        let conn = StunMediaConnection::establish(own_id.to_string(), peer_id.to_string(), self.config.clone(), self.rendezvous.clone()).await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_success_matches_nat_table() {
        let factory = StunMediaFactory::new(StunMediaConfig::default(), Arc::new(crate::rendezvous::NullRendezvous));
        let mut info = NetworkInfo::new();
        info.nat_type = NatType::Open;
        assert_eq!(factory.estimate_success("peer", &info), 95);
        info.nat_type = NatType::Symmetric;
        assert_eq!(factory.estimate_success("peer", &info), 40);
        info.nat_type = NatType::Blocked;
        assert_eq!(factory.estimate_success("peer", &info), 10);
    }
}
