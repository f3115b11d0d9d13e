//! LAN-broadcast connection: a fixed-port UDP listener plus broadcast
//! transmission to every up interface's subnet. Since the underlying medium
//! is inherently one-to-many, every connection to every peer shares the same
//! physical traffic; `peer_id` on the envelope is what lets a connection
//! instance pick its own peer's datagrams out of the neighborhood chatter,
//! and every datagram — regardless of addressee — feeds the live-neighbor
//! count that adjusts quality.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use meshline_core::config::LanBroadcastConfig;
use meshline_core::netutil::{broadcast_addresses, is_private_ipv4, local_ipv4};
use meshline_core::{ConnectionError, ErrorKind, Message, NetworkInfo, NetworkType, Timestamp};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionState, IncomingSlot, SharedConnection, INBOUND_CHANNEL_CAPACITY};
use crate::factory::Factory;
use crate::probe;
use crate::types::{ConnectionStatus, ConnectionType};

const SEND_CHANNEL_CAPACITY: usize = 64;
const MAX_DATAGRAM_BYTES: usize = 1400;
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(10);
const NEIGHBOR_EVICTION_AGE: Duration = Duration::from_secs(120);

#[derive(Serialize, Deserialize)]
struct LanEnvelope {
    peer_id: String,
    message: Message,
}

/// Neighborhood of peers seen via any broadcast (discovery or otherwise) in
/// the last two minutes, shared between the reader and the quality
/// recomputation it drives.
#[derive(Default)]
struct Neighborhood {
    last_seen: DashMap<String, Instant>,
}

impl Neighborhood {
    fn observe(&self, peer_id: &str) {
        self.last_seen.insert(peer_id.to_string(), Instant::now());
    }

    fn live_count(&self) -> usize {
        let now = Instant::now();
        self.last_seen.retain(|_, seen| now.duration_since(*seen) < NEIGHBOR_EVICTION_AGE);
        self.last_seen.len()
    }
}

pub struct LanBroadcastConnection {
    peer_id: String,
    state: Arc<ConnectionState>,
    incoming: IncomingSlot,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

fn bind_reusable_udp(port: u16) -> Result<UdpSocket, ConnectionError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(ConnectionError::Io)?;
    socket.set_reuse_address(true).map_err(ConnectionError::Io)?;
    #[cfg(unix)]
    socket.set_reuse_port(true).map_err(ConnectionError::Io)?;
    socket.set_broadcast(true).map_err(ConnectionError::Io)?;
    socket.set_nonblocking(true).map_err(ConnectionError::Io)?;
    socket
        .bind(&std::net::SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())
        .map_err(ConnectionError::Io)?;
    UdpSocket::from_std(socket.into()).map_err(ConnectionError::Io)
}

impl LanBroadcastConnection {
    async fn establish(own_id: String, peer_id: String, config: LanBroadcastConfig) -> Result<Arc<Self>, ConnectionError> {
        let socket = Arc::new(bind_reusable_udp(config.lan_listen_port)?);

        let state = Arc::new(ConnectionState::new(ConnectionStatus::Connecting));
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let neighborhood = Arc::new(Neighborhood::default());

        state.set_status(ConnectionStatus::Connected);
        state.set_quality(probe::quality_for_latency(ConnectionType::LanBroadcast, Duration::from_millis(0)));

        spawn_writer(socket.clone(), config.lan_broadcast_port, outbound_rx, cancel.clone());
        spawn_reader(
            socket.clone(),
            own_id.clone(),
            peer_id.clone(),
            state.clone(),
            neighborhood.clone(),
            incoming_tx,
            outbound_tx.clone(),
            cancel.clone(),
        );
        spawn_discovery(socket, own_id.clone(), config.lan_broadcast_port, cancel.clone());
        probe::spawn_probe_loop(
            cancel.clone(),
            ConnectionType::LanBroadcast.probe_interval(),
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

async fn broadcast_envelope(socket: &UdpSocket, port: u16, envelope: &LanEnvelope) {
    let bytes = match serde_json::to_vec(envelope) {
        Ok(b) if b.len() <= MAX_DATAGRAM_BYTES => b,
        Ok(b) => {
            warn!(len = b.len(), "lan-broadcast message exceeds MTU budget, dropped");
            return;
        }
        Err(e) => {
            warn!(error = %e, "failed to encode lan-broadcast message");
            return;
        }
    };
    for addr in broadcast_addresses() {
        if let Err(e) = socket.send_to(&bytes, (addr, port)).await {
            warn!(error = %e, %addr, "lan-broadcast send failed");
        }
    }
}

fn spawn_writer(socket: Arc<UdpSocket>, broadcast_port: u16, mut outbound_rx: mpsc::Receiver<Message>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let envelope = LanEnvelope { peer_id: msg.from.clone(), message: msg };
                    broadcast_envelope(&socket, broadcast_port, &envelope).await;
                }
            }
        }
    });
}

fn spawn_discovery(socket: Arc<UdpSocket>, own_id: String, broadcast_port: u16, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DISCOVERY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let discovery = Message::new(own_id.clone(), String::new(), meshline_core::message::TYPE_DISCOVERY, Vec::new())
                        .with_metadata("sent_at", Timestamp::now().as_nanos());
                    let envelope = LanEnvelope { peer_id: own_id.clone(), message: discovery };
                    broadcast_envelope(&socket, broadcast_port, &envelope).await;
                }
            }
        }
    });
}

fn spawn_reader(
    socket: Arc<UdpSocket>,
    own_id: String,
    target_peer_id: String,
    state: Arc<ConnectionState>,
    neighborhood: Arc<Neighborhood>,
    incoming_tx: mpsc::Sender<Message>,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    let live_count = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_DATAGRAM_BYTES + 64];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, _from) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "lan-broadcast recv failed");
                            continue;
                        }
                    };
                    let envelope: LanEnvelope = match serde_json::from_slice(&buf[..len]) {
                        Ok(e) => e,
                        Err(_) => continue, // foreign traffic on this port; ignore
                    };
                    if envelope.peer_id == own_id {
                        continue;
                    }
                    neighborhood.observe(&envelope.peer_id);
                    live_count.store(neighborhood.live_count(), Ordering::Release);

                    if envelope.peer_id != target_peer_id {
                        continue;
                    }
                    if envelope.message.msg_type == meshline_core::message::TYPE_DISCOVERY {
                        continue;
                    }
                    if let Some(forward) = intercept_with_lan_modifier(envelope.message, &own_id, &state, &outbound_tx, live_count.load(Ordering::Acquire)).await {
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

async fn intercept_with_lan_modifier(
    msg: Message,
    own_id: &str,
    state: &ConnectionState,
    outbound: &mpsc::Sender<Message>,
    live_peer_count: usize,
) -> Option<Message> {
    if msg.is_ping() {
        let pong = msg.pong_for(own_id.to_string());
        let _ = outbound.send(pong).await;
        None
    } else if msg.is_pong() {
        if let Some(sent_at) = msg.probe_timestamp() {
            let latency = Timestamp::now().elapsed_since(sent_at);
            state.set_latency(latency);
            let base = probe::quality_for_latency(ConnectionType::LanBroadcast, latency);
            state.set_quality(probe::adjust_lan_quality(base, live_peer_count));
        }
        None
    } else {
        Some(msg)
    }
}

#[async_trait]
impl Connection for LanBroadcastConnection {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::LanBroadcast
    }

    async fn send(&self, msg: Message) -> Result<(), ConnectionError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| ConnectionError::kind(ErrorKind::ConnectionFailed, "lan-broadcast connection closed"))
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

pub struct LanBroadcastFactory {
    config: LanBroadcastConfig,
}

impl LanBroadcastFactory {
    pub fn new(config: LanBroadcastConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Factory for LanBroadcastFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::LanBroadcast
    }

    fn estimate_success(&self, _peer_id: &str, info: &NetworkInfo) -> u8 {
        let base = match info.network_type {
            NetworkType::Lan => 80,
            NetworkType::Wifi => 70,
            NetworkType::Internet => 0,
            NetworkType::Unknown => 0,
        };
        if base == 0 && info.network_type != NetworkType::Internet {
            return if local_ipv4().map(is_private_ipv4).unwrap_or(false) { 75 } else { 50 };
        }
        base
    }

    async fn create(&self, own_id: &str, peer_id: &str, _info: &NetworkInfo) -> Result<SharedConnection, ConnectionError> {
        debug!(peer_id, "creating lan-broadcast connection");
        let conn = LanBroadcastConnection::establish(own_id.to_string(), peer_id.to_string(), self.config.clone()).await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_success_matches_network_table() {
        let factory = LanBroadcastFactory::new(LanBroadcastConfig::default());
        let mut info = NetworkInfo::new();
        info.network_type = NetworkType::Lan;
        assert_eq!(factory.estimate_success("peer", &info), 80);
        info.network_type = NetworkType::Wifi;
        assert_eq!(factory.estimate_success("peer", &info), 70);
    }

    #[test]
    fn neighborhood_evicts_stale_entries() {
        let neighborhood = Neighborhood::default();
        neighborhood.observe("a");
        neighborhood.observe("b");
        assert_eq!(neighborhood.live_count(), 2);
    }
}
