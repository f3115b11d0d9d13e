//! The layered connection manager itself: staggered parallel connection
//! attempts across every registered factory, primary/backup arbitration as
//! outcomes arrive, and a per-peer health monitor that fails over to a
//! backup (or declares the peer disconnected) once the primary degrades.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use meshline_connection::{ConnectionStatus, SharedConnection};
use meshline_core::config::ManagerConfig;
use meshline_core::{ConnectionError, ErrorKind, ManagerError, Message, NetworkInfo};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::callbacks::Callbacks;
use crate::peer::PeerConnection;
use crate::registry::FactoryRegistry;

/// Result of a single factory's connection attempt, reported back to the
/// supervisor over an mpsc channel as attempts complete out of order.
enum Outcome {
    Connected(SharedConnection),
    Failed,
    /// `estimate_success` was below the floor; the factory was never tried.
    Skipped,
}

/// Minimum `estimate_success` score a factory must clear before the
/// supervisor bothers calling `create`.
const ESTIMATE_FLOOR: u8 = 10;

/// Interval the supervisor polls a freshly created connection's status
/// while waiting for it to leave `Connecting`.
const STATUS_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

pub struct LayeredConnectionManager {
    own_id: String,
    registry: Arc<FactoryRegistry>,
    config: ManagerConfig,
    callbacks: Callbacks,
    peers: Arc<DashMap<String, Arc<PeerConnection>>>,
}

impl LayeredConnectionManager {
    pub fn new(own_id: impl Into<String>, registry: Arc<FactoryRegistry>, config: ManagerConfig, callbacks: Callbacks) -> Self {
        Self {
            own_id: own_id.into(),
            registry,
            config,
            callbacks,
            peers: Arc::new(DashMap::new()),
        }
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.peers.get(peer_id).map(|p| p.is_connected()).unwrap_or(false)
    }

    /// Begins the staggered parallel connection attempt for `peer_id`.
    /// Returns immediately; connection establishment and arbitration happen
    /// on spawned tasks, with `on_connection`/`on_disconnect` reporting
    /// progress to the caller.
    pub fn connect_to_peer(&self, peer_id: impl Into<String>, info: NetworkInfo) -> Result<(), ManagerError> {
        let peer_id = peer_id.into();
        if self.peers.contains_key(&peer_id) {
            return Err(ManagerError::AlreadyConnecting { peer_id });
        }

        let peer = Arc::new(PeerConnection::new(peer_id.clone()));
        self.peers.insert(peer_id.clone(), peer.clone());

        let own_id = self.own_id.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        let callbacks = self.callbacks.clone();
        let peers = self.peers.clone();

        tokio::spawn(async move {
            run_supervisor(own_id, peer_id, info, peer, registry, config, callbacks, peers).await;
        });

        Ok(())
    }

    pub async fn send(&self, peer_id: &str, msg: Message) -> Result<(), ManagerError> {
        let peer = self.peers.get(peer_id).ok_or_else(|| ManagerError::NoRoute { peer_id: peer_id.to_string() })?;
        let primary = peer.primary.read().clone();
        match primary {
            Some(conn) => conn.send(msg).await.map_err(ManagerError::Connection),
            None => Err(ManagerError::NotConnected { peer_id: peer_id.to_string() }),
        }
    }

    /// Idempotent: cancels every peer's health monitor and closes every
    /// held connection, then clears the peer map.
    pub async fn close(&self) {
        for entry in self.peers.iter() {
            entry.value().cancel.cancel();
        }
        for (_, peer) in self.peers.clone().into_iter() {
            close_peer(&peer).await;
        }
        self.peers.clear();
    }
}

async fn close_peer(peer: &PeerConnection) {
    if let Some(conn) = peer.primary.write().take() {
        conn.close().await;
    }
    let backups: Vec<_> = peer.backups.iter().map(|e| e.value().clone()).collect();
    for conn in backups {
        conn.close().await;
        peer.backups.remove(&conn.connection_type());
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_supervisor(
    own_id: String,
    peer_id: String,
    info: NetworkInfo,
    peer: Arc<PeerConnection>,
    registry: Arc<FactoryRegistry>,
    config: ManagerConfig,
    callbacks: Callbacks,
    peers: Arc<DashMap<String, Arc<PeerConnection>>>,
) {
    let factories = registry.ordered();
    let deadline = Instant::now() + config.connection_timeout;
    let (tx, mut rx) = mpsc::channel(factories.len().max(1));

    for (rank, factory) in factories.into_iter().enumerate() {
        let own_id = own_id.clone();
        let peer_id = peer_id.clone();
        let info = info.clone();
        let tx = tx.clone();
        let stagger = config.factory_stagger * rank as u32;

        tokio::spawn(async move {
            if !stagger.is_zero() {
                sleep(stagger).await;
            }
            if Instant::now() >= deadline {
                let _ = tx.send(Outcome::Skipped).await;
                return;
            }

            let score = factory.estimate_success(&peer_id, &info);
            if score < ESTIMATE_FLOOR {
                debug!(peer_id, conn_type = ?factory.connection_type(), score, "skipping factory below estimate floor");
                let _ = tx.send(Outcome::Skipped).await;
                return;
            }

            match factory.create(&own_id, &peer_id, &info).await {
                Ok(conn) => {
                    let outcome = await_connected(conn, deadline).await;
                    let _ = tx.send(outcome).await;
                }
                Err(err) => {
                    warn!(peer_id, conn_type = ?factory.connection_type(), error = %err, "connection attempt failed");
                    let _ = tx.send(Outcome::Failed).await;
                }
            }
        });
    }
    drop(tx);

    let mut pending = registry.ordered().len();
    let mut has_primary = false;

    while pending > 0 {
        let Some(outcome) = rx.recv().await else { break };
        pending -= 1;

        match outcome {
            Outcome::Connected(conn) => {
                if !has_primary {
                    has_primary = true;
                    info!(peer_id, conn_type = ?conn.connection_type(), "promoting primary connection");
                    *peer.primary.write() = Some(conn.clone());
                    (callbacks.on_connection)(peer_id.clone(), conn.connection_type());
                    spawn_message_pump(peer_id.clone(), conn, peer.clone(), callbacks.clone());
                } else {
                    info!(peer_id, conn_type = ?conn.connection_type(), "retaining backup connection");
                    if let Some(displaced) = peer.insert_backup(conn.clone()) {
                        displaced.close().await;
                    }
                    spawn_message_pump(peer_id.clone(), conn, peer.clone(), callbacks.clone());
                }
            }
            Outcome::Failed | Outcome::Skipped => {}
        }
    }

    if !has_primary {
        info!(peer_id, "all connection attempts failed");
        peers.remove(&peer_id);
        (callbacks.on_disconnect)(peer_id, None);
        return;
    }

    spawn_health_monitor(peer_id, peer, config, callbacks, peers);
}

/// Polls a freshly created connection until it leaves `Connecting`, or the
/// shared deadline elapses.
async fn await_connected(conn: SharedConnection, deadline: Instant) -> Outcome {
    loop {
        match conn.status() {
            ConnectionStatus::Connected => return Outcome::Connected(conn),
            ConnectionStatus::Connecting => {
                if Instant::now() >= deadline {
                    conn.close().await;
                    return Outcome::Failed;
                }
                sleep(STATUS_POLL_INTERVAL).await;
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Failed => return Outcome::Failed,
        }
    }
}

/// Drains a connection's incoming stream into the application callback for
/// as long as the connection lives. Exits silently once the stream closes
/// or the connection was never granted an incoming stream (already taken,
/// which should not happen for a freshly created connection).
fn spawn_message_pump(peer_id: String, conn: SharedConnection, peer: Arc<PeerConnection>, callbacks: Callbacks) {
    let Some(mut incoming) = conn.take_incoming() else {
        return;
    };
    tokio::spawn(async move {
        while let Some(msg) = incoming.recv().await {
            peer.record_message();
            (callbacks.on_message)(peer_id.clone(), msg);
        }
    });
}

fn spawn_health_monitor(
    peer_id: String,
    peer: Arc<PeerConnection>,
    config: ManagerConfig,
    callbacks: Callbacks,
    peers: Arc<DashMap<String, Arc<PeerConnection>>>,
) {
    let cancel = peer.cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(config.health_check_interval) => {}
            }

            let primary_status = peer.primary.read().as_ref().map(|c| c.status());
            let Some(status) = primary_status else { return };

            if status == ConnectionStatus::Connected {
                if let Some(conn) = peer.primary.read().clone() {
                    peer.record_history(conn.quality(), conn.latency());
                }
                continue;
            }

            let failed_type = peer.primary.read().as_ref().map(|c| c.connection_type());
            warn!(peer_id, conn_type = ?failed_type, "primary connection degraded");
            if let Some(conn) = peer.primary.write().take() {
                conn.close().await;
            }

            if let Some(backup) = peer.highest_quality_backup() {
                info!(peer_id, conn_type = ?backup.connection_type(), "promoting backup to primary");
                peer.remove_backup(backup.connection_type());
                *peer.primary.write() = Some(backup.clone());
                (callbacks.on_connection)(peer_id.clone(), backup.connection_type());
                spawn_message_pump(peer_id.clone(), backup, peer.clone(), callbacks.clone());
                continue;
            }

            info!(peer_id, "no backups remain, declaring peer disconnected");
            peers.remove(&peer_id);
            (callbacks.on_disconnect)(peer_id.clone(), failed_type);
            return;
        }
    });
}

/// Maps a manager-level lookup failure onto the shared error taxonomy for
/// callers that only care about the kind, not the specific variant.
pub fn error_kind(err: &ManagerError) -> ErrorKind {
    match err {
        ManagerError::AlreadyConnecting { .. } => ErrorKind::Fatal,
        ManagerError::NoRoute { .. } => ErrorKind::NoRoute,
        ManagerError::NotConnected { .. } => ErrorKind::NotConnected,
        ManagerError::Connection(inner) => connection_error_kind(inner),
    }
}

fn connection_error_kind(err: &ConnectionError) -> ErrorKind {
    err.error_kind()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use meshline_connection::{Connection, ConnectionType, Factory, IncomingSlot, INBOUND_CHANNEL_CAPACITY};
    use tokio::sync::Mutex as AsyncMutex;

    struct StubConnection {
        peer_id: String,
        conn_type: ConnectionType,
        quality: u8,
        incoming: IncomingSlot,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connection for StubConnection {
        fn peer_id(&self) -> &str {
            &self.peer_id
        }

        fn connection_type(&self) -> ConnectionType {
            self.conn_type
        }

        async fn send(&self, _msg: Message) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn take_incoming(&self) -> Option<mpsc::Receiver<Message>> {
            self.incoming.take()
        }

        fn status(&self) -> ConnectionStatus {
            ConnectionStatus::Connected
        }

        fn quality(&self) -> u8 {
            self.quality
        }

        fn latency(&self) -> StdDuration {
            StdDuration::from_millis(10)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct StubFactory {
        conn_type: ConnectionType,
        score: u8,
        should_connect: bool,
    }

    #[async_trait]
    impl Factory for StubFactory {
        fn connection_type(&self) -> ConnectionType {
            self.conn_type
        }

        fn estimate_success(&self, _peer_id: &str, _info: &NetworkInfo) -> u8 {
            self.score
        }

        async fn create(&self, _own_id: &str, peer_id: &str, _info: &NetworkInfo) -> Result<SharedConnection, ConnectionError> {
            if !self.should_connect {
                return Err(ConnectionError::kind(ErrorKind::Transient, "stub refuses to connect"));
            }
            let (_tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
            Ok(Arc::new(StubConnection {
                peer_id: peer_id.to_string(),
                conn_type: self.conn_type,
                quality: self.score,
                incoming: IncomingSlot::new(rx),
                closed: Arc::new(AtomicBool::new(false)),
            }))
        }
    }

    fn fast_config() -> ManagerConfig {
        ManagerConfig {
            connection_timeout: StdDuration::from_millis(500),
            max_retries: 0,
            retry_delay: StdDuration::from_millis(0),
            health_check_interval: StdDuration::from_millis(50),
            factory_stagger: StdDuration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn first_success_is_promoted_to_primary() {
        let registry = Arc::new(FactoryRegistry::new());
        registry.register(Arc::new(StubFactory { conn_type: ConnectionType::StunMedia, score: 90, should_connect: true }));
        registry.register(Arc::new(StubFactory { conn_type: ConnectionType::Polling, score: 90, should_connect: true }));

        let promoted = Arc::new(AsyncMutex::new(Vec::new()));
        let promoted_cb = promoted.clone();
        let callbacks = Callbacks::new(
            Arc::new(|_, _| {}),
            Arc::new(move |peer_id, conn_type| {
                let promoted = promoted_cb.clone();
                tokio::spawn(async move { promoted.lock().await.push((peer_id, conn_type)) });
            }),
            Arc::new(|_, _| {}),
        );

        let manager = LayeredConnectionManager::new("me", registry, fast_config(), callbacks);
        manager.connect_to_peer("friend", NetworkInfo::new()).unwrap();

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert!(manager.is_connected("friend"));
        assert!(!promoted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn total_failure_fires_disconnect_with_no_type() {
        let registry = Arc::new(FactoryRegistry::new());
        registry.register(Arc::new(StubFactory { conn_type: ConnectionType::StunMedia, score: 90, should_connect: false }));

        let disconnected = Arc::new(AsyncMutex::new(None));
        let disconnected_cb = disconnected.clone();
        let callbacks = Callbacks::new(
            Arc::new(|_, _| {}),
            Arc::new(|_, _| {}),
            Arc::new(move |peer_id, conn_type| {
                let disconnected = disconnected_cb.clone();
                tokio::spawn(async move { *disconnected.lock().await = Some((peer_id, conn_type)) });
            }),
        );

        let manager = LayeredConnectionManager::new("me", registry, fast_config(), callbacks);
        manager.connect_to_peer("friend", NetworkInfo::new()).unwrap();

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert!(!manager.is_connected("friend"));
        let seen = disconnected.lock().await.clone();
        assert_eq!(seen, Some(("friend".to_string(), None)));
    }

    #[tokio::test]
    async fn connect_to_peer_already_in_flight_is_rejected() {
        let registry = Arc::new(FactoryRegistry::new());
        registry.register(Arc::new(StubFactory { conn_type: ConnectionType::StunMedia, score: 90, should_connect: true }));
        let manager = LayeredConnectionManager::new("me", registry, fast_config(), Callbacks::noop());

        manager.connect_to_peer("friend", NetworkInfo::new()).unwrap();
        let result = manager.connect_to_peer("friend", NetworkInfo::new());
        assert!(matches!(result, Err(ManagerError::AlreadyConnecting { .. })));
    }
}
