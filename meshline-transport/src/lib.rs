//! The transport façade: the thin API the rest of an application is meant
//! to hold onto. It owns one [`LayeredConnectionManager`], registers the
//! five connection factories at their fixed priorities, and forwards the
//! three event callbacks untouched. Everything interesting — staggered
//! attempts, primary/backup arbitration, health-monitor failover — lives
//! in `meshline-manager`; this crate's job is wiring and the one piece of
//! local-machine introspection (§4.8) the manager itself has no need of.

pub mod probe;

use std::sync::Arc;

use meshline_connection::{
    DirectStreamFactory, Factory, LanBroadcastFactory, PollingFactory, RelayedMediaFactory, RendezvousChannel, StunMediaFactory,
};
use meshline_core::config::MeshlineConfig;
use meshline_core::{ManagerError, Message, NetworkInfo, NetworkType};
use meshline_manager::{Callbacks, FactoryRegistry, LayeredConnectionManager};

pub use meshline_connection::{ConnectionType, NullRendezvous};
pub use meshline_manager::{OnConnection, OnDisconnect, OnMessage};

/// Binds the layered connection manager to a single peer-oriented API:
/// `connect_to_peer`, `send_message`, `close`, plus the environment probe
/// that fills in a [`NetworkInfo`] before a caller hands it to
/// `connect_to_peer`.
pub struct MeshlineTransport {
    own_id: String,
    manager: LayeredConnectionManager,
}

impl MeshlineTransport {
    /// Registers the five factories at their fixed priorities (§3) and
    /// constructs the manager. `rendezvous` backs the two media-channel
    /// factories' offer/answer exchange — typically a client of the
    /// signaling relay in `meshline-signaling`, but [`NullRendezvous`]
    /// works for configurations that never attempt media connections.
    pub fn new(own_id: impl Into<String>, config: MeshlineConfig, rendezvous: Arc<dyn RendezvousChannel>, callbacks: Callbacks) -> Self {
        let registry = Arc::new(FactoryRegistry::new());
        let factories: Vec<Arc<dyn Factory>> = vec![
            Arc::new(StunMediaFactory::new(config.stun_media.clone(), rendezvous.clone())),
            Arc::new(RelayedMediaFactory::new(config.relayed_media.clone())),
            Arc::new(DirectStreamFactory::new(config.direct_stream.clone())),
            Arc::new(PollingFactory::new(config.polling.clone())),
            Arc::new(LanBroadcastFactory::new(config.lan_broadcast.clone())),
        ];
        for factory in factories {
            registry.register(factory);
        }

        let own_id = own_id.into();
        let manager = LayeredConnectionManager::new(own_id.clone(), registry, config.manager, callbacks);
        Self { own_id, manager }
    }

    /// Convenience constructor for callers that never attempt media
    /// connections and so have no signaling client to wire in.
    pub fn without_rendezvous(own_id: impl Into<String>, config: MeshlineConfig, callbacks: Callbacks) -> Self {
        Self::new(own_id, config, Arc::new(NullRendezvous), callbacks)
    }

    pub fn own_id(&self) -> &str {
        &self.own_id
    }

    /// Probes the local machine and folds the result into a `NetworkInfo`
    /// carrying the supplied peer-side hints. Per §4.8, the NAT
    /// classification is advisory and never blocks this call.
    pub async fn create_network_info(&self, peer_ip: Option<String>, peer_http_url: Option<String>, network_type: NetworkType) -> NetworkInfo {
        probe::create_network_info(peer_ip, peer_http_url, network_type).await
    }

    /// Begins the staggered parallel connection attempt for `peer_id`.
    /// Returns immediately; see [`LayeredConnectionManager::connect_to_peer`]
    /// for the supervisor/health-monitor lifecycle this kicks off.
    pub fn connect_to_peer(&self, peer_id: impl Into<String>, info: NetworkInfo) -> Result<(), ManagerError> {
        self.manager.connect_to_peer(peer_id, info)
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.manager.is_connected(peer_id)
    }

    /// Constructs a `Message` stamped `from = own_id` and sends it through
    /// the peer's current primary connection.
    pub async fn send_message(&self, peer_id: &str, msg_type: impl Into<String>, payload: Vec<u8>) -> Result<(), ManagerError> {
        let msg = Message::new(self.own_id.clone(), peer_id.to_string(), msg_type, payload);
        self.manager.send(peer_id, msg).await
    }

    /// Closes every connection to every peer and clears all manager state.
    /// Idempotent.
    pub async fn close(&self) {
        self.manager.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshline_core::NatType;

    #[tokio::test]
    async fn construction_registers_all_five_factories_without_panicking() {
        let config = MeshlineConfig::default();
        let transport = MeshlineTransport::without_rendezvous("me", config, Callbacks::noop());
        assert_eq!(transport.own_id(), "me");
        assert!(!transport.is_connected("nobody"));
    }

    #[tokio::test]
    async fn create_network_info_preserves_supplied_peer_hints() {
        let config = MeshlineConfig::default();
        let transport = MeshlineTransport::without_rendezvous("me", config, Callbacks::noop());
        let info = transport
            .create_network_info(Some("203.0.113.5".to_string()), None, NetworkType::Internet)
            .await;
        assert_eq!(info.peer_ip.as_deref(), Some("203.0.113.5"));
        assert_eq!(info.network_type, NetworkType::Internet);
        assert_ne!(info.nat_type, NatType::default()); // probe always resolves to a concrete classification, never left default-constructed
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails_no_route() {
        let config = MeshlineConfig::default();
        let transport = MeshlineTransport::without_rendezvous("me", config, Callbacks::noop());
        let result = transport.send_message("nobody", "chat", b"hi".to_vec()).await;
        assert!(matches!(result, Err(ManagerError::NoRoute { .. })));
    }
}
