//! Abstraction the media-channel factories use to bootstrap a connection:
//! exchange a local offer string with a named peer and get their answer
//! back. The concrete implementation (a signaling-relay client) lives
//! outside this crate so the connection layer never depends on the
//! signaling crate — keeping the dependency graph acyclic per the design
//! notes (factories hold no references back to anything that could retain
//! a manager or façade).

use async_trait::async_trait;
use meshline_core::ConnectionError;

#[async_trait]
pub trait RendezvousChannel: Send + Sync {
    /// Publishes `local_offer` for `peer_id` and waits (bounded by the
    /// caller's own timeout) for that peer's answering offer.
    async fn exchange(&self, peer_id: &str, local_offer: &str) -> Result<String, ConnectionError>;
}

/// A rendezvous channel that never produces an answer — useful as a
/// default when no signaling client has been wired in, e.g. in isolated
/// unit tests of the factory's `estimate_success` logic.
pub struct NullRendezvous;

#[async_trait]
impl RendezvousChannel for NullRendezvous {
    async fn exchange(&self, _peer_id: &str, _local_offer: &str) -> Result<String, ConnectionError> {
        Err(ConnectionError::kind(
            meshline_core::ErrorKind::Fatal,
            "no rendezvous channel configured",
        ))
    }
}
