//! The per-family constructor contract the connection manager's registry
//! holds: a priority, a self-reported success estimate given advisory
//! network information, and a `create` that produces a live connection.

use async_trait::async_trait;
use meshline_core::{ConnectionError, NetworkInfo};

use crate::connection::SharedConnection;
use crate::types::ConnectionType;

#[async_trait]
pub trait Factory: Send + Sync {
    fn connection_type(&self) -> ConnectionType;

    /// Fixed per §3; defaults to the type's table value.
    fn priority(&self) -> i32 {
        self.connection_type().priority()
    }

    /// Self-reported probability (0-100) that `create` will reach
    /// `Connected` given `info`. Never performs I/O; advisory only.
    fn estimate_success(&self, peer_id: &str, info: &NetworkInfo) -> u8;

    /// Produces a connection in `Connecting` status, or a `Fatal` error if
    /// construction itself cannot proceed (e.g. a port bind failure).
    async fn create(&self, own_id: &str, peer_id: &str, info: &NetworkInfo) -> Result<SharedConnection, ConnectionError>;
}
