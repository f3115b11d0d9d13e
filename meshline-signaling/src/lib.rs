pub mod client;
pub mod envelope;
pub mod hub;
pub mod websocket;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use meshline_core::config::SignalingConfig;
use meshline_storage::PersistentMessageLog;
use tokio::net::TcpListener;
use tracing::info;

pub use client::SignalingRendezvousClient;
pub use envelope::{Envelope, ServerNotification};
pub use hub::SignalingHub;

/// Builds the relay's router: a single upgrade endpoint at `/` taking
/// `room`/`peer_id` query parameters.
pub fn router(hub: Arc<SignalingHub>) -> Router {
    Router::new().route("/", get(websocket::upgrade)).with_state(hub)
}

/// Binds and serves the signaling relay until the returned future is
/// dropped or the process is signaled; intended for the CLI binary.
pub async fn serve(config: &SignalingConfig, log: Arc<PersistentMessageLog>) -> std::io::Result<()> {
    let hub = Arc::new(SignalingHub::new(log));
    let app = router(hub);
    let addr = format!("{}:{}", config.bind_address, config.port);
    info!(%addr, "signaling relay listening");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
