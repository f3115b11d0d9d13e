//! The uniform send / receive / status / quality contract every transport
//! implements, realized as a trait (interface abstraction) per the design
//! notes rather than shared inheritance — common behavior is composed in
//! via [`crate::probe`] and [`ConnectionState`] instead.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshline_core::{ConnectionError, Message};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::{ConnectionStatus, ConnectionType};

/// Uniform contract implemented by all five connection families. Safe for
/// concurrent calls from multiple tasks; `send` serializes internally.
#[async_trait]
pub trait Connection: Send + Sync {
    fn peer_id(&self) -> &str;

    fn connection_type(&self) -> ConnectionType;

    /// Serializes concurrent callers internally; a connection's `send`
    /// never blocks on another `send` in progress for longer than it takes
    /// to hand the message to the transport's own outbound queue.
    async fn send(&self, msg: Message) -> Result<(), ConnectionError>;

    /// Takes ownership of the incoming-message stream. Returns `None` if
    /// already taken — the stream is lazy and consumed exactly once, by
    /// the manager's message pump.
    fn take_incoming(&self) -> Option<mpsc::Receiver<Message>>;

    fn status(&self) -> ConnectionStatus;

    /// `0` while `Connecting`, otherwise the most recent quality computed
    /// from the liveness probe.
    fn quality(&self) -> u8;

    /// Duration since the last round-trip probe; zero if never measured.
    fn latency(&self) -> Duration;

    /// Idempotent. Releases all owned resources (sockets, tasks) and
    /// publishes a terminal status before returning.
    async fn close(&self);
}

/// A boxed, shared handle to any connection implementation.
pub type SharedConnection = Arc<dyn Connection>;

/// Shared mutable state backing every connection implementation: status,
/// quality, and latency, each readable/writable without an async lock so
/// the manager's 100ms status-polling loop never contends with a transport
/// task holding a mutex across an `.await`.
pub struct ConnectionState {
    status: AtomicU8,
    quality: AtomicU8,
    latency_nanos: AtomicI64,
}

impl ConnectionState {
    pub fn new(initial: ConnectionStatus) -> Self {
        Self {
            status: AtomicU8::new(status_to_u8(initial)),
            quality: AtomicU8::new(0),
            latency_nanos: AtomicI64::new(0),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        u8_to_status(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status_to_u8(status), Ordering::Release);
        if status == ConnectionStatus::Connecting {
            self.quality.store(0, Ordering::Release);
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality.load(Ordering::Acquire)
    }

    pub fn set_quality(&self, quality: u8) {
        self.quality.store(quality, Ordering::Release);
    }

    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.latency_nanos.load(Ordering::Acquire).max(0) as u64)
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_nanos.store(latency.as_nanos() as i64, Ordering::Release);
    }
}

fn status_to_u8(status: ConnectionStatus) -> u8 {
    match status {
        ConnectionStatus::Connecting => 0,
        ConnectionStatus::Connected => 1,
        ConnectionStatus::Disconnected => 2,
        ConnectionStatus::Failed => 3,
    }
}

fn u8_to_status(value: u8) -> ConnectionStatus {
    match value {
        0 => ConnectionStatus::Connecting,
        1 => ConnectionStatus::Connected,
        2 => ConnectionStatus::Disconnected,
        _ => ConnectionStatus::Failed,
    }
}

/// Take-once wrapper around the incoming-message receiver, shared by every
/// implementation so "lazy, consumed exactly once" is enforced in one
/// place rather than five times.
#[derive(Clone)]
pub struct IncomingSlot(Arc<Mutex<Option<mpsc::Receiver<Message>>>>);

impl IncomingSlot {
    pub fn new(receiver: mpsc::Receiver<Message>) -> Self {
        Self(Arc::new(Mutex::new(Some(receiver))))
    }

    pub fn take(&self) -> Option<mpsc::Receiver<Message>> {
        self.0.lock().take()
    }
}

/// Capacity of the per-connection inbound channel, per §5.
pub const INBOUND_CHANNEL_CAPACITY: usize = 100;
