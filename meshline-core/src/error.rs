//! The error taxonomy shared across meshline crates.
//!
//! Each crate defines its own `thiserror`-derived error enum scoped to its
//! concerns; [`MeshlineError`] is the root type the façade and CLI surface,
//! with `#[from]` conversions from every subsystem error. Library crates
//! return their typed errors; `anyhow::Result` is reserved for the CLI
//! binary boundary.

use thiserror::Error;

/// The taxonomy named in the specification's error handling design: every
/// subsystem error ultimately maps onto one of these kinds so the manager
/// and façade can react uniformly regardless of which connection family
/// raised it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single attempt failed (DNS, one dial, one HTTP request); retried
    /// internally and never surfaced past the connection boundary.
    #[error("transient failure")]
    Transient,
    /// A connection reached `Failed`.
    #[error("connection failed")]
    ConnectionFailed,
    /// `send` was called for a peer with no `PeerConnection`.
    #[error("no route to peer")]
    NoRoute,
    /// `send` was called but the `PeerConnection` has no primary.
    #[error("not connected")]
    NotConnected,
    /// The supervisor deadline elapsed without any connection reaching
    /// `Connected`.
    #[error("connection attempt timed out")]
    Timeout,
    /// Unrecoverable at construction time (e.g. a port bind failure).
    #[error("fatal connection error")]
    Fatal,
}

#[derive(Error, Debug)]
pub enum MeshlineError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("{kind}: {message}")]
    Kind { kind: ErrorKind, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ConnectionError {
    pub fn kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        ConnectionError::Kind { kind, message: message.into() }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Kind { kind, .. } => *kind,
            ConnectionError::Io(_) => ErrorKind::Transient,
            ConnectionError::Http(_) => ErrorKind::Transient,
            ConnectionError::Serde(_) => ErrorKind::Transient,
        }
    }
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("already connecting to peer {peer_id}")]
    AlreadyConnecting { peer_id: String },
    #[error("no route to peer {peer_id}")]
    NoRoute { peer_id: String },
    #[error("not connected to peer {peer_id}")]
    NotConnected { peer_id: String },
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("missing required query parameter: {0}")]
    MissingParameter(&'static str),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
    #[error("log error: {0}")]
    Log(#[from] LogError),
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("storage io error: {0}")]
    Io(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no non-loopback interface found")]
    NoInterface,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
