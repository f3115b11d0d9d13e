//! Shared vocabulary for the meshline transport stack.
//!
//! This crate has no async runtime dependencies of its own beyond what its
//! types need to serialize; it exists so the connection, manager,
//! signaling, storage, and transport crates agree on one `Message`, one
//! `NetworkInfo`, one configuration tree, and one error taxonomy instead of
//! each rolling their own.

pub mod config;
pub mod error;
pub mod message;
pub mod netutil;
pub mod network_info;

pub use config::MeshlineConfig;
pub use error::{ConnectionError, ErrorKind, LogError, ManagerError, MeshlineError, ProbeError, SignalingError};
pub use message::{Message, MetadataValue, Timestamp};
pub use network_info::{NatType, NetworkInfo, NetworkType};
