pub mod callbacks;
pub mod manager;
pub mod peer;
pub mod registry;

pub use callbacks::{Callbacks, OnConnection, OnDisconnect, OnMessage};
pub use manager::LayeredConnectionManager;
pub use peer::PeerConnection;
pub use registry::FactoryRegistry;
