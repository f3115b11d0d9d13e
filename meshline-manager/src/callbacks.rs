//! The three event callbacks the application supplies when constructing a
//! manager. Plain boxed closures rather than a trait: the manager never
//! needs more than one implementation live at a time, and a trait object
//! would only add ceremony here.

use std::sync::Arc;

use meshline_connection::ConnectionType;
use meshline_core::Message;

pub type OnMessage = Arc<dyn Fn(String, Message) + Send + Sync>;
pub type OnConnection = Arc<dyn Fn(String, ConnectionType) + Send + Sync>;
/// `None` on total failure (no connection for this peer ever reached
/// `Connected`); `Some(type)` when the health monitor exhausts backups for
/// a peer that previously had a primary of that type.
pub type OnDisconnect = Arc<dyn Fn(String, Option<ConnectionType>) + Send + Sync>;

#[derive(Clone)]
pub struct Callbacks {
    pub on_message: OnMessage,
    pub on_connection: OnConnection,
    pub on_disconnect: OnDisconnect,
}

impl Callbacks {
    pub fn new(on_message: OnMessage, on_connection: OnConnection, on_disconnect: OnDisconnect) -> Self {
        Self { on_message, on_connection, on_disconnect }
    }

    pub fn noop() -> Self {
        Self {
            on_message: Arc::new(|_, _| {}),
            on_connection: Arc::new(|_, _| {}),
            on_disconnect: Arc::new(|_, _| {}),
        }
    }
}
