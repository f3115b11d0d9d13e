pub mod log;
pub mod server;

pub use log::{LogEntry, PersistentMessageLog};
pub use server::router;
