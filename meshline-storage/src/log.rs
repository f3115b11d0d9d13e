//! Append-only ordered message log. Keyed by `(room, timestamp, sequence)`
//! in a single sled tree so a range read is a prefix scan rather than a
//! full-table filter; a companion `peers` tree tracks last-seen times for
//! the same store handle.

use std::path::Path;

use meshline_core::{LogError, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub room: String,
    pub peer_id: String,
    pub timestamp: i64,
    pub msg_type: String,
    pub payload: Vec<u8>,
    pub filename: Option<String>,
}

pub struct PersistentMessageLog {
    db: sled::Db,
    events: sled::Tree,
    peers: sled::Tree,
}

impl PersistentMessageLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let db = sled::open(path)?;
        let events = db.open_tree("events")?;
        let peers = db.open_tree("peers")?;
        Ok(Self { db, events, peers })
    }

    /// Stamps the entry with the server's current time and appends it.
    /// Fails only on storage I/O.
    pub fn append(&self, room: &str, peer_id: &str, msg_type: &str, payload: &[u8], filename: Option<&str>) -> Result<LogEntry, LogError> {
        let timestamp = Timestamp::now().as_unix_seconds();
        let sequence = self.db.generate_id()?;
        let entry = LogEntry {
            room: room.to_string(),
            peer_id: peer_id.to_string(),
            timestamp,
            msg_type: msg_type.to_string(),
            payload: payload.to_vec(),
            filename: filename.map(str::to_string),
        };

        self.events.insert(event_key(room, timestamp, sequence), serde_json::to_vec(&entry)?)?;
        self.peers.insert(peer_id.as_bytes(), &timestamp.to_be_bytes())?;
        Ok(entry)
    }

    /// Entries strictly newer than `since`, ascending by timestamp,
    /// optionally filtered by `msg_type`.
    pub fn read(&self, room: &str, msg_type: Option<&str>, since: i64) -> Result<Vec<LogEntry>, LogError> {
        let mut out = Vec::new();
        for item in self.events.scan_prefix(room_prefix(room)) {
            let (_, value) = item?;
            let entry: LogEntry = serde_json::from_slice(&value)?;
            if entry.timestamp <= since {
                continue;
            }
            if msg_type.is_some_and(|expected| entry.msg_type != expected) {
                continue;
            }
            out.push(entry);
        }
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }

    pub fn peer_last_seen(&self, peer_id: &str) -> Result<Option<i64>, LogError> {
        Ok(self.peers.get(peer_id.as_bytes())?.map(|v| i64::from_be_bytes(v.as_ref().try_into().expect("8-byte timestamp"))))
    }
}

fn room_prefix(room: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(room.len() + 1);
    key.extend_from_slice(room.as_bytes());
    key.push(0);
    key
}

/// `timestamp` is non-negative in practice (unix seconds); the cast
/// preserves big-endian lexicographic ordering for the prefix scan.
fn event_key(room: &str, timestamp: i64, sequence: u64) -> Vec<u8> {
    let mut key = room_prefix(room);
    key.extend_from_slice(&(timestamp as u64).to_be_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (PersistentMessageLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = PersistentMessageLog::open(dir.path()).unwrap();
        (log, dir)
    }

    #[test]
    fn read_filters_by_since_and_type() {
        let (log, _dir) = open_temp();
        log.append("room-a", "alice", "chat", b"hi", None).unwrap();
        log.append("room-a", "bob", "signal", b"offer", None).unwrap();

        let all = log.read("room-a", None, 0).unwrap();
        assert_eq!(all.len(), 2);

        let chat_only = log.read("room-a", Some("chat"), 0).unwrap();
        assert_eq!(chat_only.len(), 1);
        assert_eq!(chat_only[0].peer_id, "alice");

        let future = log.read("room-a", None, i64::MAX).unwrap();
        assert!(future.is_empty());
    }

    #[test]
    fn read_is_scoped_to_room() {
        let (log, _dir) = open_temp();
        log.append("room-a", "alice", "chat", b"hi", None).unwrap();
        log.append("room-b", "carol", "chat", b"hey", None).unwrap();

        assert_eq!(log.read("room-a", None, 0).unwrap().len(), 1);
        assert_eq!(log.read("room-b", None, 0).unwrap().len(), 1);
    }

    #[test]
    fn peers_tree_tracks_last_seen() {
        let (log, _dir) = open_temp();
        assert!(log.peer_last_seen("alice").unwrap().is_none());
        let entry = log.append("room-a", "alice", "chat", b"hi", None).unwrap();
        assert_eq!(log.peer_last_seen("alice").unwrap(), Some(entry.timestamp));
    }
}
