//! Polling connection: treats a reachable HTTP endpoint as a bidirectional
//! channel by posting outbound messages to a `send` endpoint and
//! periodically GETting a `history` endpoint with a monotonically
//! advancing `since` cursor. The full [`Message`] (including the probe
//! protocol's type and metadata) travels JSON-encoded inside the history
//! entry's opaque `text` field, since the reference wire contract only
//! names `peer_id`/`text`/`timestamp`.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshline_core::config::PollingConfig;
use meshline_core::{ConnectionError, ErrorKind, Message, NetworkInfo};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionState, IncomingSlot, SharedConnection, INBOUND_CHANNEL_CAPACITY};
use crate::factory::Factory;
use crate::probe;
use crate::types::{ConnectionStatus, ConnectionType};

const SEND_CHANNEL_CAPACITY: usize = 64;
const CONSECUTIVE_ERROR_LIMIT: u32 = 5;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Reference poll rate the ±10 quality adjustment is measured against
/// (the default `poll_interval`, per §4.1).
const BASELINE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
struct HistoryEntry {
    peer_id: String,
    text: String,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    room: &'a str,
    peer_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[allow(dead_code)]
    timestamp: i64,
}

pub struct PollingConnection {
    peer_id: String,
    state: Arc<ConnectionState>,
    incoming: IncomingSlot,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

/// The cursor and consecutive-error tally shared between the poll loop and
/// the send path, so a burst of send failures still counts against the
/// same failure budget as poll failures.
struct PollingCursor {
    since: AtomicI64,
    consecutive_errors: AtomicU32,
}

impl PollingConnection {
    async fn establish(
        own_id: String,
        peer_id: String,
        base_url: String,
        room: String,
        config: PollingConfig,
    ) -> Result<Arc<Self>, ConnectionError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ConnectionError::Http(e.to_string()))?;

        // Validate the endpoint before transitioning to Connected.
        fetch_history(&client, &base_url, &room, 0).await?;

        let state = Arc::new(ConnectionState::new(ConnectionStatus::Connecting));
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        state.set_status(ConnectionStatus::Connected);
        state.set_quality(probe::quality_for_latency(ConnectionType::Polling, Duration::from_millis(0)));

        let cursor = Arc::new(PollingCursor {
            since: AtomicI64::new(0),
            consecutive_errors: AtomicU32::new(0),
        });

        spawn_sender(
            client.clone(),
            base_url.clone(),
            room.clone(),
            peer_id.clone(),
            outbound_rx,
            cursor.clone(),
            state.clone(),
            config.poll_interval,
            cancel.clone(),
        );
        spawn_poller(
            client,
            base_url,
            room,
            own_id.clone(),
            config.poll_interval,
            cursor,
            state.clone(),
            incoming_tx,
            outbound_tx.clone(),
            cancel.clone(),
        );
        probe::spawn_probe_loop(
            cancel.clone(),
            ConnectionType::Polling.probe_interval(),
            own_id,
            peer_id.clone(),
            outbound_tx.clone(),
        );

        Ok(Arc::new(Self {
            peer_id,
            state,
            incoming: IncomingSlot::new(incoming_rx),
            outbound_tx,
            cancel,
        }))
    }
}

async fn fetch_history(client: &reqwest::Client, base_url: &str, room: &str, since: i64) -> Result<Vec<HistoryEntry>, ConnectionError> {
    let url = format!("{}/history", base_url.trim_end_matches('/'));
    let response = client
        .get(url)
        .query(&[("room", room), ("since", &since.to_string())])
        .send()
        .await
        .map_err(|e| ConnectionError::Http(e.to_string()))?;
    response
        .json::<Vec<HistoryEntry>>()
        .await
        .map_err(|e| ConnectionError::Http(e.to_string()))
}

fn record_error(cursor: &PollingCursor, state: &ConnectionState, poll_interval: Duration) {
    let errors = cursor.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
    if errors >= CONSECUTIVE_ERROR_LIMIT {
        state.set_status(ConnectionStatus::Failed);
    }
    recompute_quality(cursor, state, poll_interval);
}

fn record_success(cursor: &PollingCursor, state: &ConnectionState, poll_interval: Duration) {
    cursor.consecutive_errors.store(0, Ordering::Release);
    recompute_quality(cursor, state, poll_interval);
}

/// Reapplies the §4.1 polling modifiers (consecutive-error penalty, poll
/// rate bonus/penalty) on top of the latency-derived base quality, so an
/// error tally change is reflected immediately rather than waiting for the
/// next pong.
fn recompute_quality(cursor: &PollingCursor, state: &ConnectionState, poll_interval: Duration) {
    let base = probe::quality_for_latency(ConnectionType::Polling, state.latency());
    let errors = cursor.consecutive_errors.load(Ordering::Acquire);
    state.set_quality(probe::adjust_polling_quality(base, errors, poll_interval, BASELINE_POLL_INTERVAL));
}

#[allow(clippy::too_many_arguments)]
fn spawn_sender(
    client: reqwest::Client,
    base_url: String,
    room: String,
    peer_id: String,
    mut outbound_rx: mpsc::Receiver<Message>,
    cursor: Arc<PollingCursor>,
    state: Arc<ConnectionState>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let url = format!("{}/send", base_url.trim_end_matches('/'));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let encoded = match serde_json::to_string(&msg) {
                        Ok(s) => s,
                        Err(e) => { warn!(error = %e, "failed to encode polling message"); continue; }
                    };
                    let body = SendRequest { room: &room, peer_id: &peer_id, text: &encoded };
                    match post_send(&client, &url, &body).await {
                        Ok(()) => record_success(&cursor, &state, poll_interval),
                        Err(e) => {
                            warn!(error = %e, "polling send failed");
                            record_error(&cursor, &state, poll_interval);
                        }
                    }
                }
            }
        }
    });
}

async fn post_send(client: &reqwest::Client, url: &str, body: &SendRequest<'_>) -> Result<(), String> {
    let response = client.post(url).json(body).send().await.map_err(|e| e.to_string())?;
    response.json::<SendResponse>().await.map_err(|e| e.to_string())?;
    Ok(())
}

/// Like [`probe::intercept_probe`], but a `pong` also reapplies the
/// consecutive-error and poll-rate modifiers on top of the fresh latency
/// reading, per §4.1.
async fn intercept_with_polling_modifier(
    msg: Message,
    own_id: &str,
    state: &ConnectionState,
    outbound: &mpsc::Sender<Message>,
    cursor: &PollingCursor,
    poll_interval: Duration,
) -> Option<Message> {
    if msg.is_ping() {
        let pong = msg.pong_for(own_id.to_string());
        let _ = outbound.send(pong).await;
        None
    } else if msg.is_pong() {
        if let Some(sent_at) = msg.probe_timestamp() {
            let latency = meshline_core::Timestamp::now().elapsed_since(sent_at);
            state.set_latency(latency);
            recompute_quality(cursor, state, poll_interval);
        }
        None
    } else {
        Some(msg)
    }
}

fn spawn_poller(
    client: reqwest::Client,
    base_url: String,
    room: String,
    own_id: String,
    interval: Duration,
    cursor: Arc<PollingCursor>,
    state: Arc<ConnectionState>,
    incoming_tx: mpsc::Sender<Message>,
    outbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let since = cursor.since.load(Ordering::Acquire);
                    match fetch_history(&client, &base_url, &room, since).await {
                        Ok(entries) => {
                            record_success(&cursor, &state, interval);
                            for entry in entries {
                                cursor.since.fetch_max(entry.timestamp, Ordering::AcqRel);
                                let msg: Message = match serde_json::from_str(&entry.text) {
                                    Ok(msg) => msg,
                                    Err(e) => {
                                        warn!(error = %e, "dropping malformed polling entry");
                                        continue;
                                    }
                                };
                                if let Some(forward) = intercept_with_polling_modifier(msg, &own_id, &state, &outbound_tx, &cursor, interval).await {
                                    if incoming_tx.send(forward).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "polling history fetch failed");
                            record_error(&cursor, &state, interval);
                            if state.status() == ConnectionStatus::Failed {
                                break;
                            }
                        }
                    }
                }
            }
        }
        if state.status() != ConnectionStatus::Failed {
            state.set_status(ConnectionStatus::Disconnected);
        }
    });
}

#[async_trait]
impl Connection for PollingConnection {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Polling
    }

    async fn send(&self, msg: Message) -> Result<(), ConnectionError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| ConnectionError::kind(ErrorKind::ConnectionFailed, "polling connection closed"))
    }

    fn take_incoming(&self) -> Option<mpsc::Receiver<Message>> {
        self.incoming.take()
    }

    fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    fn quality(&self) -> u8 {
        self.state.quality()
    }

    fn latency(&self) -> Duration {
        self.state.latency()
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.state.set_status(ConnectionStatus::Disconnected);
    }
}

pub struct PollingFactory {
    config: PollingConfig,
}

impl PollingFactory {
    pub fn new(config: PollingConfig) -> Self {
        Self { config }
    }

    fn base_url(&self, info: &NetworkInfo) -> Option<String> {
        if let Some(url) = &info.peer_http_url {
            return Some(url.clone());
        }
        info.peer_ip.as_ref().map(|ip| format!("http://{ip}:{}", self.config.default_http_port))
    }
}

#[async_trait]
impl Factory for PollingFactory {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Polling
    }

    fn estimate_success(&self, _peer_id: &str, info: &NetworkInfo) -> u8 {
        if info.peer_http_url.is_some() {
            90
        } else if info.peer_ip.is_some() {
            75
        } else {
            20
        }
    }

    async fn create(&self, own_id: &str, peer_id: &str, info: &NetworkInfo) -> Result<SharedConnection, ConnectionError> {
        let base_url = self
            .base_url(info)
            .ok_or_else(|| ConnectionError::kind(ErrorKind::Fatal, "polling requires peer_http_url or peer_ip"))?;
        let room = format!("peer-{peer_id}");
        debug!(peer_id, %base_url, %room, "creating polling connection");
        let conn = PollingConnection::establish(own_id.to_string(), peer_id.to_string(), base_url, room, self.config.clone()).await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_success_prefers_url_over_ip() {
        let factory = PollingFactory::new(PollingConfig::default());
        let mut info = NetworkInfo::new();
        info.peer_http_url = Some("http://example.test".to_string());
        assert_eq!(factory.estimate_success("peer", &info), 90);
        info.peer_http_url = None;
        info.peer_ip = Some("203.0.113.1".to_string());
        assert_eq!(factory.estimate_success("peer", &info), 75);
        info.peer_ip = None;
        assert_eq!(factory.estimate_success("peer", &info), 20);
    }

    #[test]
    fn default_room_derivation_matches_spec_resolution() {
        let factory = PollingFactory::new(PollingConfig::default());
        let mut info = NetworkInfo::new();
        info.peer_ip = Some("203.0.113.1".to_string());
        assert_eq!(factory.base_url(&info).unwrap(), "http://203.0.113.1:8088");
    }

    #[test]
    fn consecutive_errors_penalize_quality_immediately() {
        let cursor = PollingCursor { since: AtomicI64::new(0), consecutive_errors: AtomicU32::new(0) };
        let state = ConnectionState::new(ConnectionStatus::Connected);
        let base = probe::quality_for_latency(ConnectionType::Polling, state.latency());

        record_error(&cursor, &state, BASELINE_POLL_INTERVAL);
        assert_eq!(state.quality(), base.saturating_sub(10));

        record_error(&cursor, &state, BASELINE_POLL_INTERVAL);
        assert_eq!(state.quality(), base.saturating_sub(20));

        record_success(&cursor, &state, BASELINE_POLL_INTERVAL);
        assert_eq!(state.quality(), base);
    }

    #[test]
    fn faster_than_baseline_poll_rate_raises_quality() {
        let cursor = PollingCursor { since: AtomicI64::new(0), consecutive_errors: AtomicU32::new(0) };
        let state = ConnectionState::new(ConnectionStatus::Connected);
        let base = probe::quality_for_latency(ConnectionType::Polling, state.latency());

        record_success(&cursor, &state, Duration::from_millis(500));
        assert_eq!(state.quality(), (base + 10).min(100));
    }
}
