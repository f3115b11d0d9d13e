//! The liveness probe protocol shared by all five connection families: a
//! periodic outbound `ping`, a `pong` echo, and a per-type latency→quality
//! table. Composed into each implementation rather than inherited, per the
//! design notes — a connection just spawns [`spawn_probe_loop`] and feeds
//! observed pongs into [`quality_for_latency`] plus its own modifiers.

use std::time::Duration;

use meshline_core::{Message, Timestamp};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionState;
use crate::types::ConnectionType;

/// Quality ceiling table from §4.1, indexed by latency bucket:
/// `[<=20ms, <=50ms, <=100ms, <=200ms, <=500ms, >500ms]`.
fn ceilings(conn_type: ConnectionType) -> [u8; 6] {
    match conn_type {
        ConnectionType::StunMedia => [95, 95, 85, 70, 50, 20],
        ConnectionType::RelayedMedia => [80, 80, 70, 60, 40, 20],
        ConnectionType::DirectStream => [90, 85, 75, 60, 40, 40],
        ConnectionType::Polling => [70, 70, 60, 60, 50, 30],
        ConnectionType::LanBroadcast => [80, 80, 75, 65, 55, 40],
    }
}

fn bucket(latency_ms: u64) -> usize {
    match latency_ms {
        0..=20 => 0,
        21..=50 => 1,
        51..=100 => 2,
        101..=200 => 3,
        201..=500 => 4,
        _ => 5,
    }
}

/// Base quality for a measured latency, before any per-type modifiers.
pub fn quality_for_latency(conn_type: ConnectionType, latency: Duration) -> u8 {
    ceilings(conn_type)[bucket(latency.as_millis() as u64)]
}

/// Polling additionally subtracts 10 per consecutive poll error and
/// raises/lowers 10 by poll rate relative to the configured baseline.
pub fn adjust_polling_quality(base: u8, consecutive_errors: u32, poll_interval: Duration, baseline_interval: Duration) -> u8 {
    let mut quality = base as i32 - (consecutive_errors as i32 * 10);
    if poll_interval < baseline_interval {
        quality += 10;
    } else if poll_interval > baseline_interval {
        quality -= 10;
    }
    quality.clamp(0, 100) as u8
}

/// LAN broadcast adds +10 for a lively neighborhood, -20 for an empty one.
pub fn adjust_lan_quality(base: u8, live_peer_count: usize) -> u8 {
    let adjusted = if live_peer_count >= 4 {
        base as i32 + 10
    } else if live_peer_count == 0 {
        base as i32 - 20
    } else {
        base as i32
    };
    adjusted.clamp(0, 100) as u8
}

/// Spawns the periodic ping originator. Pushes `ping` messages onto the
/// connection's own outbound channel — the same path application messages
/// travel — so probe traffic exercises the exact send path it measures.
/// Exits when `cancel` fires or the outbound channel closes.
pub fn spawn_probe_loop(
    cancel: CancellationToken,
    interval: Duration,
    own_id: String,
    peer_id: String,
    outbound: mpsc::Sender<Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let ping = Message::ping(own_id.clone(), peer_id.clone());
                    if outbound.send(ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Intercepts the probe protocol on a freshly-received message: answers a
/// `ping` with a `pong` on `outbound`, folds a `pong` into `state`'s latency
/// and quality, and otherwise hands the message back to the caller to
/// forward to the application. Every connection's reader task routes every
/// inbound message through this before touching its incoming channel.
pub async fn intercept_probe(
    msg: Message,
    own_id: &str,
    conn_type: ConnectionType,
    state: &ConnectionState,
    outbound: &mpsc::Sender<Message>,
) -> Option<Message> {
    if msg.is_ping() {
        let pong = msg.pong_for(own_id.to_string());
        let _ = outbound.send(pong).await;
        None
    } else if msg.is_pong() {
        if let Some(sent_at) = msg.probe_timestamp() {
            let latency = Timestamp::now().elapsed_since(sent_at);
            state.set_latency(latency);
            state.set_quality(quality_for_latency(conn_type, latency));
        }
        None
    } else {
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stun_media_quality_matches_spec_table() {
        assert_eq!(quality_for_latency(ConnectionType::StunMedia, Duration::from_millis(10)), 95);
        assert_eq!(quality_for_latency(ConnectionType::StunMedia, Duration::from_millis(60)), 85);
        assert_eq!(quality_for_latency(ConnectionType::StunMedia, Duration::from_millis(150)), 70);
        assert_eq!(quality_for_latency(ConnectionType::StunMedia, Duration::from_millis(400)), 50);
        assert_eq!(quality_for_latency(ConnectionType::StunMedia, Duration::from_millis(900)), 20);
    }

    #[test]
    fn polling_quality_penalizes_errors_and_slow_rate() {
        let base = quality_for_latency(ConnectionType::Polling, Duration::from_millis(10));
        let baseline = Duration::from_secs(2);
        assert_eq!(adjust_polling_quality(base, 0, baseline, baseline), base);
        assert_eq!(adjust_polling_quality(base, 2, baseline, baseline), base - 20);
        assert_eq!(adjust_polling_quality(base, 0, Duration::from_secs(1), baseline), base + 10);
        assert_eq!(adjust_polling_quality(base, 0, Duration::from_secs(5), baseline), base - 10);
    }

    #[test]
    fn lan_quality_rewards_crowded_neighborhood() {
        let base = quality_for_latency(ConnectionType::LanBroadcast, Duration::from_millis(10));
        assert_eq!(adjust_lan_quality(base, 5), base + 10);
        assert_eq!(adjust_lan_quality(base, 0), base - 20);
        assert_eq!(adjust_lan_quality(base, 2), base);
    }
}
