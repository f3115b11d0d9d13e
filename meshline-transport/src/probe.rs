//! The environment probe: local IP enumeration, private-range
//! classification, broadcast-address enumeration, and an advisory NAT
//! classification built on the same STUN client the STUN-media connection
//! uses. None of this gates functionality — a failed probe degrades to the
//! most conservative default (`cone` NAT, no broadcast interfaces) rather
//! than failing `create_network_info`.

use std::net::SocketAddr;
use std::time::Duration;

use meshline_connection::stun;
use meshline_core::netutil::{broadcast_addresses, is_private_ipv4, local_ipv4};
use meshline_core::{NatType, NetworkInfo, NetworkType};
use tokio::net::UdpSocket;
use tracing::debug;

/// The fixed rendezvous list the environment probe borrows for its own NAT
/// classification. Not the same list a STUN-media connection dials for an
/// actual peer session, but run the same protocol against it.
const NAT_PROBE_SERVERS: &[&str] = &["stun.l.google.com:19302", "stun1.l.google.com:19302"];

/// The first non-loopback IPv4 on an up interface, per §4.8. Returns
/// `None` rather than erroring — advisory inputs degrade gracefully.
pub fn local_ip() -> Option<String> {
    local_ipv4().ok().map(|ip| ip.to_string())
}

/// Private-range classification (10/8, 172.16/12, 192.168/16, 127/8).
pub fn is_private(ip: &str) -> bool {
    ip.parse().map(is_private_ipv4).unwrap_or(false)
}

/// Broadcast addresses for every up, broadcast-capable, non-loopback IPv4
/// interface; falls back to the limited broadcast address.
pub fn broadcast_candidates() -> Vec<String> {
    broadcast_addresses().into_iter().map(|addr| addr.to_string()).collect()
}

/// Classifies the local NAT by comparing the server-reflexive address a
/// single UDP socket sees across two independent rendezvous servers: if
/// both report the same mapped port, the NAT preserves the mapping across
/// destinations (cone-like) rather than allocating a fresh one per peer
/// (symmetric). A reflexive address matching the socket's own local
/// address, with no translation at all, classifies as `open`. Any probe
/// failure — DNS, timeout, malformed response — falls back to `cone`,
/// the spec's named default for an inconclusive result.
pub async fn classify_nat() -> NatType {
    let Ok(socket) = UdpSocket::bind("0.0.0.0:0").await else {
        return NatType::Cone;
    };
    let Ok(local_addr) = socket.local_addr() else {
        return NatType::Cone;
    };

    let mut mapped: Vec<SocketAddr> = Vec::with_capacity(NAT_PROBE_SERVERS.len());
    for server_name in NAT_PROBE_SERVERS {
        let Ok(mut resolved) = tokio::net::lookup_host(server_name).await else {
            continue;
        };
        let Some(server_addr) = resolved.next() else { continue };
        match tokio::time::timeout(Duration::from_secs(3), stun::discover_reflexive_address(&socket, server_addr)).await {
            Ok(Ok(addr)) => mapped.push(addr),
            _ => debug!(server = %server_name, "nat probe attempt failed"),
        }
    }

    if mapped.is_empty() {
        return NatType::Cone;
    }

    if mapped.iter().all(|addr| addr.port() == local_addr.port()) {
        return NatType::Open;
    }

    if mapped.len() >= 2 {
        let first_port = mapped[0].port();
        if mapped.iter().all(|addr| addr.port() == first_port) {
            NatType::Cone
        } else {
            NatType::Symmetric
        }
    } else {
        NatType::Cone
    }
}

/// Builds a [`NetworkInfo`] for `peer_ip`/`peer_http_url`/`network_type`,
/// enriching it with a local probe: `local_ip` from interface enumeration
/// and `nat_type` from [`classify_nat`]. Used by the transport façade's
/// `create_network_info`.
pub async fn create_network_info(peer_ip: Option<String>, peer_http_url: Option<String>, network_type: NetworkType) -> NetworkInfo {
    let local = local_ip();
    let nat_type = classify_nat().await;

    NetworkInfo {
        peer_ip,
        peer_http_url,
        network_type,
        nat_type,
        local_ip: local,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_classification_matches_netutil() {
        assert!(is_private("10.0.0.5"));
        assert!(!is_private("8.8.8.8"));
        assert!(!is_private("not-an-ip"));
    }
}
