//! A minimal RFC 5389 STUN binding client: enough to discover our
//! server-reflexive address through one of the configured rendezvous
//! servers so the STUN-media connection has something to hand the peer
//! over the rendezvous channel.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use meshline_core::{ConnectionError, ErrorKind};
use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const XOR_MAPPED_ADDRESS: u16 = 0x0020;
const MAPPED_ADDRESS: u16 = 0x0001;

fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // no attributes
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(transaction_id);
    buf
}

fn parse_binding_response(buf: &[u8], transaction_id: &[u8; 12]) -> Option<SocketAddr> {
    if buf.len() < 20 {
        return None;
    }
    let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
    if msg_type != BINDING_SUCCESS {
        return None;
    }
    let msg_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if &buf[8..20] != transaction_id {
        return None;
    }

    let mut offset = 20;
    let end = (20 + msg_len).min(buf.len());
    let mut fallback: Option<SocketAddr> = None;

    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let attr_len = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > buf.len() {
            break;
        }
        let value = &buf[value_start..value_end];

        if attr_type == XOR_MAPPED_ADDRESS && value.len() >= 8 {
            let family = value[1];
            let xport = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
            if family == 0x01 {
                let xaddr = u32::from_be_bytes([value[4], value[5], value[6], value[7]]) ^ MAGIC_COOKIE;
                return Some(SocketAddr::from((Ipv4Addr::from(xaddr), xport)));
            }
        } else if attr_type == MAPPED_ADDRESS && value.len() >= 8 && fallback.is_none() {
            let family = value[1];
            let port = u16::from_be_bytes([value[2], value[3]]);
            if family == 0x01 {
                let addr = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
                fallback = Some(SocketAddr::from((Ipv4Addr::from(addr), port)));
            }
        }

        // attributes are padded to a 4-byte boundary
        offset = value_end + ((4 - (attr_len % 4)) % 4);
    }

    fallback
}

/// Sends a single STUN binding request to `server` over `socket` and
/// returns our server-reflexive address. Retried internally up to 3 times
/// with a 2s timeout each, per the spec's `Transient` error policy —
/// individual UDP packet loss never surfaces past this function.
pub async fn discover_reflexive_address(socket: &UdpSocket, server: SocketAddr) -> Result<SocketAddr, ConnectionError> {
    let mut transaction_id = [0u8; 12];
    let mut last_err = None;

    for _attempt in 0..3 {
        rand::thread_rng().fill_bytes(&mut transaction_id);
        let request = build_binding_request(&transaction_id);

        if let Err(e) = socket.send_to(&request, server).await {
            last_err = Some(e.to_string());
            continue;
        }

        let mut buf = [0u8; 512];
        match timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _from))) => {
                if let Some(addr) = parse_binding_response(&buf[..len], &transaction_id) {
                    return Ok(addr);
                }
                last_err = Some("malformed STUN response".to_string());
            }
            Ok(Err(e)) => last_err = Some(e.to_string()),
            Err(_) => last_err = Some("STUN request timed out".to_string()),
        }
    }

    Err(ConnectionError::kind(
        ErrorKind::Transient,
        format!("STUN binding request to {server} failed: {}", last_err.unwrap_or_default()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_xor_mapped_address() {
        let transaction_id = [7u8; 12];
        let addr = SocketAddr::from((Ipv4Addr::new(203, 0, 113, 42), 54321));

        let mut response = Vec::new();
        response.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
        let attr_value_len = 8u16;
        response.extend_from_slice(&(4 + attr_value_len).to_be_bytes());
        response.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        response.extend_from_slice(&transaction_id);

        response.extend_from_slice(&XOR_MAPPED_ADDRESS.to_be_bytes());
        response.extend_from_slice(&attr_value_len.to_be_bytes());
        response.push(0);
        response.push(0x01);
        let xport = 54321u16 ^ (MAGIC_COOKIE >> 16) as u16;
        response.extend_from_slice(&xport.to_be_bytes());
        let xaddr = u32::from(Ipv4Addr::new(203, 0, 113, 42)) ^ MAGIC_COOKIE;
        response.extend_from_slice(&xaddr.to_be_bytes());

        let parsed = parse_binding_response(&response, &transaction_id).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn rejects_mismatched_transaction_id() {
        let transaction_id = [1u8; 12];
        let other_id = [2u8; 12];
        let mut response = Vec::new();
        response.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
        response.extend_from_slice(&0u16.to_be_bytes());
        response.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        response.extend_from_slice(&other_id);
        assert!(parse_binding_response(&response, &transaction_id).is_none());
    }
}
