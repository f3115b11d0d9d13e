//! Local-interface enumeration shared by the LAN-broadcast connection and
//! the environment probe. Kept here, rather than duplicated in both, since
//! both need the same notion of "which IPv4 interfaces can originate a
//! broadcast locally".

use std::net::Ipv4Addr;

use crate::error::ProbeError;

/// An up, non-loopback IPv4 interface and its broadcast-capable subnet mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Interface {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// All up, non-loopback IPv4 interfaces on the host.
pub fn ipv4_interfaces() -> Result<Vec<Ipv4Interface>, ProbeError> {
    let all = if_addrs::get_if_addrs()?;
    Ok(all
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some(Ipv4Interface {
                address: v4.ip,
                netmask: v4.netmask,
            }),
            _ => None,
        })
        .collect())
}

/// The first non-loopback IPv4 address on an up interface, per §4.8.
pub fn local_ipv4() -> Result<Ipv4Addr, ProbeError> {
    ipv4_interfaces()?
        .into_iter()
        .next()
        .map(|iface| iface.address)
        .ok_or(ProbeError::NoInterface)
}

/// Private-range classification per §4.8: 10/8, 172.16/12, 192.168/16, 127/8.
pub fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    match octets[0] {
        10 => true,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        127 => true,
        _ => false,
    }
}

/// `bcast = ip | ~mask` for every up, non-loopback IPv4 interface; falls
/// back to the limited broadcast address if no interface is found.
pub fn broadcast_addresses() -> Vec<Ipv4Addr> {
    let interfaces = ipv4_interfaces().unwrap_or_default();
    if interfaces.is_empty() {
        return vec![Ipv4Addr::new(255, 255, 255, 255)];
    }
    interfaces
        .into_iter()
        .map(|iface| {
            let ip = u32::from(iface.address);
            let mask = u32::from(iface.netmask);
            Ipv4Addr::from(ip | !mask)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_private_ranges() {
        assert!(is_private_ipv4(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn broadcast_computation() {
        let iface = Ipv4Interface {
            address: Ipv4Addr::new(192, 168, 1, 42),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        let ip = u32::from(iface.address);
        let mask = u32::from(iface.netmask);
        let bcast = Ipv4Addr::from(ip | !mask);
        assert_eq!(bcast, Ipv4Addr::new(192, 168, 1, 255));
    }
}
