//! UDP beacon encode/decode shared by the controller (sender) and the agent
//! (listener). The wire payload is the plain UTF-8 string `"<MAGIC>:<port>"`,
//! not a structured format, so anything already sniffing the wire for this
//! prefix keeps working.

use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Socket, Type};

use crate::config::BEACON_MAGIC;

/// Binds a UDP socket on `port` with address-share semantics, the way
/// `agent.cpp`'s `startAutoDiscovery()` binds with `QUdpSocket::ShareAddress |
/// QUdpSocket::ReuseAddressHint` so more than one agent on the same host can
/// listen for the beacon on the same port.
pub fn bind_shared_discovery_socket(port: u16) -> std::io::Result<tokio::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    tokio::net::UdpSocket::from_std(socket.into())
}

/// Builds the beacon datagram payload for the given controller TCP port.
pub fn encode_beacon(tcp_port: u16) -> Vec<u8> {
    format!("{BEACON_MAGIC}:{tcp_port}").into_bytes()
}

/// A successfully parsed beacon: just the advertised TCP port. The sender's
/// address is supplied separately by the caller (it comes from `recv_from`,
/// not the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconInfo {
    pub tcp_port: u16,
}

/// Parses a received datagram as a beacon. Returns `None` for anything that
/// doesn't start with the magic prefix or doesn't carry a valid port; such
/// datagrams are logged and otherwise ignored by the caller, never fatal.
pub fn parse_beacon(datagram: &[u8]) -> Option<BeaconInfo> {
    let text = std::str::from_utf8(datagram).ok()?;
    let rest = text.strip_prefix(BEACON_MAGIC)?.strip_prefix(':')?;
    let tcp_port: u16 = rest.trim().parse().ok()?;
    Some(BeaconInfo { tcp_port })
}

/// Strips an IPv4-mapped-IPv6 prefix (`::ffff:a.b.c.d`) from a textual address,
/// leaving plain IPv4 addresses and any other IPv6 address untouched.
pub fn normalize_sender_ip(addr: &str) -> String {
    addr.strip_prefix("::ffff:")
        .map(str::to_string)
        .unwrap_or_else(|| addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_round_trips() {
        let bytes = encode_beacon(8899);
        assert_eq!(bytes, b"LANMGR_SERVER:8899");
        let parsed = parse_beacon(&bytes).unwrap();
        assert_eq!(parsed.tcp_port, 8899);
    }

    #[test]
    fn parse_rejects_wrong_magic() {
        assert!(parse_beacon(b"SOMETHING_ELSE:8899").is_none());
    }

    #[test]
    fn parse_rejects_missing_port() {
        assert!(parse_beacon(b"LANMGR_SERVER:").is_none());
        assert!(parse_beacon(b"LANMGR_SERVER").is_none());
    }

    #[test]
    fn parse_rejects_non_numeric_port() {
        assert!(parse_beacon(b"LANMGR_SERVER:not-a-port").is_none());
    }

    #[test]
    fn normalize_strips_ipv4_mapped_prefix() {
        assert_eq!(normalize_sender_ip("::ffff:192.168.1.5"), "192.168.1.5");
        assert_eq!(normalize_sender_ip("192.168.1.5"), "192.168.1.5");
        assert_eq!(normalize_sender_ip("fe80::1"), "fe80::1");
    }
}
