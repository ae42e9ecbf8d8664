//! ICMPv4 echo packets.
//!
//! ```text
//! +------+------+----------+------------+----------+---------+
//! | Type | Code | Checksum | Identifier | Sequence | Payload |
//! +------+------+----------+------------+----------+---------+
//! |  1   |  1   |    2     |     2      |    2     |   ...   |
//! +------+------+----------+------------+----------+---------+
//! ```
//!
//! Multi-byte fields are big-endian. Raw IPv4 sockets deliver replies with the
//! IP header in front, so [`parse_echo_reply`] skips it first.

use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

/// ICMP echo request type.
pub const ECHO_REQUEST: u8 = 8;

/// ICMP echo reply type.
pub const ECHO_REPLY: u8 = 0;

/// ICMP header length.
pub const ICMP_HEADER_LEN: usize = 8;

/// Minimum IPv4 header length.
const IPV4_MIN_HEADER_LEN: usize = 20;

/// Internet checksum (RFC 1071).
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(BigEndian::read_u16(pair));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)]
    let folded = sum as u16;
    !folded
}

/// Build an echo request packet.
pub fn echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; ICMP_HEADER_LEN + payload.len()];
    packet[0] = ECHO_REQUEST;
    packet[1] = 0;
    BigEndian::write_u16(&mut packet[4..6], identifier);
    BigEndian::write_u16(&mut packet[6..8], sequence);
    packet[ICMP_HEADER_LEN..].copy_from_slice(payload);
    let sum = checksum(&packet);
    BigEndian::write_u16(&mut packet[2..4], sum);
    packet
}

/// A parsed echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply<'a> {
    /// Source address from the IP header.
    pub source: Ipv4Addr,
    /// Echo identifier.
    pub identifier: u16,
    /// Echo sequence number.
    pub sequence: u16,
    /// Echo payload.
    pub payload: &'a [u8],
}

/// Parse a datagram read from a raw ICMP socket (IPv4 header included).
///
/// Returns `None` for anything that is not a well-formed echo reply.
pub fn parse_echo_reply(datagram: &[u8]) -> Option<EchoReply<'_>> {
    if datagram.len() < IPV4_MIN_HEADER_LEN {
        return None;
    }
    if datagram[0] >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(datagram[0] & 0x0F) * 4;
    if ihl < IPV4_MIN_HEADER_LEN || datagram.len() < ihl + ICMP_HEADER_LEN {
        return None;
    }

    let source = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    let icmp = &datagram[ihl..];
    if icmp[0] != ECHO_REPLY {
        return None;
    }

    Some(EchoReply {
        source,
        identifier: BigEndian::read_u16(&icmp[4..6]),
        sequence: BigEndian::read_u16(&icmp[6..8]),
        payload: &icmp[ICMP_HEADER_LEN..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_wrap(source: Ipv4Addr, icmp: &[u8]) -> Vec<u8> {
        let mut datagram = vec![0u8; 20];
        datagram[0] = 0x45;
        datagram[9] = 1;
        datagram[12..16].copy_from_slice(&source.octets());
        datagram.extend_from_slice(icmp);
        datagram
    }

    #[test]
    fn test_echo_request_checksum_verifies() {
        let packet = echo_request(0x1234, 7, b"RTIy\r");
        assert_eq!(packet[0], ECHO_REQUEST);
        // A packet including its own checksum sums to zero.
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn test_checksum_odd_length() {
        let packet = echo_request(1, 1, b"abc");
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn test_parse_echo_reply() {
        let mut icmp = echo_request(0xBEEF, 42, b"hello");
        icmp[0] = ECHO_REPLY;
        let datagram = ipv4_wrap(Ipv4Addr::new(192, 168, 1, 9), &icmp);

        let reply = parse_echo_reply(&datagram).expect("valid reply");
        assert_eq!(reply.source, Ipv4Addr::new(192, 168, 1, 9));
        assert_eq!(reply.identifier, 0xBEEF);
        assert_eq!(reply.sequence, 42);
        assert_eq!(reply.payload, b"hello");
    }

    #[test]
    fn test_parse_ignores_echo_request() {
        let icmp = echo_request(1, 1, b"x");
        let datagram = ipv4_wrap(Ipv4Addr::LOCALHOST, &icmp);
        assert!(parse_echo_reply(&datagram).is_none());
    }

    #[test]
    fn test_parse_rejects_short_datagram() {
        assert!(parse_echo_reply(&[0x45; 10]).is_none());
    }
}
