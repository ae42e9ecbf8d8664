//! Instrument data frame carried in ICMP echo replies.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------------+-----------+-----------------------+
//! | Target address  |  Length   |         Data          |
//! +-----------------+-----------+-----------------------+
//! |     4 bytes     |  2 bytes  |   up to `capacity`    |
//! +-----------------+-----------+-----------------------+
//! | address octets  |  u16 LE   |  instrument payload   |
//! +-----------------+-----------+-----------------------+
//! ```
//!
//! The address is compared octet by octet with the target the request was
//! sent to. The declared length is trusted only up to the bytes actually
//! present after the header.

use byteorder::{ByteOrder, LittleEndian};
use std::net::Ipv4Addr;

/// Size of the frame header.
pub const HEADER_LEN: usize = 6;

/// Default number of data bytes the instrument puts in one reply.
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 1024;

/// Result of decoding a carrier payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode<'a> {
    /// A frame from the expected responder.
    Frame(PingFrame<'a>),
    /// The embedded address does not match the target.
    WrongResponder,
    /// Too short to hold a header.
    Truncated,
}

/// A decoded frame borrowing its data from the carrier buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame<'a> {
    /// Address octets found in the header.
    pub address: [u8; 4],
    /// Length the instrument declared.
    pub declared_len: u16,
    /// Data, clamped to the bytes available.
    pub data: &'a [u8],
}

impl<'a> PingFrame<'a> {
    /// Decode `carrier` and validate it against `expected`.
    pub fn decode(carrier: &'a [u8], expected: Ipv4Addr) -> FrameDecode<'a> {
        if carrier.len() < HEADER_LEN {
            return FrameDecode::Truncated;
        }

        let mut address = [0u8; 4];
        address.copy_from_slice(&carrier[..4]);
        if address != expected.octets() {
            return FrameDecode::WrongResponder;
        }

        let declared_len = LittleEndian::read_u16(&carrier[4..HEADER_LEN]);
        let available = carrier.len() - HEADER_LEN;
        let len = usize::from(declared_len).min(available);

        FrameDecode::Frame(PingFrame {
            address,
            declared_len,
            data: &carrier[HEADER_LEN..HEADER_LEN + len],
        })
    }

    /// Whether the declared length had to be clamped.
    pub fn was_clamped(&self) -> bool {
        usize::from(self.declared_len) > self.data.len()
    }

    /// Build a carrier payload as the instrument would send it.
    ///
    /// `data` longer than `u16::MAX` is cut to fit the length field.
    pub fn encode(address: Ipv4Addr, data: &[u8]) -> Vec<u8> {
        let len = u16::try_from(data.len()).unwrap_or(u16::MAX);
        let mut out = Vec::with_capacity(HEADER_LEN + usize::from(len));
        out.extend_from_slice(&address.octets());
        let mut len_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut len_bytes, len);
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(&data[..usize::from(len)]);
        out
    }
}
