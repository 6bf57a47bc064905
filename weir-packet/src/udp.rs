//! UDP datagram view and in-place encoder
//!
//! The checksum is optional over IPv4 and left zero.

use weir_core::{Error, Result};

/// UDP header length
pub const UDP_HEADER_LEN: usize = 8;

/// Read-only view of a UDP datagram.
#[derive(Clone, Copy)]
pub struct Udp<'a>(&'a [u8]);

impl<'a> Udp<'a> {
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < UDP_HEADER_LEN {
            return Err(Error::frame_len(format!("udp header too short len={}", b.len())));
        }
        Ok(Self(b))
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// Declared length including the header
    pub fn len(&self) -> u16 {
        u16::from_be_bytes([self.0[4], self.0[5]])
    }

    pub fn is_empty(&self) -> bool {
        self.len() as usize <= UDP_HEADER_LEN
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.0[6], self.0[7]])
    }

    pub fn header_len(&self) -> usize {
        UDP_HEADER_LEN
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.0[UDP_HEADER_LEN..]
    }
}

impl std::fmt::Display for Udp<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "srcport={} dstport={} len={}",
            self.src_port(),
            self.dst_port(),
            self.len()
        )
    }
}

/// Write a UDP header with no payload into `buf`. Returns the header length.
pub fn encode(buf: &mut [u8], src_port: u16, dst_port: u16) -> Result<usize> {
    if buf.len() < UDP_HEADER_LEN {
        return Err(Error::PayloadTooBig(format!(
            "udp header needs {} bytes, have {}",
            UDP_HEADER_LEN,
            buf.len()
        )));
    }
    buf[0..2].copy_from_slice(&src_port.to_be_bytes());
    buf[2..4].copy_from_slice(&dst_port.to_be_bytes());
    buf[4..6].copy_from_slice(&(UDP_HEADER_LEN as u16).to_be_bytes());
    buf[6..8].copy_from_slice(&0u16.to_be_bytes()); // checksum optional over IPv4
    Ok(UDP_HEADER_LEN)
}

/// Finalize an encoded UDP header for `payload_len` bytes already written
/// after the header. Returns the total datagram length.
pub fn set_payload(buf: &mut [u8], payload_len: usize) -> Result<usize> {
    let total = UDP_HEADER_LEN + payload_len;
    if buf.len() < total {
        return Err(Error::PayloadTooBig(format!(
            "udp datagram needs {} bytes, have {}",
            total,
            buf.len()
        )));
    }
    buf[4..6].copy_from_slice(&(total as u16).to_be_bytes());
    buf[6..8].copy_from_slice(&0u16.to_be_bytes());
    Ok(total)
}

/// Copy `payload` after the header and finalize the length fields.
pub fn append_payload(buf: &mut [u8], payload: &[u8]) -> Result<usize> {
    let total = UDP_HEADER_LEN + payload.len();
    if buf.len() < total {
        return Err(Error::PayloadTooBig(format!(
            "udp datagram needs {} bytes, have {}",
            total,
            buf.len()
        )));
    }
    buf[UDP_HEADER_LEN..total].copy_from_slice(payload);
    set_payload(buf, payload.len())
}
