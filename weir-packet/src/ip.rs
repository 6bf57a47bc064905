//! IPv4 and IPv6 header views and the IPv4 in-place encoder

use crate::checksum::internet_checksum;
use std::net::{Ipv4Addr, Ipv6Addr};
use weir_core::{Error, Result};

/// IPv4 header length without options
pub const IP4_HEADER_LEN: usize = 20;

/// IPv6 fixed header length
pub const IP6_HEADER_LEN: usize = 40;

/// Read-only view of an IPv4 packet.
#[derive(Clone, Copy)]
pub struct Ip4<'a>(&'a [u8]);

impl<'a> Ip4<'a> {
    /// Validate the buffer and wrap it. The buffer must cover the declared
    /// header and total length.
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < IP4_HEADER_LEN {
            return Err(Error::frame_len(format!("ipv4 header too short len={}", b.len())));
        }
        let p = Self(b);
        if p.version() != 4 {
            return Err(Error::parse(format!("ipv4 bad version {}", p.version())));
        }
        if b.len() < p.ihl() || p.total_len() < p.ihl() {
            return Err(Error::frame_len(format!(
                "ipv4 header len={} ihl={}",
                b.len(),
                p.ihl()
            )));
        }
        if b.len() < p.total_len() {
            return Err(Error::frame_len(format!(
                "ipv4 len={} less than total len={}",
                b.len(),
                p.total_len()
            )));
        }
        Ok(p)
    }

    pub fn version(&self) -> u8 {
        self.0[0] >> 4
    }

    /// Header length in bytes
    pub fn ihl(&self) -> usize {
        ((self.0[0] & 0x0f) as usize) << 2
    }

    pub fn tos(&self) -> u8 {
        self.0[1]
    }

    /// Total packet size including header and payload
    pub fn total_len(&self) -> usize {
        u16::from_be_bytes([self.0[2], self.0[3]]) as usize
    }

    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.0[4], self.0[5]])
    }

    pub fn ttl(&self) -> u8 {
        self.0[8]
    }

    pub fn protocol(&self) -> u8 {
        self.0[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.0[10], self.0[11]])
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[12], self.0[13], self.0[14], self.0[15])
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[16], self.0[17], self.0[18], self.0[19])
    }

    /// Payload between the header and the declared total length
    pub fn payload(&self) -> &'a [u8] {
        &self.0[self.ihl()..self.total_len()]
    }

    /// Header checksum computed with the checksum field zeroed
    pub fn calculate_checksum(&self) -> u16 {
        let mut header = [0u8; IP4_HEADER_LEN];
        header.copy_from_slice(&self.0[..IP4_HEADER_LEN]);
        header[10] = 0;
        header[11] = 0;
        internet_checksum(&header)
    }
}

impl std::fmt::Display for Ip4<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "src={} dst={} proto={} ttl={} len={}",
            self.src(),
            self.dst(),
            self.protocol(),
            self.ttl(),
            self.total_len()
        )
    }
}

/// Write an IPv4 header with no payload into `buf`. Protocol, total length
/// and checksum are finalized by [`set_payload`]. Returns the header length.
pub fn encode(buf: &mut [u8], ttl: u8, src: Ipv4Addr, dst: Ipv4Addr) -> Result<usize> {
    if buf.len() < IP4_HEADER_LEN {
        return Err(Error::PayloadTooBig(format!(
            "ipv4 header needs {} bytes, have {}",
            IP4_HEADER_LEN,
            buf.len()
        )));
    }
    buf[0] = 0x45; // version 4, IHL 5
    buf[1] = 0xc0; // DSCP CS6
    buf[2..4].copy_from_slice(&(IP4_HEADER_LEN as u16).to_be_bytes());
    buf[4..6].copy_from_slice(&0u16.to_be_bytes()); // identification
    buf[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags + fragment offset
    buf[8] = ttl;
    buf[9] = 0; // protocol set with the payload
    buf[10..12].copy_from_slice(&0u16.to_be_bytes()); // checksum
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());
    Ok(IP4_HEADER_LEN)
}

/// Finalize an encoded IPv4 header for `payload_len` bytes of payload already
/// written after the header: patches protocol, total length and checksum.
/// Returns the total packet length.
pub fn set_payload(buf: &mut [u8], payload_len: usize, protocol: u8) -> Result<usize> {
    let total = IP4_HEADER_LEN + payload_len;
    if buf.len() < total {
        return Err(Error::PayloadTooBig(format!(
            "ipv4 packet needs {} bytes, have {}",
            total,
            buf.len()
        )));
    }
    buf[9] = protocol;
    buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    buf[10] = 0;
    buf[11] = 0;
    let checksum = internet_checksum(&buf[..IP4_HEADER_LEN]);
    buf[10..12].copy_from_slice(&checksum.to_be_bytes());
    Ok(total)
}

/// Copy `payload` after the header and finalize it; combined form of
/// writing the payload then calling [`set_payload`].
pub fn append_payload(buf: &mut [u8], payload: &[u8], protocol: u8) -> Result<usize> {
    let total = IP4_HEADER_LEN + payload.len();
    if buf.len() < total {
        return Err(Error::PayloadTooBig(format!(
            "ipv4 packet needs {} bytes, have {}",
            total,
            buf.len()
        )));
    }
    buf[IP4_HEADER_LEN..total].copy_from_slice(payload);
    set_payload(buf, payload.len(), protocol)
}

/// Read-only view of an IPv6 packet.
#[derive(Clone, Copy)]
pub struct Ip6<'a>(&'a [u8]);

impl<'a> Ip6<'a> {
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < IP6_HEADER_LEN {
            return Err(Error::frame_len(format!("ipv6 header too short len={}", b.len())));
        }
        let p = Self(b);
        if p.version() != 6 {
            return Err(Error::parse(format!("ipv6 bad version {}", p.version())));
        }
        Ok(p)
    }

    pub fn version(&self) -> u8 {
        self.0[0] >> 4
    }

    pub fn payload_len(&self) -> usize {
        u16::from_be_bytes([self.0[4], self.0[5]]) as usize
    }

    pub fn next_header(&self) -> u8 {
        self.0[6]
    }

    pub fn hop_limit(&self) -> u8 {
        self.0[7]
    }

    pub fn src(&self) -> Ipv6Addr {
        let mut o = [0u8; 16];
        o.copy_from_slice(&self.0[8..24]);
        Ipv6Addr::from(o)
    }

    pub fn dst(&self) -> Ipv6Addr {
        let mut o = [0u8; 16];
        o.copy_from_slice(&self.0[24..40]);
        Ipv6Addr::from(o)
    }

    pub fn header_len(&self) -> usize {
        IP6_HEADER_LEN
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.0[IP6_HEADER_LEN..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipproto;

    #[test]
    fn test_encode_set_payload_roundtrip() {
        let mut buf = [0u8; 64];
        encode(
            &mut buf,
            64,
            Ipv4Addr::new(192, 168, 0, 129),
            Ipv4Addr::new(192, 168, 0, 11),
        )
        .unwrap();
        buf[IP4_HEADER_LEN..IP4_HEADER_LEN + 4].copy_from_slice(&[1, 2, 3, 4]);
        let total = set_payload(&mut buf, 4, ipproto::UDP).unwrap();
        assert_eq!(total, 24);

        let ip = Ip4::new(&buf[..total]).unwrap();
        assert_eq!(ip.version(), 4);
        assert_eq!(ip.ihl(), IP4_HEADER_LEN);
        assert_eq!(ip.total_len(), 24);
        assert_eq!(ip.protocol(), ipproto::UDP);
        assert_eq!(ip.src(), Ipv4Addr::new(192, 168, 0, 129));
        assert_eq!(ip.dst(), Ipv4Addr::new(192, 168, 0, 11));
        assert_eq!(ip.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_checksum_law() {
        let mut buf = [0u8; 64];
        encode(
            &mut buf,
            50,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
        .unwrap();
        let total = set_payload(&mut buf, 8, ipproto::TCP).unwrap();

        let ip = Ip4::new(&buf[..total]).unwrap();
        assert_eq!(ip.calculate_checksum(), ip.checksum());
    }

    #[test]
    fn test_truncated_rejected() {
        let mut buf = [0u8; 64];
        encode(
            &mut buf,
            64,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
        .unwrap();
        set_payload(&mut buf, 20, ipproto::UDP).unwrap();
        // slice shorter than the declared total length
        assert!(matches!(Ip4::new(&buf[..30]), Err(Error::FrameLen(_))));
    }

    #[test]
    fn test_append_payload() {
        let mut buf = [0u8; 64];
        encode(
            &mut buf,
            64,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
        .unwrap();
        let total = append_payload(&mut buf, &[9u8; 6], ipproto::IGMP).unwrap();
        let ip = Ip4::new(&buf[..total]).unwrap();
        assert_eq!(ip.payload(), &[9u8; 6]);
        assert_eq!(ip.protocol(), ipproto::IGMP);
    }

    #[test]
    fn test_append_too_big() {
        let mut buf = [0u8; 24];
        encode(
            &mut buf,
            64,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        )
        .unwrap();
        assert!(matches!(
            append_payload(&mut buf, &[0u8; 16], ipproto::UDP),
            Err(Error::PayloadTooBig(_))
        ));
    }

    #[test]
    fn test_ip6_view() {
        let mut buf = [0u8; IP6_HEADER_LEN + 4];
        buf[0] = 0x60;
        buf[4..6].copy_from_slice(&4u16.to_be_bytes());
        buf[6] = ipproto::UDP;
        buf[7] = 255;
        buf[8..24].copy_from_slice(&Ipv6Addr::LOCALHOST.octets());
        buf[24..40].copy_from_slice(&Ipv6Addr::LOCALHOST.octets());

        let ip6 = Ip6::new(&buf).unwrap();
        assert_eq!(ip6.version(), 6);
        assert_eq!(ip6.payload_len(), 4);
        assert_eq!(ip6.next_header(), ipproto::UDP);
        assert_eq!(ip6.src(), Ipv6Addr::LOCALHOST);
        assert_eq!(ip6.payload().len(), 4);
    }

    #[test]
    fn test_ip6_short_rejected() {
        assert!(Ip6::new(&[0u8; 20]).is_err());
    }
}
