//! ARP packet view and encoder (RFC 826, Ethernet/IPv4 only)

use std::net::Ipv4Addr;
use weir_core::{Error, MacAddr, Result};

/// ARP request opcode
pub const OPERATION_REQUEST: u16 = 1;
/// ARP reply opcode
pub const OPERATION_REPLY: u16 = 2;

/// Hardware type for Ethernet
pub const HTYPE_ETHERNET: u16 = 1;
/// Protocol type for IPv4
pub const PTYPE_IPV4: u16 = 0x0800;

/// Fixed packet length: header + two MACs + two IPv4 addresses
pub const ARP_LEN: usize = 8 + 2 * 6 + 2 * 4;

/// Read-only view of an Ethernet/IPv4 ARP packet.
#[derive(Clone, Copy)]
pub struct Arp<'a>(&'a [u8]);

impl<'a> Arp<'a> {
    /// Validate the buffer and wrap it. Valid iff HTYPE=1, PTYPE=0x0800,
    /// HLEN=6, PLEN=4 and at least 28 bytes are present.
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < ARP_LEN {
            return Err(Error::frame_len(format!("arp needs {} bytes, have {}", ARP_LEN, b.len())));
        }
        let p = Self(b);
        if p.htype() != HTYPE_ETHERNET {
            return Err(Error::parse(format!("arp bad htype {}", p.htype())));
        }
        if p.ptype() != PTYPE_IPV4 {
            return Err(Error::parse(format!("arp bad ptype 0x{:04x}", p.ptype())));
        }
        if p.hlen() != 6 || p.plen() != 4 {
            return Err(Error::parse(format!(
                "arp bad address lengths hlen={} plen={}",
                p.hlen(),
                p.plen()
            )));
        }
        Ok(p)
    }

    pub fn htype(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    pub fn ptype(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    pub fn hlen(&self) -> u8 {
        self.0[4]
    }

    pub fn plen(&self) -> u8 {
        self.0[5]
    }

    pub fn operation(&self) -> u16 {
        u16::from_be_bytes([self.0[6], self.0[7]])
    }

    pub fn sender_mac(&self) -> MacAddr {
        MacAddr::from_slice(&self.0[8..14]).unwrap_or_else(MacAddr::zero)
    }

    pub fn sender_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[14], self.0[15], self.0[16], self.0[17])
    }

    pub fn target_mac(&self) -> MacAddr {
        MacAddr::from_slice(&self.0[18..24]).unwrap_or_else(MacAddr::zero)
    }

    pub fn target_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[24], self.0[25], self.0[26], self.0[27])
    }
}

impl std::fmt::Display for Arp<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation={} smac={} sip={} tmac={} tip={}",
            self.operation(),
            self.sender_mac(),
            self.sender_ip(),
            self.target_mac(),
            self.target_ip()
        )
    }
}

/// Write an ARP packet into `buf`. Returns the packet length.
pub fn encode(
    buf: &mut [u8],
    operation: u16,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Result<usize> {
    if buf.len() < ARP_LEN {
        return Err(Error::PayloadTooBig(format!(
            "arp needs {} bytes, have {}",
            ARP_LEN,
            buf.len()
        )));
    }
    buf[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    buf[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
    buf[4] = 6;
    buf[5] = 4;
    buf[6..8].copy_from_slice(&operation.to_be_bytes());
    buf[8..14].copy_from_slice(sender_mac.as_bytes());
    buf[14..18].copy_from_slice(&sender_ip.octets());
    buf[18..24].copy_from_slice(target_mac.as_bytes());
    buf[24..28].copy_from_slice(&target_ip.octets());
    Ok(ARP_LEN)
}
