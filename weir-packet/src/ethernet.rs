//! Ethernet II framing
//!
//! View and in-place encoder for Ethernet II frames. Type/length values below
//! 1536 mark IEEE 802.3 frames, which the pipeline tags and then ignores.

use weir_core::{Error, MacAddr, Result};

/// IPv4 EtherType
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// ARP EtherType
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// IPv6 EtherType
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Ethernet header size (dst + src + type)
pub const HEADER_LEN: usize = 14;

/// Smallest EtherType value; anything below is an 802.3 length field
pub const ETHERTYPE_MIN: u16 = 1536;

/// Read-only view of an Ethernet II frame.
#[derive(Clone, Copy)]
pub struct Ether<'a>(&'a [u8]);

impl<'a> Ether<'a> {
    /// Validate the buffer and wrap it.
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < HEADER_LEN {
            return Err(Error::frame_len(format!(
                "ethernet header needs {} bytes, have {}",
                HEADER_LEN,
                b.len()
            )));
        }
        Ok(Self(b))
    }

    /// Destination MAC
    pub fn dst(&self) -> MacAddr {
        MacAddr::from_slice(&self.0[0..6]).unwrap_or_else(MacAddr::zero)
    }

    /// Source MAC
    pub fn src(&self) -> MacAddr {
        MacAddr::from_slice(&self.0[6..12]).unwrap_or_else(MacAddr::zero)
    }

    /// EtherType, or the 802.3 length field when below 1536
    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.0[12], self.0[13]])
    }

    /// True when the type field is an 802.3 length, not an EtherType
    pub fn is_8023(&self) -> bool {
        self.ethertype() < ETHERTYPE_MIN
    }

    /// Header length in bytes
    pub fn header_len(&self) -> usize {
        HEADER_LEN
    }

    /// Everything after the header
    pub fn payload(&self) -> &'a [u8] {
        &self.0[HEADER_LEN..]
    }

    /// The whole frame the view was built over
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }
}

impl std::fmt::Display for Ether<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "src={} dst={} type=0x{:04x}",
            self.src(),
            self.dst(),
            self.ethertype()
        )
    }
}

/// Write an Ethernet II header into `buf`. Returns the header length.
pub fn encode(buf: &mut [u8], ethertype: u16, src: MacAddr, dst: MacAddr) -> Result<usize> {
    if buf.len() < HEADER_LEN {
        return Err(Error::PayloadTooBig(format!(
            "ethernet header needs {} bytes, have {}",
            HEADER_LEN,
            buf.len()
        )));
    }
    buf[0..6].copy_from_slice(dst.as_bytes());
    buf[6..12].copy_from_slice(src.as_bytes());
    buf[12..14].copy_from_slice(&ethertype.to_be_bytes());
    Ok(HEADER_LEN)
}
