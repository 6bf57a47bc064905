//! Common types used throughout weir

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// MAC Address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Create a new MAC address
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Broadcast MAC address (ff:ff:ff:ff:ff:ff)
    pub const fn broadcast() -> Self {
        Self([0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
    }

    /// Zero MAC address (00:00:00:00:00:00)
    pub const fn zero() -> Self {
        Self([0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
    }

    /// Get bytes as slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to array
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Create a MAC address from a slice; None unless exactly 6 bytes
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(slice);
            Some(Self(bytes))
        } else {
            None
        }
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// Check if this is a multicast address (bit 0 of first octet is 1)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Check if this is a unicast address
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast() && !self.is_broadcast()
    }

    /// Check if this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(crate::Error::parse("invalid MAC address format"));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| crate::Error::parse("invalid MAC address hex"))?;
        }

        Ok(MacAddr(bytes))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }
}

/// MAC, IP and port triple identifying one end of a conversation.
///
/// Port is zero when not applicable (e.g. ARP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub mac: MacAddr,
    pub ip: IpAddr,
    pub port: u16,
}

impl Addr {
    /// Create an address with no port
    pub fn new(mac: MacAddr, ip: IpAddr) -> Self {
        Self { mac, ip, port: 0 }
    }

    /// Create an address with a port
    pub fn with_port(mac: MacAddr, ip: IpAddr, port: u16) -> Self {
        Self { mac, ip, port }
    }

    /// The IPv4 address, if this is an IPv4 endpoint
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    }
}

impl Default for Addr {
    fn default() -> Self {
        Self {
            mac: MacAddr::zero(),
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mac={} ip={}", self.mac, self.ip)?;
        if self.port != 0 {
            write!(f, " port={}", self.port)?;
        }
        Ok(())
    }
}

/// Per-host man-in-the-middle status.
///
/// The aggregate host stage is the maximum of the per-protocol stages under
/// the ordering Normal < Hunt < Redirected. NoChange is a no-op sentinel for
/// update calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HuntStage {
    NoChange = 0,
    #[default]
    Normal = 1,
    Hunt = 2,
    Redirected = 3,
}

impl fmt::Display for HuntStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HuntStage::NoChange => write!(f, "noop"),
            HuntStage::Normal => write!(f, "normal"),
            HuntStage::Hunt => write!(f, "hunt"),
            HuntStage::Redirected => write!(f, "redirected"),
        }
    }
}
