//! ICMPv4 and ICMPv6 message views

use weir_core::{Error, Result};

/// Minimum ICMP header length (type, code, checksum)
pub const ICMP_HEADER_LEN: usize = 4;

/// ICMPv4 echo request type
pub const ICMP4_ECHO_REQUEST: u8 = 8;
/// ICMPv4 echo reply type
pub const ICMP4_ECHO_REPLY: u8 = 0;

/// ICMPv6 echo request type
pub const ICMP6_ECHO_REQUEST: u8 = 128;
/// ICMPv6 echo reply type
pub const ICMP6_ECHO_REPLY: u8 = 129;

/// Read-only view of an ICMPv4 message.
#[derive(Clone, Copy)]
pub struct Icmp4<'a>(&'a [u8]);

impl<'a> Icmp4<'a> {
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < ICMP_HEADER_LEN {
            return Err(Error::frame_len(format!("icmp4 too short len={}", b.len())));
        }
        Ok(Self(b))
    }

    pub fn msg_type(&self) -> u8 {
        self.0[0]
    }

    pub fn code(&self) -> u8 {
        self.0[1]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// Echo identifier; only meaningful for echo request/reply
    pub fn echo_id(&self) -> Option<u16> {
        if self.0.len() >= 8
            && (self.msg_type() == ICMP4_ECHO_REQUEST || self.msg_type() == ICMP4_ECHO_REPLY)
        {
            Some(u16::from_be_bytes([self.0[4], self.0[5]]))
        } else {
            None
        }
    }

    /// Echo sequence number; only meaningful for echo request/reply
    pub fn echo_seq(&self) -> Option<u16> {
        if self.0.len() >= 8
            && (self.msg_type() == ICMP4_ECHO_REQUEST || self.msg_type() == ICMP4_ECHO_REPLY)
        {
            Some(u16::from_be_bytes([self.0[6], self.0[7]]))
        } else {
            None
        }
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.0[ICMP_HEADER_LEN..]
    }
}

/// Read-only view of an ICMPv6 message.
#[derive(Clone, Copy)]
pub struct Icmp6<'a>(&'a [u8]);

impl<'a> Icmp6<'a> {
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < ICMP_HEADER_LEN {
            return Err(Error::frame_len(format!("icmp6 too short len={}", b.len())));
        }
        Ok(Self(b))
    }

    pub fn msg_type(&self) -> u8 {
        self.0[0]
    }

    pub fn code(&self) -> u8 {
        self.0[1]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.0[ICMP_HEADER_LEN..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp4_echo_fields() {
        let buf = [ICMP4_ECHO_REQUEST, 0, 0xab, 0xcd, 0x00, 0x01, 0x00, 0x07];
        let icmp = Icmp4::new(&buf).unwrap();
        assert_eq!(icmp.msg_type(), ICMP4_ECHO_REQUEST);
        assert_eq!(icmp.code(), 0);
        assert_eq!(icmp.checksum(), 0xabcd);
        assert_eq!(icmp.echo_id(), Some(1));
        assert_eq!(icmp.echo_seq(), Some(7));
    }

    #[test]
    fn test_icmp4_non_echo_has_no_echo_fields() {
        let buf = [3, 1, 0, 0, 0, 0, 0, 0]; // destination unreachable
        let icmp = Icmp4::new(&buf).unwrap();
        assert_eq!(icmp.echo_id(), None);
    }

    #[test]
    fn test_short_rejected() {
        assert!(Icmp4::new(&[0u8; 3]).is_err());
        assert!(Icmp6::new(&[0u8; 3]).is_err());
    }
}
