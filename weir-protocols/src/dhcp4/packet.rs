//! DHCPv4 packet view, option map and encoder (RFC 2131 / RFC 2132)

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use weir_core::{Error, MacAddr, Result};

/// BOOTP request opcode
pub const BOOT_REQUEST: u8 = 1;
/// BOOTP reply opcode
pub const BOOT_REPLY: u8 = 2;

/// DHCP server port
pub const SERVER_PORT: u16 = 67;
/// DHCP client port
pub const CLIENT_PORT: u16 = 68;

/// Magic cookie value (99.130.83.99)
pub const MAGIC_COOKIE: u32 = 0x6382_5363;

/// Broadcast bit in the flags field
pub const BROADCAST_FLAG: u16 = 0x8000;

/// Fixed header (236) plus the magic cookie
pub const MIN_LEN: usize = 240;

/// DHCP message types (RFC 2132 option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Discover),
            2 => Some(MessageType::Offer),
            3 => Some(MessageType::Request),
            4 => Some(MessageType::Decline),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Nak),
            7 => Some(MessageType::Release),
            8 => Some(MessageType::Inform),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Discover => "DISCOVER",
            MessageType::Offer => "OFFER",
            MessageType::Request => "REQUEST",
            MessageType::Decline => "DECLINE",
            MessageType::Ack => "ACK",
            MessageType::Nak => "NAK",
            MessageType::Release => "RELEASE",
            MessageType::Inform => "INFORM",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// DHCP option code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionCode(pub u8);

impl OptionCode {
    pub const PAD: Self = Self(0);
    pub const SUBNET_MASK: Self = Self(1);
    pub const ROUTER: Self = Self(3);
    pub const DNS_SERVER: Self = Self(6);
    pub const HOST_NAME: Self = Self(12);
    pub const DOMAIN_NAME: Self = Self(15);
    pub const STATIC_ROUTE: Self = Self(33);
    pub const REQUESTED_IP: Self = Self(50);
    pub const LEASE_TIME: Self = Self(51);
    pub const MESSAGE_TYPE: Self = Self(53);
    pub const SERVER_ID: Self = Self(54);
    pub const PARAMETER_REQUEST_LIST: Self = Self(55);
    pub const MESSAGE: Self = Self(56);
    pub const CLIENT_ID: Self = Self(61);
    pub const CLASSLESS_ROUTE: Self = Self(121);
    /// Microsoft's pre-standard copy of option 121
    pub const CLASSLESS_ROUTE_MS: Self = Self(249);
    pub const END: Self = Self(255);
}

impl fmt::Display for OptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parsed options: a mapping from option code to raw value slice.
pub struct DhcpOptions<'a> {
    map: HashMap<u8, &'a [u8]>,
}

impl<'a> DhcpOptions<'a> {
    pub fn get(&self, code: OptionCode) -> Option<&'a [u8]> {
        self.map.get(&code.0).copied()
    }

    pub fn contains(&self, code: OptionCode) -> bool {
        self.map.contains_key(&code.0)
    }

    /// A 4-byte option decoded as an IPv4 address
    pub fn ip4(&self, code: OptionCode) -> Option<Ipv4Addr> {
        let v = self.get(code)?;
        if v.len() != 4 {
            return None;
        }
        Some(Ipv4Addr::new(v[0], v[1], v[2], v[3]))
    }

    /// Option 53
    pub fn message_type(&self) -> Option<MessageType> {
        let v = self.get(OptionCode::MESSAGE_TYPE)?;
        if v.len() != 1 {
            return None;
        }
        MessageType::from_u8(v[0])
    }

    /// Option 50
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.ip4(OptionCode::REQUESTED_IP)
    }

    /// Option 54
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.ip4(OptionCode::SERVER_ID)
    }

    /// Option 51
    pub fn lease_time(&self) -> Option<u32> {
        let v = self.get(OptionCode::LEASE_TIME)?;
        if v.len() != 4 {
            return None;
        }
        Some(u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
    }

    /// Option 12, lossily decoded
    pub fn host_name(&self) -> Option<String> {
        self.get(OptionCode::HOST_NAME)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Option 55
    pub fn parameter_request_list(&self) -> Option<&'a [u8]> {
        self.get(OptionCode::PARAMETER_REQUEST_LIST)
    }
}

/// Ordered option set used when building packets. Insertion order is kept;
/// inserting an existing code replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionMap(Vec<(OptionCode, Vec<u8>)>);

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: OptionCode, value: Vec<u8>) {
        match self.0.iter_mut().find(|(c, _)| *c == code) {
            Some((_, v)) => *v = value,
            None => self.0.push((code, value)),
        }
    }

    pub fn get(&self, code: OptionCode) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionCode, &[u8])> {
        self.0.iter().map(|(c, v)| (*c, v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Read-only view of a DHCPv4 packet.
#[derive(Clone, Copy)]
pub struct Dhcp4<'a>(&'a [u8]);

impl<'a> Dhcp4<'a> {
    pub fn new(b: &'a [u8]) -> Result<Self> {
        if b.len() < MIN_LEN {
            return Err(Error::frame_len(format!(
                "dhcp needs {} bytes, have {}",
                MIN_LEN,
                b.len()
            )));
        }
        let p = Self(b);
        if p.op() != BOOT_REQUEST && p.op() != BOOT_REPLY {
            return Err(Error::parse(format!("dhcp bad op {}", p.op())));
        }
        if u32::from_be_bytes([b[236], b[237], b[238], b[239]]) != MAGIC_COOKIE {
            return Err(Error::parse("dhcp bad magic cookie"));
        }
        Ok(p)
    }

    pub fn op(&self) -> u8 {
        self.0[0]
    }

    pub fn htype(&self) -> u8 {
        self.0[1]
    }

    pub fn hlen(&self) -> u8 {
        self.0[2]
    }

    pub fn hops(&self) -> u8 {
        self.0[3]
    }

    pub fn xid(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    pub fn secs(&self) -> u16 {
        u16::from_be_bytes([self.0[8], self.0[9]])
    }

    pub fn flags(&self) -> u16 {
        u16::from_be_bytes([self.0[10], self.0[11]])
    }

    /// The broadcast bit in the flags field
    pub fn broadcast(&self) -> bool {
        self.flags() & BROADCAST_FLAG != 0
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[12], self.0[13], self.0[14], self.0[15])
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[16], self.0[17], self.0[18], self.0[19])
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[20], self.0[21], self.0[22], self.0[23])
    }

    pub fn giaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.0[24], self.0[25], self.0[26], self.0[27])
    }

    /// Client hardware address, first 6 bytes of chaddr
    pub fn chaddr(&self) -> MacAddr {
        MacAddr::from_slice(&self.0[28..34]).unwrap_or_else(MacAddr::zero)
    }

    /// Parse the option block. Unknown codes are kept; a declared option
    /// length running past the packet is a parse error.
    pub fn options(&self) -> Result<DhcpOptions<'a>> {
        let b = self.0;
        let mut map = HashMap::new();
        let mut offset = MIN_LEN;

        while offset < b.len() {
            let code = b[offset];
            offset += 1;

            if code == OptionCode::PAD.0 {
                continue;
            }
            if code == OptionCode::END.0 {
                break;
            }
            if offset >= b.len() {
                return Err(Error::parse(format!("dhcp option {} missing length", code)));
            }
            let len = b[offset] as usize;
            offset += 1;
            if offset + len > b.len() {
                return Err(Error::parse(format!(
                    "dhcp option {} len {} exceeds packet",
                    code, len
                )));
            }
            map.insert(code, &b[offset..offset + len]);
            offset += len;
        }

        Ok(DhcpOptions { map })
    }
}

impl fmt::Display for Dhcp4<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "op={} xid={:08x} chaddr={} ciaddr={} yiaddr={}",
            self.op(),
            self.xid(),
            self.chaddr(),
            self.ciaddr(),
            self.yiaddr()
        )
    }
}

/// The client identifier: option 61 when present, otherwise the hardware
/// address.
pub fn client_id(p: &Dhcp4<'_>, options: &DhcpOptions<'_>) -> Vec<u8> {
    match options.get(OptionCode::CLIENT_ID) {
        Some(id) if !id.is_empty() => id.to_vec(),
        _ => p.chaddr().as_bytes().to_vec(),
    }
}

/// Write a DHCPv4 packet into `buf`. Returns the bytes written.
///
/// The message-type option is emitted first. When `request_list` is given,
/// options the client asked for are emitted in the client's order, followed
/// by any remaining options.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    buf: &mut [u8],
    op: u8,
    mtype: MessageType,
    chaddr: MacAddr,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    xid: u32,
    broadcast: bool,
    options: &OptionMap,
    request_list: Option<&[u8]>,
) -> Result<usize> {
    let options_len: usize = options.iter().map(|(_, v)| 2 + v.len()).sum();
    let needed = MIN_LEN + 3 + options_len + 1;
    if buf.len() < needed {
        return Err(Error::PayloadTooBig(format!(
            "dhcp packet needs {} bytes, have {}",
            needed,
            buf.len()
        )));
    }

    buf[..MIN_LEN].fill(0);
    buf[0] = op;
    buf[1] = 1; // htype ethernet
    buf[2] = 6; // hlen
    buf[3] = 0; // hops
    buf[4..8].copy_from_slice(&xid.to_be_bytes());
    buf[8..10].copy_from_slice(&0u16.to_be_bytes()); // secs
    let flags: u16 = if broadcast { BROADCAST_FLAG } else { 0 };
    buf[10..12].copy_from_slice(&flags.to_be_bytes());
    buf[12..16].copy_from_slice(&ciaddr.octets());
    buf[16..20].copy_from_slice(&yiaddr.octets());
    // siaddr, giaddr, the rest of chaddr, sname and file stay zero
    buf[28..34].copy_from_slice(chaddr.as_bytes());
    buf[236..240].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());

    let mut offset = MIN_LEN;
    buf[offset] = OptionCode::MESSAGE_TYPE.0;
    buf[offset + 1] = 1;
    buf[offset + 2] = mtype as u8;
    offset += 3;

    let mut written: Vec<OptionCode> = vec![OptionCode::MESSAGE_TYPE];
    let mut put = |buf: &mut [u8], offset: &mut usize, code: OptionCode, value: &[u8]| {
        buf[*offset] = code.0;
        buf[*offset + 1] = value.len() as u8;
        buf[*offset + 2..*offset + 2 + value.len()].copy_from_slice(value);
        *offset += 2 + value.len();
    };

    if let Some(prl) = request_list {
        for &code in prl {
            let code = OptionCode(code);
            if written.contains(&code) {
                continue;
            }
            if let Some(value) = options.get(code) {
                put(buf, &mut offset, code, value);
                written.push(code);
            }
        }
    }
    for (code, value) in options.iter() {
        if written.contains(&code) {
            continue;
        }
        put(buf, &mut offset, code, value);
        written.push(code);
    }

    buf[offset] = OptionCode::END.0;
    offset += 1;
    Ok(offset)
}

/// Write a reply reusing the request's transaction id, hardware address and
/// broadcast flag. Returns the bytes written.
pub fn encode_reply(
    buf: &mut [u8],
    req: &Dhcp4<'_>,
    mtype: MessageType,
    yiaddr: Ipv4Addr,
    options: &OptionMap,
    request_list: Option<&[u8]>,
) -> Result<usize> {
    encode(
        buf,
        BOOT_REPLY,
        mtype,
        req.chaddr(),
        Ipv4Addr::UNSPECIFIED,
        yiaddr,
        req.xid(),
        req.broadcast(),
        options,
        request_list,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC1: MacAddr = MacAddr([0x00, 0x02, 0x03, 0x04, 0x05, 0x01]);

    fn discover(buf: &mut [u8]) -> usize {
        let mut options = OptionMap::new();
        options.insert(OptionCode::HOST_NAME, b"host1".to_vec());
        options.insert(
            OptionCode::PARAMETER_REQUEST_LIST,
            vec![OptionCode::DNS_SERVER.0],
        );
        encode(
            buf,
            BOOT_REQUEST,
            MessageType::Discover,
            MAC1,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            0x0102_0304,
            true,
            &options,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let mut buf = [0u8; 600];
        let n = discover(&mut buf);
        let p = Dhcp4::new(&buf[..n]).unwrap();
        assert_eq!(p.op(), BOOT_REQUEST);
        assert_eq!(p.htype(), 1);
        assert_eq!(p.hlen(), 6);
        assert_eq!(p.xid(), 0x0102_0304);
        assert!(p.broadcast());
        assert_eq!(p.chaddr(), MAC1);

        let options = p.options().unwrap();
        assert_eq!(options.message_type(), Some(MessageType::Discover));
        assert_eq!(options.host_name().as_deref(), Some("host1"));
        assert_eq!(
            options.parameter_request_list(),
            Some(&[OptionCode::DNS_SERVER.0][..])
        );
    }

    #[test]
    fn test_reply_follows_request_list_order() {
        let mut buf = [0u8; 600];
        let n = discover(&mut buf);
        let req_buf = buf[..n].to_vec();
        let req = Dhcp4::new(&req_buf).unwrap();

        let mut options = OptionMap::new();
        options.insert(OptionCode::SUBNET_MASK, vec![255, 255, 255, 0]);
        options.insert(OptionCode::ROUTER, vec![192, 168, 0, 11]);
        options.insert(OptionCode::DNS_SERVER, vec![1, 1, 1, 3]);

        let mut reply = [0u8; 600];
        let n = encode_reply(
            &mut reply,
            &req,
            MessageType::Offer,
            Ipv4Addr::new(192, 168, 0, 1),
            &options,
            Some(&[OptionCode::DNS_SERVER.0, OptionCode::SUBNET_MASK.0]),
        )
        .unwrap();

        let p = Dhcp4::new(&reply[..n]).unwrap();
        assert_eq!(p.op(), BOOT_REPLY);
        assert_eq!(p.xid(), req.xid());
        assert_eq!(p.yiaddr(), Ipv4Addr::new(192, 168, 0, 1));
        let opts = p.options().unwrap();
        assert_eq!(opts.message_type(), Some(MessageType::Offer));
        assert_eq!(opts.ip4(OptionCode::DNS_SERVER), Some(Ipv4Addr::new(1, 1, 1, 3)));
        assert_eq!(opts.ip4(OptionCode::ROUTER), Some(Ipv4Addr::new(192, 168, 0, 11)));

        // requested options appear in the client's order, before the rest
        let tail = &reply[MIN_LEN + 3..n];
        assert_eq!(tail[0], OptionCode::DNS_SERVER.0);
        assert_eq!(tail[6], OptionCode::SUBNET_MASK.0);
        assert_eq!(tail[12], OptionCode::ROUTER.0);
    }

    #[test]
    fn test_client_id_fallback() {
        let mut buf = [0u8; 600];
        let n = discover(&mut buf);
        let p = Dhcp4::new(&buf[..n]).unwrap();
        let options = p.options().unwrap();
        assert_eq!(client_id(&p, &options), MAC1.as_bytes().to_vec());

        let mut with_id = OptionMap::new();
        with_id.insert(OptionCode::CLIENT_ID, vec![1, 0xde, 0xad]);
        let mut buf2 = [0u8; 600];
        let n = encode(
            &mut buf2,
            BOOT_REQUEST,
            MessageType::Request,
            MAC1,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            1,
            false,
            &with_id,
            None,
        )
        .unwrap();
        let p2 = Dhcp4::new(&buf2[..n]).unwrap();
        let options2 = p2.options().unwrap();
        assert_eq!(client_id(&p2, &options2), vec![1, 0xde, 0xad]);
    }

    #[test]
    fn test_malformed_option_length() {
        let mut buf = [0u8; 600];
        let n = discover(&mut buf);
        // corrupt: declare a length running past the buffer end
        let mut bad = buf[..n].to_vec();
        let tail = bad.len() - 1;
        bad[tail] = 0; // overwrite END
        bad.push(50);
        bad.push(200); // len 200 > remaining
        let p = Dhcp4::new(&bad).unwrap();
        assert!(p.options().is_err());
    }

    #[test]
    fn test_too_short_and_bad_cookie() {
        assert!(matches!(Dhcp4::new(&[0u8; 100]), Err(Error::FrameLen(_))));

        let mut buf = [0u8; 600];
        let n = discover(&mut buf);
        buf[236] = 0;
        assert!(matches!(Dhcp4::new(&buf[..n]), Err(Error::ParseFrame(_))));
    }

    #[test]
    fn test_option_map_replaces() {
        let mut map = OptionMap::new();
        map.insert(OptionCode::MESSAGE, b"one".to_vec());
        map.insert(OptionCode::MESSAGE, b"two".to_vec());
        assert_eq!(map.get(OptionCode::MESSAGE), Some(&b"two"[..]));
        assert_eq!(map.iter().count(), 1);
    }
}
