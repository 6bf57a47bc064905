//! Layered frame parsing
//!
//! [`Session::parse`] maps a raw Ethernet frame onto a [`Frame`] of offsets
//! into the caller's buffer: no copies, no allocation. The parser also feeds
//! the inventory: a frame whose source belongs to the local subnet creates or
//! refreshes the host entry as a side effect.

use crate::session::{Host, Session};
use std::net::IpAddr;
use std::sync::Arc;
use weir_core::{Addr, MacAddr, Result};
use weir_packet::{ethernet, ipproto, udp, Ether, Icmp4, Icmp6, Ip4, Ip6, Tcp, Udp};

/// Stable tags identifying the deepest parsed layer of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PayloadId {
    Ether = 1,
    P8023 = 2,
    Arp = 3,
    Ip4 = 4,
    Ip6 = 5,
    Icmp4 = 6,
    Icmp6 = 7,
    Udp = 8,
    Tcp = 9,
    Dhcp4 = 10,
    Dhcp6 = 11,
    Dns = 12,
    Mdns = 13,
    Ssl = 14,
    Ntp = 15,
    Ssdp = 16,
    Wsdp = 17,
    Nbns = 18,
    Plex = 19,
    Ubiquiti = 20,
    Llmnr = 21,
    Igmp = 22,
}

impl PayloadId {
    /// Number of counter slots needed to index by discriminant.
    pub const SLOTS: usize = 23;

    /// Every tag, in discriminant order.
    pub const ALL: [PayloadId; 22] = [
        PayloadId::Ether,
        PayloadId::P8023,
        PayloadId::Arp,
        PayloadId::Ip4,
        PayloadId::Ip6,
        PayloadId::Icmp4,
        PayloadId::Icmp6,
        PayloadId::Udp,
        PayloadId::Tcp,
        PayloadId::Dhcp4,
        PayloadId::Dhcp6,
        PayloadId::Dns,
        PayloadId::Mdns,
        PayloadId::Ssl,
        PayloadId::Ntp,
        PayloadId::Ssdp,
        PayloadId::Wsdp,
        PayloadId::Nbns,
        PayloadId::Plex,
        PayloadId::Ubiquiti,
        PayloadId::Llmnr,
        PayloadId::Igmp,
    ];
}

/// A parsed frame: offsets into the caller's buffer plus addressing and the
/// host entry for the sender when it belongs to the local subnet.
///
/// The view borrows the buffer; copy before handing off beyond its lifetime.
pub struct Frame<'a> {
    ether: Ether<'a>,
    offset_ip4: usize,
    offset_ip6: usize,
    offset_udp: usize,
    offset_tcp: usize,
    offset_payload: usize,
    pub payload_id: PayloadId,
    pub src_addr: Addr,
    pub dst_addr: Addr,
    pub host: Option<Arc<Host>>,
}

impl<'a> Frame<'a> {
    /// The complete Ethernet frame.
    pub fn ether(&self) -> Ether<'a> {
        self.ether
    }

    fn data(&self) -> &'a [u8] {
        self.ether.as_bytes()
    }

    /// The IPv4 layer, if present.
    pub fn ip4(&self) -> Option<Ip4<'a>> {
        if self.offset_ip4 == 0 {
            return None;
        }
        Ip4::new(&self.data()[self.offset_ip4..]).ok()
    }

    /// The IPv6 layer, if present.
    pub fn ip6(&self) -> Option<Ip6<'a>> {
        if self.offset_ip6 == 0 {
            return None;
        }
        Ip6::new(&self.data()[self.offset_ip6..]).ok()
    }

    /// The UDP layer, if present.
    pub fn udp(&self) -> Option<Udp<'a>> {
        if self.offset_udp == 0 {
            return None;
        }
        Udp::new(&self.data()[self.offset_udp..]).ok()
    }

    /// The TCP layer, if present.
    pub fn tcp(&self) -> Option<Tcp<'a>> {
        if self.offset_tcp == 0 {
            return None;
        }
        Tcp::new(&self.data()[self.offset_tcp..]).ok()
    }

    /// The innermost payload processed without errors.
    pub fn payload(&self) -> &'a [u8] {
        &self.data()[self.offset_payload..]
    }
}

impl Session {
    /// Parse a raw frame, update statistics and the host inventory, and
    /// return the layered view.
    ///
    /// A validation failure in an inner layer charges that layer's error
    /// counter and stops the descent; the frame still comes back with
    /// `payload_id` at the deepest layer that validated, so callers keep
    /// the outer layers. Only an invalid Ethernet header is an error.
    pub fn parse<'a>(&self, b: &'a [u8]) -> Result<Frame<'a>> {
        let ether = match Ether::new(b) {
            Ok(e) => e,
            Err(err) => {
                self.stats().record_err(PayloadId::Ether);
                return Err(err);
            }
        };
        self.stats().record(PayloadId::Ether);

        let mut frame = Frame {
            ether,
            offset_ip4: 0,
            offset_ip6: 0,
            offset_udp: 0,
            offset_tcp: 0,
            offset_payload: ether.header_len(),
            payload_id: PayloadId::Ether,
            src_addr: Addr::new(ether.src(), IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            dst_addr: Addr::new(ether.dst(), IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            host: None,
        };

        // 802.3 length framing: tag and stop
        if ether.is_8023() {
            frame.payload_id = PayloadId::P8023;
            self.stats().record(PayloadId::P8023);
            return Ok(frame);
        }

        let proto = match ether.ethertype() {
            ethernet::ETHERTYPE_ARP => {
                frame.payload_id = PayloadId::Arp;
                self.stats().record(PayloadId::Arp);
                // learn from valid 6-byte-MAC senders inside the local subnet;
                // probe senders carry 0.0.0.0 and fall outside it
                let arp = frame.payload();
                if arp.len() >= 28 && arp[4] == 6 {
                    let src_ip = std::net::Ipv4Addr::new(arp[14], arp[15], arp[16], arp[17]);
                    if self.nic().host_ip4.contains(src_ip) {
                        let mac = MacAddr::from_slice(&arp[8..14]).unwrap_or_else(MacAddr::zero);
                        let (host, _) = self.find_or_create_host(mac, IpAddr::V4(src_ip));
                        self.mark_online(&host);
                        frame.host = Some(host);
                    }
                }
                return Ok(frame);
            }
            ethernet::ETHERTYPE_IPV4 => {
                let ip4 = match Ip4::new(frame.payload()) {
                    Ok(p) => p,
                    Err(_) => {
                        // frame keeps pointing at the validated Ethernet layer
                        self.stats().record_err(PayloadId::Ip4);
                        return Ok(frame);
                    }
                };
                self.stats().record(PayloadId::Ip4);
                frame.payload_id = PayloadId::Ip4;
                frame.offset_ip4 = frame.offset_payload;
                frame.offset_payload += ip4.ihl();
                frame.src_addr.ip = IpAddr::V4(ip4.src());
                frame.dst_addr.ip = IpAddr::V4(ip4.dst());
                if self.nic().host_ip4.contains(ip4.src()) {
                    let (host, _) = self.find_or_create_host(frame.src_addr.mac, frame.src_addr.ip);
                    self.mark_online(&host);
                    frame.host = Some(host);
                }
                ip4.protocol()
            }
            ethernet::ETHERTYPE_IPV6 => {
                let ip6 = match Ip6::new(frame.payload()) {
                    Ok(p) => p,
                    Err(_) => {
                        self.stats().record_err(PayloadId::Ip6);
                        return Ok(frame);
                    }
                };
                self.stats().record(PayloadId::Ip6);
                frame.payload_id = PayloadId::Ip6;
                frame.offset_ip6 = frame.offset_payload;
                frame.offset_payload += ip6.header_len();
                frame.src_addr.ip = IpAddr::V6(ip6.src());
                frame.dst_addr.ip = IpAddr::V6(ip6.dst());
                // Create a host for link-local sources, or for global unicast
                // sent by a local device rather than forwarded by the router.
                // A prefix-membership test would be stricter but needs RA
                // tracking.
                let src = ip6.src();
                if src.is_unicast_link_local()
                    || (is_global_unicast6(&src) && frame.src_addr.mac != self.nic().router_mac)
                {
                    let (host, _) = self.find_or_create_host(frame.src_addr.mac, frame.src_addr.ip);
                    self.mark_online(&host);
                    frame.host = Some(host);
                }
                ip6.next_header()
            }
            _ => return Ok(frame),
        };

        match proto {
            ipproto::UDP => {
                let udp_view = match Udp::new(frame.payload()) {
                    Ok(u) => u,
                    Err(_) => {
                        // the IP layer above stays usable
                        self.stats().record_err(PayloadId::Udp);
                        return Ok(frame);
                    }
                };
                self.stats().record(PayloadId::Udp);
                frame.payload_id = PayloadId::Udp;
                frame.offset_udp = frame.offset_payload;
                frame.src_addr.port = udp_view.src_port();
                frame.dst_addr.port = udp_view.dst_port();
                let sport = frame.src_addr.port;
                let dport = frame.dst_addr.port;
                let id = match () {
                    _ if sport == 443 || dport == 443 => PayloadId::Ssl,
                    _ if dport == 67 || dport == 68 => PayloadId::Dhcp4,
                    _ if dport == 546 || dport == 547 => PayloadId::Dhcp6,
                    _ if sport == 53 || dport == 53 => PayloadId::Dns,
                    _ if sport == 5353 || dport == 5353 => PayloadId::Mdns,
                    _ if sport == 5355 || dport == 5355 => PayloadId::Llmnr,
                    _ if sport == 123 || dport == 123 => PayloadId::Ntp,
                    _ if sport == 1900 || dport == 1900 => PayloadId::Ssdp,
                    _ if sport == 3702 || dport == 3702 => PayloadId::Wsdp,
                    _ if dport == 137 || dport == 138 => PayloadId::Nbns,
                    _ if dport == 32412 || dport == 32414 => PayloadId::Plex,
                    _ if sport == 10001 || dport == 10001 => PayloadId::Ubiquiti,
                    _ => return Ok(frame),
                };
                frame.payload_id = id;
                self.stats().record(id);
                frame.offset_payload += udp::UDP_HEADER_LEN;
                Ok(frame)
            }
            ipproto::TCP => {
                let tcp_view = match Tcp::new(frame.payload()) {
                    Ok(t) => t,
                    Err(_) => {
                        self.stats().record_err(PayloadId::Tcp);
                        return Ok(frame);
                    }
                };
                self.stats().record(PayloadId::Tcp);
                frame.payload_id = PayloadId::Tcp;
                frame.offset_tcp = frame.offset_payload;
                frame.src_addr.port = tcp_view.src_port();
                frame.dst_addr.port = tcp_view.dst_port();
                Ok(frame)
            }
            ipproto::ICMP => {
                if Icmp4::new(frame.payload()).is_err() {
                    self.stats().record_err(PayloadId::Icmp4);
                    return Ok(frame);
                }
                self.stats().record(PayloadId::Icmp4);
                frame.payload_id = PayloadId::Icmp4;
                Ok(frame)
            }
            ipproto::ICMPV6 => {
                if Icmp6::new(frame.payload()).is_err() {
                    self.stats().record_err(PayloadId::Icmp6);
                    return Ok(frame);
                }
                self.stats().record(PayloadId::Icmp6);
                frame.payload_id = PayloadId::Icmp6;
                Ok(frame)
            }
            ipproto::IGMP => {
                self.stats().record(PayloadId::Igmp);
                frame.payload_id = PayloadId::Igmp;
                Ok(frame)
            }
            _ => Ok(frame),
        }
    }
}

// Ipv6Addr::is_global is unstable; approximate: not unspecified, loopback,
// link-local, unique-local or multicast.
fn is_global_unicast6(ip: &std::net::Ipv6Addr) -> bool {
    !ip.is_unspecified()
        && !ip.is_loopback()
        && !ip.is_unicast_link_local()
        && !ip.is_multicast()
        && (ip.segments()[0] & 0xfe00) != 0xfc00
}
