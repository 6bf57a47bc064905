//! Network interface information

use crate::{Error, MacAddr, Result};
use ipnetwork::{IpNetwork, Ipv4Network};
use std::fmt;
use std::net::Ipv4Addr;

/// Addressing details for the monitored interface and its LAN.
///
/// All engines derive their source addresses from this structure. Invalid
/// IPv4 addressing fails construction; nothing downstream re-validates.
#[derive(Debug, Clone)]
pub struct NicInfo {
    /// MAC address of the interface weir runs on
    pub host_mac: MacAddr,
    /// Host IPv4 address with its prefix (e.g. 192.168.0.129/24)
    pub host_ip4: Ipv4Network,
    /// MAC address of the default gateway
    pub router_mac: MacAddr,
    /// Default gateway IPv4 address with its prefix
    pub router_ip4: Ipv4Network,
    /// The home LAN CIDR (usually the network of host_ip4)
    pub home_lan4: Ipv4Network,
}

impl NicInfo {
    /// Validate and build NIC information from explicit addressing.
    pub fn new(
        host_mac: MacAddr,
        host_ip4: Ipv4Network,
        router_mac: MacAddr,
        router_ip4: Ipv4Network,
    ) -> Result<Self> {
        if host_ip4.ip().is_unspecified() {
            return Err(Error::InvalidIp4("host address is unspecified".into()));
        }
        if router_ip4.ip().is_unspecified() {
            return Err(Error::InvalidIp4("router address is unspecified".into()));
        }
        if !host_ip4.contains(router_ip4.ip()) {
            return Err(Error::InvalidIp4(format!(
                "router {} not inside host network {}",
                router_ip4.ip(),
                host_ip4
            )));
        }
        let home_lan4 = Ipv4Network::new(host_ip4.network(), host_ip4.prefix())
            .map_err(|e| Error::InvalidIp4(e.to_string()))?;
        Ok(Self {
            host_mac,
            host_ip4,
            router_mac,
            router_ip4,
            home_lan4,
        })
    }

    /// Build NIC information from a named interface, looking up the host MAC
    /// and first IPv4 network via the datalink layer. The router addressing
    /// cannot be discovered here and must be supplied by the caller.
    pub fn from_interface(name: &str, router_mac: MacAddr, router_ip4: Ipv4Addr) -> Result<Self> {
        let iface = pnet_datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::interface(format!("interface '{}' not found", name)))?;

        let mac = iface
            .mac
            .map(|m| MacAddr([m.0, m.1, m.2, m.3, m.4, m.5]))
            .ok_or_else(|| Error::interface(format!("interface '{}' has no MAC", name)))?;

        let host_ip4 = iface
            .ips
            .iter()
            .find_map(|net| match net {
                IpNetwork::V4(v4) => Some(*v4),
                IpNetwork::V6(_) => None,
            })
            .ok_or_else(|| Error::InvalidIp4(format!("interface '{}' has no IPv4", name)))?;

        let router_net = Ipv4Network::new(router_ip4, host_ip4.prefix())
            .map_err(|e| Error::InvalidIp4(e.to_string()))?;

        Self::new(mac, host_ip4, router_mac, router_net)
    }

    /// Host IPv4 address
    pub fn host_addr4(&self) -> Ipv4Addr {
        self.host_ip4.ip()
    }

    /// Router IPv4 address
    pub fn router_addr4(&self) -> Ipv4Addr {
        self.router_ip4.ip()
    }
}

impl fmt::Display for NicInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host mac={} ip={} router mac={} ip={} lan={}",
            self.host_mac,
            self.host_ip4,
            self.router_mac,
            self.router_ip4.ip(),
            self.home_lan4
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_valid() {
        let info = NicInfo::new(
            MacAddr([0, 1, 2, 3, 4, 5]),
            net("192.168.0.129/24"),
            MacAddr([0, 1, 2, 3, 4, 6]),
            net("192.168.0.11/24"),
        )
        .unwrap();
        assert_eq!(info.home_lan4, net("192.168.0.0/24"));
        assert_eq!(info.host_addr4(), Ipv4Addr::new(192, 168, 0, 129));
        assert_eq!(info.router_addr4(), Ipv4Addr::new(192, 168, 0, 11));
    }

    #[test]
    fn test_new_rejects_unspecified() {
        let err = NicInfo::new(
            MacAddr::zero(),
            net("0.0.0.0/24"),
            MacAddr::zero(),
            net("192.168.0.1/24"),
        );
        assert!(matches!(err, Err(Error::InvalidIp4(_))));
    }

    #[test]
    fn test_new_rejects_router_outside_lan() {
        let err = NicInfo::new(
            MacAddr([0, 1, 2, 3, 4, 5]),
            net("192.168.0.129/24"),
            MacAddr([0, 1, 2, 3, 4, 6]),
            net("10.0.0.1/24"),
        );
        assert!(matches!(err, Err(Error::InvalidIp4(_))));
    }
}
