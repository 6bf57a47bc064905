//! DHCP subnets and address pools
//!
//! Two subnets are served: net1 shadows the real gateway, net2 re-homes
//! captured clients to this host with a filtered resolver.

use super::packet::{OptionCode, OptionMap};
use bytes::{BufMut, BytesMut};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;
use weir_core::{Error, HuntStage, Result};

/// Default lease duration when the config does not set one.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(4 * 3600);

/// Which of the two served subnets a lease belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubnetId {
    Net1,
    Net2,
}

/// Subnet configuration, persisted alongside the lease table so a config
/// change on restart can be detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConfig {
    pub lan: Ipv4Network,
    pub default_gw: Ipv4Addr,
    pub dhcp_server: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    #[serde(default)]
    pub first_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub last_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub lease_secs: Option<u64>,
}

/// A served subnet: resolved pool bounds, reply options and the rotating
/// allocation cursor.
pub struct Subnet {
    pub id: SubnetId,
    pub stage: HuntStage,
    pub config: SubnetConfig,
    first: Ipv4Addr,
    last: Ipv4Addr,
    duration: Duration,
    options: OptionMap,
    cursor: u32,
}

impl Subnet {
    pub fn new(id: SubnetId, config: SubnetConfig, stage: HuntStage) -> Result<Self> {
        if !config.lan.contains(config.default_gw) {
            return Err(Error::InvalidIp4(format!(
                "gateway {} outside {}",
                config.default_gw, config.lan
            )));
        }
        if config.dns_server.is_unspecified() || config.dhcp_server.is_unspecified() {
            return Err(Error::InvalidIp4("subnet server addresses unset".into()));
        }

        let network = u32::from(config.lan.network());
        let broadcast = u32::from(config.lan.broadcast());
        if broadcast - network < 2 {
            return Err(Error::InvalidIp4(format!("{} has no host range", config.lan)));
        }
        let first = config.first_ip.unwrap_or_else(|| Ipv4Addr::from(network + 1));
        let last = config.last_ip.unwrap_or_else(|| Ipv4Addr::from(broadcast - 1));
        if !config.lan.contains(first) || !config.lan.contains(last) || first > last {
            return Err(Error::InvalidIp4(format!(
                "pool {}-{} outside {}",
                first, last, config.lan
            )));
        }

        let duration = config
            .lease_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LEASE);

        let mut options = OptionMap::new();
        options.insert(OptionCode::SUBNET_MASK, config.lan.mask().octets().to_vec());
        options.insert(OptionCode::ROUTER, config.default_gw.octets().to_vec());
        options.insert(OptionCode::DNS_SERVER, config.dns_server.octets().to_vec());
        options.insert(OptionCode::SERVER_ID, config.dhcp_server.octets().to_vec());

        Ok(Self {
            id,
            stage,
            config,
            first,
            last,
            duration,
            options,
            cursor: 0,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.config.lan.contains(ip)
    }

    /// Reply options for this subnet. Lease time is appended at send time.
    pub fn options(&self) -> OptionMap {
        self.options.clone()
    }

    /// Append classless static routes (options 121 and 249) plus the
    /// classful option 33, routing `dst` through `via`. Served to net2
    /// clients so traffic for the home LAN transits this host.
    pub fn append_route_options(&mut self, dst: Ipv4Network, via: Ipv4Addr) {
        let prefix = dst.prefix();
        let significant = ((prefix as usize) + 7) / 8;
        let mut value = BytesMut::with_capacity(1 + significant + 4);
        value.put_u8(prefix);
        value.put_slice(&dst.network().octets()[..significant]);
        value.put_slice(&via.octets());
        let value = value.to_vec();

        self.options.insert(OptionCode::CLASSLESS_ROUTE, value.clone());
        self.options.insert(OptionCode::CLASSLESS_ROUTE_MS, value);

        let mut classful = BytesMut::with_capacity(8);
        classful.put_slice(&dst.network().octets());
        classful.put_slice(&via.octets());
        self.options
            .insert(OptionCode::STATIC_ROUTE, classful.to_vec());
    }

    /// Number of assignable addresses: the configured range minus the
    /// gateway and server when they fall inside it.
    pub fn pool_size(&self) -> usize {
        let lo = u32::from(self.first);
        let hi = u32::from(self.last);
        let mut size = (hi - lo + 1) as usize;
        for excluded in [self.config.default_gw, self.config.dhcp_server] {
            let v = u32::from(excluded);
            if v >= lo && v <= hi {
                size -= 1;
            }
        }
        size
    }

    /// Next free IP, scanning sequentially from the rotating cursor and
    /// skipping the gateway, the server and everything in `in_use`.
    pub fn next_free(&mut self, in_use: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
        let lo = u32::from(self.first);
        let hi = u32::from(self.last);
        let span = hi - lo + 1;

        for i in 0..span {
            let slot = (self.cursor + i) % span;
            let ip = Ipv4Addr::from(lo + slot);
            if ip == self.config.default_gw || ip == self.config.dhcp_server {
                continue;
            }
            if in_use.contains(&ip) {
                continue;
            }
            self.cursor = (slot + 1) % span;
            return Some(ip);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SubnetConfig {
        SubnetConfig {
            lan: "192.168.0.0/24".parse().unwrap(),
            default_gw: Ipv4Addr::new(192, 168, 0, 11),
            dhcp_server: Ipv4Addr::new(192, 168, 0, 129),
            dns_server: Ipv4Addr::new(192, 168, 0, 11),
            first_ip: None,
            last_ip: None,
            lease_secs: None,
        }
    }

    #[test]
    fn test_default_pool_bounds() {
        let mut subnet = Subnet::new(SubnetId::Net1, config(), HuntStage::Normal).unwrap();
        let ip = subnet.next_free(&HashSet::new()).unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(subnet.pool_size(), 252); // 254 minus gw and server
    }

    #[test]
    fn test_netfilter_pool_skips_gateway() {
        let mut cfg = config();
        cfg.lan = "192.168.0.128/25".parse().unwrap();
        cfg.default_gw = Ipv4Addr::new(192, 168, 0, 129);
        let mut subnet = Subnet::new(SubnetId::Net2, cfg, HuntStage::Redirected).unwrap();
        // .129 is both gateway and server; the first offer is .130
        assert_eq!(
            subnet.next_free(&HashSet::new()),
            Some(Ipv4Addr::new(192, 168, 0, 130))
        );
    }

    #[test]
    fn test_next_free_skips_in_use_and_exhausts() {
        let mut cfg = config();
        cfg.first_ip = Some(Ipv4Addr::new(192, 168, 0, 1));
        cfg.last_ip = Some(Ipv4Addr::new(192, 168, 0, 4));
        let mut subnet = Subnet::new(SubnetId::Net1, cfg, HuntStage::Normal).unwrap();

        let mut in_use = HashSet::new();
        for _ in 0..4 {
            let ip = subnet.next_free(&in_use).unwrap();
            assert!(in_use.insert(ip), "duplicate allocation {}", ip);
        }
        assert_eq!(subnet.next_free(&in_use), None);
    }

    #[test]
    fn test_explicit_range_respected() {
        let mut cfg = config();
        cfg.first_ip = Some(Ipv4Addr::new(192, 168, 0, 10));
        cfg.last_ip = Some(Ipv4Addr::new(192, 168, 0, 12));
        let mut subnet = Subnet::new(SubnetId::Net1, cfg, HuntStage::Normal).unwrap();
        assert_eq!(subnet.pool_size(), 3);
        let mut in_use = HashSet::new();
        while let Some(ip) = subnet.next_free(&in_use) {
            assert!(u32::from(ip) >= u32::from(Ipv4Addr::new(192, 168, 0, 10)));
            assert!(u32::from(ip) <= u32::from(Ipv4Addr::new(192, 168, 0, 12)));
            in_use.insert(ip);
        }
        assert_eq!(in_use.len(), 3);
    }

    #[test]
    fn test_bad_configs_rejected() {
        let mut cfg = config();
        cfg.default_gw = Ipv4Addr::new(10, 0, 0, 1);
        assert!(Subnet::new(SubnetId::Net1, cfg, HuntStage::Normal).is_err());

        let mut cfg = config();
        cfg.first_ip = Some(Ipv4Addr::new(10, 0, 0, 1));
        assert!(Subnet::new(SubnetId::Net1, cfg, HuntStage::Normal).is_err());
    }

    #[test]
    fn test_route_options() {
        let mut cfg = config();
        cfg.lan = "192.168.0.128/25".parse().unwrap();
        cfg.default_gw = Ipv4Addr::new(192, 168, 0, 129);
        let mut subnet = Subnet::new(SubnetId::Net2, cfg, HuntStage::Redirected).unwrap();
        subnet.append_route_options(
            "192.168.0.0/24".parse().unwrap(),
            Ipv4Addr::new(192, 168, 0, 129),
        );
        let options = subnet.options();
        let route = options.get(OptionCode::CLASSLESS_ROUTE).unwrap();
        assert_eq!(route, &[24, 192, 168, 0, 192, 168, 0, 129]);
        assert_eq!(
            options.get(OptionCode::CLASSLESS_ROUTE_MS).unwrap(),
            route
        );
        assert_eq!(
            options.get(OptionCode::STATIC_ROUTE).unwrap(),
            &[192, 168, 0, 0, 192, 168, 0, 129]
        );
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let cfg = config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SubnetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
