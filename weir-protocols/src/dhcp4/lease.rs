//! Lease table and its on-disk form
//!
//! Leases are keyed by client identifier with linear lookups by MAC and IP,
//! mirroring how small LAN tables are actually queried. At most one
//! Allocated lease exists per client and per IP.

use super::subnet::{SubnetConfig, SubnetId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use weir_core::{MacAddr, Result};

/// Lease lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseState {
    Free,
    Discover,
    Allocated,
}

/// One DHCP lease.
///
/// Invariants: `Allocated` implies `ip` is set, inside the subnet range and
/// unexpired; `Discover` implies `ip_offer` is set and `ip` is not.
#[derive(Debug, Clone)]
pub struct Lease {
    pub client_id: Vec<u8>,
    pub state: LeaseState,
    pub mac: MacAddr,
    pub ip: Option<Ipv4Addr>,
    pub ip_offer: Option<Ipv4Addr>,
    pub xid: u32,
    pub name: String,
    pub expiry: SystemTime,
    pub count: u32,
    pub subnet: SubnetId,
}

impl Lease {
    fn new(client_id: Vec<u8>, mac: MacAddr, subnet: SubnetId) -> Self {
        Self {
            client_id,
            state: LeaseState::Free,
            mac,
            ip: None,
            ip_offer: None,
            xid: 0,
            name: String::new(),
            expiry: UNIX_EPOCH,
            count: 0,
            subnet,
        }
    }

    /// Drop any address held and return to the free state.
    pub fn free(&mut self) {
        self.state = LeaseState::Free;
        self.ip = None;
        self.ip_offer = None;
    }
}

/// The lease table.
#[derive(Default)]
pub struct LeaseTable {
    map: HashMap<Vec<u8>, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, client_id: &[u8]) -> Option<&Lease> {
        self.map.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &[u8]) -> Option<&mut Lease> {
        self.map.get_mut(client_id)
    }

    /// Find or create the lease for a client id, refreshing MAC and subnet.
    pub fn find_or_create(
        &mut self,
        client_id: &[u8],
        mac: MacAddr,
        subnet: SubnetId,
    ) -> &mut Lease {
        let lease = self
            .map
            .entry(client_id.to_vec())
            .or_insert_with(|| Lease::new(client_id.to_vec(), mac, subnet));
        lease.mac = mac;
        lease
    }

    pub fn find_by_mac(&self, mac: MacAddr) -> Option<&Lease> {
        self.map.values().find(|l| l.mac == mac)
    }

    pub fn find_by_ip(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.map
            .values()
            .find(|l| l.ip == Some(ip) || l.ip_offer == Some(ip))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.map.values()
    }

    /// Addresses that must not be handed out for `subnet`: everything
    /// allocated or currently on offer.
    pub fn in_use(&self, subnet: SubnetId) -> HashSet<Ipv4Addr> {
        self.map
            .values()
            .filter(|l| l.subnet == subnet)
            .flat_map(|l| [l.ip, l.ip_offer])
            .flatten()
            .collect()
    }

    /// Transition every lease past its expiry to Free. Returns how many.
    pub fn expire(&mut self, now: SystemTime) -> usize {
        let mut freed = 0;
        for lease in self.map.values_mut() {
            if lease.state == LeaseState::Allocated && lease.expiry < now {
                info!(mac = %lease.mac, ip = ?lease.ip, "dhcp lease expired");
                lease.free();
                freed += 1;
            }
        }
        freed
    }
}

/// Serialized form of one lease.
#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    client_id: Vec<u8>,
    state: LeaseState,
    mac: [u8; 6],
    ip: Option<Ipv4Addr>,
    ip_offer: Option<Ipv4Addr>,
    xid: u32,
    name: String,
    expiry_unix: u64,
    subnet: SubnetId,
}

impl From<&Lease> for LeaseRecord {
    fn from(l: &Lease) -> Self {
        Self {
            client_id: l.client_id.clone(),
            state: l.state,
            mac: l.mac.octets(),
            ip: l.ip,
            ip_offer: l.ip_offer,
            xid: l.xid,
            name: l.name.clone(),
            expiry_unix: l
                .expiry
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            subnet: l.subnet,
        }
    }
}

impl From<LeaseRecord> for Lease {
    fn from(r: LeaseRecord) -> Self {
        Self {
            client_id: r.client_id,
            state: r.state,
            mac: MacAddr(r.mac),
            ip: r.ip,
            ip_offer: r.ip_offer,
            xid: r.xid,
            name: r.name,
            expiry: UNIX_EPOCH + Duration::from_secs(r.expiry_unix),
            count: 0,
            subnet: r.subnet,
        }
    }
}

/// On-disk state: both subnet configs plus the lease table.
#[derive(Serialize, Deserialize)]
struct PersistFile {
    net1: SubnetConfig,
    net2: SubnetConfig,
    leases: Vec<LeaseRecord>,
}

/// Write subnet configs and the lease table to `path`.
pub fn save(
    path: &Path,
    net1: &SubnetConfig,
    net2: &SubnetConfig,
    table: &LeaseTable,
) -> Result<()> {
    let file = PersistFile {
        net1: net1.clone(),
        net2: net2.clone(),
        leases: table.iter().map(LeaseRecord::from).collect(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| weir_core::Error::Interface(format!("lease encode: {}", e)))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load the lease table from `path`, discarding it when the file is missing,
/// unreadable, or the stored subnet configs differ from `net1`/`net2`.
pub fn load(path: &Path, net1: &SubnetConfig, net2: &SubnetConfig) -> Option<LeaseTable> {
    let json = std::fs::read_to_string(path).ok()?;
    let file: PersistFile = match serde_json::from_str(&json) {
        Ok(f) => f,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "dhcp lease file unreadable, resetting");
            return None;
        }
    };
    if file.net1 != *net1 || file.net2 != *net2 {
        info!(path = %path.display(), "dhcp config changed, resetting lease table");
        return None;
    }
    let mut table = LeaseTable::new();
    for record in file.leases {
        let lease: Lease = record.into();
        table.map.insert(lease.client_id.clone(), lease);
    }
    Some(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC1: MacAddr = MacAddr([0x00, 0x02, 0x03, 0x04, 0x05, 0x01]);

    fn allocated(id: u8, ip: Ipv4Addr) -> Lease {
        Lease {
            client_id: vec![id],
            state: LeaseState::Allocated,
            mac: MAC1,
            ip: Some(ip),
            ip_offer: None,
            xid: 7,
            name: "dev".into(),
            expiry: SystemTime::now() + Duration::from_secs(3600),
            count: 0,
            subnet: SubnetId::Net1,
        }
    }

    #[test]
    fn test_find_or_create_and_lookup() {
        let mut table = LeaseTable::new();
        let lease = table.find_or_create(&[1], MAC1, SubnetId::Net1);
        lease.state = LeaseState::Discover;
        lease.ip_offer = Some(Ipv4Addr::new(192, 168, 0, 1));

        assert_eq!(table.len(), 1);
        assert!(table.get(&[1]).is_some());
        assert!(table.find_by_mac(MAC1).is_some());
        assert!(table.find_by_ip(Ipv4Addr::new(192, 168, 0, 1)).is_some());

        // same client id does not grow the table
        table.find_or_create(&[1], MAC1, SubnetId::Net1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_in_use_counts_offers_and_allocations() {
        let mut table = LeaseTable::new();
        table.map.insert(vec![1], allocated(1, Ipv4Addr::new(192, 168, 0, 1)));
        let offered = table.find_or_create(&[2], MAC1, SubnetId::Net1);
        offered.state = LeaseState::Discover;
        offered.ip_offer = Some(Ipv4Addr::new(192, 168, 0, 2));

        let in_use = table.in_use(SubnetId::Net1);
        assert!(in_use.contains(&Ipv4Addr::new(192, 168, 0, 1)));
        assert!(in_use.contains(&Ipv4Addr::new(192, 168, 0, 2)));
        assert!(table.in_use(SubnetId::Net2).is_empty());
    }

    #[test]
    fn test_expire() {
        let mut table = LeaseTable::new();
        let mut old = allocated(1, Ipv4Addr::new(192, 168, 0, 1));
        old.expiry = SystemTime::now() - Duration::from_secs(1);
        table.map.insert(vec![1], old);
        table.map.insert(vec![2], allocated(2, Ipv4Addr::new(192, 168, 0, 2)));

        assert_eq!(table.expire(SystemTime::now()), 1);
        assert_eq!(table.get(&[1]).unwrap().state, LeaseState::Free);
        assert_eq!(table.get(&[1]).unwrap().ip, None);
        assert_eq!(table.get(&[2]).unwrap().state, LeaseState::Allocated);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.json");

        let net1 = SubnetConfig {
            lan: "192.168.0.0/24".parse().unwrap(),
            default_gw: Ipv4Addr::new(192, 168, 0, 11),
            dhcp_server: Ipv4Addr::new(192, 168, 0, 129),
            dns_server: Ipv4Addr::new(192, 168, 0, 11),
            first_ip: None,
            last_ip: None,
            lease_secs: None,
        };
        let net2 = SubnetConfig {
            lan: "192.168.0.128/25".parse().unwrap(),
            default_gw: Ipv4Addr::new(192, 168, 0, 129),
            ..net1.clone()
        };

        let mut table = LeaseTable::new();
        table.map.insert(vec![1], allocated(1, Ipv4Addr::new(192, 168, 0, 1)));
        save(&path, &net1, &net2, &table).unwrap();

        let loaded = load(&path, &net1, &net2).unwrap();
        assert_eq!(loaded.len(), 1);
        let lease = loaded.get(&[1]).unwrap();
        assert_eq!(lease.state, LeaseState::Allocated);
        assert_eq!(lease.ip, Some(Ipv4Addr::new(192, 168, 0, 1)));
        assert_eq!(lease.mac, MAC1);

        // config drift discards the table
        let mut drifted = net1.clone();
        drifted.default_gw = Ipv4Addr::new(192, 168, 0, 12);
        assert!(load(&path, &drifted, &net2).is_none());

        // missing file
        assert!(load(&dir.path().join("missing.json"), &net1, &net2).is_none());
    }
}
