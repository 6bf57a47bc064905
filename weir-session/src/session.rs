//! Host inventory
//!
//! Two-level inventory: a MAC table whose entries carry the operator-facing
//! capture flag, and a host table keyed by IP whose rows point back at their
//! MAC entry. Lock order: table lock before row lock. Taking a row lock while
//! holding the table lock is fine; the reverse deadlocks.

use crate::notify::Notification;
use crate::stats::SessionStats;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use weir_core::{Addr, HuntStage, MacAddr, NicInfo, RawSocket};

/// Mutable state of a MAC entry, guarded by the entry's row lock.
pub struct MacRow {
    /// Operator toggled this device for MITM
    pub captured: bool,
    pub last_seen: SystemTime,
    /// Last IPv4 offered to this device by the DHCP engine
    pub ip4_offer: Option<Ipv4Addr>,
    /// Back-references to hosts currently carrying this MAC, by IP key
    pub hosts: Vec<IpAddr>,
}

/// One physical device, keyed by MAC.
pub struct MacEntry {
    pub mac: MacAddr,
    row: RwLock<MacRow>,
}

impl MacEntry {
    fn new(mac: MacAddr) -> Arc<Self> {
        Arc::new(Self {
            mac,
            row: RwLock::new(MacRow {
                captured: false,
                last_seen: SystemTime::now(),
                ip4_offer: None,
                hosts: Vec::new(),
            }),
        })
    }

    pub fn row(&self) -> RwLockReadGuard<'_, MacRow> {
        self.row.read()
    }

    pub fn row_mut(&self) -> RwLockWriteGuard<'_, MacRow> {
        self.row.write()
    }
}

/// Mutable state of a host, guarded by the host's row lock.
pub struct HostRow {
    pub mac_entry: Arc<MacEntry>,
    pub online: bool,
    pub last_seen: SystemTime,
    pub arp_stage: HuntStage,
    pub dhcp4_stage: HuntStage,
    pub dhcp_name: Option<String>,
    pub mdns_name: Option<String>,
}

impl HostRow {
    /// Aggregate hunt stage: the maximum across the protocol substores.
    pub fn stage(&self) -> HuntStage {
        self.arp_stage.max(self.dhcp4_stage)
    }
}

/// One IP endpoint on the LAN.
pub struct Host {
    pub ip: IpAddr,
    row: RwLock<HostRow>,
}

impl Host {
    pub fn row(&self) -> RwLockReadGuard<'_, HostRow> {
        self.row.read()
    }

    pub fn row_mut(&self) -> RwLockWriteGuard<'_, HostRow> {
        self.row.write()
    }

    /// The MAC currently carrying this IP.
    pub fn mac(&self) -> MacAddr {
        self.row.read().mac_entry.mac
    }

    /// MAC + IP address pair for this host.
    pub fn addr(&self) -> Addr {
        Addr::new(self.mac(), self.ip)
    }
}

/// Copyable snapshot of one host row, as returned by [`Session::get_table`].
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub addr: Addr,
    pub online: bool,
    pub captured: bool,
    pub stage: HuntStage,
    pub last_seen: SystemTime,
    pub dhcp_name: Option<String>,
    pub mdns_name: Option<String>,
}

struct Tables {
    hosts: HashMap<IpAddr, Arc<Host>>,
    macs: HashMap<MacAddr, Arc<MacEntry>>,
}

/// Shared capture session: NIC addressing, the raw socket, the inventory,
/// statistics and the notification sender.
pub struct Session {
    nic: NicInfo,
    sock: Arc<dyn RawSocket>,
    tables: RwLock<Tables>,
    stats: SessionStats,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

impl Session {
    /// Create a session over an already-open raw socket. The socket stays
    /// owned by the caller; closing it is not the session's job.
    pub fn new(
        nic: NicInfo,
        sock: Arc<dyn RawSocket>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            nic,
            sock,
            tables: RwLock::new(Tables {
                hosts: HashMap::with_capacity(64),
                macs: HashMap::with_capacity(64),
            }),
            stats: SessionStats::new(),
            notify_tx,
        });
        (session, notify_rx)
    }

    pub fn nic(&self) -> &NicInfo {
        &self.nic
    }

    pub fn socket(&self) -> &Arc<dyn RawSocket> {
        &self.sock
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Number of hosts in the table.
    pub fn host_count(&self) -> usize {
        self.tables.read().hosts.len()
    }

    /// Number of MAC entries in the table.
    pub fn mac_count(&self) -> usize {
        self.tables.read().macs.len()
    }

    /// Find the host for `ip`, or create it linked to `mac`.
    ///
    /// If the IP already maps to a different MAC the host is re-homed to the
    /// new MAC entry and its hunt stages reset to Normal: the device behind
    /// the IP has changed.
    pub fn find_or_create_host(&self, mac: MacAddr, ip: IpAddr) -> (Arc<Host>, bool) {
        let now = SystemTime::now();

        // common path: host exists and the MAC still matches
        {
            let tables = self.tables.read();
            if let Some(host) = tables.hosts.get(&ip) {
                let mut row = host.row_mut();
                if row.mac_entry.mac == mac {
                    row.last_seen = now;
                    row.mac_entry.row_mut().last_seen = now;
                    drop(row);
                    return (Arc::clone(host), true);
                }
            }
        }

        let mut tables = self.tables.write();
        if let Some(host) = tables.hosts.get(&ip).cloned() {
            let mut row = host.row_mut();
            if row.mac_entry.mac != mac {
                warn!(ip = %ip, old = %row.mac_entry.mac, new = %mac, "duplicate IP, re-homing host");
                row.mac_entry.row_mut().hosts.retain(|h| *h != ip);
                let entry = Self::mac_entry_locked(&mut tables, mac);
                entry.row_mut().hosts.push(ip);
                row.mac_entry = entry;
                row.arp_stage = HuntStage::Normal;
                row.dhcp4_stage = HuntStage::Normal;
            }
            row.last_seen = now;
            row.mac_entry.row_mut().last_seen = now;
            drop(row);
            return (host, true);
        }

        let entry = Self::mac_entry_locked(&mut tables, mac);
        entry.row_mut().hosts.push(ip);
        entry.row_mut().last_seen = now;
        // online starts false so the first sighting emits a transition
        let host = Arc::new(Host {
            ip,
            row: RwLock::new(HostRow {
                mac_entry: entry,
                online: false,
                last_seen: now,
                arp_stage: HuntStage::Normal,
                dhcp4_stage: HuntStage::Normal,
                dhcp_name: None,
                mdns_name: None,
            }),
        });
        tables.hosts.insert(ip, Arc::clone(&host));
        debug!(ip = %ip, mac = %mac, "new host");
        (host, false)
    }

    fn mac_entry_locked(tables: &mut Tables, mac: MacAddr) -> Arc<MacEntry> {
        Arc::clone(tables.macs.entry(mac).or_insert_with(|| MacEntry::new(mac)))
    }

    /// Host lookup by IP.
    pub fn find_ip(&self, ip: IpAddr) -> Option<Arc<Host>> {
        self.tables.read().hosts.get(&ip).cloned()
    }

    /// MAC entry lookup.
    pub fn find_mac(&self, mac: MacAddr) -> Option<Arc<MacEntry>> {
        self.tables.read().macs.get(&mac).cloned()
    }

    /// All addresses currently carried by `mac`.
    pub fn find_by_mac(&self, mac: MacAddr) -> Vec<Addr> {
        let tables = self.tables.read();
        match tables.macs.get(&mac) {
            Some(entry) => entry
                .row()
                .hosts
                .iter()
                .map(|ip| Addr::new(mac, *ip))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Flag a device for MITM. Creates the MAC entry if unseen.
    pub fn capture(&self, mac: MacAddr) -> Vec<Addr> {
        let mut tables = self.tables.write();
        let entry = Self::mac_entry_locked(&mut tables, mac);
        let mut row = entry.row_mut();
        if !row.captured {
            row.captured = true;
            info!(mac = %mac, "capture started");
        }
        row.hosts.iter().map(|ip| Addr::new(mac, *ip)).collect()
    }

    /// Clear the MITM flag for a device.
    pub fn release(&self, mac: MacAddr) -> Vec<Addr> {
        let tables = self.tables.read();
        match tables.macs.get(&mac) {
            Some(entry) => {
                let mut row = entry.row_mut();
                if row.captured {
                    row.captured = false;
                    info!(mac = %mac, "capture stopped");
                }
                row.hosts.iter().map(|ip| Addr::new(mac, *ip)).collect()
            }
            None => Vec::new(),
        }
    }

    /// True when the operator has flagged this MAC for MITM.
    pub fn is_captured(&self, mac: MacAddr) -> bool {
        self.tables
            .read()
            .macs
            .get(&mac)
            .map(|e| e.row().captured)
            .unwrap_or(false)
    }

    /// Record the IPv4 the DHCP engine last offered to `mac`.
    pub fn set_ip4_offer(&self, mac: MacAddr, ip: Ipv4Addr) {
        let mut tables = self.tables.write();
        let entry = Self::mac_entry_locked(&mut tables, mac);
        entry.row_mut().ip4_offer = Some(ip);
    }

    /// The IPv4 last offered to `mac`, if any.
    pub fn ip4_offer(&self, mac: MacAddr) -> Option<Ipv4Addr> {
        self.tables
            .read()
            .macs
            .get(&mac)
            .and_then(|e| e.row().ip4_offer)
    }

    /// Bind `ip` to `mac` as observed through DHCP and record the host name.
    pub fn dhcpv4_update(&self, mac: MacAddr, ip: Ipv4Addr, name: Option<&str>) -> Arc<Host> {
        let (host, _) = self.find_or_create_host(mac, IpAddr::V4(ip));
        if let Some(name) = name {
            let mut row = host.row_mut();
            if row.dhcp_name.as_deref() != Some(name) {
                row.dhcp_name = Some(name.to_string());
            }
        }
        self.mark_online(&host);
        host
    }

    /// Mark a host online, emitting a notification on the transition.
    pub fn mark_online(&self, host: &Arc<Host>) {
        let notification = {
            let mut row = host.row_mut();
            row.last_seen = SystemTime::now();
            if row.online {
                return;
            }
            row.online = true;
            Notification {
                addr: Addr::new(row.mac_entry.mac, host.ip),
                online: true,
                dhcp_name: row.dhcp_name.clone(),
                mdns_name: row.mdns_name.clone(),
            }
        };
        info!(addr = %notification.addr, "host online");
        let _ = self.notify_tx.send(notification);
    }

    /// Mark a host offline, emitting a notification on the transition.
    pub fn set_offline(&self, host: &Arc<Host>) {
        let notification = {
            let mut row = host.row_mut();
            if !row.online {
                return;
            }
            row.online = false;
            Notification {
                addr: Addr::new(row.mac_entry.mac, host.ip),
                online: false,
                dhcp_name: row.dhcp_name.clone(),
                mdns_name: row.mdns_name.clone(),
            }
        };
        info!(addr = %notification.addr, "host offline");
        let _ = self.notify_tx.send(notification);
    }

    /// Snapshot the host table.
    pub fn get_table(&self) -> Vec<HostInfo> {
        let tables = self.tables.read();
        tables
            .hosts
            .values()
            .map(|host| {
                let row = host.row();
                let captured = row.mac_entry.row().captured;
                HostInfo {
                    addr: Addr::new(row.mac_entry.mac, host.ip),
                    online: row.online,
                    captured,
                    stage: row.stage(),
                    last_seen: row.last_seen,
                    dhcp_name: row.dhcp_name.clone(),
                    mdns_name: row.mdns_name.clone(),
                }
            })
            .collect()
    }

    /// Periodic maintenance sweep.
    ///
    /// Hosts idle past `probe_after` are returned for the caller to confirm
    /// with a unicast ARP request. Hosts idle past `offline_after` are marked
    /// offline (with notification); entries idle past `purge_after` are
    /// removed from both tables.
    pub fn purge(
        &self,
        now: SystemTime,
        probe_after: Duration,
        offline_after: Duration,
        purge_after: Duration,
    ) -> Vec<Addr> {
        let probe_cutoff = now - probe_after;
        let offline_cutoff = now - offline_after;
        let delete_cutoff = now - purge_after;

        let mut probe = Vec::new();
        let mut offline = Vec::new();
        let mut delete = Vec::new();

        {
            let tables = self.tables.read();
            for host in tables.hosts.values() {
                let row = host.row();
                if !row.online && row.last_seen < delete_cutoff {
                    delete.push(host.ip);
                    continue;
                }
                if row.online && row.last_seen < offline_cutoff {
                    offline.push(Arc::clone(host));
                    continue;
                }
                if row.online && row.last_seen < probe_cutoff {
                    probe.push(Addr::new(row.mac_entry.mac, host.ip));
                }
            }
        }

        for host in &offline {
            self.set_offline(host);
        }

        if !delete.is_empty() {
            let mut tables = self.tables.write();
            for ip in delete {
                if let Some(host) = tables.hosts.remove(&ip) {
                    let row = host.row();
                    row.mac_entry.row_mut().hosts.retain(|h| *h != ip);
                    let mac = row.mac_entry.mac;
                    let empty = row.mac_entry.row().hosts.is_empty();
                    drop(row);
                    if empty {
                        tables.macs.remove(&mac);
                    }
                    debug!(ip = %ip, "host purged");
                }
            }
        }

        probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::MemSocket;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x00, 0x02, 0x03, 0x04, 0x05, last])
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 0, last))
    }

    fn test_session() -> (Arc<Session>, mpsc::UnboundedReceiver<Notification>) {
        let nic = NicInfo::new(
            MacAddr([0xaa, 0, 0, 0, 0, 1]),
            "192.168.0.129/24".parse().unwrap(),
            MacAddr([0xaa, 0, 0, 0, 0, 2]),
            "192.168.0.11/24".parse().unwrap(),
        )
        .unwrap();
        Session::new(nic, MemSocket::new())
    }

    #[test]
    fn test_find_or_create_idempotent() {
        let (session, _rx) = test_session();
        let (h1, existed1) = session.find_or_create_host(mac(1), ip(2));
        let (h2, existed2) = session.find_or_create_host(mac(1), ip(2));
        assert!(!existed1);
        assert!(existed2);
        assert!(Arc::ptr_eq(&h1, &h2));
        assert_eq!(session.host_count(), 1);
        assert_eq!(session.mac_count(), 1);
    }

    #[test]
    fn test_host_mac_invariant() {
        let (session, _rx) = test_session();
        let (host, _) = session.find_or_create_host(mac(1), ip(2));
        let row = host.row();
        assert_eq!(row.mac_entry.mac, host.mac());
        assert!(row.mac_entry.row().hosts.contains(&host.ip));
    }

    #[test]
    fn test_duplicate_ip_rehomes() {
        let (session, _rx) = test_session();
        let (host, _) = session.find_or_create_host(mac(1), ip(2));
        host.row_mut().arp_stage = HuntStage::Hunt;

        let (same, existed) = session.find_or_create_host(mac(9), ip(2));
        assert!(existed);
        assert!(Arc::ptr_eq(&host, &same));
        assert_eq!(host.mac(), mac(9));
        assert_eq!(host.row().stage(), HuntStage::Normal);

        // old MAC entry no longer references the IP
        let old = session.find_mac(mac(1)).unwrap();
        assert!(old.row().hosts.is_empty());
        let new = session.find_mac(mac(9)).unwrap();
        assert_eq!(new.row().hosts, vec![ip(2)]);
        assert_eq!(session.host_count(), 1);
    }

    #[test]
    fn test_find_by_mac() {
        let (session, _rx) = test_session();
        session.find_or_create_host(mac(1), ip(2));
        session.find_or_create_host(mac(1), ip(3));
        let addrs = session.find_by_mac(mac(1));
        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().all(|a| a.mac == mac(1)));
    }

    #[test]
    fn test_capture_flag() {
        let (session, _rx) = test_session();
        assert!(!session.is_captured(mac(1)));
        session.capture(mac(1));
        assert!(session.is_captured(mac(1)));
        session.release(mac(1));
        assert!(!session.is_captured(mac(1)));
    }

    #[test]
    fn test_online_offline_notifications() {
        let (session, mut rx) = test_session();
        let (host, _) = session.find_or_create_host(mac(1), ip(2));

        session.mark_online(&host);
        session.mark_online(&host); // no duplicate notification
        session.set_offline(&host);

        let n1 = rx.try_recv().unwrap();
        assert!(n1.online);
        assert_eq!(n1.addr.ip, ip(2));
        let n2 = rx.try_recv().unwrap();
        assert!(!n2.online);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dhcpv4_update_sets_name() {
        let (session, mut rx) = test_session();
        let host = session.dhcpv4_update(mac(1), Ipv4Addr::new(192, 168, 0, 2), Some("printer"));
        assert_eq!(host.row().dhcp_name.as_deref(), Some("printer"));
        let n = rx.try_recv().unwrap();
        assert_eq!(n.dhcp_name.as_deref(), Some("printer"));
    }

    #[test]
    fn test_ip4_offer_roundtrip() {
        let (session, _rx) = test_session();
        assert_eq!(session.ip4_offer(mac(1)), None);
        session.set_ip4_offer(mac(1), Ipv4Addr::new(192, 168, 0, 5));
        assert_eq!(session.ip4_offer(mac(1)), Some(Ipv4Addr::new(192, 168, 0, 5)));
    }

    #[test]
    fn test_get_table_snapshot() {
        let (session, _rx) = test_session();
        let (host, _) = session.find_or_create_host(mac(1), ip(2));
        session.mark_online(&host);
        session.capture(mac(1));
        session.find_or_create_host(mac(3), ip(4));

        let table = session.get_table();
        assert_eq!(table.len(), 2);
        let row = table.iter().find(|h| h.addr.ip == ip(2)).unwrap();
        assert!(row.online);
        assert!(row.captured);
        assert_eq!(row.addr.mac, mac(1));
        let other = table.iter().find(|h| h.addr.ip == ip(4)).unwrap();
        assert!(!other.online);
        assert!(!other.captured);
    }

    #[test]
    fn test_purge_lifecycle() {
        let (session, mut rx) = test_session();
        let (host, _) = session.find_or_create_host(mac(1), ip(2));
        session.mark_online(&host);
        let _ = rx.try_recv();

        let minute = Duration::from_secs(60);
        let hour = Duration::from_secs(3600);

        // freshly seen: nothing to do
        let probes = session.purge(SystemTime::now(), Duration::from_secs(30), minute * 5, hour);
        assert!(probes.is_empty());

        // a minute idle: probe candidate
        let future = SystemTime::now() + minute;
        let probes = session.purge(future, Duration::from_secs(30), minute * 5, hour);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].mac, mac(1));

        // six minutes idle: offline + notification
        let future = SystemTime::now() + minute * 6;
        session.purge(future, Duration::from_secs(30), minute * 5, hour);
        assert!(!host.row().online);
        let n = rx.try_recv().unwrap();
        assert!(!n.online);

        // over an hour idle: removed from both tables
        let future = SystemTime::now() + hour + minute;
        session.purge(future, Duration::from_secs(30), minute * 5, hour);
        assert_eq!(session.host_count(), 0);
        assert_eq!(session.mac_count(), 0);
    }
}
